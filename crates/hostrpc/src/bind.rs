//! `BindDescriptor`: the one shape every config source (file/env/CLI)
//! resolves into before it reaches the servicer constructor.

use hosterr::HostError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp { host: String, port: u16 },
    Unix { path: String },
    UnixAbstract { name: String },
}

/// Credential paths for a TLS-wrapped listener. Carried through config
/// resolution so a `BindDescriptor` is self-contained; actually terminating
/// TLS on the accepted stream is left to the binary's transport setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert_path: String,
    pub key_path: String,
    pub ca_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindDescriptor {
    pub address: Address,
    pub tls: Option<TlsMaterial>,
    pub module_name: String,
}

/// Parses the address schemes from §6: `host:port` (TCP), `unix:<path>`,
/// `unix-abstract:<name>`, and a bare `dns:` prefix that's stripped before
/// the rest is treated as `host:port`.
pub fn parse_address(raw: &str) -> Result<Address, HostError> {
    if let Some(rest) = raw.strip_prefix("unix-abstract:") {
        return Ok(Address::UnixAbstract {
            name: rest.to_string(),
        });
    }
    if let Some(rest) = raw.strip_prefix("unix:") {
        return Ok(Address::Unix {
            path: rest.to_string(),
        });
    }
    let raw = raw.strip_prefix("dns:").unwrap_or(raw);
    let (host, port) = raw.rsplit_once(':').ok_or_else(|| {
        HostError::Transport(format!("address '{raw}' is missing a port"))
    })?;
    let port: u16 = port
        .parse()
        .map_err(|_| HostError::Transport(format!("invalid port in address '{raw}'")))?;
    Ok(Address::Tcp {
        host: host.to_string(),
        port,
    })
}

/// The accepted-port sentinel reported for Unix-domain listeners, which
/// have no TCP port of their own.
pub const UNIX_SOCKET_PORT_SENTINEL: u16 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_address() {
        assert_eq!(
            parse_address("127.0.0.1:9000").unwrap(),
            Address::Tcp {
                host: "127.0.0.1".to_string(),
                port: 9000
            }
        );
    }

    #[test]
    fn parses_dns_prefixed_tcp_address() {
        assert_eq!(
            parse_address("dns:example.internal:9000").unwrap(),
            Address::Tcp {
                host: "example.internal".to_string(),
                port: 9000
            }
        );
    }

    #[test]
    fn parses_unix_socket_address() {
        assert_eq!(
            parse_address("unix:/tmp/plugin.sock").unwrap(),
            Address::Unix {
                path: "/tmp/plugin.sock".to_string()
            }
        );
    }

    #[test]
    fn parses_unix_abstract_address() {
        assert_eq!(
            parse_address("unix-abstract:myplugin").unwrap(),
            Address::UnixAbstract {
                name: "myplugin".to_string()
            }
        );
    }

    #[test]
    fn rejects_address_without_port() {
        assert!(parse_address("just-a-host").is_err());
    }
}
