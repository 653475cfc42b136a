//! Three-tier config resolution: a TOML file supplies defaults, environment
//! variables (fixed `HOSTRPCD_` prefix) override the file, and CLI flags
//! override everything. Resolves into a single `hostrpc::BindDescriptor`
//! plus the servicer tuning knobs the file/env layers can also carry.

use facet::Facet;
use hostrpc::{Address, BindDescriptor, parse_address};

const ENV_PREFIX: &str = "HOSTRPCD_";

/// Shape of the optional TOML config file. Every field is optional so a
/// file only needs to state what it wants to override from the built-in
/// defaults.
#[derive(Facet, Debug, Default)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub module_name: Option<String>,
    pub module_path: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub ca_path: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// The fully-resolved set a `server` run boots from.
#[derive(Debug, Clone)]
pub struct ResolvedServerConfig {
    pub bind: BindDescriptor,
    pub module_path: String,
    pub timeout_ms: u64,
}

fn env_override(field: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{field}")).ok()
}

pub fn load_file_config(path: Option<&str>) -> eyre::Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("failed to read config file {path}: {e}"))?;
    facet_toml::from_str(&content)
        .map_err(|e| eyre::eyre!("failed to parse config file {path}: {e}"))
}

/// Merges file < env < CLI for the fields a `server` run needs, then parses
/// the winning address string into a `BindDescriptor`.
pub fn resolve_server_config(
    file: FileConfig,
    cli_bind: Option<String>,
    cli_module_name: Option<String>,
    cli_module_path: Option<String>,
) -> eyre::Result<ResolvedServerConfig> {
    let bind_raw = cli_bind
        .or_else(|| env_override("BIND"))
        .or(file.bind)
        .ok_or_else(|| eyre::eyre!("no bind address given (file, HOSTRPCD_BIND, or --bind)"))?;
    let module_name = cli_module_name
        .or_else(|| env_override("MODULE_NAME"))
        .or(file.module_name)
        .unwrap_or_else(|| "plugin".to_string());
    let module_path = cli_module_path
        .or_else(|| env_override("MODULE_PATH"))
        .or(file.module_path)
        .ok_or_else(|| eyre::eyre!("no module path given (file, HOSTRPCD_MODULE_PATH, or --module-path)"))?;
    let timeout_ms = env_override("TIMEOUT_MS")
        .and_then(|v| v.parse().ok())
        .or(file.timeout_ms)
        .unwrap_or(5_000);

    let address: Address = parse_address(&bind_raw).map_err(|e| eyre::eyre!(e.to_string()))?;
    let tls = match (file.cert_path, file.key_path) {
        (Some(cert_path), Some(key_path)) => Some(hostrpc::TlsMaterial {
            cert_path,
            key_path,
            ca_path: file.ca_path,
        }),
        _ => None,
    };

    Ok(ResolvedServerConfig {
        bind: BindDescriptor {
            address,
            tls,
            module_name,
        },
        module_path,
        timeout_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_file() {
        let file = FileConfig {
            bind: Some("127.0.0.1:1".to_string()),
            module_path: Some("/file/plugin.so".to_string()),
            ..Default::default()
        };
        let resolved = resolve_server_config(
            file,
            Some("127.0.0.1:9000".to_string()),
            None,
            Some("/cli/plugin.so".to_string()),
        )
        .unwrap();
        assert_eq!(
            resolved.bind.address,
            Address::Tcp {
                host: "127.0.0.1".to_string(),
                port: 9000
            }
        );
        assert_eq!(resolved.module_path, "/cli/plugin.so");
        assert_eq!(resolved.bind.module_name, "plugin");
    }

    #[test]
    fn falls_back_to_file_when_cli_absent() {
        let file = FileConfig {
            bind: Some("unix:/tmp/host.sock".to_string()),
            module_path: Some("/file/plugin.so".to_string()),
            module_name: Some("echo".to_string()),
            ..Default::default()
        };
        let resolved = resolve_server_config(file, None, None, None).unwrap();
        assert_eq!(
            resolved.bind.address,
            Address::Unix {
                path: "/tmp/host.sock".to_string()
            }
        );
        assert_eq!(resolved.bind.module_name, "echo");
    }

    #[test]
    fn missing_bind_address_is_an_error() {
        let err = resolve_server_config(FileConfig::default(), None, None, Some("x".to_string()));
        assert!(err.is_err());
    }

    #[test]
    fn missing_module_path_is_an_error() {
        let err = resolve_server_config(
            FileConfig::default(),
            Some("127.0.0.1:9000".to_string()),
            None,
            None,
        );
        assert!(err.is_err());
    }
}
