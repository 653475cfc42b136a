//! Command-line surface: `server`, `client`, `modules`.

use facet::Facet;
use facet_args as args;

/// Boots a servicer from a resolved bind descriptor, loads the named
/// plugin, self-verifies, and serves until interrupted.
#[derive(Facet, Debug)]
pub struct ServerArgs {
    /// Path to a TOML config file supplying defaults
    #[facet(args::named)]
    pub config: Option<String>,

    /// Address to bind: `host:port`, `unix:<path>`, or `unix-abstract:<name>`
    #[facet(args::named)]
    pub bind: Option<String>,

    /// Name reported for the loaded module
    #[facet(args::named)]
    pub module_name: Option<String>,

    /// Path to the plugin's compiled dynamic library
    #[facet(args::named)]
    pub module_path: Option<String>,
}

/// Opens a client against a running servicer and issues one call.
#[derive(Facet, Debug)]
pub struct ClientArgs {
    /// Address of the servicer to connect to
    #[facet(args::named)]
    pub bind: String,

    #[facet(args::subcommand)]
    pub verb: ClientVerb,
}

#[derive(Facet, Debug)]
#[repr(u8)]
pub enum ClientVerb {
    /// Sends a heartbeat and prints whether it was acknowledged
    Heartbeat(HeartbeatArgs),
    /// Runs the register handshake
    Register(RegisterArgs),
    /// Invokes a route after registering
    Request(RequestArgs),
}

#[derive(Facet, Debug)]
pub struct HeartbeatArgs {
    /// Seconds the servicer should sleep before acknowledging
    #[facet(args::named, default)]
    pub delay: f64,
}

#[derive(Facet, Debug)]
pub struct RegisterArgs {
    /// Positional arguments and `key=value` keyword arguments, freely mixed
    #[facet(args::positional, default)]
    pub tokens: Vec<String>,
}

#[derive(Facet, Debug)]
pub struct RequestArgs {
    /// HTTP-style method the route was declared under
    #[facet(args::named)]
    pub method: String,

    /// Route path to invoke
    #[facet(args::named)]
    pub path: String,

    /// Positional arguments and `key=value` keyword arguments, freely mixed
    #[facet(args::positional, default)]
    pub tokens: Vec<String>,
}

/// Loads a plugin without serving and prints its declared capabilities.
#[derive(Facet, Debug)]
pub struct ModulesArgs {
    /// Name reported for the loaded module
    #[facet(args::named, default)]
    pub module_name: Option<String>,

    /// Path to the plugin's compiled dynamic library
    #[facet(args::positional)]
    pub module_path: String,
}

#[derive(Facet, Debug)]
#[repr(u8)]
pub enum Command {
    /// Boot a servicer and serve until interrupted
    Server(ServerArgs),
    /// Issue one ad-hoc call against a running servicer
    Client(ClientArgs),
    /// Inspect a plugin's capabilities without serving
    Modules(ModulesArgs),
}

#[derive(Facet, Debug)]
pub struct TopArgs {
    #[facet(args::subcommand)]
    pub command: Command,
}

pub fn parse() -> Result<Command, String> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let refs: Vec<&str> = raw.iter().map(String::as_str).collect();
    let parsed: TopArgs = facet_args::from_slice(&refs).map_err(|e| format!("{e:?}"))?;
    Ok(parsed.command)
}

/// Splits a flat token list into positional values and `key=value` pairs,
/// the shape `client register`/`client request` both need.
pub fn split_tokens(tokens: &[String]) -> (Vec<String>, Vec<(String, String)>) {
    let mut positional = Vec::new();
    let mut kwargs = Vec::new();
    for token in tokens {
        match token.split_once('=') {
            Some((k, v)) => kwargs.push((k.to_string(), v.to_string())),
            None => positional.push(token.clone()),
        }
    }
    (positional, kwargs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_positional_and_keyword_tokens() {
        let tokens = vec![
            "alice".to_string(),
            "limit=10".to_string(),
            "bob".to_string(),
            "sort=name".to_string(),
        ];
        let (positional, kwargs) = split_tokens(&tokens);
        assert_eq!(positional, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(
            kwargs,
            vec![
                ("limit".to_string(), "10".to_string()),
                ("sort".to_string(), "name".to_string()),
            ]
        );
    }

    #[test]
    fn token_without_equals_is_positional() {
        let tokens = vec!["just-a-value".to_string()];
        let (positional, kwargs) = split_tokens(&tokens);
        assert_eq!(positional, vec!["just-a-value".to_string()]);
        assert!(kwargs.is_empty());
    }
}
