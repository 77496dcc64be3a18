use std::time::Duration;

use url::Url;

use crate::cli::{Cli, TransportModeArg};

/// Fixed path prefix POSTs to an SSE session land on: `<MESSAGE_BASE>/<session_id>`.
/// Not exposed on the CLI surface; the SSE frontend itself advertises the
/// full path via the `endpoint` event, so clients never need to know this
/// constant, only honor what they're told.
pub const MESSAGE_BASE: &str = "/messages";

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

pub const SERVER_NAME: &str = "mcp-transport-proxy";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Sse,
    Streamable,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Sse => "sse",
            TransportMode::Streamable => "streamable",
        }
    }
}

impl From<TransportModeArg> for TransportMode {
    fn from(value: TransportModeArg) -> Self {
        match value {
            TransportModeArg::Sse => TransportMode::Sse,
            TransportModeArg::Streamable => TransportMode::Streamable,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid --endpoint url: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub input_mode: TransportMode,
    pub output_mode: TransportMode,
    pub upstream_endpoint: Url,
    pub sse_endpoint: String,
    pub http_endpoint: String,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let input_mode = TransportMode::from(cli.input_mode);
        let output_mode = TransportMode::from(cli.output_mode);

        let endpoint = match cli.endpoint {
            Some(raw) => Url::parse(&raw)?,
            None => default_upstream_endpoint(output_mode, cli.port),
        };

        Ok(Settings {
            port: cli.port,
            input_mode,
            output_mode,
            upstream_endpoint: endpoint,
            sse_endpoint: cli.sse_endpoint,
            http_endpoint: cli.http_endpoint,
        })
    }
}

fn default_upstream_endpoint(mode: TransportMode, port: u16) -> Url {
    let path = match mode {
        TransportMode::Sse => "sse",
        TransportMode::Streamable => "mcp",
    };
    Url::parse(&format!("http://127.0.0.1:{port}/{path}")).expect("hardcoded default url is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn default_endpoint_derives_from_output_mode() {
        let cli = Cli::parse_from(["mcp-transport-proxy", "--output-mode", "sse"]);
        let settings = Settings::from_cli(cli).unwrap();
        assert_eq!(settings.upstream_endpoint.path(), "/sse");
    }

    #[test]
    fn explicit_endpoint_overrides_default() {
        let cli = Cli::parse_from(["mcp-transport-proxy", "--endpoint", "http://example.com:9000/mcp"]);
        let settings = Settings::from_cli(cli).unwrap();
        assert_eq!(settings.upstream_endpoint.as_str(), "http://example.com:9000/mcp");
    }
}
