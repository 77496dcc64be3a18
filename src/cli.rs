use clap::{Parser, ValueEnum};

#[derive(Parser)]
#[command(version, about = "Transport-translating reverse proxy for MCP", long_about = None)]
pub struct Cli {
    /// Transport the frontend (client-facing) listener speaks.
    #[arg(long = "input-mode", value_enum, default_value_t = TransportModeArg::Sse)]
    pub input_mode: TransportModeArg,

    /// Transport used to reach the upstream MCP server.
    #[arg(long = "output-mode", value_enum, default_value_t = TransportModeArg::Streamable)]
    pub output_mode: TransportModeArg,

    /// Port the frontend listener binds.
    #[arg(long, default_value_t = 3000)]
    pub port: u16,

    /// Upstream URL. Defaults to a localhost address shaped for --output-mode.
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Path the SSE frontend's long-lived GET stream is served on.
    #[arg(long = "sse-endpoint", default_value = "/sse")]
    pub sse_endpoint: String,

    /// Path the streamable-HTTP frontend accepts POSTs on.
    #[arg(long = "http-endpoint", default_value = "/mcp")]
    pub http_endpoint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportModeArg {
    Sse,
    Streamable,
}
