pub mod bridge;
pub mod cli;
pub mod codec;
pub mod config;
pub mod frontend;
pub mod jsonrpc;
pub mod logging;
pub mod session;
pub mod upstream;
