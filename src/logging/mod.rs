/// Initializes the process-wide logger. Logging here is strictly a
/// side-channel: nothing in the bridge or frontend ever branches on whether a
/// log line was written, and no request/response body is logged at info or
/// above, only sizes and ids.
pub fn init() {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    std::env::set_var("RUST_LOG", format!("{level},pingora_core=warn,pingora_proxy=warn"));
    env_logger::init();
}
