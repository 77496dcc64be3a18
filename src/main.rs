use std::sync::Arc;

use clap::Parser;
use pingora::server::Server;

use mcp_transport_proxy::bridge::SessionBridge;
use mcp_transport_proxy::cli::Cli;
use mcp_transport_proxy::config::{Settings, SHUTDOWN_GRACE_PERIOD};
use mcp_transport_proxy::frontend::ProxyService;
use mcp_transport_proxy::logging;

fn main() {
    let cli = Cli::parse();
    logging::init();

    let settings = match Settings::from_cli(cli) {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            log::error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let bridge = Arc::new(SessionBridge::new(settings.clone()));

    spawn_shutdown_watcher(bridge.clone());

    let mut server = match Server::new(None) {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to create server: {e}");
            std::process::exit(1);
        }
    };
    server.bootstrap();

    let proxy_service = ProxyService::new(bridge, settings.clone());
    let mut http_service = pingora_proxy::http_proxy_service(&server.configuration, proxy_service);
    http_service.add_tcp(&format!("0.0.0.0:{}", settings.port));
    server.add_service(http_service);

    log::info!("{} {} listening on 0.0.0.0:{}", mcp_transport_proxy::config::SERVER_NAME, mcp_transport_proxy::config::SERVER_VERSION, settings.port);
    log::info!("frontend transport: {}", settings.input_mode.as_str());
    log::info!("upstream transport: {} at {}", settings.output_mode.as_str(), settings.upstream_endpoint);
    log::info!("sse endpoint: {}", settings.sse_endpoint);
    log::info!("streamable endpoint: {}", settings.http_endpoint);
    log::info!("health endpoint: /health");

    server.run_forever();
}

/// `pingora`'s `run_forever` takes over the calling thread with its own
/// runtime, so session draining on shutdown runs on a dedicated thread with
/// a small runtime of its own. On SIGINT/SIGTERM every session is asked to
/// close, given up to `SHUTDOWN_GRACE_PERIOD` to finish, and the process
/// then exits cleanly rather than waiting on pingora's own exit path.
fn spawn_shutdown_watcher(bridge: Arc<SessionBridge>) {
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                log::error!("failed to start shutdown watcher runtime: {e}");
                return;
            }
        };
        rt.block_on(async move {
            wait_for_shutdown_signal().await;
            log::info!("shutdown signal received, draining sessions");
            bridge.shutdown().await;
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
            log::info!("shutdown grace period elapsed, exiting");
            std::process::exit(0);
        });
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to install SIGTERM handler: {e}");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
