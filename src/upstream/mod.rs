pub mod sse;
pub mod streamable;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::config::{TransportMode, UPSTREAM_CONNECT_TIMEOUT};
use crate::jsonrpc::Frame;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    #[error("upstream handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("failed to send frame to upstream: {0}")]
    SendFailed(String),
}

/// One upstream connection dedicated to a single session. `send` pushes a
/// frontend-originated frame upstream; replies (and, for an SSE upstream,
/// anything the server pushes unprompted) arrive on the `incoming` channel
/// handed back by `connect`.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, frame: Frame) -> Result<(), UpstreamError>;
    async fn close(&self);
}

pub struct UpstreamConnection {
    pub client: std::sync::Arc<dyn UpstreamClient>,
    pub incoming: mpsc::Receiver<Frame>,
}

pub async fn connect(mode: TransportMode, endpoint: &Url) -> Result<UpstreamConnection, UpstreamError> {
    match tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, connect_inner(mode, endpoint)).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::HandshakeFailed("connect timed out".to_string())),
    }
}

async fn connect_inner(mode: TransportMode, endpoint: &Url) -> Result<UpstreamConnection, UpstreamError> {
    match mode {
        TransportMode::Sse => sse::SseUpstreamClient::connect(endpoint).await,
        TransportMode::Streamable => streamable::StreamableUpstreamClient::connect(endpoint).await,
    }
}
