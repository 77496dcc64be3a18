use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use url::Url;

use super::{UpstreamClient, UpstreamConnection, UpstreamError};
use crate::codec::{SseDecoder, SseEvent};
use crate::jsonrpc::{Frame, FrameShape};

const INCOMING_CHANNEL_CAPACITY: usize = 64;

/// Upstream client for an SSE-speaking server: the long-lived GET stream is
/// read in a background task, and `send` posts to whatever message path the
/// server advertised in its `endpoint` event.
pub struct SseUpstreamClient {
    http: reqwest::Client,
    message_url: Url,
    closed: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SseUpstreamClient {
    pub async fn connect(endpoint: &Url) -> Result<UpstreamConnection, UpstreamError> {
        let http = reqwest::Client::new();
        let resp = http
            .get(endpoint.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(UpstreamError::Unavailable(format!("upstream returned {}", resp.status())));
        }

        let mut byte_stream = resp.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut message_url: Option<Url> = None;
        let mut pending_frames: Vec<Frame> = Vec::new();

        while message_url.is_none() {
            let Some(chunk) = byte_stream.next().await else {
                return Err(UpstreamError::HandshakeFailed("stream closed before endpoint event".to_string()));
            };
            let chunk = chunk.map_err(|e| UpstreamError::Unavailable(e.to_string()))?;
            for record in decoder.feed(&chunk) {
                let record = match record {
                    Ok(r) => r,
                    Err(e) => {
                        log::warn!("malformed SSE record while handshaking with upstream: {e}");
                        continue;
                    }
                };
                match crate::codec::sse::classify(record) {
                    SseEvent::Endpoint(path) => {
                        message_url = Some(endpoint.join(&path).map_err(|e| {
                            UpstreamError::HandshakeFailed(format!("invalid endpoint path {path:?}: {e}"))
                        })?);
                    }
                    SseEvent::Message(frame) => {
                        if frame.shape() == FrameShape::Request {
                            log::warn!("dropping server-initiated request from upstream during handshake: unsupported");
                        } else {
                            pending_frames.push(frame);
                        }
                    }
                    SseEvent::Heartbeat => {}
                    SseEvent::Other { event, .. } => {
                        log::debug!("ignoring unrecognized upstream SSE event {event:?} during handshake");
                    }
                    SseEvent::ParseError(e) => {
                        log::warn!("upstream sent an SSE message event with invalid JSON: {e}");
                    }
                }
            }
        }
        let message_url = message_url.expect("loop only exits once message_url is set");

        let (tx, rx) = mpsc::channel(INCOMING_CHANNEL_CAPACITY);
        for frame in pending_frames {
            let _ = tx.send(frame).await;
        }

        let closed = Arc::new(AtomicBool::new(false));
        let pump_closed = closed.clone();
        let pump = tokio::spawn(async move {
            while let Some(chunk) = byte_stream.next().await {
                if pump_closed.load(Ordering::SeqCst) {
                    break;
                }
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        log::warn!("upstream SSE stream read error: {e}");
                        break;
                    }
                };
                for record in decoder.feed(&chunk) {
                    let record = match record {
                        Ok(r) => r,
                        Err(e) => {
                            log::warn!("malformed SSE record from upstream: {e}");
                            continue;
                        }
                    };
                    match crate::codec::sse::classify(record) {
                        SseEvent::Message(frame) => {
                            if frame.shape() == FrameShape::Request {
                                log::warn!("dropping server-initiated request from upstream: unsupported");
                                continue;
                            }
                            if tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                        SseEvent::Endpoint(_) | SseEvent::Heartbeat => {}
                        SseEvent::Other { event, .. } => {
                            log::warn!("dropping unsupported server-initiated upstream event {event:?}");
                        }
                        SseEvent::ParseError(e) => {
                            log::warn!("dropping unparseable upstream SSE message: {e}");
                        }
                    }
                }
            }
        });

        Ok(UpstreamConnection {
            client: Arc::new(Self { http, message_url, closed, pump: Mutex::new(Some(pump)) }),
            incoming: rx,
        })
    }
}

#[async_trait]
impl UpstreamClient for SseUpstreamClient {
    async fn send(&self, frame: Frame) -> Result<(), UpstreamError> {
        let resp = self
            .http
            .post(self.message_url.clone())
            .json(&frame)
            .send()
            .await
            .map_err(|e| UpstreamError::SendFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(UpstreamError::SendFailed(format!("upstream returned {}", resp.status())));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
        }
    }
}
