use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use url::Url;

use super::{UpstreamClient, UpstreamConnection, UpstreamError};
use crate::codec::NdjsonDecoder;
use crate::jsonrpc::Frame;

const INCOMING_CHANNEL_CAPACITY: usize = 64;

/// Upstream client for a streamable-HTTP server. `send` opens a POST whose
/// NDJSON response body is read until it ends; every frame read is pushed
/// onto the shared incoming channel. Calls are serialized per client with an
/// async mutex, matching the spec's "one in-flight POST at a time" rule.
pub struct StreamableUpstreamClient {
    http: reqwest::Client,
    endpoint: Url,
    tx: mpsc::Sender<Frame>,
    send_lock: Mutex<()>,
}

impl StreamableUpstreamClient {
    pub async fn connect(endpoint: &Url) -> Result<UpstreamConnection, UpstreamError> {
        let (tx, rx) = mpsc::channel(INCOMING_CHANNEL_CAPACITY);
        let client = Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.clone(),
            tx,
            send_lock: Mutex::new(()),
        };
        Ok(UpstreamConnection { client: Arc::new(client), incoming: rx })
    }
}

#[async_trait]
impl UpstreamClient for StreamableUpstreamClient {
    async fn send(&self, frame: Frame) -> Result<(), UpstreamError> {
        let _guard = self.send_lock.lock().await;

        let resp = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/x-ndjson, application/json")
            .json(&frame)
            .send()
            .await
            .map_err(|e| UpstreamError::SendFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(UpstreamError::SendFailed(format!("upstream returned {}", resp.status())));
        }

        let mut stream = resp.bytes_stream();
        let mut decoder = NdjsonDecoder::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UpstreamError::SendFailed(e.to_string()))?;
            for item in decoder.feed(&chunk) {
                match item {
                    Ok(f) => {
                        if self.tx.send(f).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => log::warn!("dropping unparseable NDJSON line from upstream: {e}"),
                }
            }
        }
        if let Some(item) = decoder.flush() {
            match item {
                Ok(f) => {
                    let _ = self.tx.send(f).await;
                }
                Err(e) => log::warn!("dropping unparseable trailing NDJSON line from upstream: {e}"),
            }
        }

        Ok(())
    }

    async fn close(&self) {}
}
