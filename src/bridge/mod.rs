use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use crate::config::Settings;
use crate::jsonrpc::{Frame, FrameShape, INTERNAL_ERROR, INVALID_REQUEST};
use crate::session::{new_admitting_session, FrontendHandle, Session, SessionTable, SseOutbound};
use crate::upstream::{self, UpstreamError};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("session not found")]
    SessionNotFound,
    #[error("upstream connect timed out")]
    ConnectTimeout,
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// The outcome of admitting a one-shot streamable-HTTP frontend request.
pub enum StreamableOutcome {
    /// Upstream connect failed; carries the single JSON-RPC error frame the
    /// frontend should write as its entire (one-line) response body.
    Failed(Frame),
    /// The frame was a notification (no `id`): it was forwarded upstream and
    /// the session is already closed. A notification has no reply to wait
    /// for, so the caller should close the response body with nothing in it.
    Accepted,
    /// Session established; the caller should forward `frame` to the
    /// upstream via the bridge, then drain `incoming` until it sees the
    /// correlated reply (or the channel closes).
    Ready { session: Arc<Session>, incoming: mpsc::Receiver<Frame> },
}

/// Owns the session table and drives the Admitting -> Connecting -> Active
/// -> Closing lifecycle described for both frontend transports. Routing
/// between frontend and upstream frames lives here so both frontend variants
/// share identical forwarding and error-synthesis rules.
pub struct SessionBridge {
    table: SessionTable,
    settings: Arc<Settings>,
}

impl SessionBridge {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { table: SessionTable::new(), settings }
    }

    pub fn session_count(&self) -> usize {
        self.table.len()
    }

    /// Admits an SSE-frontend session at the `Admitting` phase: mints a
    /// session id and registers it in the table before anything about the
    /// upstream is known, so the caller can write the `endpoint` event (the
    /// frontend's first SSE record) ahead of attempting to connect. `out` is
    /// the frontend's outbound SSE writer channel.
    pub fn begin_sse_session(&self, out: mpsc::Sender<SseOutbound>) -> Arc<Session> {
        let session = new_admitting_session(FrontendHandle::Sse(out), self.settings.input_mode, self.settings.output_mode);
        self.table.insert(session.clone());
        session
    }

    /// Moves an admitted SSE session into `Connecting`/`Active`: connects
    /// upstream, attaches it to the session, and spawns the
    /// upstream-to-frontend pump. On failure, the session is torn down and
    /// removed from the table.
    pub async fn connect_sse_session(&self, session: &Arc<Session>) -> Result<(), BridgeError> {
        let conn = match upstream::connect(self.settings.output_mode, &self.settings.upstream_endpoint).await {
            Ok(conn) => conn,
            Err(e) => {
                self.close_session(&session.id).await;
                return Err(BridgeError::Upstream(e));
            }
        };
        session.set_upstream(conn.client).await;
        self.spawn_upstream_pump(session.clone(), conn.incoming);
        Ok(())
    }

    fn spawn_upstream_pump(&self, session: Arc<Session>, mut incoming: mpsc::Receiver<Frame>) {
        let task_session = session.clone();
        let handle = tokio::spawn(async move {
            while let Some(frame) = incoming.recv().await {
                let out = match &task_session.frontend {
                    FrontendHandle::Sse(tx) => tx,
                    FrontendHandle::Streamable => break,
                };
                if out.send(SseOutbound::Frame(frame)).await.is_err() {
                    break;
                }
            }
            task_session.mark_closed();
            log::info!("session {} closing: upstream stream ended", task_session.id);
        });
        // The session was just inserted by the caller and is not yet shared
        // with any other task, so the lock is always immediately available.
        if let Ok(mut slot) = session.upstream_pump.try_lock() {
            *slot = Some(handle);
        }
    }

    /// Routes a frame the frontend received from its client toward the
    /// session's upstream, synthesizing an error reply back to the frontend
    /// on malformed input or upstream send failure.
    pub async fn route_frontend_frame(&self, session: &Session, frame: Frame) {
        match frame.shape() {
            FrameShape::Request | FrameShape::Notification => {
                if let Err(e) = session.send_upstream(frame.clone()).await {
                    log::warn!("send to upstream failed for session {}: {e}", session.id);
                    if let Some(id) = frame.id.clone() {
                        let err = Frame::error_response(
                            Some(id),
                            INTERNAL_ERROR,
                            "Internal error",
                            Some(json!({ "upstream": e.to_string() })),
                        );
                        self.deliver_to_frontend(session, err).await;
                    }
                }
            }
            FrameShape::Response => {
                log::warn!("dropping response-shaped frame sent by frontend on session {}: not routable", session.id);
            }
            FrameShape::Invalid => {
                log::warn!("dropping malformed frame from frontend on session {}", session.id);
                let err = Frame::error_response(frame.id.clone(), INVALID_REQUEST, "Invalid Request", None);
                self.deliver_to_frontend(session, err).await;
            }
        }
    }

    async fn deliver_to_frontend(&self, session: &Session, frame: Frame) {
        if let FrontendHandle::Sse(tx) = &session.frontend {
            let _ = tx.send(SseOutbound::Frame(frame)).await;
        }
    }

    pub fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        self.table.get(session_id)
    }

    pub async fn close_session(&self, session_id: &str) {
        if let Some(session) = self.table.remove(session_id) {
            session.mark_closed();
            session.close_upstream().await;
            if let Some(handle) = session.heartbeat.lock().await.take() {
                handle.abort();
            }
            if let Some(handle) = session.upstream_pump.lock().await.take() {
                handle.abort();
            }
        }
    }

    pub async fn shutdown(&self) {
        for session in self.table.all() {
            self.close_session(&session.id).await;
        }
    }

    /// Admits a one-shot streamable-HTTP frontend request: connects upstream
    /// (registering an ephemeral session for observability), and forwards
    /// `frame` if it's routable.
    pub async fn open_streamable(&self, frame: Frame) -> StreamableOutcome {
        let conn = match upstream::connect(self.settings.output_mode, &self.settings.upstream_endpoint).await {
            Ok(conn) => conn,
            Err(e) => {
                return StreamableOutcome::Failed(Frame::error_response(
                    frame.id.clone(),
                    INTERNAL_ERROR,
                    "Internal error",
                    Some(json!({ "reason": e.to_string() })),
                ));
            }
        };

        let session = new_admitting_session(FrontendHandle::Streamable, self.settings.input_mode, self.settings.output_mode);
        self.table.insert(session.clone());
        session.set_upstream(conn.client).await;

        match frame.shape() {
            FrameShape::Request => {
                if let Err(e) = session.send_upstream(frame.clone()).await {
                    self.close_session(&session.id).await;
                    return StreamableOutcome::Failed(Frame::error_response(
                        frame.id.clone(),
                        INTERNAL_ERROR,
                        "Internal error",
                        Some(json!({ "upstream": e.to_string() })),
                    ));
                }
            }
            FrameShape::Notification => {
                // No id means no reply to correlate against; forward it and
                // close the session immediately rather than holding the
                // response open waiting for a frame that will never arrive.
                if let Err(e) = session.send_upstream(frame.clone()).await {
                    log::warn!("send to upstream failed for session {}: {e}", session.id);
                }
                self.close_session(&session.id).await;
                return StreamableOutcome::Accepted;
            }
            _ => {
                let err_id = frame.id.clone();
                self.close_session(&session.id).await;
                return StreamableOutcome::Failed(Frame::error_response(err_id, INVALID_REQUEST, "Invalid Request", None));
            }
        }

        StreamableOutcome::Ready { session, incoming: conn.incoming }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamClient;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;
    use url::Url;

    /// A fake upstream client that echoes every request back as a result,
    /// used to drive the bridge's routing logic without real network I/O.
    struct EchoUpstream {
        tx: AsyncMutex<Option<mpsc::Sender<Frame>>>,
        sends: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl UpstreamClient for EchoUpstream {
        async fn send(&self, frame: Frame) -> Result<(), UpstreamError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(UpstreamError::SendFailed("simulated failure".into()));
            }
            if let Some(id) = frame.id.clone() {
                let reply = Frame {
                    jsonrpc: "2.0".into(),
                    id: Some(id),
                    method: None,
                    params: None,
                    result: Some(serde_json::json!({"echo": true})),
                    error: None,
                    extra: Default::default(),
                };
                if let Some(tx) = self.tx.lock().await.as_ref() {
                    let _ = tx.send(reply).await;
                }
            }
            Ok(())
        }

        async fn close(&self) {}
    }

    fn settings() -> Arc<Settings> {
        Arc::new(Settings {
            port: 0,
            input_mode: crate::config::TransportMode::Sse,
            output_mode: crate::config::TransportMode::Streamable,
            upstream_endpoint: Url::parse("http://127.0.0.1:1/mcp").unwrap(),
            sse_endpoint: "/sse".into(),
            http_endpoint: "/mcp".into(),
        })
    }

    async fn make_session_with_echo(fail: bool) -> (Arc<Session>, mpsc::Receiver<SseOutbound>) {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (up_tx, _up_rx) = mpsc::channel(8);
        let upstream = Arc::new(EchoUpstream { tx: AsyncMutex::new(Some(up_tx)), sends: AtomicUsize::new(0), fail });
        let session = new_admitting_session(FrontendHandle::Sse(out_tx), crate::config::TransportMode::Sse, crate::config::TransportMode::Streamable);
        session.set_upstream(upstream).await;
        (session, out_rx)
    }

    #[tokio::test]
    async fn invalid_frame_gets_synthetic_error_reply() {
        let bridge = SessionBridge::new(settings());
        let (session, mut out_rx) = make_session_with_echo(false).await;
        let invalid = Frame {
            jsonrpc: "2.0".into(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
            extra: Default::default(),
        };
        bridge.route_frontend_frame(&session, invalid).await;
        let item = out_rx.recv().await.unwrap();
        match item {
            SseOutbound::Frame(f) => assert_eq!(f.error.unwrap().code, INVALID_REQUEST),
            _ => panic!("expected a frame"),
        }
    }

    #[tokio::test]
    async fn upstream_send_failure_synthesizes_internal_error() {
        let bridge = SessionBridge::new(settings());
        let (session, mut out_rx) = make_session_with_echo(true).await;
        let request = Frame {
            jsonrpc: "2.0".into(),
            id: Some(crate::jsonrpc::RequestId::Number(7)),
            method: Some("ping".into()),
            params: None,
            result: None,
            error: None,
            extra: Default::default(),
        };
        bridge.route_frontend_frame(&session, request).await;
        let item = out_rx.recv().await.unwrap();
        match item {
            SseOutbound::Frame(f) => {
                assert_eq!(f.error.as_ref().unwrap().code, INTERNAL_ERROR);
                assert_eq!(f.id, Some(crate::jsonrpc::RequestId::Number(7)));
            }
            _ => panic!("expected a frame"),
        }
    }

    #[tokio::test]
    async fn close_session_removes_from_table() {
        let bridge = SessionBridge::new(settings());
        let (session, _out_rx) = make_session_with_echo(false).await;
        bridge.table.insert(session.clone());
        assert_eq!(bridge.session_count(), 1);
        bridge.close_session(&session.id).await;
        assert_eq!(bridge.session_count(), 0);
        assert!(!session.is_live());
    }
}
