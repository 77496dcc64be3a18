use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::TransportMode;
use crate::jsonrpc::Frame;
use crate::upstream::{UpstreamClient, UpstreamError};

/// Outbound items a frontend SSE stream can be asked to write. Kept distinct
/// from a bare `Frame` because heartbeats and the one-time endpoint
/// advertisement have no JSON-RPC payload at all.
#[derive(Debug)]
pub enum SseOutbound {
    Frame(Frame),
    Endpoint(String),
    Heartbeat,
}

/// The write side of whichever transport this session's frontend speaks.
/// The streamable-HTTP frontend has no cross-task writer: the request
/// handler that created the session is the only task that ever writes to
/// it, so there's nothing to hand out here.
pub enum FrontendHandle {
    Sse(mpsc::Sender<SseOutbound>),
    Streamable,
}

/// A session exists, and is visible in the table, before its upstream
/// connection is known to have succeeded (the `Admitting`/`Connecting`
/// phases of the lifecycle): `upstream` starts `None` and is filled in by
/// [`Session::set_upstream`] once `connect` returns.
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub frontend: FrontendHandle,
    pub frontend_transport: TransportMode,
    upstream: Mutex<Option<Arc<dyn UpstreamClient>>>,
    pub upstream_transport: TransportMode,
    live: AtomicBool,
    pub heartbeat: Mutex<Option<JoinHandle<()>>>,
    pub upstream_pump: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn mark_closed(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub async fn set_upstream(&self, client: Arc<dyn UpstreamClient>) {
        *self.upstream.lock().await = Some(client);
    }

    pub async fn send_upstream(&self, frame: Frame) -> Result<(), UpstreamError> {
        match self.upstream.lock().await.as_ref() {
            Some(client) => client.send(frame).await,
            None => Err(UpstreamError::Unavailable("upstream not connected yet".to_string())),
        }
    }

    pub async fn close_upstream(&self) {
        if let Some(client) = self.upstream.lock().await.as_ref() {
            client.close().await;
        }
    }
}

/// Admits a session before its upstream connection is attempted: the id
/// exists and the session is visible in the table from this point, but
/// `upstream` is unset until [`Session::set_upstream`] is called.
pub fn new_admitting_session(frontend: FrontendHandle, frontend_transport: TransportMode, upstream_transport: TransportMode) -> Arc<Session> {
    Arc::new(Session {
        id: generate_session_id(),
        created_at: Utc::now(),
        frontend,
        frontend_transport,
        upstream: Mutex::new(None),
        upstream_transport,
        live: AtomicBool::new(true),
        heartbeat: Mutex::new(None),
        upstream_pump: Mutex::new(None),
    })
}

/// Session ids are a timestamp prefix followed by a random suffix: ordered
/// enough to be debuggable in logs, unique enough for the table, but not a
/// guarantee of unguessability (see DESIGN.md).
fn generate_session_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{millis:x}-{}", &suffix[..12])
}

/// Process-wide table of live sessions, keyed by session id. Single-writer
/// discipline is enforced by routing all inserts/removes through the bridge;
/// DashMap gives O(1) lookup without a global lock across unrelated keys.
pub struct SessionTable {
    inner: DashMap<String, Arc<Session>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self { inner: DashMap::new() }
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.inner.insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.remove(id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.inner.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
    }

    #[test]
    fn table_insert_get_remove_round_trip() {
        let table = SessionTable::new();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert!(table.get("missing").is_none());
        assert!(table.remove("missing").is_none());
    }

    #[tokio::test]
    async fn admitting_session_has_no_upstream_until_set() {
        let (tx, _rx) = mpsc::channel(1);
        let session = new_admitting_session(FrontendHandle::Sse(tx), TransportMode::Sse, TransportMode::Streamable);
        let table = SessionTable::new();
        table.insert(session.clone());
        assert_eq!(table.len(), 1);
        assert!(session.send_upstream(Frame {
            jsonrpc: "2.0".into(),
            id: None,
            method: Some("x".into()),
            params: None,
            result: None,
            error: None,
            extra: Default::default(),
        }).await.is_err());
    }
}
