pub mod health;
pub mod sse;
pub mod streamable;

use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use pingora::ErrorType;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_error::{Error, Result as PingoraResult};
use pingora_http::ResponseHeader;
use pingora_proxy::{ProxyHttp, Session};

use crate::bridge::SessionBridge;
use crate::config::{Settings, MESSAGE_BASE};

/// Per-request context. Routing here needs nothing beyond the settings and
/// bridge already owned by the service, so this is intentionally empty.
#[derive(Default)]
pub struct RequestContext;

pub struct ProxyService {
    bridge: Arc<SessionBridge>,
    settings: Arc<Settings>,
}

impl ProxyService {
    pub fn new(bridge: Arc<SessionBridge>, settings: Arc<Settings>) -> Self {
        Self { bridge, settings }
    }
}

#[async_trait]
impl ProxyHttp for ProxyService {
    type CTX = RequestContext;

    fn new_ctx(&self) -> Self::CTX {
        RequestContext
    }

    /// Every route this service knows about is handled synchronously here;
    /// pingora's normal upstream-forwarding phase is never used, so this
    /// always returns `Ok(true)` once a response has been written.
    async fn request_filter(&self, session: &mut Session, _ctx: &mut Self::CTX) -> PingoraResult<bool> {
        let method = session.req_header().method.clone();
        let path = session.req_header().uri.path().to_string();

        if method == Method::GET && path == "/health" {
            return health::handle(session, &self.bridge, &self.settings).await;
        }

        if method == Method::GET && path == self.settings.sse_endpoint {
            return sse::handle_get(session, &self.bridge).await;
        }

        if method == Method::POST && path.starts_with(&format!("{MESSAGE_BASE}/")) {
            let session_id = path[MESSAGE_BASE.len() + 1..].to_string();
            return sse::handle_post(session, &self.bridge, &session_id).await;
        }

        if method == Method::POST && path == self.settings.http_endpoint {
            return streamable::handle_post(session, &self.bridge).await;
        }

        respond_not_found(session).await
    }

    /// Unreachable in practice: `request_filter` answers every request this
    /// service is configured to receive and always returns `Ok(true)`.
    async fn upstream_peer(&self, _session: &mut Session, _ctx: &mut Self::CTX) -> PingoraResult<Box<HttpPeer>> {
        Error::err(ErrorType::HTTPStatus(500))
    }
}

pub(crate) async fn respond_not_found(session: &mut Session) -> PingoraResult<bool> {
    write_json(session, StatusCode::NOT_FOUND, br#"{"error":"not found"}"#.to_vec()).await
}

pub(crate) async fn write_json(session: &mut Session, code: StatusCode, body: Vec<u8>) -> PingoraResult<bool> {
    let mut resp = ResponseHeader::build(code, Some(2))?;
    resp.insert_header(http::header::CONTENT_TYPE, "application/json")?;
    resp.insert_header(http::header::CONTENT_LENGTH, body.len().to_string())?;
    session.write_response_header(Box::new(resp), false).await?;
    session.write_response_body(Some(body.into()), true).await?;
    Ok(true)
}
