use async_stream::stream;
use futures::StreamExt;
use http::{header, StatusCode};
use pingora_error::Result as PingoraResult;
use pingora_http::ResponseHeader;
use pingora_proxy::Session;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::interval;

use super::write_json;
use crate::bridge::SessionBridge;
use crate::codec::sse as codec;
use crate::config::{HEARTBEAT_INTERVAL, MESSAGE_BASE};
use crate::jsonrpc::{Frame, INTERNAL_ERROR};
use crate::session::SseOutbound;

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// `GET <sse-endpoint>`: opens a long-lived SSE stream, mints a session,
/// advertises the path the client should POST JSON-RPC frames to, then
/// forwards whatever the upstream-to-frontend pump delivers until either
/// side closes.
pub async fn handle_get(session: &mut Session, bridge: &SessionBridge) -> PingoraResult<bool> {
    let mut resp = ResponseHeader::build(StatusCode::OK, Some(2))?;
    resp.insert_header(header::CONTENT_TYPE, "text/event-stream")?;
    resp.insert_header(header::CACHE_CONTROL, "no-cache")?;
    session.write_response_header(Box::new(resp), false).await?;

    let (tx, mut rx) = mpsc::channel::<SseOutbound>(OUTBOUND_CHANNEL_CAPACITY);

    // Mint the session and advertise its endpoint before the upstream
    // connect is even attempted: the first event on this stream must be
    // `endpoint` regardless of how the connect turns out.
    let established = bridge.begin_sse_session(tx.clone());
    let message_path = format!("{MESSAGE_BASE}/{}", established.id);
    session.write_response_body(Some(codec::encode_endpoint(&message_path)), false).await?;

    if let Err(e) = bridge.connect_sse_session(&established).await {
        log::warn!("SSE session {} failed to connect upstream: {e}", established.id);
        let err = Frame::error_response(None, INTERNAL_ERROR, "Internal error", Some(json!({ "reason": e.to_string() })));
        if let Ok(bytes) = codec::encode_message(&err) {
            let _ = session.write_response_body(Some(bytes), true).await;
        }
        return Ok(true);
    }

    spawn_heartbeat(&established, tx.clone());

    let session_id = established.id.clone();
    let body = stream! {
        while let Some(item) = rx.recv().await {
            match item {
                SseOutbound::Frame(frame) => match codec::encode_message(&frame) {
                    Ok(bytes) => yield bytes,
                    Err(e) => log::warn!("failed to encode outbound frame for session {session_id}: {e}"),
                },
                SseOutbound::Endpoint(path) => yield codec::encode_endpoint(&path),
                SseOutbound::Heartbeat => yield codec::encode_heartbeat(),
            }
        }
    };

    let mut body_stream = Box::pin(body);
    let mut write_failed = false;
    while let Some(chunk) = body_stream.next().await {
        if session.write_response_body(Some(chunk), false).await.is_err() {
            write_failed = true;
            break;
        }
    }

    if write_failed {
        log::info!("session {} closing: frontend write failed", established.id);
    }
    bridge.close_session(&established.id).await;
    Ok(true)
}

fn spawn_heartbeat(session: &crate::session::Session, tx: mpsc::Sender<SseOutbound>) {
    let handle = tokio::spawn(async move {
        let mut ticker = interval(HEARTBEAT_INTERVAL);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if tx.send(SseOutbound::Heartbeat).await.is_err() {
                break;
            }
        }
    });
    if let Ok(mut slot) = session.heartbeat.try_lock() {
        *slot = Some(handle);
    }
}

/// `POST <message-base>/<session_id>`: hands a single JSON-RPC frame to the
/// bridge for the named session and always answers 202 once the session is
/// known, regardless of what the upstream eventually does with the frame.
pub async fn handle_post(session: &mut Session, bridge: &SessionBridge, session_id: &str) -> PingoraResult<bool> {
    let Some(established) = bridge.lookup(session_id) else {
        return write_json(session, StatusCode::NOT_FOUND, br#"{"error":"Session not found"}"#.to_vec()).await;
    };

    let body = session.downstream_session.read_request_body().await?;
    match body.as_deref().map(serde_json::from_slice::<Frame>) {
        Some(Ok(frame)) => bridge.route_frontend_frame(&established, frame).await,
        Some(Err(e)) => log::warn!("dropping unparseable POST body for session {session_id}: {e}"),
        None => log::warn!("dropping empty POST body for session {session_id}"),
    }

    write_json(session, StatusCode::ACCEPTED, Vec::new()).await
}
