use http::{header, StatusCode};
use pingora_error::Result as PingoraResult;
use pingora_http::ResponseHeader;
use pingora_proxy::Session;

use crate::bridge::{SessionBridge, StreamableOutcome};
use crate::codec::ndjson;
use crate::jsonrpc::{Frame, PARSE_ERROR};

/// `POST <http-endpoint>`: a single request/response round trip. The
/// response body is NDJSON so a server that streams intermediate frames
/// before the final result can still be relayed, but most upstream replies
/// are exactly one line.
pub async fn handle_post(session: &mut Session, bridge: &SessionBridge) -> PingoraResult<bool> {
    let body = session.downstream_session.read_request_body().await?;
    let frame: Frame = match body.as_deref().map(serde_json::from_slice) {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => {
            return write_single_frame(session, Frame::error_response(None, PARSE_ERROR, "Parse error", Some(e.to_string().into()))).await;
        }
        None => {
            return write_single_frame(session, Frame::error_response(None, PARSE_ERROR, "Parse error", Some("empty body".into()))).await;
        }
    };

    let correlate_id = frame.id.clone();

    match bridge.open_streamable(frame).await {
        StreamableOutcome::Failed(err) => write_single_frame(session, err).await,
        StreamableOutcome::Accepted => {
            write_ndjson_header(session).await?;
            session.write_response_body(None, true).await?;
            Ok(true)
        }
        StreamableOutcome::Ready { session: established, mut incoming } => {
            write_ndjson_header(session).await?;
            loop {
                let Some(reply) = incoming.recv().await else { break };
                let done = reply.id == correlate_id && (reply.result.is_some() || reply.error.is_some());
                let bytes = match ndjson::encode(&reply) {
                    Ok(b) => b,
                    Err(e) => {
                        log::warn!("failed to encode outbound frame for session {}: {e}", established.id);
                        continue;
                    }
                };
                if session.write_response_body(Some(bytes), done).await.is_err() {
                    break;
                }
                if done {
                    break;
                }
            }
            bridge.close_session(&established.id).await;
            Ok(true)
        }
    }
}

async fn write_ndjson_header(session: &mut Session) -> PingoraResult<()> {
    let mut resp = ResponseHeader::build(StatusCode::OK, Some(2))?;
    resp.insert_header(header::CONTENT_TYPE, "application/json")?;
    resp.insert_header(header::TRANSFER_ENCODING, "chunked")?;
    session.write_response_header(Box::new(resp), false).await
}

async fn write_single_frame(session: &mut Session, frame: Frame) -> PingoraResult<bool> {
    write_ndjson_header(session).await?;
    let bytes = ndjson::encode(&frame).unwrap_or_default();
    session.write_response_body(Some(bytes), true).await?;
    Ok(true)
}
