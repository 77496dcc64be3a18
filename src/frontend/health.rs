use http::StatusCode;
use pingora_error::Result as PingoraResult;
use pingora_proxy::Session;
use serde_json::json;

use super::write_json;
use crate::bridge::SessionBridge;
use crate::config::Settings;

/// `GET /health`, served on the same listener as the frontend routes. Never
/// touches the bridge beyond reading its current session count.
pub async fn handle(session: &mut Session, bridge: &SessionBridge, settings: &Settings) -> PingoraResult<bool> {
    let body = json!({
        "status": "ok",
        "inputMode": settings.input_mode.as_str(),
        "outputMode": settings.output_mode.as_str(),
        "sessions": bridge.session_count(),
    });
    write_json(session, StatusCode::OK, serde_json::to_vec(&body).expect("json body always serializes")).await
}
