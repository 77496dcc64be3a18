use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// A JSON-RPC 2.0 id. Distinct from `Option<RequestId>` being `None`, which
/// means the `id` member was absent entirely (a notification).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A single JSON-RPC 2.0 message.
///
/// The wire format doesn't distinguish request/notification/response/error at
/// the type level, only by which members are present. We mirror that here
/// with one struct rather than the teacher's separate Request/Notification/
/// Response/Error types, since the bridge forwards frames verbatim and only
/// needs to classify them, never to construct one kind from another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    /// Any other top-level members, preserved verbatim on re-encode.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameShape {
    Request,
    Notification,
    Response,
    Invalid,
}

impl Frame {
    /// Classifies the frame per the envelope shape rules: requests and
    /// notifications carry `method`, responses carry exactly one of
    /// `result`/`error` and no `method`. Anything else is routed as invalid.
    pub fn shape(&self) -> FrameShape {
        if self.method.is_some() {
            if self.id.is_some() {
                FrameShape::Request
            } else {
                FrameShape::Notification
            }
        } else if self.id.is_some() && (self.result.is_some() ^ self.error.is_some()) {
            FrameShape::Response
        } else {
            FrameShape::Invalid
        }
    }

    pub fn error_response(id: Option<RequestId>, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            method: None,
            params: None,
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
                data,
            }),
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_request() {
        let f = Frame {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(RequestId::Number(1)),
            method: Some("ping".into()),
            params: None,
            result: None,
            error: None,
            extra: Map::new(),
        };
        assert_eq!(f.shape(), FrameShape::Request);
    }

    #[test]
    fn classifies_notification() {
        let f = Frame {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            method: Some("progress".into()),
            params: None,
            result: None,
            error: None,
            extra: Map::new(),
        };
        assert_eq!(f.shape(), FrameShape::Notification);
    }

    #[test]
    fn classifies_response_and_error_response() {
        let ok = Frame {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(RequestId::String("abc".into())),
            method: None,
            params: None,
            result: Some(Value::Bool(true)),
            error: None,
            extra: Map::new(),
        };
        assert_eq!(ok.shape(), FrameShape::Response);

        let err = Frame::error_response(Some(RequestId::Number(2)), INVALID_REQUEST, "Invalid Request", None);
        assert_eq!(err.shape(), FrameShape::Response);
    }

    #[test]
    fn result_and_error_both_present_is_invalid() {
        let f = Frame {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(RequestId::Number(1)),
            method: None,
            params: None,
            result: Some(Value::Null),
            error: Some(ErrorObject { code: INTERNAL_ERROR, message: "x".into(), data: None }),
            extra: Map::new(),
        };
        assert_eq!(f.shape(), FrameShape::Invalid);
    }

    #[test]
    fn no_id_no_method_is_invalid() {
        let f = Frame {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            method: None,
            params: None,
            result: Some(Value::Null),
            error: None,
            extra: Map::new(),
        };
        assert_eq!(f.shape(), FrameShape::Invalid);
    }

    #[test]
    fn unknown_top_level_fields_round_trip() {
        let json = r#"{"jsonrpc":"2.0","id":1,"method":"x","traceId":"abc-123"}"#;
        let f: Frame = serde_json::from_str(json).unwrap();
        assert_eq!(f.extra.get("traceId").unwrap(), "abc-123");
        let back = serde_json::to_string(&f).unwrap();
        assert!(back.contains("traceId"));
    }

    #[test]
    fn missing_jsonrpc_member_defaults_to_2_0() {
        let json = r#"{"id":1,"method":"x"}"#;
        let f: Frame = serde_json::from_str(json).unwrap();
        assert_eq!(f.jsonrpc, "2.0");
    }
}
