//! JSON-RPC 2.0 message types (https://www.jsonrpc.org/specification).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Method name used for pushed job notifications.
pub const EVENT_METHOD: &str = "event";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    /// Absent for notifications, which get no response.
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-initiated message with no id, used for the `events.subscribe` stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

/// Result body for job operations. Rejections (unknown job, wrong state) are
/// reported here as `ok: false`, not as protocol errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
}

impl OperationResult {
    pub fn accepted(outcome: Option<Value>) -> Self {
        Self {
            ok: true,
            reason: None,
            outcome,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            outcome: None,
        }
    }
}

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

impl Response {
    pub fn success(id: Value, result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(result) => Self {
                jsonrpc: JSONRPC_VERSION.to_string(),
                result: Some(result),
                error: None,
                id,
            },
            Err(e) => Self::internal_error(id, format!("Failed to encode result: {}", e)),
        }
    }

    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    /// Used when the request could not be parsed, so its id is unknown.
    pub fn parse_error() -> Self {
        Self::error(Value::Null, PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(id: Value, details: &str) -> Self {
        Self::error(id, INVALID_REQUEST, format!("Invalid request: {}", details))
    }

    pub fn method_not_found(id: Value, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(id: Value, details: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, details.into())
    }

    pub fn internal_error(id: Value, details: impl Into<String>) -> Self {
        Self::error(id, INTERNAL_ERROR, details.into())
    }
}

impl Request {
    pub fn new(method: &str, params: Option<Value>, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Some(Value::from(id)),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err("jsonrpc must be \"2.0\"");
        }
        if self.method.is_empty() {
            return Err("method must not be empty");
        }
        Ok(())
    }
}

impl Notification {
    pub fn event(params: impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: EVENT_METHOD.to_string(),
            params: serde_json::to_value(params)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_job_request() {
        let json = r#"{"jsonrpc":"2.0","method":"jobs.start","params":{"id":"abc"},"id":7}"#;
        let req: Request = serde_json::from_str(json).unwrap();

        assert_eq!(req.method, "jobs.start");
        assert_eq!(req.params, Some(json!({"id": "abc"})));
        assert_eq!(req.id, Some(json!(7)));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn request_without_id_is_notification() {
        let req: Request = serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn wrong_version_fails_validation() {
        let req: Request =
            serde_json::from_str(r#"{"jsonrpc":"1.0","method":"jobs.list","id":1}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejection_serializes_ok_false_with_reason() {
        let resp = Response::success(json!(1), OperationResult::rejected("job not found: x"));
        let value = serde_json::to_value(&resp).unwrap();

        assert_eq!(value["result"], json!({"ok": false, "reason": "job not found: x"}));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn error_response_has_no_result() {
        let resp = Response::method_not_found(json!("abc"), "jobs.explode");
        let value = serde_json::to_value(&resp).unwrap();

        assert_eq!(value["error"]["code"], json!(METHOD_NOT_FOUND));
        assert!(value.get("result").is_none());
    }

    #[test]
    fn event_notification_has_no_id() {
        let note = Notification::event(json!({"type": "job_removed", "data": {"id": "a"}})).unwrap();
        let value = serde_json::to_value(&note).unwrap();

        assert_eq!(value["method"], "event");
        assert!(value.get("id").is_none());
    }
}
