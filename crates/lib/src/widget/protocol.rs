//! Bridge WebSocket protocol frames (requests, responses, events).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method names understood by the bridge.
pub const METHOD_INIT: &str = "init";
pub const METHOD_SEND: &str = "send";
pub const METHOD_DESTROY: &str = "destroy";

/// Event name carrying a raw widget event in its payload.
pub const EVENT_MESSAGE: &str = "message";

/// One JSON text frame on the bridge socket.
///
/// Wire shapes: `{ "type": "req", "id", "method", "params" }`,
/// `{ "type": "res", "id", "ok", "payload" or "error" }`,
/// `{ "type": "event", "event", "payload" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeFrame {
    Req {
        id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

impl BridgeFrame {
    /// New request with a generated id.
    pub fn request(method: impl Into<String>, params: Value) -> Self {
        BridgeFrame::Req {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }

    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        BridgeFrame::Res {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        BridgeFrame::Res {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }

    pub fn event(event: impl Into<String>, payload: Value) -> Self {
        BridgeFrame::Event {
            event: event.into(),
            payload,
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"event","event":"invalid"}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let frame = BridgeFrame::request(METHOD_SEND, json!({"message": "hi"}));
        let v: Value = serde_json::from_str(&frame.to_text()).expect("json");
        assert_eq!(v["type"], "req");
        assert_eq!(v["method"], "send");
        assert_eq!(v["params"]["message"], "hi");
        assert!(v["id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[test]
    fn parses_error_response_and_event() {
        let res: BridgeFrame =
            serde_json::from_str(r#"{"type":"res","id":"7","ok":false,"error":"boom"}"#)
                .expect("res");
        assert_eq!(res, BridgeFrame::err("7", "boom"));
        let ev: BridgeFrame =
            serde_json::from_str(r#"{"type":"event","event":"message","payload":{"key":"1"}}"#)
                .expect("event");
        assert_eq!(ev, BridgeFrame::event(EVENT_MESSAGE, json!({"key": "1"})));
    }

    #[test]
    fn ok_response_omits_error_field() {
        let v: Value = serde_json::from_str(&BridgeFrame::ok("1", json!({})).to_text()).expect("json");
        assert!(v.get("error").is_none());
        assert_eq!(v["ok"], true);
    }
}
