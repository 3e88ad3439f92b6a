//! Unit tests for JSON-RPC envelope classification and encoding.

use serde_json::json;

use mcp_probe::protocol::{Message, RequestId, ResponsePayload};
use mcp_probe::AppError;

// ── Classification ────────────────────────────────────────────────────────────

/// An envelope with `id` and `method` classifies as a request.
#[test]
fn envelope_with_id_and_method_is_a_request() {
    let raw = r#"{"jsonrpc":"2.0","id":7,"method":"ping","params":{"n":1}}"#;

    match Message::from_json_str(raw) {
        Ok(Message::Request(req)) => {
            assert_eq!(req.id, RequestId::Number(7));
            assert_eq!(req.method, "ping");
            assert_eq!(req.params, Some(json!({"n": 1})));
        }
        other => panic!("expected Message::Request, got: {other:?}"),
    }
}

/// An envelope with `method` but no `id` classifies as a notification.
#[test]
fn envelope_with_method_only_is_a_notification() {
    let raw = r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#;

    match Message::from_json_str(raw) {
        Ok(Message::Notification(note)) => {
            assert_eq!(note.method, "notifications/progress");
            assert!(note.params.is_none());
        }
        other => panic!("expected Message::Notification, got: {other:?}"),
    }
}

/// An envelope with `id` and `result` classifies as a successful response;
/// an explicit `"result": null` still counts as a result.
#[test]
fn envelope_with_result_is_a_response() {
    let raw = r#"{"jsonrpc":"2.0","id":"abc","result":{"ok":true}}"#;
    match Message::from_json_str(raw) {
        Ok(Message::Response(resp)) => {
            assert_eq!(resp.id, RequestId::String("abc".into()));
            assert_eq!(resp.payload, ResponsePayload::Result(json!({"ok": true})));
        }
        other => panic!("expected Message::Response, got: {other:?}"),
    }

    let null_result = r#"{"jsonrpc":"2.0","id":2,"result":null}"#;
    match Message::from_json_str(null_result) {
        Ok(Message::Response(resp)) => {
            assert_eq!(resp.payload, ResponsePayload::Result(serde_json::Value::Null));
        }
        other => panic!("null result must still classify as a response, got: {other:?}"),
    }
}

/// An envelope with `id` and `error` classifies as an error response.
#[test]
fn envelope_with_error_is_an_error_response() {
    let raw = r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"method not found"}}"#;

    match Message::from_json_str(raw) {
        Ok(Message::Response(resp)) => match resp.payload {
            ResponsePayload::Error(err) => {
                assert_eq!(err.code, -32_601);
                assert_eq!(err.message, "method not found");
                assert!(err.data.is_none());
            }
            other => panic!("expected error payload, got: {other:?}"),
        },
        other => panic!("expected Message::Response, got: {other:?}"),
    }
}

/// Invalid JSON returns `AppError::Decode` naming the cause.
#[test]
fn malformed_json_returns_decode_error() {
    let result = Message::from_json_str("not-valid-json{{{");
    match result {
        Err(AppError::Decode(msg)) => assert!(
            msg.contains("malformed json"),
            "error must mention 'malformed json', got: {msg}"
        ),
        other => panic!("expected Err(AppError::Decode), got: {other:?}"),
    }
}

/// Valid JSON that fits no envelope shape returns `AppError::Decode`.
#[test]
fn shapeless_envelope_returns_decode_error() {
    let result = Message::from_json_str(r#"{"jsonrpc":"2.0","id":9}"#);
    assert!(
        matches!(result, Err(AppError::Decode(_))),
        "an id with neither method, result, nor error must fail, got: {result:?}"
    );
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Outbound requests encode as single-line JSON-RPC 2.0 envelopes; `params`
/// is omitted when absent.
#[test]
fn request_encodes_as_single_line_envelope() {
    let message = Message::Request(mcp_probe::protocol::Request {
        id: RequestId::Number(1),
        method: "initialize".into(),
        params: None,
    });

    let line = message.to_json_line();
    assert!(!line.contains('\n'), "NDJSON frame must be a single line");

    let value: serde_json::Value = serde_json::from_str(&line).expect("frame must be valid JSON");
    assert_eq!(value["jsonrpc"], "2.0");
    assert_eq!(value["id"], 1);
    assert_eq!(value["method"], "initialize");
    assert!(
        value.get("params").is_none(),
        "absent params must be omitted from the envelope"
    );
}

/// A message survives an encode/decode round trip unchanged.
#[test]
fn encoded_notification_decodes_back_to_itself() {
    let message = Message::Notification(mcp_probe::protocol::Notification {
        method: "notifications/initialized".into(),
        params: Some(json!({"ready": true})),
    });

    let decoded =
        Message::from_json_str(&message.to_json_line()).expect("own encoding must decode");
    assert_eq!(decoded, message);
}
