//! JSON-RPC 2.0 message model for MCP sessions.
//!
//! One inbound NDJSON line (or SSE `message` event) decodes into a
//! [`Message`]; outbound messages encode back into single-line JSON
//! envelopes. Classification is envelope-shaped, not method-aware: any
//! future MCP method rides on the same three variants.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::{AppError, Result};

/// JSON-RPC protocol version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision offered during the `initialize` handshake.
pub const LATEST_PROTOCOL_VERSION: &str = "2024-11-05";

// ── Correlation ids ───────────────────────────────────────────────────────────

/// Opaque correlation token pairing a request with its eventual response.
///
/// Outbound requests always allocate [`RequestId::Number`] values from the
/// session's counter; the string form exists so inbound envelopes from
/// servers that use string ids still correlate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

// ── Message variants ──────────────────────────────────────────────────────────

/// A request expecting exactly one response with the matching id.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id, unique per in-flight request on the sending side.
    pub id: RequestId,
    /// Method name (e.g. `initialize`, `ping`).
    pub method: String,
    /// Method-specific parameters; omitted from the envelope when `None`.
    pub params: Option<Value>,
}

/// A fire-and-forget message with no correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name (e.g. `notifications/initialized`).
    pub method: String,
    /// Method-specific parameters; omitted from the envelope when `None`.
    pub params: Option<Value>,
}

/// The result-or-error reply to a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Correlation id copied from the request this answers.
    pub id: RequestId,
    /// Successful result or protocol-level error.
    pub payload: ResponsePayload,
}

/// Successful result or protocol-level error carried by a [`Response`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// The request succeeded; the method-specific result value.
    Result(Value),
    /// The request failed at the protocol level.
    Error(RpcError),
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Short human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Request from the peer (or outbound from this client).
    Request(Request),
    /// Response answering an earlier request.
    Response(Response),
    /// Fire-and-forget notification.
    Notification(Notification),
}

/// One item of the inbound stream and of the general incoming-message feed.
///
/// Malformed frames travel as [`Inbound::Error`] values so a single bad
/// line never terminates the stream.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A well-formed protocol message.
    Message(Message),
    /// A non-fatal inbound failure: a frame that failed to decode
    /// ([`AppError::Decode`]) or a mid-stream transport fault surfaced
    /// just before the stream closes ([`AppError::Io`]).
    Error(AppError),
}

// ── Encode / decode ───────────────────────────────────────────────────────────

/// Raw envelope used to classify an inbound frame.
///
/// `result` uses a presence-preserving deserializer so that an explicit
/// `"result": null` still classifies as a successful response.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present_value")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Deserialize any present JSON value (including `null`) as `Some`.
fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Message {
    /// Decode one wire frame into a [`Message`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`] when the frame is not valid JSON or its
    /// envelope matches none of the request/response/notification shapes.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(raw)
            .map_err(|err| AppError::Decode(format!("malformed json: {err}")))?;

        match envelope {
            Envelope {
                id: Some(id),
                method: Some(method),
                params,
                ..
            } => Ok(Self::Request(Request { id, method, params })),
            Envelope {
                id: None,
                method: Some(method),
                params,
                ..
            } => Ok(Self::Notification(Notification { method, params })),
            Envelope {
                id: Some(id),
                error: Some(error),
                ..
            } => Ok(Self::Response(Response {
                id,
                payload: ResponsePayload::Error(error),
            })),
            Envelope {
                id: Some(id),
                result: Some(result),
                ..
            } => Ok(Self::Response(Response {
                id,
                payload: ResponsePayload::Result(result),
            })),
            _ => Err(AppError::Decode(
                "envelope is neither request, response, nor notification".into(),
            )),
        }
    }

    /// Encode this message as a JSON envelope value.
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        let mut envelope = Map::new();
        envelope.insert("jsonrpc".into(), Value::String(JSONRPC_VERSION.into()));

        match self {
            Self::Request(req) => {
                envelope.insert("id".into(), id_value(&req.id));
                envelope.insert("method".into(), Value::String(req.method.clone()));
                if let Some(params) = &req.params {
                    envelope.insert("params".into(), params.clone());
                }
            }
            Self::Notification(note) => {
                envelope.insert("method".into(), Value::String(note.method.clone()));
                if let Some(params) = &note.params {
                    envelope.insert("params".into(), params.clone());
                }
            }
            Self::Response(resp) => {
                envelope.insert("id".into(), id_value(&resp.id));
                match &resp.payload {
                    ResponsePayload::Result(result) => {
                        envelope.insert("result".into(), result.clone());
                    }
                    ResponsePayload::Error(error) => {
                        envelope.insert("error".into(), json!(error));
                    }
                }
            }
        }

        Value::Object(envelope)
    }

    /// Encode this message as a single-line JSON string (one NDJSON frame).
    #[must_use]
    pub fn to_json_line(&self) -> String {
        self.to_json_value().to_string()
    }
}

fn id_value(id: &RequestId) -> Value {
    match id {
        RequestId::Number(n) => json!(n),
        RequestId::String(s) => Value::String(s.clone()),
    }
}

// ── Initialize handshake types ────────────────────────────────────────────────

/// Name/version pair identifying one end of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    pub version: String,
}

/// Negotiated result of the `initialize` handshake.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision the server agreed to speak.
    pub protocol_version: String,
    /// Server capability advertisement, kept generic.
    #[serde(default)]
    pub capabilities: Value,
    /// Server implementation name and version, when advertised.
    #[serde(default)]
    pub server_info: Option<Implementation>,
}

/// Build the `initialize` request parameters for this client.
#[must_use]
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": LATEST_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}
