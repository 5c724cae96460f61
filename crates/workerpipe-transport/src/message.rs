//! Message envelopes and the codec seam.
//!
//! The transport only looks at three things in a message: its kind, its
//! correlation id, and whether it is a protocol error. Everything else is
//! opaque payload owned by the worker's schema.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

/// Correlation id reserved for session-level protocol errors.
///
/// Never accepted for a request. An inbound error carrying this id fails
/// every pending request.
pub const PROTOCOL_ERROR_ID: u32 = u32::MAX;

/// Envelope kind of inbound protocol errors.
pub const ERROR_KIND: &str = "error";

/// Payload fields searched for a correlation id, in order.
const CORRELATION_FIELDS: [&str; 2] = ["compilation_id", "id"];

/// A typed request the worker understands.
///
/// `KIND` is written into the envelope's `type` field and tells the worker
/// how to read the payload.
///
/// ```
/// use serde::Serialize;
/// use workerpipe_transport::Request;
///
/// #[derive(Serialize)]
/// struct VersionRequest {
///     id: u32,
/// }
///
/// impl Request for VersionRequest {
///     const KIND: &'static str = "version_request";
/// }
/// ```
pub trait Request: Serialize {
    const KIND: &'static str;
}

/// Envelope written to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl OutboundMessage {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Wrap a typed request under its declared kind.
    pub fn from_request<R: Request>(request: &R) -> Result<Self, CodecError> {
        Ok(Self::new(R::KIND, serde_json::to_value(request)?))
    }
}

/// Envelope read back from the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// Payload of an inbound [`ERROR_KIND`] message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolErrorPayload {
    pub id: u32,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl InboundMessage {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Build a protocol error envelope, as a worker would send it.
    pub fn protocol_error(id: u32, message: impl Into<String>) -> Self {
        let payload = ProtocolErrorPayload {
            id,
            message: message.into(),
            error_type: None,
        };
        Self::new(
            ERROR_KIND,
            serde_json::to_value(payload).unwrap_or(Value::Null),
        )
    }

    /// The error payload, if this is a well-formed error message.
    pub fn error(&self) -> Option<ProtocolErrorPayload> {
        if self.kind != ERROR_KIND {
            return None;
        }
        ProtocolErrorPayload::deserialize(&self.payload).ok()
    }

    /// The error payload if it signals a session-level failure.
    pub fn protocol_failure(&self) -> Option<ProtocolErrorPayload> {
        self.error().filter(|error| error.id == PROTOCOL_ERROR_ID)
    }

    /// Correlation id from `compilation_id`, falling back to `id`.
    ///
    /// A payload is expected to carry at most one of the two. Values that
    /// do not fit a `u32` yield `None`.
    pub fn correlation_id(&self) -> Option<u32> {
        CORRELATION_FIELDS
            .iter()
            .find_map(|field| self.payload.get(field))
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
    }

    /// Deserialize the payload into a response type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        Ok(T::deserialize(&self.payload)?)
    }
}

/// Turns envelopes into frame payloads and back.
///
/// Implement this to speak a different wire schema; the transport never
/// looks inside the bytes.
pub trait MessageCodec: Send + Sync {
    fn encode(&self, message: &OutboundMessage) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, payload: &[u8]) -> Result<InboundMessage, CodecError>;
}

/// JSON envelope codec: `{"type": "<kind>", "payload": {...}}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, message: &OutboundMessage) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(message)?)
    }

    fn decode(&self, payload: &[u8]) -> Result<InboundMessage, CodecError> {
        let message: InboundMessage = serde_json::from_slice(payload)?;
        if message.kind.is_empty() {
            return Err(CodecError::Malformed("empty message type".to_string()));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Serialize)]
    struct CompileRequest {
        id: u32,
        source: String,
    }

    impl Request for CompileRequest {
        const KIND: &'static str = "compile_request";
    }

    #[test]
    fn outbound_envelope_uses_declared_kind() {
        let message = OutboundMessage::from_request(&CompileRequest {
            id: 4,
            source: "a { b: c }".to_string(),
        })
        .unwrap();

        assert_eq!(message.kind, "compile_request");
        let bytes = JsonCodec.encode(&message).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({ "type": "compile_request", "payload": { "id": 4, "source": "a { b: c }" } })
        );
    }

    #[test]
    fn correlation_id_prefers_compilation_id() {
        let message = InboundMessage::new(
            "compile_response",
            json!({ "compilation_id": 12, "success": { "css": "" } }),
        );
        assert_eq!(message.correlation_id(), Some(12));

        let message = InboundMessage::new("version_response", json!({ "id": 3 }));
        assert_eq!(message.correlation_id(), Some(3));

        let message = InboundMessage::new(
            "log_event",
            json!({ "compilation_id": 5, "id": 9 }),
        );
        assert_eq!(message.correlation_id(), Some(5));
    }

    #[test]
    fn correlation_id_missing_or_out_of_range() {
        let message = InboundMessage::new("log_event", json!({ "message": "hi" }));
        assert_eq!(message.correlation_id(), None);

        let too_wide = 1u64 << 40;
        let message = InboundMessage::new("version_response", json!({ "id": too_wide }));
        assert_eq!(message.correlation_id(), None);

        let message = InboundMessage::new("version_response", json!({ "id": "7" }));
        assert_eq!(message.correlation_id(), None);
    }

    #[test]
    fn protocol_failure_requires_sentinel_id() {
        let sentinel = InboundMessage::protocol_error(PROTOCOL_ERROR_ID, "bad envelope");
        let failure = sentinel.protocol_failure().unwrap();
        assert_eq!(failure.message, "bad envelope");
        assert_eq!(sentinel.correlation_id(), Some(PROTOCOL_ERROR_ID));

        let scoped = InboundMessage::protocol_error(8, "bad request");
        assert!(scoped.protocol_failure().is_none());
        assert_eq!(scoped.error().unwrap().id, 8);
        assert_eq!(scoped.correlation_id(), Some(8));

        let not_error = InboundMessage::new("compile_response", json!({ "id": PROTOCOL_ERROR_ID }));
        assert!(not_error.error().is_none());
    }

    #[test]
    fn decode_inbound_error_with_type() {
        let bytes = br#"{"type":"error","payload":{"type":"PARSE","id":4294967295,"message":"garbled"}}"#;
        let message = JsonCodec.decode(bytes).unwrap();

        let error = message.protocol_failure().unwrap();
        assert_eq!(error.error_type.as_deref(), Some("PARSE"));
        assert_eq!(error.message, "garbled");
    }

    #[test]
    fn decode_rejects_malformed_envelopes() {
        assert!(matches!(
            JsonCodec.decode(b"not json"),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            JsonCodec.decode(br#"{"payload":{}}"#),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            JsonCodec.decode(br#"{"type":""}"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn parse_typed_response() {
        #[derive(Deserialize)]
        struct VersionResponse {
            id: u32,
            protocol_version: String,
        }

        let message = InboundMessage::new(
            "version_response",
            json!({ "id": 1, "protocol_version": "2.1.0" }),
        );
        let response: VersionResponse = message.parse().unwrap();
        assert_eq!(response.id, 1);
        assert_eq!(response.protocol_version, "2.1.0");
    }
}
