//! Control-channel wire protocol.
//!
//! All events are JSON-encoded and exchanged over the ordered data channel.
//!
//! # Protocol Overview
//!
//! Client events (sent to the remote endpoint):
//! - session.update - One-time configuration, sent immediately on channel open
//! - conversation.item.create - Add a user turn (text and/or image parts)
//! - response.create - Request a response for the conversation so far
//! - response.cancel - Cancel the in-flight response
//!
//! Server events (received; the minimum set the core interprets):
//! - response.created - Generation started, carries the response id
//! - response.done / response.cancelled - Generation ended
//! - output_audio_buffer.cleared - Remote discarded its unplayed audio
//! - response.audio.delta - Base64 PCM audio fragment
//! - error - Remote-reported protocol error (forwarded, never retried)
//!
//! Everything else passes through to the event bus verbatim as an
//! [`Unknown`](ServerEvent::Unknown) event.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SessionOptions;

// =============================================================================
// Session Configuration
// =============================================================================

/// Configuration payload for the `session.update` instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdate {
    /// Response modalities. Audio must be listed before text: some providers
    /// fall back to text-only replies when text comes first.
    pub modalities: Vec<String>,

    /// Voice for audio output
    pub voice: String,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Input audio format
    pub input_audio_format: String,

    /// Output audio format
    pub output_audio_format: String,

    /// Turn detection configuration
    pub turn_detection: crate::config::TurnDetection,
}

impl SessionUpdate {
    /// Build the initial configuration payload from session options.
    pub fn from_options(options: &SessionOptions) -> Self {
        Self {
            modalities: vec!["audio".to_string(), "text".to_string()],
            voice: options.voice.as_str().to_string(),
            instructions: options.instructions.clone(),
            input_audio_format: options.input_audio_format.as_str().to_string(),
            output_audio_format: options.output_audio_format.as_str().to_string(),
            turn_detection: options.turn_detection.clone(),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Text content
    #[serde(rename = "input_text")]
    InputText {
        /// The text
        text: String,
    },
    /// Still-image content (data URL or remote URL, already encoded)
    #[serde(rename = "input_image")]
    InputImage {
        /// Image payload
        image_url: String,
    },
}

/// A user conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type (always "message" for user turns)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item role
    pub role: String,
    /// Content parts
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// Build a user message from content parts.
    pub fn user(content: Vec<ContentPart>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: "user".to_string(),
            content,
        }
    }
}

/// Response configuration for `response.create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Modality override for this response only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
}

// =============================================================================
// Client Events (sent to the remote endpoint)
// =============================================================================

/// Client events sent on the control channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionUpdate,
    },

    /// Add an item to the conversation
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Request a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Cancel the in-flight response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// The wire type tag of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ResponseCreate { .. } => "response.create",
            Self::ResponseCancel => "response.cancel",
        }
    }

    /// Serialize to the wire form, stamping a locally generated event id.
    pub fn to_wire(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(ref mut map) = value {
            map.insert(
                "event_id".to_string(),
                Value::String(format!("evt_{}", uuid::Uuid::new_v4().simple())),
            );
        }
        serde_json::to_string(&value)
    }
}

// =============================================================================
// Server Events (received from the remote endpoint)
// =============================================================================

/// Reference to a response in lifecycle events.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseRef {
    /// Response ID
    pub id: String,
    /// Response status, if reported
    #[serde(default)]
    pub status: Option<String>,
}

/// Remote-reported error details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    pub message: String,
    /// Client event id that caused the error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Server events the core specially interprets.
///
/// The transport intercepts these for internal bookkeeping and still forwards
/// every inbound message to the event bus, so external subscribers observe
/// the full stream including event types unknown to this enum.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Generation started
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Response information
        response: ResponseRef,
    },

    /// Generation completed
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        response: ResponseRef,
    },

    /// Generation cancelled
    #[serde(rename = "response.cancelled")]
    ResponseCancelled {
        /// Response information
        response: ResponseRef,
    },

    /// Remote discarded its unplayed output audio
    #[serde(rename = "output_audio_buffer.cleared")]
    OutputAudioBufferCleared {
        /// Response the buffer belonged to, if reported
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Audio fragment (base64-encoded PCM)
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64-encoded audio delta
        delta: String,
        /// Response ID
        #[serde(default)]
        response_id: Option<String>,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Remote-reported error
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Any event type not interpreted by the core; passes through verbatim.
    #[serde(skip)]
    Unknown {
        /// The wire type tag
        event_type: String,
    },
}

impl ServerEvent {
    /// Classify a decoded inbound message.
    ///
    /// Never fails: an unrecognized or shape-mismatched message becomes
    /// [`ServerEvent::Unknown`] so dispatch to the bus is unaffected.
    pub fn classify(value: &Value) -> ServerEvent {
        match serde_json::from_value::<ServerEvent>(value.clone()) {
            Ok(event) => event,
            Err(_) => ServerEvent::Unknown {
                event_type: value
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
        }
    }

    /// Decode base64 audio from an AudioDelta event.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionOptions;

    #[test]
    fn test_session_update_modality_order() {
        let update = SessionUpdate::from_options(&SessionOptions::default());
        assert_eq!(update.modalities, vec!["audio", "text"]);

        let json = serde_json::to_string(&ClientEvent::SessionUpdate { session: update }).unwrap();
        // Audio must precede text in the serialized payload as well.
        let audio_pos = json.find("\"audio\"").unwrap();
        let text_pos = json.find("\"text\"").unwrap();
        assert!(audio_pos < text_pos);
        assert!(json.contains("session.update"));
    }

    #[test]
    fn test_client_event_serialization() {
        let event = ClientEvent::ResponseCancel;
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("response.cancel"));
    }

    #[test]
    fn test_to_wire_stamps_event_id() {
        let wire = ClientEvent::ResponseCancel.to_wire().unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["type"], "response.cancel");
        assert!(value["event_id"].as_str().unwrap().starts_with("evt_"));
    }

    #[test]
    fn test_user_item_with_image() {
        let item = ConversationItem::user(vec![
            ContentPart::InputText { text: "Look at this.".to_string() },
            ContentPart::InputImage { image_url: "data:image/png;base64,AAAA".to_string() },
        ]);
        let json = serde_json::to_string(&ClientEvent::ConversationItemCreate { item }).unwrap();
        assert!(json.contains("input_text"));
        assert!(json.contains("input_image"));
        assert!(json.contains("\"role\":\"user\""));
    }

    #[test]
    fn test_classify_response_created() {
        let value: Value = serde_json::from_str(
            r#"{"type": "response.created", "response": {"id": "resp_1", "status": "in_progress"}}"#,
        )
        .unwrap();
        match ServerEvent::classify(&value) {
            ServerEvent::ResponseCreated { response } => {
                assert_eq!(response.id, "resp_1");
                assert_eq!(response.status.as_deref(), Some("in_progress"));
            }
            other => panic!("Wrong event type: {other:?}"),
        }
    }

    #[test]
    fn test_classify_unknown_passes_through() {
        let value: Value =
            serde_json::from_str(r#"{"type": "rate_limits.updated", "rate_limits": []}"#).unwrap();
        match ServerEvent::classify(&value) {
            ServerEvent::Unknown { event_type } => assert_eq!(event_type, "rate_limits.updated"),
            other => panic!("Wrong event type: {other:?}"),
        }
    }

    #[test]
    fn test_classify_shape_mismatch_is_unknown() {
        // Right tag, wrong payload shape: must not break dispatch.
        let value: Value = serde_json::from_str(r#"{"type": "response.created"}"#).unwrap();
        assert!(matches!(
            ServerEvent::classify(&value),
            ServerEvent::Unknown { .. }
        ));
    }

    #[test]
    fn test_audio_delta_decode() {
        let original = vec![0u8, 1, 2, 3, 4, 5];
        let encoded = BASE64_STANDARD.encode(&original);
        let decoded = ServerEvent::decode_audio_delta(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_error_event() {
        let value: Value = serde_json::from_str(
            r#"{"type": "error", "error": {"type": "invalid_request_error", "message": "bad"}}"#,
        )
        .unwrap();
        match ServerEvent::classify(&value) {
            ServerEvent::Error { error } => assert_eq!(error.message, "bad"),
            other => panic!("Wrong event type: {other:?}"),
        }
    }
}
