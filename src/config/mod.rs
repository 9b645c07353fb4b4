//! Session configuration types.
//!
//! This module contains the options a consumer hands to
//! [`Session::connect`](crate::core::session::Session::connect):
//! - Model and voice selection
//! - Audio format configuration
//! - Turn detection settings
//! - ICE server list for the peer connection

use serde::{Deserialize, Serialize};

/// Sample rate of inbound synthesized audio fragments (PCM 16-bit mono).
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Default STUN servers used when none are configured.
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Default model requested from the remote endpoint. The model is selected
/// at signaling time, not in the session configuration instruction.
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

// =============================================================================
// Voices
// =============================================================================

/// Available voices for the remote endpoint's audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    /// Alloy voice (default)
    #[default]
    Alloy,
    /// Ash voice
    Ash,
    /// Ballad voice
    Ballad,
    /// Coral voice
    Coral,
    /// Echo voice
    Echo,
    /// Sage voice
    Sage,
    /// Shimmer voice
    Shimmer,
    /// Verse voice
    Verse,
}

impl Voice {
    /// Convert to the wire parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "alloy" => Self::Alloy,
            "ash" => Self::Ash,
            "ballad" => Self::Ballad,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Audio Formats
// =============================================================================

/// Supported control-channel audio encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// PCM 16-bit signed little-endian (default)
    #[default]
    Pcm16,
    /// G.711 u-law (8-bit)
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    /// G.711 a-law (8-bit)
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

impl AudioFormat {
    /// Convert to the wire parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
        }
    }

    /// Sample rate carried by this format.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Pcm16 => PLAYBACK_SAMPLE_RATE,
            Self::G711Ulaw | Self::G711Alaw => 8000,
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pcm16" | "pcm" | "linear16" => Self::Pcm16,
            "g711_ulaw" | "ulaw" | "mulaw" => Self::G711Ulaw,
            "g711_alaw" | "alaw" => Self::G711Alaw,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Turn Detection
// =============================================================================

/// Remote-side turn detection configuration.
///
/// Sent in the initial configuration instruction; the remote endpoint decides
/// when the user has finished speaking and a response should begin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        /// Whether to create a response on turn end
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        /// Interrupt model output on speech detection
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
    /// Semantic-aware turn detection
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level (low, medium, high, auto)
        #[serde(skip_serializing_if = "Option::is_none")]
        eagerness: Option<String>,
        /// Whether to create a response on turn end
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        /// Interrupt model output on speech detection
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None {},
}

impl Default for TurnDetection {
    fn default() -> Self {
        TurnDetection::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: Some(true),
            interrupt_response: Some(true),
        }
    }
}

// =============================================================================
// Session Options
// =============================================================================

/// Options for a session, applied once via the initial configuration
/// instruction when the control channel opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Voice for audio output.
    #[serde(default)]
    pub voice: Voice,

    /// System instructions for the assistant.
    #[serde(default)]
    pub instructions: Option<String>,

    /// Input audio encoding.
    #[serde(default)]
    pub input_audio_format: AudioFormat,

    /// Output audio encoding.
    #[serde(default)]
    pub output_audio_format: AudioFormat,

    /// Turn detection configuration.
    #[serde(default)]
    pub turn_detection: TurnDetection,

    /// ICE/STUN server URLs for the peer connection.
    #[serde(default)]
    pub ice_servers: Vec<String>,

    /// Also gather loopback host candidates. Off for real deployments;
    /// single-machine topologies (local relays, tests) need it.
    #[serde(default)]
    pub include_loopback_candidates: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            voice: Voice::default(),
            instructions: None,
            input_audio_format: AudioFormat::default(),
            output_audio_format: AudioFormat::default(),
            turn_detection: TurnDetection::default(),
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            include_loopback_candidates: false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_as_str() {
        assert_eq!(Voice::Alloy.as_str(), "alloy");
        assert_eq!(Voice::Shimmer.as_str(), "shimmer");
    }

    #[test]
    fn test_voice_from_str() {
        assert_eq!(Voice::from_str_or_default("SHIMMER"), Voice::Shimmer);
        assert_eq!(Voice::from_str_or_default("unknown"), Voice::Alloy);
    }

    #[test]
    fn test_audio_format_sample_rate() {
        assert_eq!(AudioFormat::Pcm16.sample_rate(), 24000);
        assert_eq!(AudioFormat::G711Ulaw.sample_rate(), 8000);
    }

    #[test]
    fn test_audio_format_from_str() {
        assert_eq!(AudioFormat::from_str_or_default("linear16"), AudioFormat::Pcm16);
        assert_eq!(AudioFormat::from_str_or_default("mulaw"), AudioFormat::G711Ulaw);
    }

    #[test]
    fn test_default_turn_detection() {
        match TurnDetection::default() {
            TurnDetection::ServerVad { threshold, silence_duration_ms, .. } => {
                assert_eq!(threshold, Some(0.5));
                assert_eq!(silence_duration_ms, Some(500));
            }
            _ => panic!("Expected ServerVad default"),
        }
    }

    #[test]
    fn test_default_options() {
        let options = SessionOptions::default();
        assert!(!options.ice_servers.is_empty());
        assert!(options.instructions.is_none());
        assert!(!options.include_loopback_candidates);
    }

    #[test]
    fn test_turn_detection_serialization() {
        let td = TurnDetection::default();
        let json = serde_json::to_string(&td).unwrap();
        assert!(json.contains("server_vad"));
        assert!(!json.contains("eagerness"));
    }
}
