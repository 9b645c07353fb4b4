//! voxlink - realtime voice+vision session client.
//!
//! This crate holds a live bidirectional media+control session with a remote
//! conversational AI endpoint over a WebRTC peer connection. Three streams are
//! multiplexed through one transport: outbound microphone audio (an RTP track),
//! outbound still-image turns, and inbound synthesized audio/text - the latter
//! two carried as typed JSON events on a single ordered data channel.
//!
//! # Architecture
//!
//! - [`core::bus::EventBus`] - in-process typed publish/subscribe for inbound events
//! - [`core::playback::PlaybackQueue`] - gapless FIFO rendering of inbound PCM fragments
//! - [`core::lifecycle::ResponseLifecycle`] - at-most-one-in-flight response tracking
//! - [`core::transport::TransportSession`] - peer connection, data channel, track substitution
//! - [`core::session::Session`] - the facade consumed by UI layers
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voxlink::{Session, SessionOptions};
//! use voxlink::core::signaling::HttpSignaling;
//!
//! #[tokio::main]
//! async fn main() -> voxlink::SessionResult<()> {
//!     let signaling = Arc::new(HttpSignaling::from_env()?);
//!     let session = Session::connect(
//!         SessionOptions::default(),
//!         signaling,
//!         mic,   // impl MicrophoneSource (e.g. CpalMicrophone with `device-audio`)
//!         sink,  // impl AudioSink (e.g. RodioSink with `device-audio`)
//!     )
//!     .await?;
//!
//!     session.on("response.audio_transcript.delta", Arc::new(|event| {
//!         println!("{}", event.payload);
//!     }));
//!
//!     session.enable_audio_playback();
//!     session.start_mic().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{AudioFormat, SessionOptions, TurnDetection, Voice};
pub use core::bus::{EventHandler, InboundEvent};
pub use core::error::{SessionError, SessionResult};
pub use core::media::{MicrophoneSource, MicrophoneTrack};
pub use core::playback::{AudioFrame, AudioSink};
pub use core::protocol::{ClientEvent, ContentPart, ConversationItem, ServerEvent};
pub use core::session::Session;
pub use core::signaling::{HttpSignaling, SignalingClient};
pub use core::transport::LinkState;
