//! Session/connection core.
//!
//! Leaves first: the event bus, the audio playback queue, and the response
//! lifecycle tracker have no dependencies on the transport; the transport
//! session composes them; the session facade composes everything into one
//! lifecycle object.

pub mod bus;
pub mod error;
pub mod lifecycle;
pub mod media;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod transport;

// Re-export commonly used types for convenience
pub use bus::{EventBus, EventHandler, InboundEvent};
pub use error::{SessionError, SessionResult};
pub use lifecycle::ResponseLifecycle;
pub use media::{MicrophoneSource, MicrophoneTrack};
pub use playback::{AudioFrame, AudioSink, PlaybackQueue};
pub use protocol::{ApiError, ClientEvent, ContentPart, ConversationItem, ServerEvent};
pub use session::Session;
pub use signaling::{HttpSignaling, SignalingClient};
pub use transport::{LinkState, SetupState, TransportSession};
