pub mod endpoint;
pub use endpoint::{EndpointError, validate_signaling_url};
pub mod pcm;
pub use pcm::{frame_duration, pcm16_to_f32};
