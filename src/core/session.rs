//! Session facade - the externally consumed surface.
//!
//! One `Session` per mount: constructed with [`Session::connect`] (which
//! performs the whole setup handshake), torn down with
//! [`Session::cleanup`] or on drop. UI layers interact only through this
//! narrow method set; nothing else gets mutation access to the transport,
//! the playback queue, or the lifecycle tracker.

use std::sync::Arc;

use crate::config::SessionOptions;
use crate::core::bus::EventHandler;
use crate::core::error::SessionResult;
use crate::core::media::MicrophoneSource;
use crate::core::playback::AudioSink;
use crate::core::protocol::ClientEvent;
use crate::core::signaling::SignalingClient;
use crate::core::transport::{LinkState, SetupState, TransportSession};

/// A live session with the remote conversational endpoint.
pub struct Session {
    transport: Arc<TransportSession>,
    mic_source: Arc<dyn MicrophoneSource>,
}

impl Session {
    /// Connect on construction: establishes the peer connection, performs
    /// the one-time signaling exchange, and waits for the control channel to
    /// open and the configuration instruction to go out.
    ///
    /// A setup or signaling failure is fatal to this instance; recovery is a
    /// new `connect` call, never an internal retry.
    pub async fn connect(
        options: SessionOptions,
        signaling: Arc<dyn SignalingClient>,
        mic_source: Arc<dyn MicrophoneSource>,
        sink: Arc<dyn AudioSink>,
    ) -> SessionResult<Self> {
        let transport = TransportSession::connect(&options, signaling.as_ref(), sink).await?;
        Ok(Self {
            transport,
            mic_source,
        })
    }

    /// Transmit an event on the control channel. Dropped with a diagnostic
    /// if the channel is not open.
    pub async fn send(&self, event: ClientEvent) -> SessionResult<()> {
        self.transport.send(event).await
    }

    /// Subscribe `handler` to inbound events of `event_type`.
    pub fn on(&self, event_type: &str, handler: EventHandler) {
        self.transport.bus().on(event_type, handler);
    }

    /// Unsubscribe a previously registered handler.
    pub fn off(&self, event_type: &str, handler: &EventHandler) {
        self.transport.bus().off(event_type, handler);
    }

    /// Start microphone capture via track substitution. Capture permission
    /// failures propagate; the session continues unaffected.
    pub async fn start_mic(&self) -> SessionResult<()> {
        self.transport.start_mic(self.mic_source.as_ref()).await
    }

    /// Stop microphone capture, substituting silence on the sender. Returns
    /// whether a cancel instruction was emitted for an in-flight response.
    pub async fn stop_mic(&self) -> SessionResult<bool> {
        self.transport.stop_mic().await
    }

    /// Allow audible playback. Call from a user-gesture-triggered path; the
    /// device sink defers its setup until this runs. Fragments received
    /// beforehand stay queued.
    pub fn enable_audio_playback(&self) {
        self.transport.playback().set_enabled(true);
    }

    /// Send an already-encoded still image as a user turn and request a
    /// response for it.
    pub async fn capture_and_send(
        &self,
        image_url: &str,
        prompt: Option<&str>,
    ) -> SessionResult<()> {
        self.transport.capture_and_send(image_url, prompt).await
    }

    /// Send a text-only user turn and request a response for it.
    pub async fn send_text(&self, text: &str) -> SessionResult<()> {
        self.transport.send_text(text).await
    }

    /// Current peer connection state.
    pub fn state(&self) -> LinkState {
        self.transport.link_state()
    }

    /// Setup handshake progress.
    pub fn setup_state(&self) -> SetupState {
        self.transport.setup_state()
    }

    /// Whether the microphone track is live.
    pub fn mic_active(&self) -> bool {
        self.transport.mic_active()
    }

    /// Whether a response is currently in flight.
    pub fn response_in_flight(&self) -> bool {
        self.transport.response_in_flight()
    }

    /// Access to the underlying transport, for composition and tests.
    pub fn transport(&self) -> &Arc<TransportSession> {
        &self.transport
    }

    /// Tear everything down: capture, channel, connection, handler registry,
    /// playback. Idempotent - a second call is a no-op.
    pub async fn cleanup(&self) {
        self.transport.close().await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Best-effort teardown when the owning scope ends without an
        // explicit cleanup. Close is async, so hand it to the runtime if
        // one is still around.
        if self.transport.is_closed() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let transport = Arc::clone(&self.transport);
            handle.spawn(async move { transport.close().await });
        }
    }
}
