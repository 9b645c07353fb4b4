//! Transport session: peer connection, control channel, audio sender.
//!
//! Owns the WebRTC objects and translates facade-level intents into wire
//! operations. The single most important correctness rule here is track
//! substitution: one bidirectional audio transceiver is pre-allocated before
//! the setup handshake, and every mic toggle afterwards goes through
//! `replace_track` on that sender. Adding or removing tracks after setup
//! would trigger a renegotiation that can disrupt the open control channel,
//! so no code path does it.
//!
//! Setup sequence (ordering is load-bearing):
//! 1. peer connection with STUN discovery servers
//! 2. inbound-track handler, registered before anything else can arrive
//! 3. audio transceiver pre-allocation (no track attached yet)
//! 4. ordered data channel - event ordering on the wire is relied upon
//! 5. offer -> signaling exchange -> answer
//! 6. on channel open, one configuration instruction

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::{PLAYBACK_SAMPLE_RATE, SessionOptions};
use crate::core::bus::{EventBus, InboundEvent};
use crate::core::error::{SessionError, SessionResult};
use crate::core::lifecycle::ResponseLifecycle;
use crate::core::media::MicrophoneSource;
use crate::core::playback::{AudioFrame, AudioSink, PlaybackQueue};
use crate::core::protocol::{
    ClientEvent, ContentPart, ConversationItem, ServerEvent, SessionUpdate,
};

/// Label of the control channel.
const CONTROL_CHANNEL_LABEL: &str = "events";

/// Instruction text sent with an image turn when the caller provides none.
pub const DEFAULT_IMAGE_PROMPT: &str = "Describe what you see in this image.";

// =============================================================================
// States
// =============================================================================

/// Peer connection state as surfaced to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Connection not yet established
    New,
    /// Connecting (ICE gathering/checking)
    Connecting,
    /// Connected
    Connected,
    /// Transport interrupted
    Disconnected,
    /// Connection failed
    Failed,
    /// Connection closed
    Closed,
}

impl From<RTCPeerConnectionState> for LinkState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New => LinkState::New,
            RTCPeerConnectionState::Connecting => LinkState::Connecting,
            RTCPeerConnectionState::Connected => LinkState::Connected,
            RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
            RTCPeerConnectionState::Failed => LinkState::Failed,
            RTCPeerConnectionState::Closed => LinkState::Closed,
            _ => LinkState::New,
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::New => "new",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Failed => "failed",
            LinkState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Setup handshake progress. Transitions are monotonic; `Failed` is terminal
/// and reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    /// Nothing created yet
    Uninitialized,
    /// Local description being generated
    Offering,
    /// Offer handed to the signaling collaborator
    AwaitingAnswer,
    /// Remote description applied; waiting for the channel to open
    ChannelOpening,
    /// Channel open and configuration sent
    Ready,
    /// Transport error; session requires teardown + recreate
    Failed,
}

impl SetupState {
    fn rank(self) -> u8 {
        match self {
            SetupState::Uninitialized => 0,
            SetupState::Offering => 1,
            SetupState::AwaitingAnswer => 2,
            SetupState::ChannelOpening => 3,
            SetupState::Ready => 4,
            SetupState::Failed => 5,
        }
    }
}

// =============================================================================
// Transport Session
// =============================================================================

/// Owns the peer connection, control channel, and audio sender for one
/// session. Created via [`TransportSession::connect`]; torn down with
/// [`TransportSession::close`].
pub struct TransportSession {
    peer: Arc<RTCPeerConnection>,
    channel: Arc<RTCDataChannel>,
    audio_sender: Arc<RTCRtpSender>,
    bus: Arc<EventBus>,
    playback: PlaybackQueue,
    lifecycle: Arc<Mutex<ResponseLifecycle>>,
    remote_track: Arc<Mutex<Option<Arc<TrackRemote>>>>,
    mic: Mutex<Option<crate::core::media::MicrophoneTrack>>,
    mic_active: AtomicBool,
    setup_rx: watch::Receiver<SetupState>,
    link_rx: watch::Receiver<LinkState>,
    closed: AtomicBool,
}

impl TransportSession {
    /// Establish the transport: peer connection, pre-allocated audio sender,
    /// ordered control channel, and the one-time signaling exchange. Returns
    /// once the channel is open and the configuration instruction is on the
    /// wire, or fails with the session in `Failed` state.
    ///
    /// There is no retry: a failed handshake requires a full
    /// teardown/recreate by the caller.
    pub async fn connect(
        options: &SessionOptions,
        signaling: &dyn crate::core::signaling::SignalingClient,
        sink: Arc<dyn AudioSink>,
    ) -> SessionResult<Arc<Self>> {
        let bus = Arc::new(EventBus::new());
        let playback = PlaybackQueue::new(sink);
        // Held until the consumer signals a playback gesture.
        playback.set_enabled(false);
        let lifecycle = Arc::new(Mutex::new(ResponseLifecycle::new()));
        let (setup_tx, setup_rx) = watch::channel(SetupState::Uninitialized);
        let setup_tx = Arc::new(setup_tx);
        let (link_tx, link_rx) = watch::channel(LinkState::New);

        // 1. Peer connection with ICE discovery servers.
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| SessionError::Setup(e.to_string()))?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| SessionError::Setup(e.to_string()))?;
        let mut setting_engine = SettingEngine::default();
        if options.include_loopback_candidates {
            setting_engine.set_include_loopback_candidate(true);
        }
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let ice_servers = options
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();
        let peer = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| SessionError::Setup(e.to_string()))?,
        );

        {
            let setup_tx = Arc::clone(&setup_tx);
            let bus = Arc::clone(&bus);
            peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let mapped = LinkState::from(state);
                tracing::info!(state = %mapped, "Peer connection state changed");
                let _ = link_tx.send(mapped);
                if mapped == LinkState::Failed {
                    Self::advance(&setup_tx, SetupState::Failed);
                }
                // Synthetic bus event so UI layers can observe transport
                // health without holding the facade.
                bus.emit(&InboundEvent {
                    event_type: "connection.state".to_string(),
                    payload: serde_json::json!({ "type": "connection.state", "state": mapped }),
                });
                Box::pin(async {})
            }));
        }

        // 2. Inbound-track handler before anything else is negotiated, so a
        // remote track arriving at any point is captured.
        let remote_track: Arc<Mutex<Option<Arc<TrackRemote>>>> = Arc::new(Mutex::new(None));
        {
            let slot = Arc::clone(&remote_track);
            peer.on_track(Box::new(move |track, _receiver, _transceiver| {
                let slot = Arc::clone(&slot);
                Box::pin(async move {
                    if track.kind() != RTPCodecType::Audio {
                        return;
                    }
                    tracing::info!(
                        codec = %track.codec().capability.mime_type,
                        "Remote audio track received"
                    );
                    *slot.lock() = Some(Arc::clone(&track));
                    // Drain RTP so the transport keeps flowing; audible
                    // playback is fed by audio fragment events on the
                    // control channel.
                    tokio::spawn(async move { while track.read_rtp().await.is_ok() {} });
                })
            }));
        }

        // 3. Pre-allocate the bidirectional audio sender with no track
        // attached. Mic start/stop later substitutes on this sender.
        let transceiver = peer
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: Vec::new(),
                }),
            )
            .await
            .map_err(|e| SessionError::Setup(e.to_string()))?;
        let audio_sender = transceiver.sender().await;
        {
            let sender = Arc::clone(&audio_sender);
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }

        // 4. Ordered control channel. Unordered delivery is not acceptable:
        // lifecycle event ordering is relied upon.
        let channel = peer
            .create_data_channel(
                CONTROL_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SessionError::Setup(e.to_string()))?;

        {
            let bus = Arc::clone(&bus);
            let playback = playback.clone();
            let lifecycle = Arc::clone(&lifecycle);
            channel.on_message(Box::new(move |msg: DataChannelMessage| {
                let bus = Arc::clone(&bus);
                let playback = playback.clone();
                let lifecycle = Arc::clone(&lifecycle);
                Box::pin(async move {
                    Self::handle_channel_message(&msg, &bus, &playback, &lifecycle);
                })
            }));
        }

        {
            let ch = Arc::clone(&channel);
            let opts = options.clone();
            let setup_tx = Arc::clone(&setup_tx);
            channel.on_open(Box::new(move || {
                Box::pin(async move {
                    tracing::info!(label = CONTROL_CHANNEL_LABEL, "Control channel open");
                    // One configuration instruction, immediately on open.
                    let event = ClientEvent::SessionUpdate {
                        session: SessionUpdate::from_options(&opts),
                    };
                    match event.to_wire() {
                        Ok(json) => {
                            if let Err(e) = ch.send_text(json).await {
                                tracing::error!(error = %e, "Failed to send configuration");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize configuration")
                        }
                    }
                    Self::advance(&setup_tx, SetupState::Ready);
                })
            }));
        }

        // 5. Offer -> signaling -> answer.
        if let Err(e) = Self::negotiate(&peer, signaling, &setup_tx).await {
            Self::advance(&setup_tx, SetupState::Failed);
            let _ = peer.close().await;
            return Err(e);
        }

        // Suspend until the channel-open event fires (or the transport
        // fails); other inbound work keeps flowing meanwhile.
        let mut ready_rx = setup_rx.clone();
        loop {
            let state = *ready_rx.borrow();
            match state {
                SetupState::Ready => break,
                SetupState::Failed => {
                    let _ = peer.close().await;
                    return Err(SessionError::Setup(
                        "transport failed before the control channel opened".to_string(),
                    ));
                }
                _ => {}
            }
            if ready_rx.changed().await.is_err() {
                return Err(SessionError::Setup("setup state channel dropped".to_string()));
            }
        }

        Ok(Arc::new(Self {
            peer,
            channel,
            audio_sender,
            bus,
            playback,
            lifecycle,
            remote_track,
            mic: Mutex::new(None),
            mic_active: AtomicBool::new(false),
            setup_rx,
            link_rx,
            closed: AtomicBool::new(false),
        }))
    }

    async fn negotiate(
        peer: &Arc<RTCPeerConnection>,
        signaling: &dyn crate::core::signaling::SignalingClient,
        setup_tx: &Arc<watch::Sender<SetupState>>,
    ) -> SessionResult<()> {
        Self::advance(setup_tx, SetupState::Offering);
        let offer = peer
            .create_offer(None)
            .await
            .map_err(|e| SessionError::Setup(e.to_string()))?;
        peer.set_local_description(offer)
            .await
            .map_err(|e| SessionError::Setup(e.to_string()))?;

        // Non-trickle exchange: the relay gets one complete description.
        let mut gather_complete = peer.gathering_complete_promise().await;
        let _ = gather_complete.recv().await;

        let local = peer
            .local_description()
            .await
            .ok_or_else(|| SessionError::Setup("missing local description".to_string()))?;

        Self::advance(setup_tx, SetupState::AwaitingAnswer);
        let answer_sdp = signaling.exchange(&local.sdp).await?;
        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| SessionError::Signaling(format!("invalid answer SDP: {e}")))?;
        peer.set_remote_description(answer)
            .await
            .map_err(|e| SessionError::Setup(e.to_string()))?;
        Self::advance(setup_tx, SetupState::ChannelOpening);
        Ok(())
    }

    fn advance(tx: &watch::Sender<SetupState>, next: SetupState) {
        tx.send_modify(|state| {
            if next.rank() > state.rank() {
                *state = next;
            }
        });
    }

    /// One dispatch function for every inbound channel message: decode,
    /// intercept the fixed bookkeeping set, then forward to the bus so
    /// subscribers observe the full stream.
    fn handle_channel_message(
        msg: &DataChannelMessage,
        bus: &EventBus,
        playback: &PlaybackQueue,
        lifecycle: &Mutex<ResponseLifecycle>,
    ) {
        let text = match std::str::from_utf8(&msg.data) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding non-UTF-8 channel message");
                return;
            }
        };
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding undecodable channel message");
                return;
            }
        };
        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match ServerEvent::classify(&value) {
            ServerEvent::ResponseCreated { response } => {
                tracing::debug!(response_id = %response.id, "Response started");
                lifecycle.lock().on_started(response.id);
            }
            ServerEvent::ResponseDone { response } => {
                tracing::debug!(response_id = %response.id, "Response completed");
                lifecycle.lock().on_ended();
                playback.reset();
            }
            ServerEvent::ResponseCancelled { response } => {
                tracing::debug!(response_id = %response.id, "Response cancelled");
                lifecycle.lock().on_ended();
                playback.reset();
            }
            ServerEvent::OutputAudioBufferCleared { .. } => {
                lifecycle.lock().on_ended();
                playback.reset();
            }
            ServerEvent::AudioDelta { delta, .. } => {
                match ServerEvent::decode_audio_delta(&delta) {
                    Ok(pcm) => playback.enqueue(AudioFrame::new(pcm, PLAYBACK_SAMPLE_RATE)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Discarding undecodable audio fragment")
                    }
                }
            }
            ServerEvent::Error { error } => {
                // Forwarded below; the core takes no corrective action.
                tracing::error!(
                    error_type = %error.error_type,
                    message = %error.message,
                    "Remote-reported error"
                );
            }
            ServerEvent::Unknown { .. } => {}
        }

        bus.emit(&InboundEvent { event_type, payload: value });
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// Serialize and transmit an event, only if the channel is open.
    ///
    /// When it is not, the event is dropped with a diagnostic rather than
    /// queued: the provider protocol defines no replay semantics, and
    /// silently reordering around a not-yet-open channel is worse than
    /// dropping.
    pub async fn send(&self, event: ClientEvent) -> SessionResult<()> {
        if self.channel.ready_state() != RTCDataChannelState::Open {
            tracing::warn!(
                event_type = event.event_type(),
                state = ?self.channel.ready_state(),
                "Dropping outbound event: control channel not open"
            );
            return Ok(());
        }
        let json = event.to_wire()?;
        self.channel
            .send_text(json)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        Ok(())
    }

    /// Send an image turn: add-content followed by request-response. Two
    /// sequential sends in that order - the remote treats them as distinct
    /// instructions.
    pub async fn capture_and_send(
        &self,
        image_url: &str,
        prompt: Option<&str>,
    ) -> SessionResult<()> {
        let item = ConversationItem::user(vec![
            ContentPart::InputText {
                text: prompt.unwrap_or(DEFAULT_IMAGE_PROMPT).to_string(),
            },
            ContentPart::InputImage {
                image_url: image_url.to_string(),
            },
        ]);
        self.send(ClientEvent::ConversationItemCreate { item }).await?;
        self.send(ClientEvent::ResponseCreate { response: None }).await
    }

    /// Send a text turn with the same add-content / request-response pair.
    pub async fn send_text(&self, text: &str) -> SessionResult<()> {
        let item = ConversationItem::user(vec![ContentPart::InputText {
            text: text.to_string(),
        }]);
        self.send(ClientEvent::ConversationItemCreate { item }).await?;
        self.send(ClientEvent::ResponseCreate { response: None }).await
    }

    // -------------------------------------------------------------------------
    // Mic control
    // -------------------------------------------------------------------------

    /// Open the microphone and substitute its track onto the pre-allocated
    /// sender. A capture permission failure propagates to the caller.
    pub async fn start_mic(&self, source: &dyn MicrophoneSource) -> SessionResult<()> {
        if self.mic_active.load(Ordering::SeqCst) {
            return Ok(());
        }
        let capture = source.open().await?;
        let track: Arc<dyn TrackLocal + Send + Sync> = capture.track();
        self.audio_sender
            .replace_track(Some(track))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        *self.mic.lock() = Some(capture);
        self.mic_active.store(true, Ordering::SeqCst);
        tracing::info!("Microphone started (track substituted)");
        Ok(())
    }

    /// Substitute silence onto the sender (never removing it), stop the
    /// capture device, and cancel the in-flight response if there is one.
    ///
    /// Returns whether a cancel instruction was emitted. An unconditional
    /// cancel would be a defect: with no generation in flight it produces a
    /// spurious error on the wire.
    pub async fn stop_mic(&self) -> SessionResult<bool> {
        if let Some(capture) = self.mic.lock().take() {
            capture.stop();
        }
        if self.mic_active.swap(false, Ordering::SeqCst) {
            self.audio_sender
                .replace_track(None)
                .await
                .map_err(|e| SessionError::Transport(e.to_string()))?;
            tracing::info!("Microphone stopped (sender kept, track cleared)");
        }

        let cancel = self.lifecycle.lock().should_send_cancel();
        if cancel {
            self.send(ClientEvent::ResponseCancel).await?;
        }
        Ok(cancel)
    }

    // -------------------------------------------------------------------------
    // State & composition
    // -------------------------------------------------------------------------

    /// The event bus inbound messages are dispatched onto.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The inbound audio playback queue.
    pub fn playback(&self) -> &PlaybackQueue {
        &self.playback
    }

    /// Whether the mic track is currently live on the sender.
    pub fn mic_active(&self) -> bool {
        self.mic_active.load(Ordering::SeqCst)
    }

    /// Whether a response is currently tracked as in flight.
    pub fn response_in_flight(&self) -> bool {
        self.lifecycle.lock().should_send_cancel()
    }

    /// Current peer connection state.
    pub fn link_state(&self) -> LinkState {
        if self.closed.load(Ordering::SeqCst) {
            LinkState::Closed
        } else {
            *self.link_rx.borrow()
        }
    }

    /// Current setup progress.
    pub fn setup_state(&self) -> SetupState {
        *self.setup_rx.borrow()
    }

    /// Whether a remote media track has been captured.
    pub fn has_remote_track(&self) -> bool {
        self.remote_track.lock().is_some()
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Tear the transport down: stop capture, close the channel and the
    /// connection, clear the handler registry, detach playback. Safe to call
    /// any number of times.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Tearing down transport session");

        if let Some(capture) = self.mic.lock().take() {
            capture.stop();
        }
        self.mic_active.store(false, Ordering::SeqCst);

        if self.channel.ready_state() == RTCDataChannelState::Open {
            if let Err(e) = self.channel.close().await {
                tracing::debug!(error = %e, "Control channel close reported an error");
            }
        }
        if let Err(e) = self.peer.close().await {
            tracing::debug!(error = %e, "Peer connection close reported an error");
        }

        self.bus.clear();
        self.playback.reset();
        *self.remote_track.lock() = None;
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
