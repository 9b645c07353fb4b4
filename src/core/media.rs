//! Microphone capture seam.
//!
//! The transport never talks to capture hardware directly: it asks a
//! [`MicrophoneSource`] for a [`MicrophoneTrack`] and substitutes that track
//! onto the pre-allocated audio sender. A denied capture request surfaces as
//! [`SessionError::CapturePermission`] and propagates to the caller - the
//! core does not decide how to present it.
//!
//! `CpalMicrophone` (behind `device-audio`) captures from the default input
//! device and pumps 20 ms opus frames into the local track.

use std::sync::Arc;

use async_trait::async_trait;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::core::error::SessionResult;

/// A live microphone capture bound to a local track.
///
/// Dropping the handle stops the underlying capture.
pub struct MicrophoneTrack {
    track: Arc<TrackLocalStaticSample>,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl MicrophoneTrack {
    /// Bundle a local track with the closure that halts its capture pump.
    pub fn new(track: Arc<TrackLocalStaticSample>, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            track,
            stop: Some(Box::new(stop)),
        }
    }

    /// The local track to substitute onto the audio sender.
    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    /// Stop the capture device.
    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for MicrophoneTrack {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

/// Supplies microphone tracks on demand (the environment's capture API).
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    /// Request a capture handle.
    ///
    /// Fails with [`SessionError::CapturePermission`] when the environment
    /// denies access; the error propagates to the `start_mic` caller.
    ///
    /// [`SessionError::CapturePermission`]: crate::core::error::SessionError::CapturePermission
    async fn open(&self) -> SessionResult<MicrophoneTrack>;
}

// =============================================================================
// Device capture (cpal + opus)
// =============================================================================

#[cfg(feature = "device-audio")]
mod device {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use webrtc::api::media_engine::MIME_TYPE_OPUS;
    use webrtc::media::Sample;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

    use crate::core::error::SessionError;

    /// Opus frame length: 20 ms.
    const FRAME_MS: u64 = 20;

    /// Sample rates the opus encoder accepts.
    const OPUS_RATES: &[u32] = &[8000, 12000, 16000, 24000, 48000];

    /// Default-input-device capture source.
    #[derive(Debug, Default)]
    pub struct CpalMicrophone;

    impl CpalMicrophone {
        /// Create a source bound to the host's default input device.
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl MicrophoneSource for CpalMicrophone {
        async fn open(&self) -> SessionResult<MicrophoneTrack> {
            let (pcm_tx, pcm_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<i16>>();
            let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<u32, SessionError>>();
            let stop_flag = Arc::new(AtomicBool::new(false));

            // The cpal stream is !Send, so a dedicated thread owns it until
            // the stop flag flips.
            let thread_stop = Arc::clone(&stop_flag);
            std::thread::Builder::new()
                .name("voxlink-capture".to_string())
                .spawn(move || capture_thread(pcm_tx, ready_tx, thread_stop))
                .map_err(|e| SessionError::CaptureDevice(e.to_string()))?;

            let sample_rate = tokio::task::spawn_blocking(move || ready_rx.recv())
                .await
                .map_err(|e| SessionError::CaptureDevice(e.to_string()))?
                .map_err(|e| SessionError::CaptureDevice(e.to_string()))??;

            // The RTP clock for opus is 48 kHz / 2ch regardless of what the
            // encoder is fed; the capability must match the negotiated SDP.
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_string(),
                "voxlink-mic".to_string(),
            ));

            let pump = tokio::spawn(encode_pump(pcm_rx, Arc::clone(&track), sample_rate));

            Ok(MicrophoneTrack::new(track, move || {
                stop_flag.store(true, Ordering::SeqCst);
                pump.abort();
            }))
        }
    }

    fn capture_thread(
        pcm_tx: tokio::sync::mpsc::UnboundedSender<Vec<i16>>,
        ready_tx: std::sync::mpsc::Sender<Result<u32, SessionError>>,
        stop: Arc<AtomicBool>,
    ) {
        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            let _ = ready_tx.send(Err(SessionError::CapturePermission(
                "no input device available".to_string(),
            )));
            return;
        };

        let config = match device.default_input_config() {
            Ok(config) => config,
            Err(e) => {
                let _ = ready_tx.send(Err(SessionError::CaptureDevice(e.to_string())));
                return;
            }
        };

        let sample_rate = config.sample_rate().0;
        if !OPUS_RATES.contains(&sample_rate) {
            let _ = ready_tx.send(Err(SessionError::CaptureDevice(format!(
                "unsupported capture sample rate: {sample_rate}"
            ))));
            return;
        }
        let channels = config.channels() as usize;

        let err_fn = |e| tracing::warn!(error = %e, "Capture stream error");
        let stream = match config.sample_format() {
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config.into(),
                move |data: &[i16], _| {
                    let mono: Vec<i16> = data.iter().step_by(channels).copied().collect();
                    let _ = pcm_tx.send(mono);
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data: &[f32], _| {
                    let mono: Vec<i16> = data
                        .iter()
                        .step_by(channels)
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    let _ = pcm_tx.send(mono);
                },
                err_fn,
                None,
            ),
            other => {
                let _ = ready_tx.send(Err(SessionError::CaptureDevice(format!(
                    "unsupported capture sample format: {other:?}"
                ))));
                return;
            }
        };

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready_tx.send(Err(SessionError::CapturePermission(e.to_string())));
                return;
            }
        };
        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(SessionError::CaptureDevice(e.to_string())));
            return;
        }
        let _ = ready_tx.send(Ok(sample_rate));

        while !stop.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
        }
        drop(stream);
    }

    async fn encode_pump(
        mut pcm_rx: tokio::sync::mpsc::UnboundedReceiver<Vec<i16>>,
        track: Arc<TrackLocalStaticSample>,
        sample_rate: u32,
    ) {
        let mut encoder =
            match opus::Encoder::new(sample_rate, opus::Channels::Mono, opus::Application::Voip) {
                Ok(encoder) => encoder,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create opus encoder");
                    return;
                }
            };

        let frame_len = (sample_rate as u64 * FRAME_MS / 1000) as usize;
        let mut pending: Vec<i16> = Vec::with_capacity(frame_len * 4);
        let mut packet = vec![0u8; 1500];

        while let Some(chunk) = pcm_rx.recv().await {
            pending.extend_from_slice(&chunk);
            while pending.len() >= frame_len {
                let frame: Vec<i16> = pending.drain(..frame_len).collect();
                let n = match encoder.encode(&frame, &mut packet) {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(error = %e, "Opus encode failed; dropping frame");
                        continue;
                    }
                };
                let sample = Sample {
                    data: Bytes::copy_from_slice(&packet[..n]),
                    duration: Duration::from_millis(FRAME_MS),
                    ..Default::default()
                };
                if track.write_sample(&sample).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(feature = "device-audio")]
pub use device::CpalMicrophone;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use webrtc::api::media_engine::MIME_TYPE_OPUS;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

    fn silent_track() -> Arc<TrackLocalStaticSample> {
        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_string(),
            "test-mic".to_string(),
        ))
    }

    #[test]
    fn test_stop_invoked_once() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        let handle = MicrophoneTrack::new(silent_track(), move || {
            assert!(!flag.swap(true, Ordering::SeqCst), "stop ran twice");
        });

        handle.stop();
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_stops_capture() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        {
            let _handle = MicrophoneTrack::new(silent_track(), move || {
                flag.store(true, Ordering::SeqCst);
            });
        }
        assert!(stopped.load(Ordering::SeqCst));
    }
}
