//! Inbound audio playback queue.
//!
//! Decoded PCM fragments are queued in arrival order and drained by a single
//! logical consumer that renders them back-to-back with no silence gaps. A
//! reset signal (buffer-cleared or response-cancelled) discards every
//! unplayed fragment and aborts mid-fragment playback, so no stale audio is
//! audible afterward.
//!
//! Rendering goes through the [`AudioSink`] seam: device output (rodio) lives
//! behind the `device-audio` feature, and tests substitute recording sinks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::core::error::SessionResult;
use crate::utils::pcm;

/// One decoded PCM fragment awaiting playback.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// PCM 16-bit signed little-endian mono samples
    pub pcm: Bytes,
    /// Sample rate in Hz, passed through to the device unchanged
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Create a frame from raw pcm16 bytes.
    pub fn new(pcm: impl Into<Bytes>, sample_rate: u32) -> Self {
        Self {
            pcm: pcm.into(),
            sample_rate,
        }
    }

    /// Normalized f32 samples (linear conversion, no resample).
    pub fn samples(&self) -> Vec<f32> {
        pcm::pcm16_to_f32(&self.pcm)
    }

    /// Wall-clock duration of this frame.
    pub fn duration(&self) -> std::time::Duration {
        pcm::frame_duration(self.pcm.len(), self.sample_rate)
    }
}

/// Renders frames to the audio device (or records them, in tests).
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    /// Render one frame to completion. Suspends only the drain task, not the
    /// event loop; other inbound messages keep flowing while this pends.
    async fn render(&self, frame: AudioFrame) -> SessionResult<()>;

    /// Abort the in-progress render, if any. Called on reset.
    fn interrupt(&self);

    /// Autoplay gate: playback devices may defer device setup until enabled.
    fn set_enabled(&self, _enabled: bool) {}
}

struct QueueInner {
    sink: Arc<dyn AudioSink>,
    queue: Mutex<VecDeque<AudioFrame>>,
    draining: AtomicBool,
    enabled: AtomicBool,
    // Bumped on every reset; frames popped under an older epoch are stale.
    epoch: AtomicU64,
}

/// Ordered fragment queue with a single-consumer drain loop.
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<QueueInner>,
}

impl PlaybackQueue {
    /// Create a queue draining into `sink`. Starts enabled; callers that must
    /// honor an activation gesture construct with [`set_enabled`] false.
    ///
    /// [`set_enabled`]: PlaybackQueue::set_enabled
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                sink,
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                enabled: AtomicBool::new(true),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Append a fragment; starts the drain loop if none is active.
    pub fn enqueue(&self, frame: AudioFrame) {
        self.inner.queue.lock().push_back(frame);
        self.kick();
    }

    /// Discard all unplayed fragments and abort mid-fragment playback.
    ///
    /// Any fragment enqueued after this call renders normally; fragments
    /// enqueued before it never do.
    pub fn reset(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.queue.lock().clear();
        self.inner.sink.interrupt();
    }

    /// Gate playback on/off. Enabling kicks the drain if fragments queued up
    /// while disabled.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        self.inner.sink.set_enabled(enabled);
        if enabled {
            self.kick();
        }
    }

    /// True when no fragment is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().is_empty()
    }

    /// Number of fragments awaiting playback.
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    fn kick(&self) {
        if !self.inner.enabled.load(Ordering::SeqCst) {
            return;
        }
        if !self.inner.draining.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(Self::drain(inner));
        }
    }

    /// Single-consumer drain loop. The `draining` flag guarantees two loops
    /// never interleave; a second concurrent drain would corrupt ordering.
    async fn drain(inner: Arc<QueueInner>) {
        loop {
            if !inner.enabled.load(Ordering::SeqCst) {
                inner.draining.store(false, Ordering::SeqCst);
                // A concurrent re-enable may have skipped its kick while the
                // flag was still held; reclaim the drain if so.
                if inner.enabled.load(Ordering::SeqCst)
                    && !inner.queue.lock().is_empty()
                    && !inner.draining.swap(true, Ordering::SeqCst)
                {
                    continue;
                }
                return;
            }

            let epoch = inner.epoch.load(Ordering::SeqCst);
            let frame = inner.queue.lock().pop_front();
            let Some(frame) = frame else {
                inner.draining.store(false, Ordering::SeqCst);
                // An enqueue may have landed between the pop and the flag
                // clear; reclaim the drain or leave it to the newer one.
                if inner.queue.lock().is_empty()
                    || inner.draining.swap(true, Ordering::SeqCst)
                {
                    return;
                }
                continue;
            };

            // A reset between pop and render makes this frame stale.
            if inner.epoch.load(Ordering::SeqCst) != epoch {
                continue;
            }

            if let Err(e) = inner.sink.render(frame).await {
                tracing::warn!(error = %e, "Audio fragment render failed; continuing drain");
            }
        }
    }
}

// =============================================================================
// Device sink (rodio)
// =============================================================================

/// Speaker output via a rodio sink on a dedicated audio thread.
///
/// Device setup is deferred until the first `set_enabled(true)`, which the
/// facade ties to a user gesture.
#[cfg(feature = "device-audio")]
pub struct RodioSink {
    sink: Mutex<Option<Arc<rodio::Sink>>>,
}

#[cfg(feature = "device-audio")]
impl RodioSink {
    /// Create an inactive sink; the output device opens on first enable.
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(None),
        }
    }

    fn ensure_device(&self) {
        let mut guard = self.sink.lock();
        if guard.is_some() {
            return;
        }

        let (tx, rx) = std::sync::mpsc::channel::<Option<Arc<rodio::Sink>>>();
        // The OutputStream is !Send, so a dedicated thread owns it for as
        // long as the shared Sink handle is alive.
        let spawned = std::thread::Builder::new()
            .name("voxlink-playback".to_string())
            .spawn(move || {
                let built = (|| {
                    let (stream, handle) =
                        rodio::OutputStream::try_default().map_err(|e| e.to_string())?;
                    let sink = rodio::Sink::try_new(&handle).map_err(|e| e.to_string())?;
                    Ok::<_, String>((stream, Arc::new(sink)))
                })();
                match built {
                    Ok((stream, sink)) => {
                        let _ = tx.send(Some(Arc::clone(&sink)));
                        let _keepalive = stream;
                        while Arc::strong_count(&sink) > 1 {
                            std::thread::sleep(std::time::Duration::from_millis(250));
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to open playback device");
                        let _ = tx.send(None);
                    }
                }
            });

        if spawned.is_ok() {
            if let Ok(Some(sink)) = rx.recv() {
                *guard = Some(sink);
            }
        }
    }
}

#[cfg(feature = "device-audio")]
impl Default for RodioSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "device-audio")]
#[async_trait]
impl AudioSink for RodioSink {
    async fn render(&self, frame: AudioFrame) -> SessionResult<()> {
        let sink = match self.sink.lock().as_ref() {
            Some(sink) => Arc::clone(sink),
            // Not yet enabled by a gesture; nothing to render into.
            None => return Ok(()),
        };

        let samples = frame.samples();
        let source = rodio::buffer::SamplesBuffer::new(1, frame.sample_rate, samples);
        sink.append(source);

        let waiter = Arc::clone(&sink);
        tokio::task::spawn_blocking(move || waiter.sleep_until_end())
            .await
            .map_err(|e| crate::core::error::SessionError::Playback(e.to_string()))?;
        Ok(())
    }

    fn interrupt(&self) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.stop();
        }
    }

    fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.ensure_device();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    /// Records rendered frames, completing each render immediately.
    #[derive(Default)]
    struct RecordingSink {
        rendered: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn render(&self, frame: AudioFrame) -> SessionResult<()> {
            // First byte tags the frame in these tests.
            self.rendered.lock().push(frame.pcm[0]);
            Ok(())
        }

        fn interrupt(&self) {}
    }

    /// Holds each render open until permitted, recording starts and aborts.
    struct GatedSink {
        started: Mutex<Vec<u8>>,
        permits: Mutex<usize>,
        aborted: AtomicBool,
        notify: Notify,
    }

    impl GatedSink {
        fn new() -> Self {
            Self {
                started: Mutex::new(Vec::new()),
                permits: Mutex::new(0),
                aborted: AtomicBool::new(false),
                notify: Notify::new(),
            }
        }

        fn permit(&self, n: usize) {
            *self.permits.lock() += n;
            self.notify.notify_waiters();
        }
    }

    #[async_trait]
    impl AudioSink for GatedSink {
        async fn render(&self, frame: AudioFrame) -> SessionResult<()> {
            self.started.lock().push(frame.pcm[0]);
            loop {
                if self.aborted.swap(false, Ordering::SeqCst) {
                    return Ok(());
                }
                {
                    let mut permits = self.permits.lock();
                    if *permits > 0 {
                        *permits -= 1;
                        return Ok(());
                    }
                }
                let _ = timeout(Duration::from_millis(20), self.notify.notified()).await;
            }
        }

        fn interrupt(&self) {
            self.aborted.store(true, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
    }

    fn frame(tag: u8) -> AudioFrame {
        AudioFrame::new(vec![tag, 0, 0, 0], 24000)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_fragments_render_in_fifo_order() {
        let sink = Arc::new(RecordingSink::default());
        let queue = PlaybackQueue::new(sink.clone());

        for tag in 1..=8u8 {
            queue.enqueue(frame(tag));
        }

        wait_until(|| sink.rendered.lock().len() == 8).await;
        assert_eq!(*sink.rendered.lock(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_interleaved_enqueues_keep_order() {
        let sink = Arc::new(RecordingSink::default());
        let queue = PlaybackQueue::new(sink.clone());

        for tag in 1..=5u8 {
            queue.enqueue(frame(tag));
            // Jitter between enqueues must not reorder rendering.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        wait_until(|| sink.rendered.lock().len() == 5).await;
        assert_eq!(*sink.rendered.lock(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_reset_discards_unplayed_fragments() {
        let sink = Arc::new(GatedSink::new());
        let queue = PlaybackQueue::new(sink.clone());

        queue.enqueue(frame(1));
        wait_until(|| sink.started.lock().len() == 1).await;

        queue.enqueue(frame(2));
        queue.enqueue(frame(3));

        // Reset while frame 1 is mid-render: 2 and 3 must never start.
        queue.reset();
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*sink.started.lock(), vec![1]);
    }

    #[tokio::test]
    async fn test_fragments_after_reset_still_render() {
        let sink = Arc::new(GatedSink::new());
        let queue = PlaybackQueue::new(sink.clone());

        queue.enqueue(frame(1));
        wait_until(|| sink.started.lock().len() == 1).await;
        queue.enqueue(frame(2));
        queue.reset();

        sink.permit(1);
        queue.enqueue(frame(4));
        wait_until(|| sink.started.lock().len() == 2).await;
        assert_eq!(*sink.started.lock(), vec![1, 4]);
    }

    #[tokio::test]
    async fn test_disabled_queue_holds_fragments() {
        let sink = Arc::new(RecordingSink::default());
        let queue = PlaybackQueue::new(sink.clone());
        queue.set_enabled(false);

        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sink.rendered.lock().is_empty());
        assert_eq!(queue.len(), 2);

        // Enabling drains what queued up while gated.
        queue.set_enabled(true);
        wait_until(|| sink.rendered.lock().len() == 2).await;
        assert_eq!(*sink.rendered.lock(), vec![1, 2]);
    }

    #[test]
    fn test_frame_samples_and_duration() {
        let f = AudioFrame::new(vec![0x00, 0x80, 0xFF, 0x7F], 24000);
        let samples = f.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], -1.0);
        assert!(f.duration() > Duration::ZERO);
    }
}
