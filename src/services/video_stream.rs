use crate::error::Result;
use crate::events::{CapturedFrame, WindowId};
use crate::services::frame_inbox::FrameInbox;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Encoder side of a window stream.
#[async_trait::async_trait]
pub trait FrameSink<B>: Send + Sync {
    async fn encode(&self, frame: CapturedFrame<B>) -> Result<()>;

    async fn update_frame_rate(&self, fps: u32) -> Result<()>;
}

/// Counters accumulated since the previous [`VideoStream::take_metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamMetrics {
    pub enqueued: u64,
    pub dropped: u64,
    pub encoded: u64,
    pub encode_errors: u64,
}

struct StreamInner<B> {
    window_id: WindowId,
    inbox: FrameInbox<CapturedFrame<B>>,
    sink: Arc<dyn FrameSink<B>>,
    active_fps: u32,
    inactive_fps: u32,
    active: AtomicBool,
    stopped: AtomicBool,
    encoded: AtomicU64,
    encode_errors: AtomicU64,
}

/// Frame pump for one captured window.
///
/// Capture callbacks `push` frames from any thread. At most one drain task per stream feeds
/// the sink; frames arriving while the encoder is busy replace the oldest buffered ones.
pub struct VideoStream<B> {
    inner: Arc<StreamInner<B>>,
}

impl<B> Clone for VideoStream<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Send + 'static> VideoStream<B> {
    pub fn new(
        window_id: WindowId,
        sink: Arc<dyn FrameSink<B>>,
        inbox_capacity: usize,
        active_fps: u32,
        inactive_fps: u32,
    ) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                window_id,
                inbox: FrameInbox::new(inbox_capacity),
                sink,
                active_fps,
                inactive_fps,
                active: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                encoded: AtomicU64::new(0),
                encode_errors: AtomicU64::new(0),
            }),
        }
    }

    pub fn window_id(&self) -> WindowId {
        self.inner.window_id
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// True while a drain task owns the inbox.
    pub fn is_draining(&self) -> bool {
        self.inner.inbox.is_drain_scheduled()
    }

    /// Hands a captured frame to the stream. Returns true if this call started a drain.
    ///
    /// Must be called from within a tokio runtime.
    pub fn push(&self, frame: CapturedFrame<B>) -> bool {
        if self.is_stopped() {
            return false;
        }

        if !self.inner.inbox.enqueue(frame) {
            return false;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(Self::drain(inner));
        true
    }

    async fn drain(inner: Arc<StreamInner<B>>) {
        loop {
            // stop() clears the inbox after raising the flag, so no frame is taken once it is set
            while !inner.stopped.load(Ordering::Acquire) {
                let Some(frame) = inner.inbox.take_next() else {
                    break;
                };
                match inner.sink.encode(frame).await {
                    Ok(()) => {
                        inner.encoded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        inner.encode_errors.fetch_add(1, Ordering::Relaxed);
                        debug!("Encoding frame of window {} failed: {}", inner.window_id, e);
                    }
                }
            }

            if inner.stopped.load(Ordering::Acquire) {
                // a push that raced stop() may still land here; count it as dropped
                inner.inbox.clear();
            }
            // frames pushed after the last take_next keep this drain alive
            if !inner.inbox.finish_drain() {
                return;
            }
        }
    }

    /// Applies an activity transition: frontmost windows stream at the active rate, the rest
    /// are throttled. Repeating the current state does nothing.
    pub async fn set_active(&self, active: bool) -> Result<()> {
        if self.inner.active.swap(active, Ordering::AcqRel) == active {
            return Ok(());
        }

        let fps = if active {
            self.inner.active_fps
        } else {
            self.inner.inactive_fps
        };
        info!("Window {} frame rate -> {} fps", self.inner.window_id, fps);

        if let Err(e) = self.inner.sink.update_frame_rate(fps).await {
            warn!("Frame rate update for window {} failed: {}", self.inner.window_id, e);
            return Err(e);
        }
        Ok(())
    }

    /// Stops accepting frames and discards buffered ones. Safe to call repeatedly.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.inbox.clear();
        info!("Video stream for window {} stopped", self.inner.window_id);
    }

    pub fn take_metrics(&self) -> StreamMetrics {
        StreamMetrics {
            enqueued: self.inner.inbox.consume_enqueued_count(),
            dropped: self.inner.inbox.consume_dropped_count(),
            encoded: self.inner.encoded.swap(0, Ordering::Relaxed),
            encode_errors: self.inner.encode_errors.swap(0, Ordering::Relaxed),
        }
    }
}
