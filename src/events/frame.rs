use std::fmt;
use std::ops::Deref;
use tokio::time::Instant;

/// Wrapper that lets an OS-owned handle cross thread boundaries.
///
/// Capture services hand out buffers whose reference counting is thread-safe inside the OS
/// but whose Rust bindings are not marked `Send`. Constructing a `SendHandle` is the single
/// place where that assumption is asserted.
pub struct SendHandle<T>(T);

// SAFETY: `SendHandle::new` requires the caller to guarantee the wrapped handle may be moved
// to and used from another thread.
unsafe impl<T> Send for SendHandle<T> {}

impl<T> SendHandle<T> {
    /// # Safety
    ///
    /// The wrapped value must be safe to move to another thread and to drop there, e.g. an OS
    /// buffer with atomic retain/release.
    pub unsafe fn new(handle: T) -> Self {
        Self(handle)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for SendHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for SendHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendHandle(..)")
    }
}

/// A captured frame: an opaque buffer plus the capture timestamp.
///
/// Frames are moved through the pipeline; nothing between producer and encoder inspects
/// the buffer.
#[derive(Debug)]
pub struct CapturedFrame<B> {
    pub buffer: B,
    pub captured_at: Instant,
}

impl<B> CapturedFrame<B> {
    pub fn new(buffer: B) -> Self {
        Self {
            buffer,
            captured_at: Instant::now(),
        }
    }

    pub fn with_timestamp(buffer: B, captured_at: Instant) -> Self {
        Self { buffer, captured_at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn send_handle_moves_non_send_value() {
        // Rc is !Send; used here only to prove the wrapper makes the type Send.
        let handle = unsafe { SendHandle::new(Rc::new(5u8)) };
        assert_send(&handle);
        assert_eq!(**handle, 5);
        assert_eq!(*handle.into_inner(), 5);
    }

    #[tokio::test]
    async fn captured_frame_keeps_buffer() {
        let frame = CapturedFrame::new(vec![1u8, 2, 3]);
        assert_eq!(frame.buffer, vec![1, 2, 3]);
        assert!(frame.captured_at <= Instant::now());
    }
}
