//! Scoped frame ownership: the source learns about the release exactly once,
//! on whichever path the consumer leaves.

use crate::frame::Frame;
use std::ops::Deref;

type Release = Box<dyn FnOnce(u32) + Send>;

/// A frame borrowed from a [`FrameSource`](crate::FrameSource).
///
/// Dropping the lease hands the frame back to its source.
pub struct FrameLease {
    frame: Frame,
    release: Option<Release>,
}

impl FrameLease {
    /// Lease `frame`; `release` runs with the frame sequence when the lease ends.
    pub fn new(frame: Frame, release: impl FnOnce(u32) + Send + 'static) -> Self {
        Self {
            frame,
            release: Some(Box::new(release)),
        }
    }
}

impl Deref for FrameLease {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.frame.sequence);
        }
    }
}
