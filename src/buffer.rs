use std::collections::VecDeque;

use crate::frame::Frame;

/// Fixed-capacity FIFO of the most recent frames.
///
/// Pushing into a full buffer evicts the oldest frame and hands it back to
/// the caller, so the buffer never holds more than `capacity` frames and an
/// evicted frame is dropped exactly once.
#[derive(Debug)]
pub struct RollingFrameBuffer {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl RollingFrameBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "rolling buffer capacity must be nonzero");
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `frame` as the newest entry. Returns the evicted oldest frame
    /// when the buffer was already full.
    pub fn push(&mut self, frame: Frame) -> Option<Frame> {
        let evicted = if self.frames.len() == self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    /// Clone the current contents, oldest first. The buffer keeps its frames;
    /// the caller owns the copies.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.frames.iter().cloned().collect()
    }

    /// The most recently pushed frame.
    pub fn last(&self) -> Option<&Frame> {
        self.frames.back()
    }

    /// The newest frame and the one pushed immediately before it, in that
    /// order. `None` until the buffer holds at least two frames.
    pub fn newest_pair(&self) -> Option<(&Frame, &Frame)> {
        let len = self.frames.len();
        if len < 2 {
            return None;
        }
        Some((&self.frames[len - 1], &self.frames[len - 2]))
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every held frame. Detection re-arms once the window refills.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
