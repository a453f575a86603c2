//! Per-player input buffering.
//!
//! Frames are kept in arrival order and drained in full once per tick, so a
//! burst of delayed packets is replayed in order instead of collapsing to the
//! latest sample.

use shared::InputFrame;
use std::collections::vec_deque::Drain;
use std::collections::VecDeque;

#[derive(Debug, Default, Clone)]
pub struct InputQueue {
    frames: VecDeque<InputFrame>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: InputFrame) {
        self.frames.push_back(frame);
    }

    /// Removes and yields every buffered frame, oldest first.
    pub fn drain(&mut self) -> Drain<'_, InputFrame> {
        self.frames.drain(..)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
