//! Bounded FIFO of the most recent silent frames.
//!
//! Filled while the segmenter is silent and drained into the utterance at onset,
//! so the emitted audio starts a little before the classifier reacted.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct PreRollBuffer {
    frames: VecDeque<Vec<f32>>,
    capacity: usize,
}

impl PreRollBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest once capacity is exceeded.
    pub fn push(&mut self, frame: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }
        self.frames.push_back(frame);
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    /// Take every buffered frame, oldest first, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Vec<f32>> {
        self.frames.drain(..).collect()
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

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
