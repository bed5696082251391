//! Per-exercise sliding windows of pose frames.
//!
//! Each exercise keeps at most `capacity` frames in arrival order. Sequences
//! handed to the classifier are always exactly `capacity` long: while the
//! window is still filling, the most recent frame is repeated to pad it.

use std::collections::{BTreeMap, VecDeque};

use tracing::trace;

use crate::error::{TrackerError, TrackerResult};
use crate::exercise::Exercise;

/// One sample of pose-derived features.
pub type Frame = Vec<f32>;

#[derive(Debug, Clone, Default)]
struct Window {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl Window {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, frame: Frame) {
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Chronological frames padded with the newest one up to `capacity`.
    fn padded(&self, newest: Option<&Frame>) -> Option<Vec<Frame>> {
        let skip = if newest.is_some() {
            (self.frames.len() + 1).saturating_sub(self.capacity)
        } else {
            0
        };
        let mut seq: Vec<Frame> = self
            .frames
            .iter()
            .skip(skip)
            .chain(newest)
            .cloned()
            .collect();
        let last = seq.last()?.clone();
        seq.resize(self.capacity, last);
        Some(seq)
    }
}

/// Owns one frame window per exercise for a single tracking session.
///
/// Shape is not validated here; frames are stored as given.
#[derive(Debug, Clone, Default)]
pub struct FrameBufferManager {
    windows: BTreeMap<Exercise, Window>,
}

impl FrameBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame, evicting the oldest one when the window is full.
    ///
    /// The window is created lazily with `capacity` on first use. A zero
    /// capacity is treated as one.
    pub fn add_frame(&mut self, exercise: Exercise, capacity: usize, frame: Frame) {
        let window = self
            .windows
            .entry(exercise)
            .or_insert_with(|| Window::with_capacity(capacity.max(1)));
        window.push(frame);
        trace!(exercise = %exercise, buffered = window.frames.len(), "frame buffered");
    }

    /// Current window as a sequence of exactly `capacity` frames.
    pub fn get_sequence(&self, exercise: Exercise) -> TrackerResult<Vec<Frame>> {
        self.windows
            .get(&exercise)
            .and_then(|w| w.padded(None))
            .ok_or(TrackerError::NotReady {
                exercise: exercise.key(),
            })
    }

    /// The sequence `get_sequence` would return after `add_frame(frame)`,
    /// without mutating the window.
    pub fn sequence_with(&self, exercise: Exercise, capacity: usize, frame: &Frame) -> Vec<Frame> {
        match self.windows.get(&exercise) {
            Some(window) => window.padded(Some(frame)).unwrap_or_default(),
            None => vec![frame.clone(); capacity.max(1)],
        }
    }

    /// Number of real (unpadded) frames held for `exercise`.
    pub fn len(&self, exercise: Exercise) -> usize {
        self.windows.get(&exercise).map_or(0, |w| w.frames.len())
    }

    pub fn is_empty(&self, exercise: Exercise) -> bool {
        self.len(exercise) == 0
    }

    pub fn reset(&mut self, exercise: Exercise) {
        self.windows.remove(&exercise);
    }

    pub fn reset_all(&mut self) {
        self.windows.clear();
    }
}
