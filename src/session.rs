//! Tracking sessions.
//!
//! A [`Tracker`] owns the frame buffers and rep counters of one session. The
//! one-shot CLI builds a fresh tracker per request; `serve` keeps trackers in
//! a [`SessionStore`] keyed by session id and evicts idle ones.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::buffer::{Frame, FrameBufferManager};
use crate::classifier::{Classifier, Prediction};
use crate::error::TrackerResult;
use crate::exercise::{Exercise, ProfileTable};
use crate::preprocess::fit_frame;
use crate::reps::{RepCounter, RepPhase, RepStateMachine, RepUpdate};

pub const DEFAULT_SESSION_ID: &str = "default";

/// Result of pushing one frame through classifier and rep counter.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub prediction: Prediction,
    pub rep: RepUpdate,
    pub total_reps: u32,
    pub phase: RepPhase,
    pub in_rep: bool,
    pub buffered: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Tracker {
    buffers: FrameBufferManager,
    reps: RepStateMachine,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify the window that `frame` would complete and, only if that
    /// succeeds, commit the frame and advance the rep counter.
    pub fn process_frame(
        &mut self,
        table: &ProfileTable,
        classifier: &dyn Classifier,
        exercise: Exercise,
        frame: Frame,
        now: f64,
    ) -> TrackerResult<FrameOutcome> {
        let spec = table.spec(exercise)?;
        let capacity = spec.params.sequence_length;
        let frame = fit_frame(frame, spec.params.features_per_frame);

        let sequence = self.buffers.sequence_with(exercise, capacity, &frame);
        let score = classifier.classify(exercise, &sequence)?;
        let prediction = Prediction::from_score(&score, spec.params.threshold)?;

        self.buffers.add_frame(exercise, capacity, frame);
        let rep = self
            .reps
            .update(exercise, &spec.profile, prediction.confidence, now);
        let counter = self.reps.counter(exercise);
        Ok(FrameOutcome {
            total_reps: counter.map_or(0, RepCounter::total_reps),
            phase: counter.map_or(RepPhase::Idle, RepCounter::phase),
            in_rep: counter.is_some_and(RepCounter::in_rep),
            buffered: self.buffers.len(exercise),
            prediction,
            rep,
        })
    }

    pub fn add_frame(
        &mut self,
        table: &ProfileTable,
        exercise: Exercise,
        frame: Frame,
    ) -> TrackerResult<()> {
        let spec = table.spec(exercise)?;
        let frame = fit_frame(frame, spec.params.features_per_frame);
        self.buffers.add_frame(exercise, spec.params.sequence_length, frame);
        Ok(())
    }

    pub fn get_sequence(&self, exercise: Exercise) -> TrackerResult<Vec<Frame>> {
        self.buffers.get_sequence(exercise)
    }

    pub fn buffers(&self) -> &FrameBufferManager {
        &self.buffers
    }

    pub fn reps(&self) -> &RepStateMachine {
        &self.reps
    }

    /// Clear one exercise's buffer together with its rep counter.
    pub fn reset(&mut self, exercise: Exercise) {
        self.buffers.reset(exercise);
        self.reps.reset(exercise);
        debug!(exercise = %exercise, "tracker reset");
    }

    pub fn reset_all(&mut self) {
        self.buffers.reset_all();
        self.reps.reset_all();
        debug!("all trackers reset");
    }
}

#[derive(Debug)]
struct SessionEntry {
    tracker: Tracker,
    last_seen: Instant,
}

/// Session id -> exclusively owned [`Tracker`], with idle expiry.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<String, SessionEntry>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl,
        }
    }

    pub fn tracker(&mut self, session_id: &str, now: Instant) -> &mut Tracker {
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!(session_id, "session created");
                SessionEntry {
                    tracker: Tracker::new(),
                    last_seen: now,
                }
            });
        entry.last_seen = now;
        &mut entry.tracker
    }

    /// Drop sessions idle for longer than the TTL. Returns how many went.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.sessions.len();
        let ttl = self.ttl;
        self.sessions
            .retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= ttl);
        let evicted = before - self.sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = self.sessions.len(), "expired sessions evicted");
        }
        evicted
    }

    pub fn remove(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
