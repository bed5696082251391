//! Repetition counting from a stream of classifier confidences.
//!
//! A rep is one ascend -> descend -> ascend cycle. The first crossing above
//! `enter_high` opens an attempt; dropping below `enter_low` marks the
//! extended phase ("rep detected"); climbing back above `enter_high` closes
//! the cycle. The closing ascend is counted only when the cycle took between
//! `min_duration` and `max_duration` seconds. Either way it starts the next
//! attempt.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;
use tracing::{debug, info};

use crate::exercise::{Exercise, ThresholdProfile};
use crate::utils::round_to;

/// Completed reps remembered per exercise.
pub const REP_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepPhase {
    #[default]
    Idle,
    /// Low-confidence (extended) half of an attempt.
    Descended,
    /// High-confidence (contracted) half of an attempt.
    Ascended,
}

impl RepPhase {
    /// Exercise-specific phase label, `none` while idle.
    pub fn label(&self, exercise: Exercise) -> &'static str {
        match (self, exercise) {
            (RepPhase::Idle, _) => "none",
            (RepPhase::Ascended, Exercise::TBarRow) => "contracted",
            (RepPhase::Descended, Exercise::TBarRow) => "extended",
            (RepPhase::Ascended, _) => "up",
            (RepPhase::Descended, _) => "down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepRecord {
    /// 1-based index of the rep within the session.
    pub rep: u32,
    /// Seconds, rounded to two decimals.
    pub duration: f64,
    pub completed_at: f64,
    pub confidence: f32,
}

/// Outcome of feeding one sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepUpdate {
    pub rep_detected: bool,
    pub rep_completed: bool,
    pub record: Option<RepRecord>,
    /// Duration of a closed cycle that fell outside the valid window.
    pub rejected_duration: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct RepCounter {
    phase: RepPhase,
    total_reps: u32,
    attempt_start: Option<f64>,
    history: VecDeque<RepRecord>,
}

impl RepCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RepPhase {
        self.phase
    }

    pub fn total_reps(&self) -> u32 {
        self.total_reps
    }

    pub fn in_rep(&self) -> bool {
        self.phase != RepPhase::Idle
    }

    pub fn attempt_start(&self) -> Option<f64> {
        self.attempt_start
    }

    pub fn history(&self) -> impl Iterator<Item = &RepRecord> {
        self.history.iter()
    }

    pub fn last_rep(&self) -> Option<&RepRecord> {
        self.history.back()
    }

    pub fn update(&mut self, profile: &ThresholdProfile, confidence: f32, now: f64) -> RepUpdate {
        let mut update = RepUpdate::default();
        match self.phase {
            RepPhase::Idle if confidence > profile.enter_high => {
                self.phase = RepPhase::Ascended;
                self.attempt_start = Some(now);
            }
            RepPhase::Ascended if confidence < profile.enter_low => {
                self.phase = RepPhase::Descended;
                update.rep_detected = true;
            }
            RepPhase::Descended if confidence > profile.enter_high => {
                self.phase = RepPhase::Ascended;
                let start = self.attempt_start.unwrap_or(now);
                let duration = now - start;
                self.attempt_start = Some(now);
                if profile.duration_in_range(duration) {
                    let record = self.record(duration, now, confidence);
                    update.rep_completed = true;
                    update.record = Some(record);
                } else {
                    debug!(
                        duration,
                        min = profile.min_duration,
                        max = profile.max_duration,
                        "rep outside duration window; not counted"
                    );
                    update.rejected_duration = Some(duration);
                }
            }
            _ => {}
        }
        update
    }

    fn record(&mut self, duration: f64, now: f64, confidence: f32) -> RepRecord {
        self.total_reps += 1;
        let record = RepRecord {
            rep: self.total_reps,
            duration: round_to(duration, 2),
            completed_at: now,
            confidence,
        };
        if self.history.len() == REP_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(record.clone());
        record
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-exercise rep counters for one tracking session.
#[derive(Debug, Clone, Default)]
pub struct RepStateMachine {
    counters: BTreeMap<Exercise, RepCounter>,
}

impl RepStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(
        &mut self,
        exercise: Exercise,
        profile: &ThresholdProfile,
        confidence: f32,
        now: f64,
    ) -> RepUpdate {
        let counter = self.counters.entry(exercise).or_default();
        let update = counter.update(profile, confidence, now);
        if let Some(record) = &update.record {
            info!(
                exercise = %exercise,
                rep = record.rep,
                duration = record.duration,
                confidence = record.confidence,
                "rep completed"
            );
        }
        update
    }

    pub fn counter(&self, exercise: Exercise) -> Option<&RepCounter> {
        self.counters.get(&exercise)
    }

    pub fn total_reps(&self, exercise: Exercise) -> u32 {
        self.counter(exercise).map_or(0, RepCounter::total_reps)
    }

    pub fn reset(&mut self, exercise: Exercise) {
        self.counters.remove(&exercise);
    }

    pub fn reset_all(&mut self) {
        self.counters.clear();
    }
}
