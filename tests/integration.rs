/// Integration tests for the rep-tracker library.
///
/// These drive the public API the way the CLI does: frames go through a
/// `Tracker` with a deterministic scripted classifier standing in for the
/// model, so every check is independent of any ML runtime.
use std::cell::RefCell;
use std::collections::VecDeque;

use rep_tracker::buffer::{Frame, FrameBufferManager};
use rep_tracker::classifier::{ClassifierError, Score};
use rep_tracker::error::TrackerError;
use rep_tracker::exercise::{Exercise, ProfileTable, ThresholdProfile};
use rep_tracker::protocol::Dispatcher;
use rep_tracker::reps::{RepPhase, RepStateMachine};
use rep_tracker::session::Tracker;
use serde_json::json;

const EX: Exercise = Exercise::PushUp;

fn profile() -> ThresholdProfile {
    ThresholdProfile {
        enter_high: 0.7,
        enter_low: 0.3,
        min_duration: 0.5,
        max_duration: 5.0,
    }
}

fn table_with(profile: ThresholdProfile, capacity: usize) -> ProfileTable {
    let mut table = ProfileTable::defaults();
    let mut spec = table.spec(EX).expect("pushup spec").clone();
    spec.profile = profile;
    spec.params.sequence_length = capacity;
    spec.params.features_per_frame = 1;
    table.insert(EX, spec);
    table
}

/// Classifier returning queued scores in order; errors once the queue is empty.
fn scripted(
    scores: &[f32],
) -> impl Fn(Exercise, &[Frame]) -> Result<Score, ClassifierError> + use<> {
    let queue = RefCell::new(scores.iter().copied().collect::<VecDeque<_>>());
    move |_: Exercise, _: &[Frame]| {
        queue
            .borrow_mut()
            .pop_front()
            .map(Score::Binary)
            .ok_or_else(|| ClassifierError::Malformed("script exhausted".into()))
    }
}

// ── frame buffer ─────────────────────────────────────────────────────────────

#[test]
fn integration_buffer_length_is_capacity_once_filled() {
    let mut buf = FrameBufferManager::new();
    for n in 1..=12 {
        buf.add_frame(EX, 5, vec![n as f32]);
        let seq = buf.get_sequence(EX).expect("sequence after add");
        assert_eq!(seq.len(), 5, "after {n} frames");
        assert!(buf.len(EX) <= 5);
    }
}

#[test]
fn integration_buffer_fifo_eviction() {
    let capacity = 4;
    let k = 3;
    let mut buf = FrameBufferManager::new();
    for n in 1..=(capacity + k) {
        buf.add_frame(EX, capacity, vec![n as f32]);
    }
    let seq = buf.get_sequence(EX).expect("sequence");
    assert_eq!(seq[0], vec![(k + 1) as f32], "oldest must be the (k+1)-th frame");
    assert_eq!(seq.last(), Some(&vec![(capacity + k) as f32]));
}

#[test]
fn integration_buffer_single_frame_padding() {
    let mut buf = FrameBufferManager::new();
    buf.add_frame(EX, 20, vec![0.25, 0.5]);
    assert_eq!(buf.get_sequence(EX).expect("sequence"), vec![vec![0.25, 0.5]; 20]);
}

#[test]
fn integration_buffer_not_ready_when_empty() {
    let buf = FrameBufferManager::new();
    match buf.get_sequence(EX) {
        Err(TrackerError::NotReady { .. }) => {}
        other => panic!("expected NotReady, got {other:?}"),
    }
}

// ── rep state machine ────────────────────────────────────────────────────────

#[test]
fn integration_single_cycle_counts_exactly_one_rep() {
    let p = profile();
    let mut machine = RepStateMachine::new();
    let samples = [(0.9, 0.0), (0.9, 0.1), (0.2, 0.2), (0.2, 1.0), (0.9, 1.5)];
    let completed: Vec<bool> = samples
        .iter()
        .map(|&(c, t)| machine.update(EX, &p, c, t).rep_completed)
        .collect();
    assert_eq!(completed, vec![false, false, false, false, true]);
    assert_eq!(machine.total_reps(EX), 1);
}

#[test]
fn integration_too_fast_rep_is_rejected() {
    let p = profile();
    let mut machine = RepStateMachine::new();
    let mut any_completed = false;
    for (c, t) in [(0.9, 0.0), (0.2, 0.04), (0.9, 0.1)] {
        any_completed |= machine.update(EX, &p, c, t).rep_completed;
    }
    assert!(!any_completed);
    assert_eq!(machine.total_reps(EX), 0);
    assert_eq!(machine.counter(EX).expect("counter").phase(), RepPhase::Ascended);
}

#[test]
fn integration_too_slow_rep_is_rejected() {
    let p = profile();
    let mut machine = RepStateMachine::new();
    let mut any_completed = false;
    for (c, t) in [(0.9, 0.0), (0.2, 2.0), (0.9, 5.5)] {
        any_completed |= machine.update(EX, &p, c, t).rep_completed;
    }
    assert!(!any_completed);
    assert_eq!(machine.total_reps(EX), 0);
}

#[test]
fn integration_reset_restores_initial_state() {
    let table = table_with(profile(), 3);
    let classifier = scripted(&[0.9, 0.2, 0.9, 0.1]);
    let mut tracker = Tracker::new();
    for (i, t) in [0.0, 0.7, 1.4, 2.0].into_iter().enumerate() {
        tracker
            .process_frame(&table, &classifier, EX, vec![i as f32], t)
            .expect("frame");
    }
    assert_eq!(tracker.reps().total_reps(EX), 1);

    tracker.reset(EX);
    assert_eq!(tracker.reps().total_reps(EX), 0);
    assert!(tracker.reps().counter(EX).is_none());
    assert!(tracker.get_sequence(EX).is_err());

    // Lazily recreated counter starts idle with no history.
    let idle = scripted(&[0.5]);
    let outcome = tracker
        .process_frame(&table, &idle, EX, vec![0.0], 3.0)
        .expect("frame after reset");
    assert_eq!(outcome.phase, RepPhase::Idle);
    assert_eq!(tracker.reps().counter(EX).expect("counter").history().count(), 0);
}

#[test]
fn integration_classifier_failure_is_idempotent() {
    let table = table_with(profile(), 3);
    let mut tracker = Tracker::new();
    let classifier = scripted(&[0.9, 0.2]);
    tracker.process_frame(&table, &classifier, EX, vec![1.0], 0.0).expect("frame 1");
    tracker.process_frame(&table, &classifier, EX, vec![2.0], 0.6).expect("frame 2");

    let seq_before = tracker.get_sequence(EX).expect("sequence");
    let counter_before = tracker.reps().counter(EX).expect("counter").clone();

    let err = tracker
        .process_frame(&table, &classifier, EX, vec![3.0], 1.2)
        .expect_err("script is exhausted");
    assert_eq!(err.kind(), "classifier");

    let counter_after = tracker.reps().counter(EX).expect("counter");
    assert_eq!(tracker.get_sequence(EX).expect("sequence"), seq_before);
    assert_eq!(counter_after.phase(), counter_before.phase());
    assert_eq!(counter_after.total_reps(), counter_before.total_reps());
    assert_eq!(counter_after.attempt_start(), counter_before.attempt_start());
}

#[test]
fn integration_malformed_score_does_not_advance_counter() {
    let table = table_with(profile(), 3);
    let mut tracker = Tracker::new();
    let nan = |_: Exercise, _: &[Frame]| -> Result<Score, ClassifierError> {
        Ok(Score::Binary(f32::NAN))
    };
    let err = tracker
        .process_frame(&table, &nan, EX, vec![1.0], 0.0)
        .expect_err("NaN score");
    assert_eq!(err.kind(), "classifier");
    assert!(tracker.get_sequence(EX).is_err());
    assert!(tracker.reps().counter(EX).is_none());
}

// ── request boundary ─────────────────────────────────────────────────────────

#[test]
fn integration_batch_counts_reps_with_frame_interval() {
    // 0.9 x5, 0.1 x10, 0.9 x1 at 0.1s spacing: ascend at 0.0, close at 1.5.
    let mut scores = vec![0.9; 5];
    scores.extend(vec![0.1; 10]);
    scores.push(0.9);
    let d = Dispatcher::new(table_with(profile(), 4), Box::new(scripted(&scores)));
    let mut tracker = Tracker::new();
    let frames: Vec<Vec<f32>> = (0..scores.len()).map(|i| vec![i as f32]).collect();
    let resp = d.handle_raw(
        &mut tracker,
        &json!({
            "mode": "batch_frames",
            "expected_exercise": "pushup",
            "frames_data": frames,
            "timestamp": 100.0,
            "frame_interval_secs": 0.1,
        })
        .to_string(),
    );
    assert_eq!(resp["success"], true, "{resp}");
    assert_eq!(resp["batch_analysis"]["total_reps_detected"], 1);
    assert_eq!(resp["batch_analysis"]["successful_frames"], 16);
    assert_eq!(resp["frame_results"][15]["rep_detection"]["rep_completed"], true);
    assert_eq!(resp["frame_results"][15]["rep_detection"]["last_rep"]["duration"], 1.5);
    assert_eq!(tracker.buffers().len(EX), 4);
}

#[test]
fn integration_reset_counters_mode_acknowledges_without_data() {
    let d = Dispatcher::new(table_with(profile(), 3), Box::new(scripted(&[0.9])));
    let mut tracker = Tracker::new();
    d.handle_raw(
        &mut tracker,
        r#"{"mode": "realtime_frame", "expected_exercise": "pushup", "frame_data": [1]}"#,
    );
    assert!(tracker.reps().counter(EX).is_some());

    let resp = d.handle_raw(&mut tracker, r#"{"mode": "reset_counters"}"#);
    assert_eq!(resp["success"], true);
    assert!(resp.get("message").is_some());
    assert!(resp.get("data").is_none());
    assert!(tracker.reps().counter(EX).is_none());
}
