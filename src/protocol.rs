//! JSON request/response boundary.
//!
//! Every request yields exactly one JSON object carrying `success` and a
//! `timestamp`; failures add `error` and `error_kind` instead of aborting.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::buffer::Frame;
use crate::classifier::{Classifier, Prediction};
use crate::error::{TrackerError, TrackerResult};
use crate::exercise::{Exercise, ExerciseSpec, LABELS, ProfileTable, ThresholdProfile};
use crate::preprocess::{FrameInput, SequenceInput, fit_sequence};
use crate::reps::{RepPhase, RepRecord};
use crate::session::{DEFAULT_SESSION_ID, FrameOutcome, SessionStore, Tracker};
use crate::utils::{ConfidenceStats, now_secs, round_to};

pub const DEFAULT_FRAME_INTERVAL_SECS: f64 = 1.0 / 30.0;

/// Share of correct sequences above which a one-shot prediction passes.
const CORRECT_OVERALL_PCT: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    RealtimeFrame,
    BatchFrames,
    PredictSingle,
    GetExercises,
    ResetCounters,
    Test,
}

impl Mode {
    const ALL: [Mode; 6] = [
        Mode::RealtimeFrame,
        Mode::BatchFrames,
        Mode::PredictSingle,
        Mode::GetExercises,
        Mode::ResetCounters,
        Mode::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::RealtimeFrame => "realtime_frame",
            Mode::BatchFrames => "batch_frames",
            Mode::PredictSingle => "predict_single",
            Mode::GetExercises => "get_exercises",
            Mode::ResetCounters => "reset_counters",
            Mode::Test => "test",
        }
    }

    /// Modes that read or mutate per-session buffers and counters.
    pub fn uses_tracker(&self) -> bool {
        matches!(self, Mode::RealtimeFrame | Mode::BatchFrames | Mode::ResetCounters)
    }

    fn parse(raw: &str) -> TrackerResult<Self> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == raw)
            .ok_or_else(|| {
                let expected: Vec<_> = Mode::ALL.iter().map(Mode::as_str).collect();
                TrackerError::InvalidInput(format!(
                    "unknown mode '{raw}'; expected one of {}",
                    expected.join(", ")
                ))
            })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Request {
    pub mode: Option<String>,
    pub frame_data: Option<FrameInput>,
    #[serde(alias = "frames")]
    pub frames_data: Option<Vec<FrameInput>>,
    pub sequence_data: Option<SequenceInput>,
    pub expected_exercise: Option<String>,
    pub model: Option<String>,
    /// Seconds; wall clock when absent.
    pub timestamp: Option<f64>,
    pub frame_interval_secs: Option<f64>,
    pub session_id: Option<String>,
    pub test: Option<Value>,
}

impl Request {
    /// Explicit `mode`, else inferred from the payload the way older callers
    /// sent it.
    pub fn mode(&self) -> TrackerResult<Mode> {
        match (&self.mode, &self.sequence_data, &self.test) {
            (Some(mode), _, _) => Mode::parse(mode),
            (None, Some(_), _) => Ok(Mode::PredictSingle),
            (None, None, Some(_)) => Ok(Mode::Test),
            (None, None, None) => Err(TrackerError::InvalidInput(
                "missing 'mode'; need a mode, 'sequence_data' or 'test'".to_string(),
            )),
        }
    }

    pub fn session_id(&self) -> &str {
        self.session_id.as_deref().unwrap_or(DEFAULT_SESSION_ID)
    }

    fn exercise_key(&self) -> Option<&str> {
        self.expected_exercise.as_deref().or(self.model.as_deref())
    }
}

pub fn parse_request(raw: &str) -> TrackerResult<Request> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TrackerError::InvalidInput("no input provided".to_string()));
    }
    serde_json::from_str(raw).map_err(|e| TrackerError::InvalidInput(format!("invalid JSON: {e}")))
}

pub fn error_response(err: &TrackerError) -> Value {
    json!({
        "success": false,
        "error": err.to_string(),
        "error_kind": err.kind(),
        "timestamp": now_secs(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RepDetection {
    pub rep_detected: bool,
    pub rep_completed: bool,
    pub total_reps: u32,
    pub current_rep_state: &'static str,
    pub rep_in_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rep: Option<RepRecord>,
    /// Seconds taken by a closed cycle that fell outside the valid window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_rep_duration: Option<f64>,
}

impl RepDetection {
    fn from_outcome(outcome: &FrameOutcome, exercise: Exercise) -> Self {
        Self {
            rep_detected: outcome.rep.rep_detected,
            rep_completed: outcome.rep.rep_completed,
            total_reps: outcome.total_reps,
            current_rep_state: outcome.phase.label(exercise),
            rep_in_progress: outcome.in_rep,
            last_rep: outcome.rep.record.clone(),
            rejected_rep_duration: outcome.rep.rejected_duration.map(|d| round_to(d, 2)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct PredictionView {
    label: &'static str,
    is_correct: bool,
    confidence: f32,
    threshold_used: f32,
    exercise_detected: Exercise,
    exercise_name: &'static str,
}

impl PredictionView {
    fn new(prediction: &Prediction, exercise: Exercise) -> Self {
        Self {
            label: prediction.label,
            is_correct: prediction.is_correct,
            confidence: prediction.confidence,
            threshold_used: prediction.threshold_used,
            exercise_detected: exercise,
            exercise_name: exercise.display_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ExerciseInfo {
    key: Exercise,
    name: &'static str,
    sequence_length: usize,
    features_per_frame: usize,
    threshold: f32,
    labels: [&'static str; 2],
    rep_profile: ThresholdProfile,
}

fn feedback(outcome: &FrameOutcome) -> String {
    if let Some(record) = &outcome.rep.record {
        return format!("Rep {} completed!", record.rep);
    }
    if !outcome.prediction.is_correct {
        return "Adjust your form".to_string();
    }
    match outcome.phase {
        RepPhase::Descended => "Lower with control...".to_string(),
        RepPhase::Ascended => "Push back up...".to_string(),
        RepPhase::Idle => "Good form! Keep going".to_string(),
    }
}

/// Resolves requests against the profile table and classifier, mutating the
/// caller's [`Tracker`].
pub struct Dispatcher {
    table: ProfileTable,
    classifier: Box<dyn Classifier>,
}

impl Dispatcher {
    pub fn new(table: ProfileTable, classifier: Box<dyn Classifier>) -> Self {
        Self { table, classifier }
    }

    pub fn table(&self) -> &ProfileTable {
        &self.table
    }

    /// Parse and handle one raw payload. Always returns a response object.
    pub fn handle_raw(&self, tracker: &mut Tracker, raw: &str) -> Value {
        match parse_request(raw) {
            Ok(request) => self.respond(tracker, &request),
            Err(e) => {
                warn!(err = %e, "rejecting request");
                error_response(&e)
            }
        }
    }

    /// Route one raw payload to its session's tracker, evicting idle
    /// sessions first. Stateless modes never create a session, and a failed
    /// request does not leave a new one behind.
    pub fn handle_session(&self, store: &mut SessionStore, raw: &str, now: Instant) -> Value {
        let request = match parse_request(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(err = %e, "rejecting request");
                return error_response(&e);
            }
        };
        store.evict_expired(now);
        if !request.mode().is_ok_and(|m| m.uses_tracker()) {
            return self.respond(&mut Tracker::new(), &request);
        }
        let session_id = request.session_id();
        let existed = store.contains(session_id);
        let response = self.respond(store.tracker(session_id, now), &request);
        if !existed && response["success"] == false {
            store.remove(session_id);
        }
        response
    }

    pub fn respond(&self, tracker: &mut Tracker, request: &Request) -> Value {
        match self.dispatch(tracker, request) {
            Ok(mut body) => {
                if let Some(obj) = body.as_object_mut() {
                    obj.entry("success").or_insert(Value::Bool(true));
                    obj.insert("timestamp".to_string(), json!(now_secs()));
                }
                body
            }
            Err(e) => {
                warn!(err = %e, kind = e.kind(), "request failed");
                error_response(&e)
            }
        }
    }

    pub fn dispatch(&self, tracker: &mut Tracker, request: &Request) -> TrackerResult<Value> {
        let mode = request.mode()?;
        debug!(mode = mode.as_str(), session_id = request.session_id(), "dispatching request");
        match mode {
            Mode::RealtimeFrame => self.realtime_frame(tracker, request),
            Mode::BatchFrames => self.batch_frames(tracker, request),
            Mode::PredictSingle => self.predict_single(request),
            Mode::GetExercises => Ok(self.get_exercises()),
            Mode::ResetCounters => self.reset_counters(tracker, request),
            Mode::Test => self.test_prediction(request),
        }
    }

    fn required_exercise(&self, request: &Request) -> TrackerResult<(Exercise, &ExerciseSpec)> {
        let key = request.exercise_key().ok_or_else(|| {
            TrackerError::InvalidInput("missing 'expected_exercise'".to_string())
        })?;
        self.table.resolve(key)
    }

    fn realtime_frame(&self, tracker: &mut Tracker, request: &Request) -> TrackerResult<Value> {
        let (exercise, _) = self.required_exercise(request)?;
        let frame = request
            .frame_data
            .clone()
            .ok_or_else(|| TrackerError::InvalidInput("missing 'frame_data'".to_string()))?
            .into_frame();
        let now = request.timestamp.unwrap_or_else(now_secs);

        let outcome = tracker.process_frame(&self.table, &*self.classifier, exercise, frame, now)?;
        let rep_detection = RepDetection::from_outcome(&outcome, exercise);
        Ok(json!({
            "frame_analysis": {
                "prediction": PredictionView::new(&outcome.prediction, exercise),
                "rep_detection": rep_detection,
                "confidence_score": outcome.prediction.confidence,
                "buffer_size": outcome.buffered,
            },
            "feedback": feedback(&outcome),
            "session_info": {
                "session_id": request.session_id(),
                "exercise": exercise,
                "total_reps": outcome.total_reps,
                "buffer_size": outcome.buffered,
            },
            "is_mock": self.classifier.is_mock(),
        }))
    }

    fn batch_frames(&self, tracker: &mut Tracker, request: &Request) -> TrackerResult<Value> {
        let (exercise, _) = self.required_exercise(request)?;
        let frames = request
            .frames_data
            .clone()
            .ok_or_else(|| TrackerError::InvalidInput("missing 'frames_data'".to_string()))?;
        if frames.is_empty() {
            return Err(TrackerError::InvalidInput("'frames_data' is empty".to_string()));
        }
        let interval = request.frame_interval_secs.unwrap_or(DEFAULT_FRAME_INTERVAL_SECS);
        if !(interval.is_finite() && interval > 0.0) {
            return Err(TrackerError::InvalidInput(format!(
                "'frame_interval_secs' must be positive (got {interval})"
            )));
        }
        let start = request.timestamp.unwrap_or_else(now_secs);

        let total = frames.len();
        let mut results = Vec::with_capacity(total);
        let mut confidences = Vec::with_capacity(total);
        let mut correct = 0usize;
        let mut reps_completed = 0u32;
        for (index, input) in frames.into_iter().enumerate() {
            let now = start + index as f64 * interval;
            match tracker.process_frame(
                &self.table,
                &*self.classifier,
                exercise,
                input.into_frame(),
                now,
            ) {
                Ok(outcome) => {
                    confidences.push(outcome.prediction.confidence);
                    correct += usize::from(outcome.prediction.is_correct);
                    reps_completed += u32::from(outcome.rep.rep_completed);
                    results.push(json!({
                        "frame_index": index,
                        "success": true,
                        "prediction": PredictionView::new(&outcome.prediction, exercise),
                        "rep_detection": RepDetection::from_outcome(&outcome, exercise),
                    }));
                }
                Err(e) => {
                    warn!(frame_index = index, err = %e, "frame failed in batch");
                    results.push(json!({
                        "frame_index": index,
                        "success": false,
                        "error": e.to_string(),
                        "error_kind": e.kind(),
                    }));
                }
            }
        }

        let successful = confidences.len();
        let pct = |n: usize, of: usize| {
            if of == 0 {
                0.0
            } else {
                round_to(n as f64 / of as f64 * 100.0, 2)
            }
        };
        let total_reps = tracker.reps().total_reps(exercise);
        info!(
            exercise = %exercise,
            total,
            successful,
            reps_completed,
            total_reps,
            "batch processed"
        );
        Ok(json!({
            "batch_analysis": {
                "total_frames": total,
                "successful_frames": successful,
                "failed_frames": total - successful,
                "success_rate": pct(successful, total),
                "correct_form_rate": pct(correct, successful),
                "total_reps_detected": reps_completed,
                "total_reps": total_reps,
                "average_confidence": ConfidenceStats::from_scores(&confidences).average,
            },
            "frame_results": results,
            "session_info": {
                "session_id": request.session_id(),
                "exercise": exercise,
                "total_reps": total_reps,
                "buffer_size": tracker.buffers().len(exercise),
            },
            "is_mock": self.classifier.is_mock(),
        }))
    }

    fn classify_sequences(
        &self,
        exercise: Exercise,
        spec: &ExerciseSpec,
        sequences: &[Vec<Frame>],
    ) -> TrackerResult<Vec<Prediction>> {
        sequences
            .iter()
            .map(|seq| -> TrackerResult<Prediction> {
                let fitted = fit_sequence(seq.clone(), &spec.params);
                let score = self.classifier.classify(exercise, &fitted)?;
                Ok(Prediction::from_score(&score, spec.params.threshold)?)
            })
            .collect()
    }

    /// Pick the exercise whose classifier is most confident on average.
    fn detect_exercise(&self, sequences: &[Vec<Frame>]) -> TrackerResult<(Exercise, Value)> {
        let mut scores = BTreeMap::new();
        let mut best: Option<(Exercise, f64)> = None;
        for (exercise, spec) in self.table.iter() {
            match self.classify_sequences(exercise, spec, sequences) {
                Ok(predictions) => {
                    let confidences: Vec<f32> = predictions.iter().map(|p| p.confidence).collect();
                    let avg = ConfidenceStats::from_scores(&confidences).average;
                    scores.insert(exercise.key(), avg);
                    if best.is_none_or(|(_, b)| avg > b) {
                        best = Some((exercise, avg));
                    }
                }
                Err(e) => {
                    warn!(exercise = %exercise, err = %e, "exercise detection failed for model")
                }
            }
        }
        let (exercise, max) = best.ok_or_else(|| {
            TrackerError::InvalidInput("no exercise model could process the data".to_string())
        })?;
        let quality = if max > 0.8 {
            "high"
        } else if max > 0.6 {
            "medium"
        } else {
            "low"
        };
        info!(exercise = %exercise, confidence = max, "exercise detected");
        Ok((
            exercise,
            json!({
                "detected_exercise": exercise,
                "exercise_name": exercise.display_name(),
                "confidence_scores": scores,
                "max_confidence": max,
                "is_confident": max > 0.7,
                "detection_quality": quality,
            }),
        ))
    }

    fn predict_single(&self, request: &Request) -> TrackerResult<Value> {
        let sequences = request
            .sequence_data
            .clone()
            .ok_or_else(|| TrackerError::InvalidInput("missing 'sequence_data'".to_string()))?
            .into_sequences();
        if sequences.is_empty() || sequences.iter().all(|s| s.is_empty()) {
            return Err(TrackerError::InvalidInput("'sequence_data' is empty".to_string()));
        }

        let (exercise, detection) = match request.exercise_key() {
            Some(key) => (self.table.resolve(key)?.0, None),
            None => {
                let (exercise, detection) = self.detect_exercise(&sequences)?;
                (exercise, Some(detection))
            }
        };
        let spec = self.table.spec(exercise)?;
        let predictions = self.classify_sequences(exercise, spec, &sequences)?;

        let confidences: Vec<f32> = predictions.iter().map(|p| p.confidence).collect();
        let total = predictions.len();
        let correct = predictions.iter().filter(|p| p.is_correct).count();
        let correctness = correct as f64 / total as f64 * 100.0;
        info!(exercise = %exercise, correct, total, "prediction complete");

        let mut body = json!({
            "model": exercise,
            "exercise_name": exercise.display_name(),
            "predictions": predictions.iter().map(|p| p.label).collect::<Vec<_>>(),
            "confidence": confidences,
            "confidence_stats": ConfidenceStats::from_scores(&confidences),
            "correct_count": correct,
            "total_count": total,
            "correctness_percentage": correctness,
            "is_correct_overall": correctness > CORRECT_OVERALL_PCT,
            "threshold_used": spec.params.threshold,
            "sequence_length_used": spec.params.sequence_length,
            "features_count": spec.params.features_per_frame,
            "model_parameters": spec.params,
            "is_mock": self.classifier.is_mock(),
        });
        if let (Some(detection), Some(obj)) = (detection, body.as_object_mut()) {
            obj.insert("detection_result".to_string(), detection);
        }
        Ok(body)
    }

    fn get_exercises(&self) -> Value {
        let exercises: Vec<ExerciseInfo> = self
            .table
            .iter()
            .map(|(exercise, spec)| ExerciseInfo {
                key: exercise,
                name: exercise.display_name(),
                sequence_length: spec.params.sequence_length,
                features_per_frame: spec.params.features_per_frame,
                threshold: spec.params.threshold,
                labels: LABELS,
                rep_profile: spec.profile,
            })
            .collect();
        json!({ "total": exercises.len(), "exercises": exercises })
    }

    fn reset_counters(&self, tracker: &mut Tracker, request: &Request) -> TrackerResult<Value> {
        let message = match request.exercise_key() {
            Some(key) => {
                let (exercise, _) = self.table.resolve(key)?;
                tracker.reset(exercise);
                format!("counters reset for {exercise}")
            }
            None => {
                tracker.reset_all();
                "all counters reset".to_string()
            }
        };
        info!(session_id = request.session_id(), %message, "reset");
        Ok(json!({ "message": message }))
    }

    fn test_prediction(&self, request: &Request) -> TrackerResult<Value> {
        let exercise = match request.exercise_key() {
            Some(key) => self.table.resolve(key)?.0,
            None => Exercise::PushUp,
        };
        let mut body = mock_prediction(exercise);
        if let Some(obj) = body.as_object_mut() {
            obj.insert("test_mode".to_string(), Value::Bool(true));
        }
        Ok(body)
    }
}

/// Fixed 20-sequence prediction: 16 correct, 4 incorrect.
pub fn mock_prediction(exercise: Exercise) -> Value {
    let (labels, confidences): (Vec<&str>, Vec<f32>) = (0..20)
        .map(|i| {
            if i < 16 {
                (LABELS[1], 0.75 + i as f32 * 0.01)
            } else {
                (LABELS[0], 0.25 + (i - 16) as f32 * 0.05)
            }
        })
        .unzip();
    let correct = labels.iter().filter(|l| **l == LABELS[1]).count();
    let total = labels.len();
    let correctness = correct as f64 / total as f64 * 100.0;
    let mut metadata = Map::new();
    metadata.insert("is_mock".to_string(), Value::Bool(true));
    json!({
        "model": exercise,
        "exercise_name": exercise.display_name(),
        "predictions": labels,
        "confidence": confidences,
        "confidence_stats": ConfidenceStats::from_scores(&confidences),
        "correct_count": correct,
        "total_count": total,
        "correctness_percentage": correctness,
        "is_correct_overall": correctness > CORRECT_OVERALL_PCT,
        "threshold_used": crate::exercise::DEFAULT_THRESHOLD,
        "sequence_length_used": crate::exercise::DEFAULT_SEQUENCE_LENGTH,
        "features_count": crate::exercise::DEFAULT_FEATURES_PER_FRAME,
        "note": "mock prediction",
        "metadata": metadata,
    })
}
