//! Classifier capability consumed by the tracker.
//!
//! Model loading and inference live outside this crate. A [`Classifier`]
//! turns one fixed-length sequence into a [`Score`]; the tracker only ever
//! sees the resulting confidence.

use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::buffer::Frame;
use crate::exercise::{Exercise, LABELS};

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("failed to run classifier '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to send sequence to classifier '{program}': {source}")]
    Stdin {
        program: String,
        source: std::io::Error,
    },

    #[error("classifier exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("malformed classifier output: {0}")]
    Malformed(String),
}

/// Raw classifier output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Score {
    /// Sigmoid probability of the `correct` class.
    Binary(f32),
    /// Softmax over [`LABELS`].
    Distribution(Vec<f32>),
}

impl Score {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let in_unit = |p: f32| p.is_finite() && (0.0..=1.0).contains(&p);
        match self {
            Score::Binary(p) if in_unit(*p) => Ok(()),
            Score::Binary(p) => Err(ClassifierError::Malformed(format!(
                "confidence {p} outside [0, 1]"
            ))),
            Score::Distribution(probs) if probs.is_empty() => Err(ClassifierError::Malformed(
                "empty probability distribution".to_string(),
            )),
            Score::Distribution(probs) => match probs.iter().find(|p| !in_unit(**p)) {
                Some(p) => Err(ClassifierError::Malformed(format!(
                    "probability {p} outside [0, 1]"
                ))),
                None => Ok(()),
            },
        }
    }

    /// The scalar fed to the rep state machine.
    pub fn confidence(&self) -> f32 {
        match self {
            Score::Binary(p) => *p,
            Score::Distribution(probs) => probs.iter().copied().fold(0.0, f32::max),
        }
    }

    fn label_index(&self, threshold: f32) -> usize {
        match self {
            Score::Binary(p) => usize::from(*p >= threshold),
            Score::Distribution(probs) => probs
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map_or(0, |(i, _)| i),
        }
    }
}

/// A validated, labelled score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: &'static str,
    pub is_correct: bool,
    pub confidence: f32,
    pub threshold_used: f32,
}

impl Prediction {
    pub fn from_score(score: &Score, threshold: f32) -> Result<Self, ClassifierError> {
        score.validate()?;
        let label = LABELS
            .get(score.label_index(threshold))
            .copied()
            .unwrap_or("unknown");
        Ok(Self {
            label,
            is_correct: label == "correct",
            confidence: score.confidence(),
            threshold_used: threshold,
        })
    }
}

pub trait Classifier {
    fn classify(&self, exercise: Exercise, sequence: &[Frame]) -> Result<Score, ClassifierError>;

    /// Whether scores are synthetic rather than produced by a model.
    fn is_mock(&self) -> bool {
        false
    }
}

impl<F> Classifier for F
where
    F: Fn(Exercise, &[Frame]) -> Result<Score, ClassifierError>,
{
    fn classify(&self, exercise: Exercise, sequence: &[Frame]) -> Result<Score, ClassifierError> {
        self(exercise, sequence)
    }
}

/// Constant-score classifier used when no model is configured.
#[derive(Debug, Clone, Copy)]
pub struct MockClassifier {
    pub confidence: f32,
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self { confidence: 0.75 }
    }
}

impl Classifier for MockClassifier {
    fn classify(&self, exercise: Exercise, _sequence: &[Frame]) -> Result<Score, ClassifierError> {
        debug!(exercise = %exercise, confidence = self.confidence, "mock classification");
        Ok(Score::Binary(self.confidence))
    }

    fn is_mock(&self) -> bool {
        true
    }
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    exercise: &'a str,
    sequence: &'a [Frame],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassifyResponse {
    Binary { confidence: f32 },
    Distribution { probabilities: Vec<f32> },
}

/// Runs an external program per classification: request JSON on stdin,
/// `{"confidence": p}` or `{"probabilities": [...]}` expected on stdout.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandClassifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn spawn_error(&self, source: std::io::Error) -> ClassifierError {
        ClassifierError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

impl Classifier for CommandClassifier {
    fn classify(&self, exercise: Exercise, sequence: &[Frame]) -> Result<Score, ClassifierError> {
        let payload = serde_json::to_vec(&ClassifyRequest {
            exercise: exercise.key(),
            sequence,
        })
        .map_err(|e| ClassifierError::Malformed(format!("failed to encode request: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // A child that exits without reading its input is judged by its exit
        // status below, not by the broken pipe.
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(&payload)
        {
            if e.kind() != ErrorKind::BrokenPipe {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ClassifierError::Stdin {
                    program: self.program.clone(),
                    source: e,
                });
            }
            debug!(program = %self.program, "classifier closed stdin before reading the sequence");
        }
        let output = child.wait_with_output().map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(program = %self.program, status = %output.status, "classifier process failed");
            return Err(ClassifierError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }

        let response: ClassifyResponse = serde_json::from_slice(&output.stdout).map_err(|e| {
            ClassifierError::Malformed(format!(
                "{e}: {}",
                String::from_utf8_lossy(&output.stdout).trim()
            ))
        })?;
        let score = match response {
            ClassifyResponse::Binary { confidence } => Score::Binary(confidence),
            ClassifyResponse::Distribution { probabilities } => Score::Distribution(probabilities),
        };
        score.validate()?;
        Ok(score)
    }
}
