//! Error taxonomy surfaced at the request boundary.

use thiserror::Error;

use crate::classifier::ClassifierError;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// Exercise key that has no registered Threshold Profile.
    #[error("exercise '{requested}' not available (available: {available})")]
    UnknownExercise { requested: String, available: String },

    /// No frames buffered yet for this exercise.
    #[error("no frames buffered for {exercise}; sequence not ready")]
    NotReady { exercise: &'static str },

    #[error("classifier failed: {0}")]
    Classifier(#[from] ClassifierError),

    /// Missing fields, wrong shapes or invalid JSON.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TrackerError {
    /// Stable category string carried in error responses as `error_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerError::UnknownExercise { .. } => "configuration",
            TrackerError::NotReady { .. } => "not_ready",
            TrackerError::Classifier(_) => "classifier",
            TrackerError::InvalidInput(_) => "invalid_input",
        }
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct_per_variant() {
        let not_ready = TrackerError::NotReady { exercise: "pushup" };
        let classifier = TrackerError::Classifier(ClassifierError::Malformed("nan".into()));
        assert_eq!(not_ready.kind(), "not_ready");
        assert_eq!(classifier.kind(), "classifier");
        assert_ne!(not_ready.kind(), classifier.kind());
        assert!(not_ready.to_string().contains("pushup"));
    }
}
