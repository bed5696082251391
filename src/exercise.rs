//! Exercise registry: the closed set of tracked exercises and the per-exercise
//! model parameters and Threshold Profiles resolved at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

/// Output labels for the binary form classifiers, indexed by class.
pub const LABELS: [&str; 2] = ["incorrect", "correct"];

pub const DEFAULT_SEQUENCE_LENGTH: usize = 20;
pub const DEFAULT_FEATURES_PER_FRAME: usize = 103;
pub const DEFAULT_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exercise {
    #[serde(rename = "pushup")]
    PushUp,
    ShoulderPress,
    TBarRow,
}

impl Exercise {
    pub const ALL: [Exercise; 3] = [Exercise::PushUp, Exercise::ShoulderPress, Exercise::TBarRow];

    /// Wire key used in requests and responses.
    pub fn key(&self) -> &'static str {
        match self {
            Exercise::PushUp => "pushup",
            Exercise::ShoulderPress => "shoulder_press",
            Exercise::TBarRow => "t_bar_row",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Exercise::PushUp => "Push Up",
            Exercise::ShoulderPress => "Shoulder Press",
            Exercise::TBarRow => "T Bar Row",
        }
    }

    /// Folder holding this exercise's model artifacts under the models dir.
    pub fn folder_name(&self) -> &'static str {
        match self {
            Exercise::PushUp => "push-up",
            Exercise::ShoulderPress => "Shoulder Press",
            Exercise::TBarRow => "t bar row",
        }
    }

    pub fn available_keys() -> String {
        Exercise::ALL
            .iter()
            .map(|e| e.key())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Exercise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Exercise {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Exercise::ALL
            .into_iter()
            .find(|e| e.key() == s.trim())
            .ok_or_else(|| TrackerError::UnknownExercise {
                requested: s.to_string(),
                available: Exercise::available_keys(),
            })
    }
}

/// Confidence thresholds and valid rep duration window for one exercise.
///
/// Crossing `enter_high` upward enters the contracted phase, crossing
/// `enter_low` downward enters the extended phase. A completed rep only
/// counts when its duration lies within `[min_duration, max_duration]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdProfile {
    pub enter_high: f32,
    pub enter_low: f32,
    /// Seconds.
    pub min_duration: f64,
    /// Seconds.
    pub max_duration: f64,
}

impl ThresholdProfile {
    pub fn default_for(exercise: Exercise) -> Self {
        match exercise {
            Exercise::PushUp => ThresholdProfile {
                enter_high: 0.7,
                enter_low: 0.3,
                min_duration: 0.5,
                max_duration: 5.0,
            },
            Exercise::ShoulderPress => ThresholdProfile {
                enter_high: 0.75,
                enter_low: 0.35,
                min_duration: 0.8,
                max_duration: 6.0,
            },
            Exercise::TBarRow => ThresholdProfile {
                enter_high: 0.7,
                enter_low: 0.3,
                min_duration: 0.6,
                max_duration: 5.0,
            },
        }
    }

    /// Rejects profiles whose thresholds overlap or whose duration window is inverted.
    pub fn validate(&self) -> Result<(), String> {
        let thresholds_ok = self.enter_low.is_finite()
            && self.enter_high.is_finite()
            && 0.0 <= self.enter_low
            && self.enter_low < self.enter_high
            && self.enter_high <= 1.0;
        if !thresholds_ok {
            return Err(format!(
                "thresholds must satisfy 0 <= enter_low < enter_high <= 1 (got {} / {})",
                self.enter_low, self.enter_high
            ));
        }
        let durations_ok = self.min_duration.is_finite()
            && self.max_duration.is_finite()
            && 0.0 <= self.min_duration
            && self.min_duration <= self.max_duration;
        if !durations_ok {
            return Err(format!(
                "duration window must satisfy 0 <= min <= max (got {} / {})",
                self.min_duration, self.max_duration
            ));
        }
        Ok(())
    }

    pub fn duration_in_range(&self, duration: f64) -> bool {
        duration >= self.min_duration && duration <= self.max_duration
    }
}

/// Input geometry and decision threshold of an exercise's classifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelParams {
    pub sequence_length: usize,
    pub features_per_frame: usize,
    pub threshold: f32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            features_per_frame: DEFAULT_FEATURES_PER_FRAME,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseSpec {
    pub params: ModelParams,
    pub profile: ThresholdProfile,
}

impl ExerciseSpec {
    pub fn default_for(exercise: Exercise) -> Self {
        Self {
            params: ModelParams::default(),
            profile: ThresholdProfile::default_for(exercise),
        }
    }
}

/// Exercise -> model params and Threshold Profile, built once at startup.
#[derive(Debug, Clone)]
pub struct ProfileTable {
    specs: BTreeMap<Exercise, ExerciseSpec>,
}

impl ProfileTable {
    pub fn defaults() -> Self {
        let specs = Exercise::ALL
            .into_iter()
            .map(|e| (e, ExerciseSpec::default_for(e)))
            .collect();
        Self { specs }
    }

    pub fn empty() -> Self {
        Self {
            specs: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, exercise: Exercise, spec: ExerciseSpec) {
        self.specs.insert(exercise, spec);
    }

    pub fn spec(&self, exercise: Exercise) -> TrackerResult<&ExerciseSpec> {
        self.specs
            .get(&exercise)
            .ok_or_else(|| TrackerError::UnknownExercise {
                requested: exercise.key().to_string(),
                available: self.keys().join(", "),
            })
    }

    /// Parses a wire key and looks it up in one step.
    pub fn resolve(&self, key: &str) -> TrackerResult<(Exercise, &ExerciseSpec)> {
        let exercise = Exercise::from_str(key)?;
        Ok((exercise, self.spec(exercise)?))
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.specs.keys().map(|e| e.key()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Exercise, &ExerciseSpec)> {
        self.specs.iter().map(|(e, s)| (*e, s))
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_round_trip_through_from_str() {
        for exercise in Exercise::ALL {
            assert_eq!(exercise.key().parse::<Exercise>().unwrap(), exercise);
        }
    }

    #[test]
    fn unknown_key_is_configuration_error() {
        let err = "squat".parse::<Exercise>().unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("t_bar_row"));
    }

    #[test]
    fn serde_uses_wire_keys() {
        let json = serde_json::to_string(&Exercise::TBarRow).unwrap();
        assert_eq!(json, "\"t_bar_row\"");
        let parsed: Exercise = serde_json::from_str("\"pushup\"").unwrap();
        assert_eq!(parsed, Exercise::PushUp);
    }

    #[test]
    fn default_profiles_validate() {
        for exercise in Exercise::ALL {
            ThresholdProfile::default_for(exercise).validate().unwrap();
        }
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let profile = ThresholdProfile {
            enter_high: 0.3,
            enter_low: 0.7,
            min_duration: 0.5,
            max_duration: 5.0,
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn inverted_durations_rejected() {
        let profile = ThresholdProfile {
            min_duration: 6.0,
            ..ThresholdProfile::default_for(Exercise::PushUp)
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn empty_table_fails_fast_on_lookup() {
        let table = ProfileTable::empty();
        let err = table.spec(Exercise::PushUp).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn resolve_returns_spec_for_known_key() {
        let table = ProfileTable::defaults();
        let (exercise, spec) = table.resolve("shoulder_press").unwrap();
        assert_eq!(exercise, Exercise::ShoulderPress);
        assert_eq!(spec.profile.enter_high, 0.75);
        assert_eq!(spec.params.sequence_length, DEFAULT_SEQUENCE_LENGTH);
    }
}
