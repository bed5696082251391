use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::exercise::{Exercise, ExerciseSpec, ProfileTable, ThresholdProfile};

pub const META_FILE: &str = "meta.json";

/// Subset of a model's `meta.json` that influences tracking.
#[derive(Debug, Default, Deserialize)]
pub struct ModelMeta {
    pub timesteps: Option<f64>,
    pub sequence_length: Option<f64>,
    pub features: Option<f64>,
    pub num_features: Option<f64>,
    /// `[batch, timesteps, features]`; batch is usually `null`.
    pub input_shape: Option<Vec<Option<f64>>>,
    pub threshold: Option<f32>,
    pub rep_profile: Option<ThresholdProfile>,
}

/// Largest sequence length or feature count accepted from metadata.
pub const MAX_META_DIMENSION: usize = 10_000;

impl ModelMeta {
    fn sequence_length(&self) -> Result<Option<usize>> {
        self.timesteps
            .or(self.sequence_length)
            .or_else(|| self.shape_dim(1))
            .map(|v| dimension("sequence length", v))
            .transpose()
    }

    fn features_per_frame(&self) -> Result<Option<usize>> {
        self.features
            .or(self.num_features)
            .or_else(|| self.shape_dim(2))
            .map(|v| dimension("feature count", v))
            .transpose()
    }

    fn shape_dim(&self, idx: usize) -> Option<f64> {
        self.input_shape.as_ref()?.get(idx).copied().flatten()
    }
}

/// Whole number in `1..=MAX_META_DIMENSION`.
fn dimension(name: &str, v: f64) -> Result<usize> {
    if !(v.is_finite() && v.fract() == 0.0) {
        return Err(anyhow!("{name} {v} is not a whole number"));
    }
    if !(1.0..=MAX_META_DIMENSION as f64).contains(&v) {
        return Err(anyhow!("{name} {v} outside 1..={MAX_META_DIMENSION}"));
    }
    Ok(v as usize)
}

/// Find the folder holding an exercise's artifacts, trying the canonical name
/// first and then `lower_snake`, `lowerspaceless`, `UPPER_SNAKE` spellings.
pub fn resolve_exercise_dir(models_dir: &Path, exercise: Exercise) -> Option<PathBuf> {
    let folder = exercise.folder_name();
    let candidates = [
        folder.to_string(),
        folder.to_lowercase().replace(' ', "_"),
        folder.to_lowercase().replace(' ', ""),
        folder.to_uppercase().replace(' ', "_"),
    ];
    for name in candidates {
        let path = models_dir.join(&name);
        if path.is_dir() {
            if name != folder {
                info!(exercise = %exercise, folder = %name, "using alternative folder name");
            }
            return Some(path);
        }
    }
    None
}

pub fn read_meta(path: &Path) -> Result<ModelMeta> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read model metadata at {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse model metadata at {}", path.display()))
}

/// Overlay metadata onto `base`, rejecting an invalid rep profile.
pub fn apply_meta(mut base: ExerciseSpec, meta: &ModelMeta) -> Result<ExerciseSpec> {
    if let Some(len) = meta.sequence_length()? {
        base.params.sequence_length = len;
    }
    if let Some(features) = meta.features_per_frame()? {
        base.params.features_per_frame = features;
    }
    if let Some(threshold) = meta.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("threshold {threshold} outside [0, 1]"));
        }
        base.params.threshold = threshold;
    }
    if let Some(profile) = meta.rep_profile {
        profile.validate().map_err(|e| anyhow!("invalid rep_profile: {e}"))?;
        base.profile = profile;
    }
    Ok(base)
}

pub fn load_exercise_spec(models_dir: &Path, exercise: Exercise) -> Result<ExerciseSpec> {
    let base = ExerciseSpec::default_for(exercise);
    let Some(dir) = resolve_exercise_dir(models_dir, exercise) else {
        warn!(
            exercise = %exercise,
            dir = %models_dir.display(),
            "model folder not found; using defaults"
        );
        return Ok(base);
    };
    let meta_path = dir.join(META_FILE);
    if !meta_path.exists() {
        warn!(
            exercise = %exercise,
            path = %meta_path.display(),
            "metadata file not found; using defaults"
        );
        return Ok(base);
    }
    let meta = read_meta(&meta_path)?;
    let spec = apply_meta(base, &meta)
        .with_context(|| format!("invalid metadata for {exercise} at {}", meta_path.display()))?;
    debug!(
        exercise = %exercise,
        sequence_length = spec.params.sequence_length,
        features = spec.params.features_per_frame,
        threshold = spec.params.threshold,
        "loaded model metadata"
    );
    Ok(spec)
}

/// Build the startup lookup table. Per-exercise failures are logged and the
/// exercise keeps its defaults.
pub fn load_profile_table(models_dir: Option<&Path>) -> ProfileTable {
    let mut table = ProfileTable::defaults();
    let Some(models_dir) = models_dir else {
        debug!("no models dir configured; using default profiles");
        return table;
    };
    if !models_dir.is_dir() {
        warn!(dir = %models_dir.display(), "models directory not found; using default profiles");
        return table;
    }
    for exercise in Exercise::ALL {
        match load_exercise_spec(models_dir, exercise) {
            Ok(spec) => table.insert(exercise, spec),
            Err(e) => {
                let err = format!("{e:#}");
                warn!(exercise = %exercise, err = %err, "ignoring model metadata");
            }
        }
    }
    info!(dir = %models_dir.display(), exercises = table.keys().len(), "profile table loaded");
    table
}
