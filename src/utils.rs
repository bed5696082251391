use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Wall-clock seconds since the Unix epoch.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Summary of per-sequence confidences. Population std, zeros when empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ConfidenceStats {
    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub std: f64,
}

impl ConfidenceStats {
    pub fn from_scores(scores: &[f32]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }
        let n = scores.len() as f64;
        let average = scores.iter().map(|&s| s as f64).sum::<f64>() / n;
        let variance = scores
            .iter()
            .map(|&s| {
                let d = s as f64 - average;
                d * d
            })
            .sum::<f64>()
            / n;
        Self {
            average,
            max: scores.iter().copied().fold(f32::MIN, f32::max) as f64,
            min: scores.iter().copied().fold(f32::MAX, f32::min) as f64,
            std: variance.sqrt(),
        }
    }
}
