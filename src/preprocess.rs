//! Fit incoming frames and sequences to a model's input geometry.
//!
//! Narrow frames are zero-padded and wide ones truncated. One-shot sequences
//! are zero-padded or truncated to the model's sequence length; the realtime
//! path pads through the frame buffer instead.

use serde::Deserialize;
use tracing::debug;

use crate::buffer::Frame;
use crate::exercise::ModelParams;

/// A frame as it arrives on the wire: a flat feature vector or landmark rows
/// (flattened row-major).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FrameInput {
    Flat(Vec<f32>),
    Rows(Vec<Vec<f32>>),
}

impl FrameInput {
    pub fn into_frame(self) -> Frame {
        match self {
            FrameInput::Flat(v) => v,
            FrameInput::Rows(rows) => rows.into_iter().flatten().collect(),
        }
    }
}

/// `sequence_data` for one-shot prediction: a single sequence of frames, a
/// batch of sequences, or a flat series of scalars (one feature per timestep).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SequenceInput {
    Series(Vec<f32>),
    Sequence(Vec<Vec<f32>>),
    Batch(Vec<Vec<Vec<f32>>>),
}

impl SequenceInput {
    pub fn into_sequences(self) -> Vec<Vec<Frame>> {
        match self {
            SequenceInput::Series(values) => vec![values.into_iter().map(|v| vec![v]).collect()],
            SequenceInput::Sequence(seq) => vec![seq],
            SequenceInput::Batch(batch) => batch,
        }
    }
}

pub fn fit_frame(mut frame: Frame, features: usize) -> Frame {
    if frame.len() != features {
        debug!(expected = features, got = frame.len(), "feature count mismatch; fitting frame");
        frame.resize(features, 0.0);
    }
    frame
}

pub fn fit_sequence(frames: Vec<Frame>, params: &ModelParams) -> Vec<Frame> {
    let mut seq: Vec<Frame> = frames
        .into_iter()
        .take(params.sequence_length)
        .map(|f| fit_frame(f, params.features_per_frame))
        .collect();
    if seq.len() < params.sequence_length {
        debug!(
            expected = params.sequence_length,
            got = seq.len(),
            "sequence too short; zero-padding"
        );
        seq.resize(params.sequence_length, vec![0.0; params.features_per_frame]);
    }
    seq
}
