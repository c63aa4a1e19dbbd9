//! Error types shared by every stage of the simulator.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while loading inputs, stepping frames or exporting.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: not a {kind} file (bad header)", path.display())]
    InvalidHeader { path: PathBuf, kind: &'static str },

    #[error("invalid simulator parameters: {0}")]
    InvalidParams(String),

    #[error("{}: invalid light source intensity table: {reason}", path.display())]
    InvalidTable { path: PathBuf, reason: String },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("phase {phase}: exposure sample {got} applied, expected {expected}")]
    OutOfOrder {
        phase: usize,
        expected: usize,
        got: usize,
    },

    #[error("phase {0} has not received all of its exposure samples")]
    PhaseIncomplete(usize),

    #[error("buffers cannot be resized while a frame is in progress")]
    FrameInProgress,

    #[error("no animation loaded")]
    NoAnimation,

    #[error("gpu: {0}")]
    Gpu(String),

    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

impl SimError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SimError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
