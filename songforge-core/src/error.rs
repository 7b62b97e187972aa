//! Error types for SongForge

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Please enter lyrics to generate music.")]
    EmptyLyrics,

    #[error("Duration must be between {min} and {max} seconds in steps of {step}, got {0}", min = crate::song::MIN_DURATION_SECS, max = crate::song::MAX_DURATION_SECS, step = crate::song::DURATION_STEP_SECS)]
    InvalidDuration(String),

    #[error("Unknown genre: {0}")]
    UnknownGenre(String),

    #[error("Invalid generation parameters: {0}")]
    InvalidParams(String),

    #[error("Missing model files: {}", .0.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    MissingModelFiles(Vec<PathBuf>),

    #[error("Model {0} is not available in the local cache (offline mode)")]
    ModelUnavailable(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("ONNX Runtime error: {0}")]
    Onnx(String),

    #[error("Tokenization error: {0}")]
    Tokenization(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid audio file name: {0}")]
    InvalidFileName(String),

    #[error("Audio file not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shape mismatch: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<ort::Error> for Error {
    fn from(err: ort::Error) -> Self {
        Error::Onnx(err.to_string())
    }
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        Error::Audio(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<hf_hub::api::sync::ApiError> for Error {
    fn from(err: hf_hub::api::sync::ApiError) -> Self {
        Error::Download(err.to_string())
    }
}

/// Map any displayable ONNX Runtime error, such as the session builder's.
pub(crate) fn onnx_err(err: impl std::fmt::Display) -> Error {
    Error::Onnx(err.to_string())
}
