use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// Custom error types for the Doppler digitiser.
///
/// These cover collaborator and environment failures only. Problems with the
/// image content itself are reported as [`crate::pipeline::Flag`]s.
#[derive(Error, Debug)]
pub enum DopplerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration from {path}: {source}")]
    ConfigLoad {
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("OCR engine error: {0}")]
    Ocr(String),

    #[error("CSV output error: {0}")]
    CsvOutput(#[from] csv::Error),

    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, DopplerError>;
