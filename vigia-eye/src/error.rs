//! Error types for vigia-eye

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Frame error: {0}")]
    Frame(String),

    #[error("Malformed detection: expected 5 or 7 fields, got {0}")]
    MalformedDetection(usize),

    #[error("Writer error: {0}")]
    Writer(String),

    #[error("Counter error: {0}")]
    Counter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
