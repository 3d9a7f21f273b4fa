use thiserror::Error;

/// Central error type for the stem-splitter-core crate.
#[derive(Debug, Error)]
pub enum StemError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    // Domain-specific variants
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("A job is already running on this supervisor")]
    JobActive,

    #[error("Unknown model `{0}`")]
    UnknownModel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

// --- Implement From conversions for common errors ---
impl From<ndarray::ShapeError> for StemError {
    fn from(e: ndarray::ShapeError) -> Self {
        StemError::Audio(e.to_string())
    }
}

impl From<symphonia::core::errors::Error> for StemError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        StemError::Audio(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StemError>;
