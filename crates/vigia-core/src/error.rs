use std::path::PathBuf;

use thiserror::Error;

/// Failure classification for one inference run. Underlying runtime faults
/// are carried as `anyhow::Error` values and rendered into the message.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load model from `{}`: {}", .path.display(), .source)]
    ModelLoad { path: PathBuf, source: anyhow::Error },

    #[error("input has {got} features but the model expects {expected}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("execution provider `{provider}` is unavailable: {detail}")]
    ProviderUnavailable { provider: String, detail: String },

    #[error("inference failed: {0}")]
    Inference(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
