pub type ChalkResult<T> = Result<T, ChalkError>;

/// Crate error type. Playback, layout, and audio are infallible by design
/// (bad input degrades instead of failing), so errors only arise at the
/// ingestion boundary.
#[derive(thiserror::Error, Debug)]
pub enum ChalkError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChalkError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}
