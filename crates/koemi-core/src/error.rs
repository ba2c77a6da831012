use thiserror::Error;

#[derive(Debug, Error)]
pub enum KoemiError {
    #[error("Tool error: {0}")]
    Tool(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KoemiError>;
