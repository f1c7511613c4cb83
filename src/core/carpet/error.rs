use thiserror::Error;

#[derive(Debug, Error)]
pub enum CarpetError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    #[error("Image buffer error: {0}")]
    ImageBuffer(String),
    #[error("Invalid reference entry: {0}")]
    InvalidReference(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Analysis already in progress")]
    Busy,
}
