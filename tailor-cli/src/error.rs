use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] tailor_engine::TailorError),

    #[error("Invalid state input: {0}")]
    InvalidState(#[source] serde_json::Error),

    #[error("Output error: {0}")]
    Output(#[source] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
