use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiveQueryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("Query cache has been shut down")]
    ShutDown,

    #[error("Query '{query}' is already cached with a different value type")]
    TypeMismatch { query: String },
}

pub type Result<T> = std::result::Result<T, LiveQueryError>;
