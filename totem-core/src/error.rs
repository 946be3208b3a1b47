use thiserror::Error;

#[derive(Error, Debug)]
pub enum TotemError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to launch backend: {0}")]
    Spawn(String),

    #[error("Backend request failed: {0}")]
    Http(String),

    #[error("Backend process is not running")]
    BackendGone,

    #[error("Command not supported on the {0} transport")]
    UnsupportedTransport(&'static str),
}

pub type Result<T> = std::result::Result<T, TotemError>;
