use thiserror::Error;

pub type Result<T> = std::result::Result<T, NamioError>;

#[derive(Error, Debug)]
pub enum NamioError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already registered: {0}")]
    AlreadyRegistered(String),

    #[error("no storage servers registered")]
    NoStorage,

    #[error("http error: {0}")]
    Http(String),

    #[error("lock wait cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
