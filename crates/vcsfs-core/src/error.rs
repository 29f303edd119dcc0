use thiserror::Error;

pub type VcsfsResult<T> = Result<T, VcsfsError>;

#[derive(Debug, Error)]
pub enum VcsfsError {
    #[error("config error: {0}")]
    Config(String),

    #[error("reader error: {0}")]
    Reader(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
