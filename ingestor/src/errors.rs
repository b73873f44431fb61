use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Tracker(#[from] tracker::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
