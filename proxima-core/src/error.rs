use thiserror::Error;

/// Numeric codes mirrored by CLI collaborators as process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0,
    NotFound = 1,
    Corruption = 2,
    NotSupported = 3,
    InvalidArgument = 4,
    IoError = 5,
    BgError = 6,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background error: {0}")]
    Background(String),
}

impl Error {
    /// The status code this error maps to.
    pub fn code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NotFound,
            Error::Corruption(_) => StatusCode::Corruption,
            Error::NotSupported(_) => StatusCode::NotSupported,
            Error::InvalidArgument(_) => StatusCode::InvalidArgument,
            Error::Io(_) => StatusCode::IoError,
            Error::Background(_) => StatusCode::BgError,
        }
    }
}

/// Collapse a result into the status code reported to collaborators.
pub fn status_code<T>(result: &crate::Result<T>) -> StatusCode {
    match result {
        Ok(_) => StatusCode::Ok,
        Err(e) => e.code(),
    }
}
