//! Error handling and custom error types
//!
//! Provides unified error handling across the application using thiserror.
//! Conversion errors are split by pipeline stage so a failed conversion can
//! report where it stopped.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not decode image: {0}")]
    Decode(image::ImageError),

    #[error("Invalid conversion request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Color conversion error: {0}")]
    Normalize(String),

    #[error("Resize error: {0}")]
    Resize(String),

    #[error("Could not encode image: {0}")]
    Encode(image::ImageError),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] dotenvy::Error),

    #[error("Invariant violation: {0}")]
    Invariant(String),
}

/// Pipeline stage a conversion failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Decode,
    Validate,
    Normalize,
    Resize,
    Encode,
    Internal,
}

impl Error {
    pub fn stage(&self) -> Stage {
        match self {
            Error::Decode(_) => Stage::Decode,
            Error::InvalidRequest(_) | Error::UnsupportedFormat(_) => Stage::Validate,
            Error::Normalize(_) => Stage::Normalize,
            Error::Resize(_) => Stage::Resize,
            Error::Encode(_) => Stage::Encode,
            _ => Stage::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
