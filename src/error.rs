//! Error handling utilities shared across the crate.

use crate::status::{Status, StatusCode};
use std::path::PathBuf;
use thiserror::Error;

/// Convenient result type used throughout the crate.
pub type Result<T, E = SentencePieceError> = std::result::Result<T, E>;

/// Errors returned by [`SentencePieceProcessor`](crate::SentencePieceProcessor).
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum SentencePieceError {
    /// The engine reported a non-ok status.
    #[error("sentencepiece error: {0}")]
    Status(#[from] Status),
    /// A model path contains an interior nul byte.
    #[error("filename contains nul: {0:?}")]
    FilenameContainsNul(PathBuf),
}

impl SentencePieceError {
    /// Status code of an engine failure, `None` for errors raised by the binding itself.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status(status) => Some(status.code()),
            _ => None,
        }
    }
}
