//! Status codes reported by the processor.
//!
//! The numbering follows the sentencepiece (absl) status enumeration and is part
//! of the C ABI: values cross the boundary unchanged, widened to `int`.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::fmt;

/// Outcome classification of a fallible operation.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Hash, PartialEq)]
#[repr(i32)]
pub enum StatusCode {
    /// The operation succeeded.
    Ok = 0,
    /// The operation was cancelled.
    Cancelled = 1,
    /// Unclassified failure.
    Unknown = 2,
    /// The caller supplied an invalid argument (bad option string, bad sampling parameter).
    InvalidArgument = 3,
    /// A deadline expired before the operation completed.
    DeadlineExceeded = 4,
    /// A model file does not exist or could not be opened.
    NotFound = 5,
    /// The entity already exists.
    AlreadyExists = 6,
    /// A model file exists but may not be read.
    PermissionDenied = 7,
    /// A resource was exhausted.
    ResourceExhausted = 8,
    /// The processor is not in a state that allows the operation.
    FailedPrecondition = 9,
    /// The operation was aborted.
    Aborted = 10,
    /// A piece id lies outside the vocabulary.
    OutOfRange = 11,
    /// The loaded model does not implement the operation.
    Unimplemented = 12,
    /// Broken model, or no model loaded.
    Internal = 13,
    /// The service is unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss.
    DataLoss = 15,
    /// The request lacks valid credentials.
    Unauthenticated = 16,
}

impl StatusCode {
    /// Maps a raw ordinal back to a code, `None` for values outside the enumeration.
    #[inline]
    pub fn from_raw(raw: i32) -> Option<Self> {
        FromPrimitive::from_i32(raw)
    }

    /// The raw ordinal, as passed through the C ABI.
    #[inline]
    pub const fn raw(self) -> i32 {
        self as i32
    }

    /// Upper snake case name used by sentencepiece when printing a status.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A non-ok status with its message.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        debug_assert_ne!(code, StatusCode::Ok);
        Self {
            code,
            message: message.into(),
        }
    }

    #[inline]
    pub fn code(&self) -> StatusCode {
        self.code
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub(crate) fn not_loaded() -> Self {
        Self::internal("Model is not initialized.")
    }
}
