//! The closed error-kind set shared by every pipeline component.
//!
//! Each component (extractor, embedder, vector index, query engine,
//! metadata store) returns `Result<T, CoreError>` rather than `anyhow::Error`
//! because callers — in particular the ingestion pipeline's compensating
//! cleanup — need to match on *what kind* of failure occurred, not just log
//! a message. Application-level plumbing (CLI argument handling, config
//! loading) keeps using `anyhow::Result` throughout.

use std::fmt;

/// The seven error kinds a pipeline component may report.
#[derive(Debug)]
pub enum CoreError {
    /// Caller violated a precondition: bad id, empty question, oversized file.
    InvalidInput(String),
    /// Named entity does not exist.
    NotFound(String),
    /// Extractor declared the content type unsupported.
    Unsupported(String),
    /// Extractor could not parse the bytes as the declared format.
    Corrupt(String),
    /// Extraction produced no usable text.
    Empty,
    /// Input exceeded the size policy before extraction began.
    TooLarge,
    /// Embedder, OCR, or LLM upstream failed after exhausting retries.
    BackendUnavailable(String),
    /// Operation-level deadline elapsed at a suspension point.
    DeadlineExceeded,
    /// A concurrent-mutation invariant would be violated.
    Conflict(String),
    /// Invariant violation detected internally; never shown to end users.
    Internal(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            CoreError::NotFound(what) => write!(f, "not found: {what}"),
            CoreError::Unsupported(ct) => write!(f, "unsupported content: {ct}"),
            CoreError::Corrupt(msg) => write!(f, "corrupt content: {msg}"),
            CoreError::Empty => write!(f, "extraction produced no text"),
            CoreError::TooLarge => write!(f, "input exceeds the size limit"),
            CoreError::BackendUnavailable(msg) => write!(f, "backend unavailable: {msg}"),
            CoreError::DeadlineExceeded => write!(f, "deadline exceeded"),
            CoreError::Conflict(msg) => write!(f, "conflict: {msg}"),
            CoreError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl CoreError {
    /// True for the extractor outcomes that should mark an Item `failed`
    /// rather than discard it outright (spec §7 kinds 3 vs. 4-5).
    pub fn is_intrinsic_to_input(&self) -> bool {
        matches!(
            self,
            CoreError::Unsupported(_) | CoreError::Corrupt(_) | CoreError::Empty | CoreError::TooLarge
        )
    }
}

impl From<crate::extract::ExtractError> for CoreError {
    fn from(e: crate::extract::ExtractError) -> Self {
        use crate::extract::ExtractError::*;
        match e {
            UnsupportedContentType(ct) => CoreError::Unsupported(ct),
            Corrupt(msg) => CoreError::Corrupt(msg),
            Empty => CoreError::Empty,
            TooLarge => CoreError::TooLarge,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Internal(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
