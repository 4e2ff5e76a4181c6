//! Common error types shared across the store.
//!
//! One `thiserror` enum, one `Result` alias, used by every layer from
//! `FileAccess` up to `Partitioner`.

use thiserror::Error;

/// Errors surfaced by the store: out-of-range reads, schema mismatches
/// at append time, corrupt on-disk bytes, I/O failures, and
/// background-task failures that are re-surfaced at the next
/// user-visible call.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("index {index} out of range (count = {count})")]
    OutOfRange { index: u64, count: u64 },

    #[error("read range [{from}, {from} + {take}) overruns count {count}")]
    RangeOutOfRange { from: u64, take: u64, count: u64 },

    #[error("item is missing declared property `{property}`")]
    MissingProperty { property: String },

    #[error("item carries unknown property `{property}`")]
    UnknownProperty { property: String },

    #[error("decode error: {message}")]
    DecodeError { message: String },

    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("background write failure: {message}")]
    BackgroundFailure { message: String },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl StoreError {
    /// Whether the error reflects corruption of persisted bytes rather
    /// than a caller mistake or transient I/O condition.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::DecodeError { .. })
    }
}

impl From<std::num::TryFromIntError> for StoreError {
    fn from(err: std::num::TryFromIntError) -> Self {
        StoreError::DecodeError {
            message: format!("integer conversion error: {err}"),
        }
    }
}

impl Clone for StoreError {
    fn clone(&self) -> Self {
        // Errors are cloned only to re-surface a stored background
        // failure; `std::io::Error` doesn't implement Clone, so it is
        // flattened to its message.
        match self {
            StoreError::OutOfRange { index, count } => StoreError::OutOfRange {
                index: *index,
                count: *count,
            },
            StoreError::RangeOutOfRange { from, take, count } => StoreError::RangeOutOfRange {
                from: *from,
                take: *take,
                count: *count,
            },
            StoreError::MissingProperty { property } => StoreError::MissingProperty {
                property: property.clone(),
            },
            StoreError::UnknownProperty { property } => StoreError::UnknownProperty {
                property: property.clone(),
            },
            StoreError::DecodeError { message } => StoreError::DecodeError {
                message: message.clone(),
            },
            StoreError::IoFailure(e) => StoreError::DecodeError {
                message: format!("io failure: {e}"),
            },
            StoreError::BackgroundFailure { message } => StoreError::BackgroundFailure {
                message: message.clone(),
            },
            StoreError::InvalidConfig { message } => StoreError::InvalidConfig {
                message: message.clone(),
            },
        }
    }
}

/// Result type alias used throughout the store.
pub type Result<T> = std::result::Result<T, StoreError>;
