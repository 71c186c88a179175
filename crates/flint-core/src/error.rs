//! Error types for Flint core operations.
//!
//! This module defines well-structured error types using `thiserror` for
//! library-level errors. Pluggable collaborators (fetchers, translators,
//! index handles) report failures through `anyhow`, and the worker converts
//! those into listener notifications rather than propagating them.

use thiserror::Error;

/// Result type alias using FlintError
pub type Result<T> = std::result::Result<T, FlintError>;

/// Core error types for Flint operations.
///
/// The variants are grouped by the concern that raised them so callers can
/// tell a misconfigured manager apart from a single failed job.
#[derive(Error, Debug)]
pub enum FlintError {
    // === Configuration Errors ===
    /// No factory is registered for the media type and no default translator is set
    #[error("no translator found for media type {media_type}: no factory registered and no default translator")]
    NoTranslator { media_type: String },

    /// A factory is registered for the media type but declined to create a translator
    #[error("no translator found for media type {media_type}: factory returned nothing")]
    TranslatorUnavailable { media_type: String },

    /// Configuration file parsing failed
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    // === Job Errors ===
    /// Content could not be fetched for a job
    #[error("failed to fetch content {content_id}: {reason}")]
    Fetch { content_id: String, reason: String },

    /// Content could not be translated into a canonical document stream
    #[error("failed to translate content: {reason}")]
    Translation { reason: String },

    /// The index rejected or failed a write
    #[error("failed to apply changes to index {index}: {reason}")]
    Apply { index: String, reason: String },

    // === Resource Errors ===
    /// An open index handle could not be closed
    #[error("failed to close index {index}: {reason}")]
    Close { index: String, reason: String },

    // === Submission Errors ===
    /// The submitted job is not valid
    #[error("invalid job: {reason}")]
    InvalidJob { reason: String },

    /// The manager is shutting down and no longer accepts work
    #[error("index manager is shut down")]
    ShuttingDown,

    /// `increase_total` was called on a batch already marked as computed
    #[error("batch {batch} is already computed, its total cannot grow")]
    BatchComputed { batch: u64 },

    // === I/O Errors ===
    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Internal Errors ===
    /// Internal error that should not happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl FlintError {
    /// Returns true if this error comes from how the manager is configured
    /// rather than from the content being indexed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FlintError::NoTranslator { .. }
                | FlintError::TranslatorUnavailable { .. }
                | FlintError::ConfigError { .. }
        )
    }

    /// Returns true if this error only fails the job that raised it.
    pub fn is_job_failure(&self) -> bool {
        matches!(
            self,
            FlintError::Fetch { .. }
                | FlintError::Translation { .. }
                | FlintError::Apply { .. }
                | FlintError::NoTranslator { .. }
                | FlintError::TranslatorUnavailable { .. }
        )
    }

    /// Create a translation error
    pub fn translation(reason: impl Into<String>) -> Self {
        FlintError::Translation {
            reason: reason.into(),
        }
    }

    /// Create an apply error
    pub fn apply(index: impl Into<String>, reason: impl Into<String>) -> Self {
        FlintError::Apply {
            index: index.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid job error
    pub fn invalid_job(reason: impl Into<String>) -> Self {
        FlintError::InvalidJob {
            reason: reason.into(),
        }
    }
}
