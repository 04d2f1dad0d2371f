//! Error types for the notemerge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    MergeResult(#[from] MergeResultError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Merge result validation errors
// ---------------------------------------------------------------------------

/// Structural validation failures for a merge-result payload.
///
/// Every variant is a flavour of "malformed merge result" and names the first
/// offending field together with its location in the payload.
#[derive(Debug, Error)]
pub enum MergeResultError {
    /// The payload is not valid JSON, or a field has the wrong JSON type.
    #[error("malformed merge result: invalid JSON: {0}")]
    InvalidJson(String),

    /// A required field is absent.
    #[error("malformed merge result: missing field '{field}' at {location}")]
    MissingField { field: String, location: String },

    /// An id that must be unique appears twice.
    #[error("malformed merge result: duplicate {field} '{value}' at {location}")]
    DuplicateId {
        field: String,
        value: String,
        location: String,
    },

    /// A field is present but its value is unusable.
    #[error("malformed merge result: invalid field '{field}' at {location}: {detail}")]
    InvalidField {
        field: String,
        location: String,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Reconciliation errors
// ---------------------------------------------------------------------------

/// Errors from applying a resolution to the merged text.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The site's text could not be located at its anchor.
    #[error("anchor not found for conflict {key}: expected {expected:?}")]
    AnchorNotFound { key: String, expected: String },

    /// More than one location matches and none can be preferred.
    #[error("ambiguous anchor for conflict {key}: {candidates} candidate locations")]
    AmbiguousAnchor { key: String, candidates: usize },

    /// The requested alternative does not exist at this site.
    #[error("conflict {key} has no alternative #{index} ({available} available)")]
    UnknownAlternative {
        key: String,
        index: usize,
        available: usize,
    },

    /// The resolution targets a different site than the one supplied.
    #[error("resolution for {resolution_key} applied to site {site_key}")]
    KeyMismatch {
        resolution_key: String,
        site_key: String,
    },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the [`ResolutionEngine`](crate::engine::ResolutionEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// No merge result has been loaded yet.
    #[error("no merge result loaded")]
    NotLoaded,

    /// The key does not name a conflict site in the loaded document.
    #[error("unknown conflict key: {0}")]
    UnknownConflictKey(String),

    /// The alternative index is not permitted by the configured policy.
    #[error("alternative #{index} not permitted for conflict {key}: {detail}")]
    AlternativeNotPermitted {
        key: String,
        index: usize,
        detail: String,
    },

    /// A resolution command is internally inconsistent.
    #[error("invalid resolution command: {0}")]
    InvalidCommand(String),

    /// The payload failed structural validation.
    #[error(transparent)]
    MalformedMergeResult(#[from] MergeResultError),

    /// Applying the resolution to the merged text failed.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

// ---------------------------------------------------------------------------
// Producer errors
// ---------------------------------------------------------------------------

/// Errors from invoking the external merge producer.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The producer could not be started, timed out, or its output could
    /// not be retrieved.
    #[error("merge result fetch failed: {0}")]
    FetchFailed(String),

    /// The producer ran but exited unsuccessfully or emitted garbage.
    #[error("merge producer failed (exit {exit_code:?}): {detail}")]
    ProducerFailed {
        exit_code: Option<i32>,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = MergeResultError::MissingField {
            field: "header_id".into(),
            location: "headers[2]".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed merge result: missing field 'header_id' at headers[2]"
        );

        let err = ReconcileError::AnchorNotFound {
            key: "h1-b1".into(),
            expected: "Draft".into(),
        };
        assert!(err.to_string().contains("h1-b1"));
        assert!(err.to_string().contains("\"Draft\""));

        let err = ProducerError::ProducerFailed {
            exit_code: Some(2),
            detail: "boom".into(),
        };
        assert!(err.to_string().contains("exit Some(2)"));

        assert_eq!(EngineError::NotLoaded.to_string(), "no merge result loaded");
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let err = MergeResultError::InvalidJson("eof".into());
        let engine_err: EngineError = err.into();
        assert!(matches!(engine_err, EngineError::MalformedMergeResult(_)));

        let core_err: CoreError = engine_err.into();
        assert!(matches!(core_err, CoreError::Engine(_)));

        let core_err: CoreError = ProducerError::FetchFailed("timeout".into()).into();
        assert!(matches!(core_err, CoreError::Producer(_)));
    }
}
