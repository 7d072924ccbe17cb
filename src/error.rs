//! Error types surfaced by the branching engine.
//!
//! Only configuration defects and bad caller input are errors. Missing
//! scores and missing narrative text degrade in place and are logged instead.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Caller input could not be resolved to a starting state.
    #[error("validation error: {field}: {msg}")]
    Validation { field: &'static str, msg: String },

    /// The hexagram table is not a usable bijection over 6-bit codes.
    #[error("data integrity error: {msg}")]
    DataIntegrity { msg: String },

    /// A table file could not be read or parsed.
    #[error("table load error ({path}): {msg}")]
    TableLoad { path: String, msg: String },

    /// The async host gave up waiting for the pipeline.
    #[error("computation timed out after {ms} ms")]
    Timeout { ms: u64 },
}

impl EngineError {
    pub fn validation(field: &'static str, msg: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            msg: msg.into(),
        }
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        EngineError::DataIntegrity { msg: msg.into() }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_field() {
        let err = EngineError::validation("line", "must be within 1..=6, got 7");
        assert_eq!(err.to_string(), "validation error: line: must be within 1..=6, got 7");
        assert!(err.is_validation());
    }

    #[test]
    fn test_integrity_is_not_validation() {
        let err = EngineError::integrity("no hexagram for code 0b101010");
        assert!(!err.is_validation());
        assert!(err.to_string().starts_with("data integrity error"));
    }
}
