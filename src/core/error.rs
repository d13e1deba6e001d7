//! Error taxonomy
//!
//! Only `SandboxLaunchError` is an operator-facing anomaly. Timeouts and runtime
//! faults of submitted programs are not errors at all: they travel as data in
//! `ExecutionStatus` and `VerdictKind`.

use std::path::PathBuf;
use thiserror::Error;

/// The isolated execution unit could not be created.
#[derive(Error, Debug)]
pub enum SandboxLaunchError {
    #[error("failed to create execution workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("failed to write source to {path:?}: {source}")]
    WriteSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for sandboxed process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("interpreter command is empty")]
    EmptyCommand,

    #[error("isolate failure: {0}")]
    Isolate(String),

    #[error("namespace isolation is required but not available on this host")]
    NamespacesUnavailable,
}

/// A malformed submission, rejected before any sandboxed run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing exercise id")]
    MissingExerciseId,

    #[error("missing source text")]
    MissingSource,

    #[error("exercise {0} not found")]
    UnknownExercise(u32),

    #[error("exercise {0} is locked")]
    ExerciseLocked(u32),

    #[error("source is {len} bytes, limit is {max}")]
    SourceTooLarge { len: usize, max: usize },
}

impl ValidationError {
    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingExerciseId => "missing_exercise_id",
            ValidationError::MissingSource => "missing_source",
            ValidationError::UnknownExercise(_) => "not_found",
            ValidationError::ExerciseLocked(_) => "locked",
            ValidationError::SourceTooLarge { .. } => "source_too_large",
        }
    }
}

/// Problems loading the exercise catalog
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("catalog has no exercises")]
    Empty,

    #[error("duplicate exercise id {0}")]
    DuplicateId(u32),

    #[error("exercise ids must run 1..=n without gaps; expected {expected}, found {found}")]
    NonContiguous { expected: u32, found: u32 },
}

/// Invalid engine configuration value
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_codes() {
        assert_eq!(ValidationError::ExerciseLocked(3).code(), "locked");
        assert_eq!(ValidationError::UnknownExercise(99).code(), "not_found");
        assert_eq!(
            ValidationError::SourceTooLarge { len: 10, max: 5 }.to_string(),
            "source is 10 bytes, limit is 5"
        );
    }
}
