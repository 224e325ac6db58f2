//! Error types shared across the workspace
//!
//! Load-time problems are collected as [`ConfigViolation`]s and reported
//! together; query-time problems are per-call [`LookupError`]s.

use crate::entity::EntityKind;

/// A single problem found in the declarative registry configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigViolation {
    #[error("{document}: failed to read: {message}")]
    Unreadable { document: String, message: String },

    #[error("{document}: failed to parse: {message}")]
    Parse { document: String, message: String },

    #[error("{document}: unsupported document version {version} (supported: 1)")]
    UnsupportedVersion { document: String, version: u32 },

    #[error("{kind} '{name}' is missing required field '{field}'")]
    MissingField {
        kind: EntityKind,
        name: String,
        field: &'static str,
    },

    #[error("{document}: duplicate {kind} name '{name}'")]
    DuplicateName {
        kind: EntityKind,
        name: String,
        document: String,
    },

    #[error("'{name}' is declared both as {first} and as {second}")]
    ConsumerNameCollision {
        name: String,
        first: EntityKind,
        second: EntityKind,
    },

    #[error("{kind} '{owner}' references unknown {target_kind} '{target}' in '{field}'")]
    DanglingReference {
        kind: EntityKind,
        owner: String,
        field: &'static str,
        target_kind: EntityKind,
        target: String,
    },

    #[error("source '{source_name}' is produced by more than one pipeline: {}", .pipelines.join(", "))]
    MultipleProducers {
        source_name: String,
        pipelines: Vec<String>,
    },

    #[error("source '{source_name}' declares producing_pipeline '{declared}' but {}", producer_phrase(.actual))]
    ProducerMismatch {
        source_name: String,
        declared: String,
        actual: Option<String>,
    },
}

/// Configuration errors (tool config or registry documents)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {path}: {message}")]
    IoError { path: String, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("invalid registry configuration ({} violations):\n{}", .0.len(), format_violations(.0))]
    Invalid(Vec<ConfigViolation>),
}

impl ConfigError {
    /// All registry violations carried by this error (empty for IO/parse errors)
    pub fn violations(&self) -> &[ConfigViolation] {
        match self {
            Self::Invalid(violations) => violations,
            _ => &[],
        }
    }
}

fn producer_phrase(actual: &Option<String>) -> String {
    match actual {
        Some(pipeline) => format!("is produced by '{}'", pipeline),
        None => "no pipeline produces it".to_string(),
    }
}

fn format_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {}", v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Unknown name passed to a registry lookup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("{kind} '{name}' not found in registry")]
    NotFound { kind: EntityKind, name: String },

    #[error("'{0}' is not a declared pipeline, service or dashboard")]
    UnknownConsumer(String),

    #[error("source '{0}' has no schema_ref")]
    NoSchema(String),
}

impl LookupError {
    pub fn not_found(kind: EntityKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }
}
