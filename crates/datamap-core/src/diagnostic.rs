//! Diagnostic codes and finding reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Schema validation (1xxx)
    /// A declared column is missing from the observed artifact
    SchemaMissingColumn,

    /// An observed column type does not match the declaration
    SchemaTypeMismatch,

    /// Observed column not declared in the schema
    SchemaExtraColumn,

    // Health checks (2xxx)
    /// Artifact is older than the configured staleness limit
    HealthStale,

    /// Artifact has fewer rows than required
    HealthLowRowCount,

    /// A column exceeds the allowed null fraction
    HealthNullRatio,

    // Registry vs filesystem reconciliation (3xxx)
    /// Registered source has no artifact on disk
    AuditMissingArtifact,

    /// Artifact on disk matches no registered source
    AuditUnregisteredArtifact,

    /// Source with no producer and no consumer
    AuditOrphanSource,

    /// Dependency graph contains a cycle
    GraphCycle,

    // General (9xxx)
    /// General informational message
    Info,

    /// General warning message
    Warning,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaMissingColumn => "SCHEMA_MISSING_COLUMN",
            Self::SchemaTypeMismatch => "SCHEMA_TYPE_MISMATCH",
            Self::SchemaExtraColumn => "SCHEMA_EXTRA_COLUMN",
            Self::HealthStale => "HEALTH_STALE",
            Self::HealthLowRowCount => "HEALTH_LOW_ROW_COUNT",
            Self::HealthNullRatio => "HEALTH_NULL_RATIO",
            Self::AuditMissingArtifact => "AUDIT_MISSING_ARTIFACT",
            Self::AuditUnregisteredArtifact => "AUDIT_UNREGISTERED_ARTIFACT",
            Self::AuditOrphanSource => "AUDIT_ORPHAN_SOURCE",
            Self::GraphCycle => "GRAPH_CYCLE",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - should be reviewed but not blocking
    Warn,

    /// Error - blocking issue that should fail CI
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A finding with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Data source the finding is about
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Artifact path the finding is about
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Expected value (for comparison diagnostics)
    pub expected: Option<String>,

    /// Actual value (for comparison diagnostics)
    pub actual: Option<String>,

    /// Pipelines, services and dashboards impacted by this issue
    pub impact: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            source: None,
            path: None,
            expected: None,
            actual: None,
            impact: Vec::new(),
        }
    }

    /// Set the data source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the artifact path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set expected/actual values
    pub fn with_comparison(
        mut self,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }

    /// Set downstream impact
    pub fn with_impact(mut self, impact: Vec<String>) -> Self {
        self.impact = impact;
        self
    }
}
