//! Registry entities
//!
//! Plain value objects. All behavior lives in the registry and engine crates.

use serde::{Deserialize, Serialize};
use crate::config::HealthThresholds;

/// Kind of a registry entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A data artifact (parquet file, CSV export, ...)
    Source,

    /// A pipeline producing and reading sources
    Pipeline,

    /// A service consuming sources
    Service,

    /// A dashboard consuming sources and services
    Dashboard,

    /// A named schema definition
    Schema,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Pipeline => write!(f, "pipeline"),
            Self::Service => write!(f, "service"),
            Self::Dashboard => write!(f, "dashboard"),
            Self::Schema => write!(f, "schema"),
        }
    }
}

/// A declared data artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Unique name across the registry
    pub name: String,

    /// Free-form grouping (e.g. "market_data", "fundamentals")
    pub category: String,

    /// Location template, e.g. `DATA/processed/ohlcv/{date}.parquet`
    pub location: String,

    /// Storage format (parquet, csv, json, ...)
    pub format: String,

    /// Name of the schema definition describing this artifact
    pub schema_ref: Option<String>,

    /// Pipeline producing this artifact, if any
    pub producing_pipeline: Option<String>,

    /// Human-readable description
    pub description: Option<String>,

    /// Per-source health threshold overrides
    pub health: Option<HealthThresholds>,
}

/// What a pipeline writes and reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// Unique pipeline name
    pub pipeline_name: String,

    /// Sources this pipeline writes, in declaration order
    pub produces: Vec<String>,

    /// Sources this pipeline reads, in declaration order
    pub inputs: Vec<String>,
}

/// Sources read by a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
    pub service_name: String,
    pub consumes: Vec<String>,
}

/// Sources and services a dashboard depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardBinding {
    pub dashboard_name: String,

    /// Sources read directly by the dashboard
    pub consumes: Vec<String>,

    /// Services whose sources the dashboard reads transitively
    pub services: Vec<String>,
}
