//! Data quality checks over a registry snapshot
//!
//! This crate implements:
//! - Schema validation of observed artifact columns
//! - Health checks (freshness, row count, null ratios)
//! - Registry vs filesystem reconciliation (audit)

pub mod schema_validator;
pub mod health;
pub mod audit;

pub use schema_validator::{ObservedColumn, SchemaValidator, TypeMismatch, ValidationResult};
pub use health::{ArtifactStats, HealthChecker, HealthResult, NullRatioViolation};
pub use audit::{scan_data_dirs, AuditReport, Auditor};
