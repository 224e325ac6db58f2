//! Datamap Core
//!
//! Core domain model with stable, versioned types.
//! Never rename diagnostic codes - they are part of the public API.

pub mod diagnostic;
pub mod entity;
pub mod error;
pub mod schema;
pub mod report;
pub mod config;

pub use diagnostic::{Diagnostic, DiagnosticCode, Severity};
pub use entity::{DataSource, PipelineOutput, ServiceBinding, DashboardBinding, EntityKind};
pub use error::{ConfigError, ConfigViolation, LookupError};
pub use schema::{LogicalType, Column, Schema};
pub use report::{Report, ReportSummary, ReportVersion};
pub use config::{Config, ResolverConfig, HealthThresholds, AuditConfig, SeverityThreshold};
