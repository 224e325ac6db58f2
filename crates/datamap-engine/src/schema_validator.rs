//! Schema validation for data artifacts
//!
//! Compares the columns observed in an artifact against the schema declared
//! for its source. Extra columns never fail validation. Missing columns and
//! type mismatches fail it when the declared column is non-nullable.

use datamap_core::{
    Column, Diagnostic, DiagnosticCode, LogicalType, LookupError, Schema, Severity,
    SeverityThreshold,
};
use datamap_registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// A column as observed in an actual artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedColumn {
    pub name: String,

    /// Observed type; `None` checks presence only
    #[serde(default, rename = "type")]
    pub logical_type: Option<LogicalType>,
}

impl ObservedColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            logical_type: None,
        }
    }

    pub fn typed(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type: Some(logical_type),
        }
    }
}

impl FromStr for ObservedColumn {
    type Err = String;

    /// Parse `name` or `name:type`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, data_type) = match s.split_once(':') {
            Some((name, data_type)) => (name.trim(), Some(data_type.trim())),
            None => (s.trim(), None),
        };

        if name.is_empty() {
            return Err(format!("empty column name in '{}'", s));
        }

        Ok(Self {
            name: name.to_string(),
            logical_type: data_type.filter(|t| !t.is_empty()).map(LogicalType::parse),
        })
    }
}

/// Declared vs observed type of one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeMismatch {
    pub column: String,
    pub expected: LogicalType,
    pub actual: LogicalType,

    /// Whether the declared column is nullable (mismatch reported only)
    pub nullable: bool,
}

/// Outcome of validating one artifact against its declared schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub source: String,
    pub ok: bool,

    /// Declared columns absent from the artifact, in declaration order
    pub missing_columns: Vec<String>,

    pub type_mismatches: Vec<TypeMismatch>,

    /// Observed columns not in the schema, in observed order
    pub extra_columns: Vec<String>,

    /// Missing columns whose declaration is nullable (subset of `missing_columns`)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_nullable: Vec<String>,
}

impl ValidationResult {
    /// Compare observed columns against a schema
    pub fn compare(
        source: impl Into<String>,
        schema: &Schema,
        observed: &[ObservedColumn],
    ) -> Self {
        let mut missing_columns = Vec::new();
        let mut missing_nullable = Vec::new();
        let mut type_mismatches = Vec::new();
        let mut declared = HashSet::new();

        for expected in &schema.columns {
            declared.insert(expected.name.as_str());

            match observed.iter().find(|c| c.name == expected.name) {
                Some(actual) => {
                    if let Some(mismatch) = type_mismatch(expected, actual) {
                        type_mismatches.push(mismatch);
                    }
                }
                None => {
                    missing_columns.push(expected.name.clone());
                    if expected.nullable {
                        missing_nullable.push(expected.name.clone());
                    }
                }
            }
        }

        let mut extra_columns: Vec<String> = Vec::new();
        for column in observed {
            if !declared.contains(column.name.as_str()) && !extra_columns.contains(&column.name) {
                extra_columns.push(column.name.clone());
            }
        }

        let ok = missing_columns.len() == missing_nullable.len()
            && type_mismatches.iter().all(|m| m.nullable);

        Self {
            source: source.into(),
            ok,
            missing_columns,
            type_mismatches,
            extra_columns,
            missing_nullable,
        }
    }

    /// Findings as diagnostics
    ///
    /// Failing findings are errors, findings against nullable columns are
    /// warnings, extra columns are info. Severity overrides apply on top.
    pub fn to_diagnostics(&self, severity: &SeverityThreshold) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for column in &self.missing_columns {
            let nullable = self.missing_nullable.contains(column);
            let default = if nullable { Severity::Warn } else { Severity::Error };
            let message = format!(
                "Column '{}' declared for '{}' is missing from the artifact{}",
                column,
                self.source,
                if nullable { " (nullable)" } else { "" }
            );

            diagnostics.push(
                Diagnostic::new(
                    DiagnosticCode::SchemaMissingColumn,
                    severity.get_severity(DiagnosticCode::SchemaMissingColumn, default),
                    message,
                )
                .with_source(&self.source),
            );
        }

        for mismatch in &self.type_mismatches {
            let default = if mismatch.nullable { Severity::Warn } else { Severity::Error };
            let message = format!(
                "Column '{}' type mismatch: expected {}, got {}",
                mismatch.column, mismatch.expected, mismatch.actual
            );

            diagnostics.push(
                Diagnostic::new(
                    DiagnosticCode::SchemaTypeMismatch,
                    severity.get_severity(DiagnosticCode::SchemaTypeMismatch, default),
                    message,
                )
                .with_source(&self.source)
                .with_comparison(mismatch.expected.to_string(), mismatch.actual.to_string()),
            );
        }

        for column in &self.extra_columns {
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticCode::SchemaExtraColumn,
                    severity.get_severity(DiagnosticCode::SchemaExtraColumn, Severity::Info),
                    format!("Column '{}' present in the artifact but not declared", column),
                )
                .with_source(&self.source),
            );
        }

        diagnostics
    }
}

fn type_mismatch(expected: &Column, actual: &ObservedColumn) -> Option<TypeMismatch> {
    let actual_type = actual.logical_type.as_ref()?;
    if expected.logical_type.is_compatible_with(actual_type) {
        return None;
    }

    Some(TypeMismatch {
        column: expected.name.clone(),
        expected: expected.logical_type.clone(),
        actual: actual_type.clone(),
        nullable: expected.nullable,
    })
}

/// Validates artifacts against the schemas declared in a registry
pub struct SchemaValidator<'a> {
    registry: &'a Registry,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Validate observed columns against the schema referenced by `source_name`
    pub fn validate_schema(
        &self,
        source_name: &str,
        observed: &[ObservedColumn],
    ) -> Result<ValidationResult, LookupError> {
        let schema = self.registry.schema_for_source(source_name)?;
        let result = ValidationResult::compare(source_name, schema, observed);

        tracing::debug!(
            source = source_name,
            ok = result.ok,
            missing = result.missing_columns.len(),
            mismatched = result.type_mismatches.len(),
            extra = result.extra_columns.len(),
            "validated schema"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datamap_registry::load_from_str;
    use pretty_assertions::assert_eq;

    const REGISTRY: &str = r#"
sources:
  bank_metrics:
    category: fundamentals
    location: DATA/processed/fundamentals/bank_metrics.parquet
    format: parquet
    schema_ref: bank_metrics
  prices:
    location: DATA/raw/prices.parquet
    format: parquet
schemas:
  bank_metrics:
    columns:
      - { name: symbol, type: string }
      - { name: date, type: date }
      - { name: roe, type: float64 }
      - { name: nim, type: float64, nullable: true }
"#;

    fn observed(columns: &[&str]) -> Vec<ObservedColumn> {
        columns.iter().map(|c| c.parse().unwrap()).collect()
    }

    #[test]
    fn missing_required_column_fails() {
        let registry = load_from_str(REGISTRY).unwrap();
        let result = SchemaValidator::new(&registry)
            .validate_schema("bank_metrics", &observed(&["symbol", "date"]))
            .unwrap();

        assert!(!result.ok);
        assert_eq!(result.missing_columns, vec!["roe", "nim"]);
        assert_eq!(result.missing_nullable, vec!["nim"]);
        assert!(result.type_mismatches.is_empty());
        assert!(result.extra_columns.is_empty());
    }

    #[test]
    fn missing_roe_fails_bank_metrics() {
        let registry = load_from_str(
            r#"
sources:
  bank_metrics:
    location: DATA/processed/fundamentals/bank_metrics.parquet
    format: parquet
    schema_ref: bank_metrics
schemas:
  bank_metrics:
    columns:
      - { name: symbol, type: string }
      - { name: date, type: date }
      - { name: roe, type: float64 }
"#,
        )
        .unwrap();

        let result = SchemaValidator::new(&registry)
            .validate_schema("bank_metrics", &observed(&["symbol", "date"]))
            .unwrap();

        assert!(!result.ok);
        assert_eq!(result.missing_columns, vec!["roe"]);
        assert!(result.missing_nullable.is_empty());
        assert!(result.type_mismatches.is_empty());
        assert!(result.extra_columns.is_empty());
    }

    #[test]
    fn missing_nullable_column_is_reported_only() {
        let registry = load_from_str(REGISTRY).unwrap();
        let result = SchemaValidator::new(&registry)
            .validate_schema("bank_metrics", &observed(&["symbol", "date", "roe"]))
            .unwrap();

        assert!(result.ok);
        assert_eq!(result.missing_columns, vec!["nim"]);

        let diagnostics = result.to_diagnostics(&SeverityThreshold::default());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warn);
    }

    #[test]
    fn extra_columns_never_fail() {
        let registry = load_from_str(REGISTRY).unwrap();
        let result = SchemaValidator::new(&registry)
            .validate_schema(
                "bank_metrics",
                &observed(&["symbol", "date", "roe", "nim", "npl_ratio", "npl_ratio"]),
            )
            .unwrap();

        assert!(result.ok);
        assert_eq!(result.extra_columns, vec!["npl_ratio"]);

        let diagnostics = result.to_diagnostics(&SeverityThreshold::default());
        assert_eq!(diagnostics[0].code, DiagnosticCode::SchemaExtraColumn);
        assert_eq!(diagnostics[0].severity, Severity::Info);
    }

    #[test]
    fn type_mismatch_on_required_column_fails() {
        let registry = load_from_str(REGISTRY).unwrap();
        let result = SchemaValidator::new(&registry)
            .validate_schema(
                "bank_metrics",
                &observed(&["symbol:utf8", "date:date32", "roe:string", "nim:varchar"]),
            )
            .unwrap();

        assert!(!result.ok);
        assert_eq!(result.type_mismatches.len(), 2);
        assert_eq!(result.type_mismatches[0].column, "roe");
        assert!(!result.type_mismatches[0].nullable);
        assert!(result.type_mismatches[1].nullable);

        let diagnostics = result.to_diagnostics(&SeverityThreshold::default());
        assert_eq!(diagnostics[0].code, DiagnosticCode::SchemaTypeMismatch);
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(diagnostics[0].expected.as_deref(), Some("FLOAT"));
        assert_eq!(diagnostics[0].actual.as_deref(), Some("STRING"));
    }

    #[test]
    fn compatible_widening_is_accepted() {
        let schema = Schema::from_columns(
            "metrics",
            vec![Column::new("roe", LogicalType::Float)],
        );
        let observed = [ObservedColumn::typed("roe", LogicalType::Int)];
        let result = ValidationResult::compare("m", &schema, &observed);
        assert!(result.ok);
    }

    #[test]
    fn severity_overrides_apply() {
        let registry = load_from_str(REGISTRY).unwrap();
        let result = SchemaValidator::new(&registry)
            .validate_schema("bank_metrics", &observed(&["symbol", "date"]))
            .unwrap();

        let mut severity = SeverityThreshold::default();
        severity.set_override(DiagnosticCode::SchemaMissingColumn, Severity::Info);

        let diagnostics = result.to_diagnostics(&severity);
        assert!(diagnostics.iter().all(|d| d.severity == Severity::Info));
    }

    #[test]
    fn source_without_schema() {
        let registry = load_from_str(REGISTRY).unwrap();
        let err = SchemaValidator::new(&registry)
            .validate_schema("prices", &[])
            .unwrap_err();
        assert_eq!(err, LookupError::NoSchema("prices".to_string()));
    }

    #[test]
    fn parse_observed_columns() {
        let column: ObservedColumn = "roe : double".parse().unwrap();
        assert_eq!(column, ObservedColumn::typed("roe", LogicalType::Float));
        assert_eq!("symbol".parse::<ObservedColumn>().unwrap(), ObservedColumn::new("symbol"));
        assert!(":int".parse::<ObservedColumn>().is_err());
    }
}
