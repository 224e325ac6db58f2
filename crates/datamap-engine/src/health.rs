//! Artifact health checks
//!
//! Freshness, row count and null ratios of an artifact, measured by the
//! caller, checked against thresholds from configuration. Global defaults
//! come from `[health]` in datamap.toml; a source's own `health` block
//! overrides them field by field. An unset threshold disables its check.

use chrono::{DateTime, Utc};
use datamap_core::{
    Diagnostic, DiagnosticCode, HealthThresholds, LookupError, Severity, SeverityThreshold,
};
use datamap_registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Measurements of one artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactStats {
    /// Last modification time
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,

    #[serde(default)]
    pub row_count: Option<u64>,

    /// Column -> fraction of null values (0.0..=1.0)
    #[serde(default)]
    pub null_fractions: BTreeMap<String, f64>,
}

/// A column whose null fraction exceeds its limit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NullRatioViolation {
    pub column: String,

    /// Measured fraction; `None` when a column limit is set but unmeasured
    pub fraction: Option<f64>,

    pub limit: f64,
}

/// Health of one artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResult {
    pub source: String,
    pub freshness_ok: bool,
    pub row_count_ok: bool,
    pub null_ratio_ok: bool,

    /// Artifact age at check time, in hours
    pub age_hours: Option<f64>,

    pub null_violations: Vec<NullRatioViolation>,

    /// Thresholds the artifact was checked against
    pub thresholds: HealthThresholds,

    #[serde(skip)]
    row_count: Option<u64>,
}

impl HealthResult {
    /// Evaluate measurements against thresholds
    pub fn evaluate(
        source: impl Into<String>,
        thresholds: HealthThresholds,
        stats: &ArtifactStats,
        now: DateTime<Utc>,
    ) -> Self {
        let age_hours = stats
            .modified
            .map(|modified| (now - modified).num_seconds() as f64 / 3600.0);

        // A configured threshold with no measurement fails
        let freshness_ok = match thresholds.max_staleness_hours {
            None => true,
            Some(max) => age_hours.is_some_and(|age| age <= max as f64),
        };

        let row_count_ok = match thresholds.min_rows {
            None => true,
            Some(min) => stats.row_count.is_some_and(|rows| rows >= min),
        };

        let mut null_violations: Vec<NullRatioViolation> = stats
            .null_fractions
            .iter()
            .filter_map(|(column, &fraction)| {
                let limit = thresholds.null_limit_for(column)?;
                (fraction > limit).then(|| NullRatioViolation {
                    column: column.clone(),
                    fraction: Some(fraction),
                    limit,
                })
            })
            .collect();

        // Column limits need a measurement; `max_null_fraction` only covers measured columns
        null_violations.extend(
            thresholds
                .column_null_fractions
                .iter()
                .filter(|(column, _)| !stats.null_fractions.contains_key(*column))
                .map(|(column, &limit)| NullRatioViolation {
                    column: column.clone(),
                    fraction: None,
                    limit,
                }),
        );

        Self {
            source: source.into(),
            freshness_ok,
            row_count_ok,
            null_ratio_ok: null_violations.is_empty(),
            age_hours,
            null_violations,
            thresholds,
            row_count: stats.row_count,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.freshness_ok && self.row_count_ok && self.null_ratio_ok
    }

    /// Failed checks as diagnostics (warnings unless overridden)
    pub fn to_diagnostics(&self, severity: &SeverityThreshold) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let level = |code| severity.get_severity(code, Severity::Warn);

        if !self.freshness_ok {
            let limit = self.thresholds.max_staleness_hours.unwrap_or_default();
            let (message, actual) = match self.age_hours {
                Some(age) => (
                    format!("Artifact for '{}' is {:.1}h old (limit {}h)", self.source, age, limit),
                    format!("{:.1}h", age),
                ),
                None => (
                    format!("Artifact for '{}' has no modification time", self.source),
                    "unknown".to_string(),
                ),
            };
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticCode::HealthStale,
                    level(DiagnosticCode::HealthStale),
                    message,
                )
                .with_source(&self.source)
                .with_comparison(format!("<= {}h", limit), actual),
            );
        }

        if !self.row_count_ok {
            let min = self.thresholds.min_rows.unwrap_or_default();
            let actual = self
                .row_count
                .map(|rows| rows.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticCode::HealthLowRowCount,
                    level(DiagnosticCode::HealthLowRowCount),
                    format!("Artifact for '{}' has {} rows (minimum {})", self.source, actual, min),
                )
                .with_source(&self.source)
                .with_comparison(format!(">= {}", min), actual),
            );
        }

        for violation in &self.null_violations {
            let (message, actual) = match violation.fraction {
                Some(fraction) => (
                    format!(
                        "Column '{}' of '{}' is {:.1}% null (limit {:.1}%)",
                        violation.column,
                        self.source,
                        fraction * 100.0,
                        violation.limit * 100.0
                    ),
                    fraction.to_string(),
                ),
                None => (
                    format!(
                        "Column '{}' of '{}' has a null limit of {:.1}% but no measurement",
                        violation.column,
                        self.source,
                        violation.limit * 100.0
                    ),
                    "unknown".to_string(),
                ),
            };
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticCode::HealthNullRatio,
                    level(DiagnosticCode::HealthNullRatio),
                    message,
                )
                .with_source(&self.source)
                .with_comparison(format!("<= {}", violation.limit), actual),
            );
        }

        diagnostics
    }
}

/// Checks artifact health against configured thresholds
pub struct HealthChecker<'a> {
    registry: &'a Registry,
    defaults: &'a HealthThresholds,
}

impl<'a> HealthChecker<'a> {
    pub fn new(registry: &'a Registry, defaults: &'a HealthThresholds) -> Self {
        Self { registry, defaults }
    }

    /// Thresholds applying to a source
    pub fn thresholds_for(&self, source_name: &str) -> Result<HealthThresholds, LookupError> {
        let source = self.registry.get_source(source_name)?;
        Ok(self.defaults.merged_with(source.health.as_ref()))
    }

    pub fn check_health(
        &self,
        source_name: &str,
        stats: &ArtifactStats,
        now: DateTime<Utc>,
    ) -> Result<HealthResult, LookupError> {
        let thresholds = self.thresholds_for(source_name)?;
        let result = HealthResult::evaluate(source_name, thresholds, stats, now);

        tracing::debug!(
            source = source_name,
            freshness_ok = result.freshness_ok,
            row_count_ok = result.row_count_ok,
            null_ratio_ok = result.null_ratio_ok,
            "checked artifact health"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use datamap_registry::load_from_str;

    const REGISTRY: &str = r#"
sources:
  ohlcv_daily:
    location: DATA/processed/ohlcv/{date}.parquet
    format: parquet
  fundamentals:
    location: DATA/processed/fundamentals.parquet
    format: parquet
    health:
      max_staleness_hours: 720
      column_null_fractions:
        dividend_yield: 0.9
"#;

    fn defaults() -> HealthThresholds {
        HealthThresholds {
            max_staleness_hours: Some(48),
            min_rows: Some(100),
            max_null_fraction: Some(0.2),
            ..HealthThresholds::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    fn stats(age_hours: i64, rows: u64, nulls: &[(&str, f64)]) -> ArtifactStats {
        ArtifactStats {
            modified: Some(now() - Duration::hours(age_hours)),
            row_count: Some(rows),
            null_fractions: nulls.iter().map(|(c, f)| (c.to_string(), *f)).collect(),
        }
    }

    #[test]
    fn healthy_artifact() {
        let registry = load_from_str(REGISTRY).unwrap();
        let defaults = defaults();
        let result = HealthChecker::new(&registry, &defaults)
            .check_health("ohlcv_daily", &stats(2, 5000, &[("close", 0.01)]), now())
            .unwrap();

        assert!(result.is_healthy());
        assert_eq!(result.age_hours, Some(2.0));
        assert!(result.to_diagnostics(&SeverityThreshold::default()).is_empty());
    }

    #[test]
    fn each_signal_fails_independently() {
        let registry = load_from_str(REGISTRY).unwrap();
        let defaults = defaults();
        let checker = HealthChecker::new(&registry, &defaults);

        let stale = checker.check_health("ohlcv_daily", &stats(72, 5000, &[]), now()).unwrap();
        assert!(!stale.freshness_ok && stale.row_count_ok && stale.null_ratio_ok);

        let small = checker.check_health("ohlcv_daily", &stats(1, 10, &[]), now()).unwrap();
        assert!(small.freshness_ok && !small.row_count_ok && small.null_ratio_ok);

        let sparse = checker
            .check_health("ohlcv_daily", &stats(1, 5000, &[("volume", 0.5), ("close", 0.1)]), now())
            .unwrap();
        assert!(!sparse.null_ratio_ok);
        assert_eq!(sparse.null_violations.len(), 1);
        assert_eq!(sparse.null_violations[0].column, "volume");

        let diagnostics = sparse.to_diagnostics(&SeverityThreshold::default());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, DiagnosticCode::HealthNullRatio);
        assert_eq!(diagnostics[0].severity, Severity::Warn);
    }

    #[test]
    fn source_overrides_merge_with_defaults() {
        let registry = load_from_str(REGISTRY).unwrap();
        let defaults = defaults();
        let checker = HealthChecker::new(&registry, &defaults);

        let thresholds = checker.thresholds_for("fundamentals").unwrap();
        assert_eq!(thresholds.max_staleness_hours, Some(720));
        assert_eq!(thresholds.min_rows, Some(100));

        let result = checker
            .check_health(
                "fundamentals",
                &stats(240, 500, &[("dividend_yield", 0.8), ("roe", 0.1)]),
                now(),
            )
            .unwrap();
        assert!(result.is_healthy());
    }

    #[test]
    fn missing_measurements_fail_configured_checks() {
        let registry = load_from_str(REGISTRY).unwrap();
        let defaults = defaults();
        let result = HealthChecker::new(&registry, &defaults)
            .check_health("ohlcv_daily", &ArtifactStats::default(), now())
            .unwrap();

        assert!(!result.freshness_ok);
        assert!(!result.row_count_ok);
        assert!(result.null_ratio_ok);

        let codes: Vec<_> = result
            .to_diagnostics(&SeverityThreshold::default())
            .into_iter()
            .map(|d| d.code)
            .collect();
        assert_eq!(codes, vec![DiagnosticCode::HealthStale, DiagnosticCode::HealthLowRowCount]);
    }

    #[test]
    fn unmeasured_column_limit_fails() {
        let thresholds = HealthThresholds {
            column_null_fractions: BTreeMap::from([("roe".to_string(), 0.1)]),
            ..HealthThresholds::default()
        };
        let result =
            HealthResult::evaluate("bank_metrics", thresholds, &ArtifactStats::default(), now());

        assert!(!result.null_ratio_ok);
        assert_eq!(
            result.null_violations,
            vec![NullRatioViolation {
                column: "roe".to_string(),
                fraction: None,
                limit: 0.1,
            }]
        );

        let diagnostics = result.to_diagnostics(&SeverityThreshold::default());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, DiagnosticCode::HealthNullRatio);
        assert_eq!(diagnostics[0].actual.as_deref(), Some("unknown"));
    }

    #[test]
    fn unset_thresholds_disable_checks() {
        let registry = load_from_str(REGISTRY).unwrap();
        let defaults = HealthThresholds::default();
        let result = HealthChecker::new(&registry, &defaults)
            .check_health("ohlcv_daily", &ArtifactStats::default(), now())
            .unwrap();
        assert!(result.is_healthy());
    }

    #[test]
    fn stats_parse_from_json() {
        let stats: ArtifactStats = serde_json::from_str(
            r#"{
                "modified": "2024-05-10T00:00:00Z",
                "row_count": 42,
                "null_fractions": {"roe": 0.25}
            }"#,
        )
        .unwrap();
        assert_eq!(stats.row_count, Some(42));
        assert_eq!(stats.null_fractions["roe"], 0.25);
        assert!(stats.modified.is_some());
    }

    #[test]
    fn unknown_source() {
        let registry = load_from_str(REGISTRY).unwrap();
        let defaults = defaults();
        assert!(HealthChecker::new(&registry, &defaults)
            .check_health("nope", &ArtifactStats::default(), now())
            .is_err());
    }
}
