//! Configuration schema (datamap.toml)

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use crate::diagnostic::{DiagnosticCode, Severity};
use crate::error::ConfigError;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "DATAMAP_CONFIG";

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "datamap.toml";

/// Severity threshold overrides for specific diagnostic codes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityThreshold {
    /// Map of diagnostic code to severity override
    #[serde(default)]
    pub overrides: HashMap<String, Severity>,
}

impl SeverityThreshold {
    /// Get severity for a diagnostic code, or default
    pub fn get_severity(&self, code: DiagnosticCode, default: Severity) -> Severity {
        self.overrides
            .get(code.as_str())
            .copied()
            .unwrap_or(default)
    }

    /// Set severity override for a code
    pub fn set_override(&mut self, code: DiagnosticCode, severity: Severity) {
        self.overrides.insert(code.as_str().to_string(), severity);
    }
}

/// Path resolver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Upper bound for a single existence check on the backing store
    #[serde(default = "default_existence_timeout_ms")]
    pub existence_timeout_ms: u64,
}

fn default_existence_timeout_ms() -> u64 {
    500
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            existence_timeout_ms: default_existence_timeout_ms(),
        }
    }
}

impl ResolverConfig {
    pub fn existence_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.existence_timeout_ms)
    }
}

/// Health thresholds for data artifacts
///
/// Unset fields disable the corresponding check. Used both as the global
/// default (`[health]` in datamap.toml) and as per-source overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Maximum artifact age
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_staleness_hours: Option<u64>,

    /// Minimum row count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rows: Option<u64>,

    /// Maximum null fraction for any column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_null_fraction: Option<f64>,

    /// Per-column null fraction limits, taking precedence over `max_null_fraction`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_null_fractions: BTreeMap<String, f64>,
}

impl HealthThresholds {
    /// Overlay `overrides` onto these thresholds, field by field
    pub fn merged_with(&self, overrides: Option<&HealthThresholds>) -> HealthThresholds {
        let Some(overrides) = overrides else {
            return self.clone();
        };

        let mut column_null_fractions = self.column_null_fractions.clone();
        column_null_fractions.extend(
            overrides
                .column_null_fractions
                .iter()
                .map(|(column, limit)| (column.clone(), *limit)),
        );

        HealthThresholds {
            max_staleness_hours: overrides.max_staleness_hours.or(self.max_staleness_hours),
            min_rows: overrides.min_rows.or(self.min_rows),
            max_null_fraction: overrides.max_null_fraction.or(self.max_null_fraction),
            column_null_fractions,
        }
    }

    /// Null fraction limit applying to a column
    pub fn null_limit_for(&self, column: &str) -> Option<f64> {
        self.column_null_fractions
            .get(column)
            .copied()
            .or(self.max_null_fraction)
    }
}

/// Registry vs filesystem reconciliation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Directories (relative to `data_root`) scanned for artifacts
    #[serde(default = "default_scan_dirs")]
    pub scan_dirs: Vec<String>,

    /// Glob patterns of paths never reported as unregistered
    #[serde(default)]
    pub ignore: Vec<String>,
}

fn default_scan_dirs() -> Vec<String> {
    vec!["DATA".to_string()]
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            scan_dirs: default_scan_dirs(),
            ignore: Vec::new(),
        }
    }
}

impl AuditConfig {
    /// Compile the ignore patterns
    ///
    /// `*` also matches across `/`, so `*.tmp` ignores temp files at any depth.
    pub fn ignore_set(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.ignore {
            let glob = Glob::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.kind().to_string(),
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|e| ConfigError::InvalidPattern {
            pattern: e.glob().unwrap_or_default().to_string(),
            message: e.kind().to_string(),
        })
    }

    /// Check if a (data_root relative) path matches an ignore pattern
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignore_set().is_ok_and(|set| set.is_match(path))
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Registry documents (YAML or JSON), loaded in order
    #[serde(default)]
    pub documents: Vec<PathBuf>,

    /// Base directory relative source locations resolve against
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Path resolver settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Default health thresholds
    #[serde(default)]
    pub health: HealthThresholds,

    /// Audit settings
    #[serde(default)]
    pub audit: AuditConfig,

    /// Severity thresholds
    #[serde(default)]
    pub severity: SeverityThreshold,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

fn default_data_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            data_root: default_data_root(),
            resolver: ResolverConfig::default(),
            health: HealthThresholds::default(),
            audit: AuditConfig::default(),
            severity: SeverityThreshold::default(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.audit.ignore_set()?;
        config.project_root = std::env::current_dir().unwrap_or_default();
        Ok(config)
    }

    /// Locate the config: `$DATAMAP_CONFIG`, then `./datamap.toml`, then defaults
    pub fn discover() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            return Self::from_file(default_path);
        }

        Ok(Self::default())
    }

    /// Registry document paths, relative entries resolved against the project root
    pub fn document_paths(&self) -> Vec<PathBuf> {
        self.documents
            .iter()
            .map(|doc| self.resolve_path(doc))
            .collect()
    }

    /// Absolute (or project-root based) data root
    pub fn data_root_path(&self) -> PathBuf {
        self.resolve_path(&self.data_root)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}
