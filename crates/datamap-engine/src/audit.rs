//! Registry vs filesystem reconciliation
//!
//! Scans the configured data directories and sorts what it finds into three
//! sets: sources registered and present, sources registered but missing, and
//! artifacts present but matching no registered location.

use datamap_core::{
    AuditConfig, ConfigError, Diagnostic, DiagnosticCode, Report, Severity, SeverityThreshold,
};
use datamap_registry::{
    ArtifactStore, DependencyResolver, GraphError, LocalStore, LocationPattern, PathResolver,
    Registry, ResolveOptions, TemplateParams, DEFAULT_EXISTENCE_TIMEOUT,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

/// List artifact files under the configured scan directories
///
/// Paths are relative to `data_root`, use forward slashes and come back
/// sorted. Hidden files and directories and ignored paths are skipped.
pub fn scan_data_dirs(data_root: &Path, audit: &AuditConfig) -> Result<Vec<String>, ConfigError> {
    let ignore = audit.ignore_set()?;
    let mut paths = Vec::new();

    for dir in &audit.scan_dirs {
        let root = data_root.join(dir);
        if !root.is_dir() {
            tracing::debug!(dir = %root.display(), "scan directory does not exist");
            continue;
        }

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(data_root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if ignore.is_match(&relative) {
                tracing::debug!(path = %relative, "ignored artifact");
                continue;
            }
            paths.push(relative);
        }
    }

    paths.sort();
    paths.dedup();
    Ok(paths)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

/// Outcome of reconciling a registry against actual artifacts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    /// Sources with at least one artifact, declaration order
    pub registered_present: Vec<String>,

    /// Sources with no artifact, declaration order
    pub registered_missing: Vec<String>,

    /// Artifacts matching no source location, input order
    pub unregistered: Vec<String>,

    /// Sources with no producer and no consumer
    pub orphans: Vec<String>,

    /// Source -> matching artifact paths
    pub artifacts: BTreeMap<String, Vec<String>>,
}

impl AuditReport {
    pub fn has_missing(&self) -> bool {
        !self.registered_missing.is_empty()
    }
}

/// Reconciles a registry snapshot against artifacts on disk
pub struct Auditor<'a> {
    registry: &'a Registry,
    resolver: DependencyResolver,
    store: Arc<dyn ArtifactStore>,
    existence_timeout: Duration,
}

impl<'a> Auditor<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            resolver: DependencyResolver::new(registry),
            store: Arc::new(LocalStore),
            existence_timeout: DEFAULT_EXISTENCE_TIMEOUT,
        }
    }

    /// Store answering existence checks for fixed locations
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    /// Bound on each existence check for fixed locations
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.existence_timeout = timeout;
        self
    }

    /// Sort registered sources and actual artifact paths into the three sets
    ///
    /// `actual_paths` are relative to the registry's data root. A source with
    /// a fixed location outside the scanned paths counts as present if the
    /// file exists.
    pub fn reconcile<I, P>(&self, actual_paths: I) -> AuditReport
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let actual: Vec<String> = actual_paths
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();
        let data_root = self.registry.data_root();

        let mut report = AuditReport::default();

        for pattern in self.resolver.patterns() {
            let matched: Vec<String> = actual
                .iter()
                .filter(|path| matches_either(pattern, path, data_root))
                .cloned()
                .collect();

            let present =
                !matched.is_empty() || (pattern.is_literal() && self.literal_exists(pattern));
            let name = pattern.source_name().to_string();
            if present {
                report.registered_present.push(name.clone());
                report.artifacts.insert(name, matched);
            } else {
                report.registered_missing.push(name);
            }
        }

        let patterns = self.resolver.patterns();
        let mut seen = std::collections::HashSet::new();
        for path in &actual {
            let registered = patterns.iter().any(|p| matches_either(p, path, data_root));
            if !registered && seen.insert(path.as_str()) {
                report.unregistered.push(path.clone());
            }
        }

        report.orphans = self.resolver.find_orphans();

        tracing::info!(
            present = report.registered_present.len(),
            missing = report.registered_missing.len(),
            unregistered = report.unregistered.len(),
            orphans = report.orphans.len(),
            "audit reconciled"
        );

        report
    }

    /// Scan the configured directories and reconcile
    pub fn audit(&self, config: &AuditConfig) -> Result<AuditReport, ConfigError> {
        let paths = scan_data_dirs(self.registry.data_root(), config)?;
        Ok(self.reconcile(paths))
    }

    fn literal_exists(&self, pattern: &LocationPattern) -> bool {
        PathResolver::new(self.registry)
            .with_store(Arc::clone(&self.store))
            .with_timeout(self.existence_timeout)
            .resolve_with(
                pattern.source_name(),
                &TemplateParams::new(),
                &ResolveOptions::must_exist(),
            )
            .is_ok()
    }

    /// Audit findings as a report stamped with the registry fingerprint
    pub fn to_report(&self, audit: &AuditReport, severity: &SeverityThreshold) -> Report {
        let mut report = Report::new().with_fingerprint(self.registry.fingerprint());

        for source in &audit.registered_missing {
            let location = self
                .registry
                .get_source(source)
                .map(|s| s.location.clone())
                .unwrap_or_default();
            let mut message = format!(
                "Source '{}' is registered but no artifact exists at '{}'",
                source, location
            );
            let impact = match self.resolver.get_impact_chain(source) {
                Ok(impact) => impact,
                Err(err @ GraphError::CyclicDependency { .. }) => {
                    message.push_str(&format!(" (impact unknown: {})", err));
                    Vec::new()
                }
                Err(GraphError::Lookup(_)) => Vec::new(),
            };

            report.add_diagnostic(
                Diagnostic::new(
                    DiagnosticCode::AuditMissingArtifact,
                    severity.get_severity(DiagnosticCode::AuditMissingArtifact, Severity::Error),
                    message,
                )
                .with_source(source)
                .with_path(location)
                .with_impact(impact),
            );
        }

        for path in &audit.unregistered {
            report.add_diagnostic(
                Diagnostic::new(
                    DiagnosticCode::AuditUnregisteredArtifact,
                    severity
                        .get_severity(DiagnosticCode::AuditUnregisteredArtifact, Severity::Warn),
                    format!("Artifact '{}' matches no registered source", path),
                )
                .with_path(path),
            );
        }

        for source in &audit.orphans {
            report.add_diagnostic(
                Diagnostic::new(
                    DiagnosticCode::AuditOrphanSource,
                    severity.get_severity(DiagnosticCode::AuditOrphanSource, Severity::Warn),
                    format!("Source '{}' has no producer and no consumer", source),
                )
                .with_source(source),
            );
        }

        report.summary.sources_checked = self.registry.sources().len();
        report.with_metadata(serde_json::json!({
            "registered_present": audit.registered_present,
            "registered_missing": audit.registered_missing,
            "unregistered": audit.unregistered,
        }))
    }
}

fn matches_either(pattern: &LocationPattern, relative: &str, data_root: &Path) -> bool {
    pattern.matches(relative) || pattern.matches(&data_root.join(relative).to_string_lossy())
}
