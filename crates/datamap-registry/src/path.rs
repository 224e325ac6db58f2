//! Path resolution for data sources
//!
//! Locations are templates with `{placeholder}` markers, e.g.
//! `DATA/processed/ohlcv/{date}.parquet`. The resolver fills them from caller
//! parameters and, on request, checks the artifact on the backing store.

use crate::registry::Registry;
use chrono::{DateTime, Utc};
use datamap_core::LookupError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// Template parameters, placeholder name -> value
pub type TemplateParams = BTreeMap<String, String>;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Default bound for a single existence check
pub const DEFAULT_EXISTENCE_TIMEOUT: Duration = Duration::from_millis(500);

/// Path resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("location '{template}' of source '{source_name}' has unresolved placeholders: {}", .missing.join(", "))]
    UnresolvedTemplate {
        source_name: String,
        template: String,
        missing: Vec<String>,
    },

    #[error("artifact for source '{source_name}' missing at {}: {reason}", .path.display())]
    MissingArtifact {
        source_name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("artifact for source '{source_name}' at {} is stale: {}s old, limit {}s", .path.display(), .age.as_secs(), .max_age.as_secs())]
    StaleArtifact {
        source_name: String,
        path: PathBuf,
        age: Duration,
        max_age: Duration,
    },
}

/// Placeholder names of a location template, in order of first appearance
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for capture in PLACEHOLDER.captures_iter(template) {
        if let Some(name) = capture.get(1).map(|m| m.as_str()) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Fill a template; on failure returns every placeholder without a value
pub fn fill_template(template: &str, params: &TemplateParams) -> Result<String, Vec<String>> {
    let missing: Vec<String> = placeholders(template)
        .into_iter()
        .filter(|name| !params.contains_key(*name))
        .map(str::to_string)
        .collect();

    if !missing.is_empty() {
        return Err(missing);
    }

    Ok(PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            params.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

/// Normalize a path for template matching: forward slashes, no leading `./`
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut trimmed = unified.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.to_string()
}

/// A location template compiled for matching actual paths
///
/// Each placeholder matches exactly one path segment.
#[derive(Debug, Clone)]
pub struct LocationPattern {
    source_name: String,
    template: String,
    regex: Regex,
}

impl LocationPattern {
    pub fn compile(source_name: &str, template: &str) -> Result<Self, regex::Error> {
        let normalized = normalize(template);
        let mut pattern = String::from("^");
        let mut last = 0;
        for m in PLACEHOLDER.find_iter(&normalized) {
            pattern.push_str(&regex::escape(&normalized[last..m.start()]));
            pattern.push_str("[^/]+");
            last = m.end();
        }
        pattern.push_str(&regex::escape(&normalized[last..]));
        pattern.push('$');

        Ok(Self {
            source_name: source_name.to_string(),
            template: normalized,
            regex: Regex::new(&pattern)?,
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Whether the template has no placeholders
    pub fn is_literal(&self) -> bool {
        !PLACEHOLDER.is_match(&self.template)
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(&normalize(path))
    }
}

/// What the backing store knows about an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMeta {
    /// Last modification time, if the store reports one
    pub modified: Option<DateTime<Utc>>,
}

/// Backing store for data artifacts
pub trait ArtifactStore: Send + Sync {
    /// Store name for logs (e.g. "local")
    fn name(&self) -> &'static str;

    /// Metadata for the artifact at `path`, `None` if it does not exist
    fn stat(&self, path: &Path) -> std::io::Result<Option<ArtifactMeta>>;
}

/// Local filesystem store
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStore;

impl ArtifactStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    fn stat(&self, path: &Path) -> std::io::Result<Option<ArtifactMeta>> {
        match std::fs::metadata(path) {
            Ok(metadata) => Ok(Some(ArtifactMeta {
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Options for [`PathResolver::resolve_with`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Fail with `MissingArtifact` unless the artifact exists
    pub must_exist: bool,

    /// Fail with `StaleArtifact` if the artifact is older than this
    pub max_age: Option<Duration>,
}

impl ResolveOptions {
    pub fn must_exist() -> Self {
        Self {
            must_exist: true,
            max_age: None,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

/// Resolves source names to concrete locations
pub struct PathResolver<'a> {
    registry: &'a Registry,
    store: Arc<dyn ArtifactStore>,
    timeout: Duration,
}

impl<'a> PathResolver<'a> {
    /// Resolver over the local filesystem
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            store: Arc::new(LocalStore),
            timeout: DEFAULT_EXISTENCE_TIMEOUT,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    /// Bound for each existence check
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fill the source's location template, joining relative results onto the data root
    pub fn resolve(
        &self,
        source_name: &str,
        params: &TemplateParams,
    ) -> Result<PathBuf, PathError> {
        let source = self.registry.get_source(source_name)?;

        let filled = fill_template(&source.location, params).map_err(|missing| {
            PathError::UnresolvedTemplate {
                source_name: source_name.to_string(),
                template: source.location.clone(),
                missing,
            }
        })?;

        let path = PathBuf::from(filled);
        let resolved = if path.is_absolute() {
            path
        } else {
            self.registry.data_root().join(path)
        };

        tracing::debug!(source = source_name, path = %resolved.display(), "resolved data path");
        Ok(resolved)
    }

    /// Resolve and apply existence/staleness checks
    pub fn resolve_with(
        &self,
        source_name: &str,
        params: &TemplateParams,
        options: &ResolveOptions,
    ) -> Result<PathBuf, PathError> {
        let path = self.resolve(source_name, params)?;
        if !options.must_exist && options.max_age.is_none() {
            return Ok(path);
        }

        let missing = |reason: String| PathError::MissingArtifact {
            source_name: source_name.to_string(),
            path: path.clone(),
            reason,
        };

        let meta = match self.stat_bounded(&path) {
            Ok(Some(meta)) => meta,
            Ok(None) if options.must_exist => return Err(missing("no such artifact".to_string())),
            Ok(None) => return Ok(path),
            Err(reason) => return Err(missing(reason)),
        };

        if let (Some(max_age), Some(modified)) = (options.max_age, meta.modified) {
            let age = (Utc::now() - modified).to_std().unwrap_or_default();
            if age > max_age {
                return Err(PathError::StaleArtifact {
                    source_name: source_name.to_string(),
                    path,
                    age,
                    max_age,
                });
            }
        }

        Ok(path)
    }

    /// Stat on a helper thread so a hung mount cannot block the caller
    fn stat_bounded(&self, path: &Path) -> Result<Option<ArtifactMeta>, String> {
        let (tx, rx) = mpsc::channel();
        let store = Arc::clone(&self.store);
        let target = path.to_path_buf();

        std::thread::spawn(move || {
            // The receiver may have given up already
            let _ = tx.send(store.stat(&target));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => {
                tracing::warn!(
                    store = self.store.name(),
                    path = %path.display(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "existence check timed out"
                );
                Err(format!(
                    "existence check timed out after {}ms",
                    self.timeout.as_millis()
                ))
            }
        }
    }
}

/// Build template params from `key=value` pairs
pub fn params<I, K, V>(pairs: I) -> TemplateParams
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::RegistryLoader;
    use crate::document::DocumentFormat;
    use pretty_assertions::assert_eq;

    fn registry(data_root: &Path) -> Registry {
        let mut loader = RegistryLoader::new().with_data_root(data_root);
        loader.add_str(
            "test.yaml",
            r#"
sources:
  ohlcv_daily:
    location: DATA/processed/ohlcv/{symbol}/{date}.parquet
    format: parquet
  universe:
    location: DATA/reference/universe.csv
    format: csv
  absolute:
    location: /srv/exports/{date}.json
    format: json
"#,
            DocumentFormat::Yaml,
        );
        loader.build().unwrap()
    }

    /// Store returning a fixed answer, optionally after a delay
    struct FixedStore {
        meta: Option<ArtifactMeta>,
        delay: Duration,
    }

    impl ArtifactStore for FixedStore {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn stat(&self, _path: &Path) -> std::io::Result<Option<ArtifactMeta>> {
            std::thread::sleep(self.delay);
            Ok(self.meta.clone())
        }
    }

    #[test]
    fn fills_template_and_joins_data_root() {
        let registry = registry(Path::new("/data"));
        let resolver = PathResolver::new(&registry);

        let path = resolver
            .resolve("ohlcv_daily", &params([("symbol", "VCB"), ("date", "2024-05-01")]))
            .unwrap();
        assert_eq!(path, PathBuf::from("/data/DATA/processed/ohlcv/VCB/2024-05-01.parquet"));

        let absolute = resolver.resolve("absolute", &params([("date", "d1")])).unwrap();
        assert_eq!(absolute, PathBuf::from("/srv/exports/d1.json"));
    }

    #[test]
    fn missing_placeholders_are_all_reported() {
        let registry = registry(Path::new("."));
        let err = PathResolver::new(&registry)
            .resolve("ohlcv_daily", &TemplateParams::new())
            .unwrap_err();

        assert_eq!(
            err,
            PathError::UnresolvedTemplate {
                source_name: "ohlcv_daily".to_string(),
                template: "DATA/processed/ohlcv/{symbol}/{date}.parquet".to_string(),
                missing: vec!["symbol".to_string(), "date".to_string()],
            }
        );
    }

    #[test]
    fn unknown_source_is_a_lookup_error() {
        let registry = registry(Path::new("."));
        let err = PathResolver::new(&registry)
            .resolve("nope", &TemplateParams::new())
            .unwrap_err();
        assert!(matches!(err, PathError::Lookup(LookupError::NotFound { .. })));
    }

    #[test]
    fn must_exist_on_local_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let resolver = PathResolver::new(&registry);

        let err = resolver
            .resolve_with("universe", &TemplateParams::new(), &ResolveOptions::must_exist())
            .unwrap_err();
        match err {
            PathError::MissingArtifact { path, .. } => {
                assert_eq!(path, dir.path().join("DATA/reference/universe.csv"))
            }
            other => panic!("expected MissingArtifact, got {other:?}"),
        }

        std::fs::create_dir_all(dir.path().join("DATA/reference")).unwrap();
        std::fs::write(dir.path().join("DATA/reference/universe.csv"), "symbol\nVCB\n").unwrap();
        let path = resolver
            .resolve_with("universe", &TemplateParams::new(), &ResolveOptions::must_exist())
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn slow_store_times_out_as_missing_artifact() {
        let registry = registry(Path::new("."));
        let resolver = PathResolver::new(&registry)
            .with_store(Arc::new(FixedStore {
                meta: Some(ArtifactMeta { modified: None }),
                delay: Duration::from_millis(300),
            }))
            .with_timeout(Duration::from_millis(20));

        let err = resolver
            .resolve_with("universe", &TemplateParams::new(), &ResolveOptions::must_exist())
            .unwrap_err();
        assert!(matches!(
            err,
            PathError::MissingArtifact { ref reason, .. } if reason.contains("timed out")
        ));
    }

    #[test]
    fn stale_artifact_is_reported() {
        let registry = registry(Path::new("."));
        let old = Utc::now() - chrono::Duration::hours(30);
        let resolver = PathResolver::new(&registry).with_store(Arc::new(FixedStore {
            meta: Some(ArtifactMeta { modified: Some(old) }),
            delay: Duration::ZERO,
        }));

        let options = ResolveOptions::must_exist().with_max_age(Duration::from_secs(24 * 3600));
        let err = resolver
            .resolve_with("universe", &TemplateParams::new(), &options)
            .unwrap_err();
        assert!(matches!(err, PathError::StaleArtifact { .. }));

        let relaxed = ResolveOptions::must_exist().with_max_age(Duration::from_secs(48 * 3600));
        assert!(resolver.resolve_with("universe", &TemplateParams::new(), &relaxed).is_ok());
    }

    #[test]
    fn location_pattern_matching() {
        let pattern =
            LocationPattern::compile("ohlcv", "./DATA/processed/ohlcv/{symbol}/{date}.parquet")
                .unwrap();
        assert!(!pattern.is_literal());
        assert!(pattern.matches("DATA/processed/ohlcv/VCB/2024-05-01.parquet"));
        assert!(pattern.matches("DATA\\processed\\ohlcv\\VCB\\2024-05-01.parquet"));
        assert!(!pattern.matches("DATA/processed/ohlcv/VCB/extra/2024-05-01.parquet"));
        assert!(!pattern.matches("DATA/processed/ohlcv/VCB/2024-05-01.csv"));

        let literal = LocationPattern::compile("u", "DATA/reference/universe(v1).csv").unwrap();
        assert!(literal.is_literal());
        assert!(literal.matches("./DATA/reference/universe(v1).csv"));
    }

    #[test]
    fn placeholder_listing_is_ordered_and_unique() {
        assert_eq!(placeholders("{a}/{b}/{a}.parquet"), vec!["a", "b"]);
        assert!(placeholders("plain/path.csv").is_empty());
    }
}
