//! Configuration loader
//!
//! Parses registry documents, links them into a [`Registry`] and validates the
//! declarative metadata. Validation never stops at the first problem: every
//! violation found across all documents is returned in one [`ConfigError`].

use crate::document::{
    DashboardDecl, DocumentFormat, PipelineDecl, RegistryDocument, SchemaDecl, ServiceDecl,
    SourceDecl, SUPPORTED_VERSION,
};
use crate::registry::Registry;
use datamap_core::{
    Config, ConfigError, ConfigViolation, DashboardBinding, DataSource, EntityKind,
    PipelineOutput, Schema, ServiceBinding,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Collects registry documents and links them into a [`Registry`]
#[derive(Debug, Default)]
pub struct RegistryLoader {
    documents: Vec<(String, RegistryDocument)>,
    violations: Vec<ConfigViolation>,
    data_root: Option<PathBuf>,
}

impl RegistryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base directory for relative source locations
    pub fn with_data_root(mut self, data_root: impl Into<PathBuf>) -> Self {
        self.data_root = Some(data_root.into());
        self
    }

    /// Add a document from text; `label` names it in violation messages
    pub fn add_str(&mut self, label: &str, contents: &str, format: DocumentFormat) -> &mut Self {
        match RegistryDocument::parse(contents, format) {
            Ok(document) => self.documents.push((label.to_string(), document)),
            Err(message) => self.violations.push(ConfigViolation::Parse {
                document: label.to_string(),
                message,
            }),
        }
        self
    }

    /// Add a document from a file (format picked by extension)
    pub fn add_file(&mut self, path: &Path) -> &mut Self {
        let label = path.display().to_string();
        match std::fs::read_to_string(path) {
            Ok(contents) => self.add_str(&label, &contents, DocumentFormat::from_path(path)),
            Err(e) => {
                self.violations.push(ConfigViolation::Unreadable {
                    document: label,
                    message: e.to_string(),
                });
                self
            }
        }
    }

    /// Link and validate all added documents
    pub fn build(self) -> Result<Registry, ConfigError> {
        let RegistryLoader {
            documents,
            violations,
            data_root,
        } = self;

        let mut linker = Linker {
            violations,
            ..Linker::default()
        };

        for (label, document) in &documents {
            linker.collect(label, document);
        }
        linker.validate();

        if !linker.violations.is_empty() {
            for violation in &linker.violations {
                tracing::warn!(%violation, "registry configuration violation");
            }
            return Err(ConfigError::Invalid(linker.violations));
        }

        let registry = Registry::from_parts(
            linker.sources,
            linker.pipelines,
            linker.services,
            linker.dashboards,
            linker.schemas,
        )
        .with_data_root(data_root.unwrap_or_else(|| PathBuf::from(".")));

        tracing::info!(
            sources = registry.sources().len(),
            pipelines = registry.pipelines().len(),
            services = registry.services().len(),
            dashboards = registry.dashboards().len(),
            fingerprint = registry.fingerprint(),
            "registry loaded"
        );

        Ok(registry)
    }
}

/// Load and link registry documents from files
pub fn load_documents(paths: &[PathBuf]) -> Result<Registry, ConfigError> {
    let mut loader = RegistryLoader::new();
    for path in paths {
        loader.add_file(path);
    }
    loader.build()
}

/// Load the registry named by a tool configuration
pub fn load_from_config(config: &Config) -> Result<Registry, ConfigError> {
    let mut loader = RegistryLoader::new().with_data_root(config.data_root_path());
    for path in config.document_paths() {
        tracing::debug!(document = %path.display(), "loading registry document");
        loader.add_file(&path);
    }
    loader.build()
}

/// Load a registry from a single in-memory YAML document
pub fn load_from_str(yaml: &str) -> Result<Registry, ConfigError> {
    let mut loader = RegistryLoader::new();
    loader.add_str("<inline>", yaml, DocumentFormat::Yaml);
    loader.build()
}

/// Accumulates entities across documents, then checks references
#[derive(Default)]
struct Linker {
    violations: Vec<ConfigViolation>,

    sources: Vec<DataSource>,
    pipelines: Vec<PipelineOutput>,
    services: Vec<ServiceBinding>,
    dashboards: Vec<DashboardBinding>,
    schemas: Vec<Schema>,

    source_names: HashSet<String>,
    schema_names: HashSet<String>,

    /// Pipelines, services and dashboards share one namespace
    consumer_names: HashMap<String, EntityKind>,
}

/// Deduplicate a reference list, keeping first occurrences
fn ordered_set(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Linker {
    fn collect(&mut self, label: &str, document: &RegistryDocument) {
        if let Some(version) = document.version {
            if version != SUPPORTED_VERSION {
                self.violations.push(ConfigViolation::UnsupportedVersion {
                    document: label.to_string(),
                    version,
                });
                return;
            }
        }

        if let Some(sources) = &document.sources {
            for (name, decl) in sources.iter() {
                self.add_source(label, name, decl);
            }
        }
        if let Some(schemas) = &document.schemas {
            for (name, decl) in schemas.iter() {
                self.add_schema(label, name, decl);
            }
        }
        if let Some(pipelines) = &document.pipelines {
            for (name, decl) in pipelines.iter() {
                self.add_pipeline(label, name, decl);
            }
        }
        if let Some(services) = &document.services {
            for (name, decl) in services.iter() {
                self.add_service(label, name, decl);
            }
        }
        if let Some(dashboards) = &document.dashboards {
            for (name, decl) in dashboards.iter() {
                self.add_dashboard(label, name, decl);
            }
        }
    }

    fn add_source(&mut self, label: &str, name: &str, decl: &SourceDecl) {
        if !self.source_names.insert(name.to_string()) {
            self.violations.push(ConfigViolation::DuplicateName {
                kind: EntityKind::Source,
                name: name.to_string(),
                document: label.to_string(),
            });
            return;
        }

        let location = non_empty(&decl.location);
        let format = non_empty(&decl.format);
        for (field, value) in [("location", location), ("format", format)] {
            if value.is_none() {
                self.violations.push(ConfigViolation::MissingField {
                    kind: EntityKind::Source,
                    name: name.to_string(),
                    field,
                });
            }
        }

        self.sources.push(DataSource {
            name: name.to_string(),
            category: decl.category.clone().unwrap_or_default(),
            location: location.unwrap_or_default().to_string(),
            format: format.unwrap_or_default().to_string(),
            schema_ref: decl.schema_ref.clone(),
            producing_pipeline: decl.producing_pipeline.clone(),
            description: decl.description.clone(),
            health: decl.health.clone(),
        });
    }

    fn add_schema(&mut self, label: &str, name: &str, decl: &SchemaDecl) {
        if !self.schema_names.insert(name.to_string()) {
            self.violations.push(ConfigViolation::DuplicateName {
                kind: EntityKind::Schema,
                name: name.to_string(),
                document: label.to_string(),
            });
            return;
        }
        self.schemas.push(Schema::from_columns(name, decl.columns.clone()));
    }

    /// Claim a consumer name; false if it is already taken
    fn claim_consumer(&mut self, label: &str, name: &str, kind: EntityKind) -> bool {
        match self.consumer_names.get(name) {
            None => {
                self.consumer_names.insert(name.to_string(), kind);
                true
            }
            Some(&existing) if existing == kind => {
                self.violations.push(ConfigViolation::DuplicateName {
                    kind,
                    name: name.to_string(),
                    document: label.to_string(),
                });
                false
            }
            Some(&existing) => {
                self.violations.push(ConfigViolation::ConsumerNameCollision {
                    name: name.to_string(),
                    first: existing,
                    second: kind,
                });
                false
            }
        }
    }

    fn add_pipeline(&mut self, label: &str, name: &str, decl: &PipelineDecl) {
        if self.claim_consumer(label, name, EntityKind::Pipeline) {
            self.pipelines.push(PipelineOutput {
                pipeline_name: name.to_string(),
                produces: ordered_set(&decl.produces),
                inputs: ordered_set(&decl.inputs),
            });
        }
    }

    fn add_service(&mut self, label: &str, name: &str, decl: &ServiceDecl) {
        if self.claim_consumer(label, name, EntityKind::Service) {
            self.services.push(ServiceBinding {
                service_name: name.to_string(),
                consumes: ordered_set(&decl.consumes),
            });
        }
    }

    fn add_dashboard(&mut self, label: &str, name: &str, decl: &DashboardDecl) {
        if self.claim_consumer(label, name, EntityKind::Dashboard) {
            self.dashboards.push(DashboardBinding {
                dashboard_name: name.to_string(),
                consumes: ordered_set(&decl.consumes),
                services: ordered_set(&decl.services),
            });
        }
    }

    fn check_references<'a>(
        &self,
        kind: EntityKind,
        owner: &str,
        field: &'static str,
        target_kind: EntityKind,
        targets: impl IntoIterator<Item = &'a String>,
        exists: impl Fn(&str) -> bool,
    ) -> Vec<ConfigViolation> {
        targets
            .into_iter()
            .filter(|target| !exists(target.as_str()))
            .map(|target| ConfigViolation::DanglingReference {
                kind,
                owner: owner.to_string(),
                field,
                target_kind,
                target: target.clone(),
            })
            .collect()
    }

    /// Cross-entity checks, run once every document is collected
    fn validate(&mut self) {
        let mut found = Vec::new();
        let is_source = |name: &str| self.source_names.contains(name);

        for pipeline in &self.pipelines {
            let owner = &pipeline.pipeline_name;
            found.extend(self.check_references(
                EntityKind::Pipeline,
                owner,
                "produces",
                EntityKind::Source,
                &pipeline.produces,
                is_source,
            ));
            found.extend(self.check_references(
                EntityKind::Pipeline,
                owner,
                "inputs",
                EntityKind::Source,
                &pipeline.inputs,
                is_source,
            ));
        }

        for service in &self.services {
            found.extend(self.check_references(
                EntityKind::Service,
                &service.service_name,
                "consumes",
                EntityKind::Source,
                &service.consumes,
                is_source,
            ));
        }

        let is_service = |name: &str| self.consumer_names.get(name) == Some(&EntityKind::Service);
        for dashboard in &self.dashboards {
            let owner = &dashboard.dashboard_name;
            found.extend(self.check_references(
                EntityKind::Dashboard,
                owner,
                "consumes",
                EntityKind::Source,
                &dashboard.consumes,
                is_source,
            ));
            found.extend(self.check_references(
                EntityKind::Dashboard,
                owner,
                "services",
                EntityKind::Service,
                &dashboard.services,
                is_service,
            ));
        }

        let is_schema = |name: &str| self.schema_names.contains(name);
        for source in &self.sources {
            found.extend(self.check_references(
                EntityKind::Source,
                &source.name,
                "schema_ref",
                EntityKind::Schema,
                source.schema_ref.iter(),
                is_schema,
            ));
        }

        // Single-producer invariant
        let mut producers: HashMap<&str, Vec<String>> = HashMap::new();
        for pipeline in &self.pipelines {
            for produced in &pipeline.produces {
                producers
                    .entry(produced.as_str())
                    .or_default()
                    .push(pipeline.pipeline_name.clone());
            }
        }

        let mut resolved_producers = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let pipelines = producers.get(source.name.as_str());
            if let Some(pipelines) = pipelines.filter(|p| p.len() > 1) {
                found.push(ConfigViolation::MultipleProducers {
                    source_name: source.name.clone(),
                    pipelines: pipelines.clone(),
                });
            }

            let actual = pipelines.and_then(|p| p.first()).cloned();
            if let Some(declared) = &source.producing_pipeline {
                if actual.as_ref() != Some(declared) {
                    found.push(ConfigViolation::ProducerMismatch {
                        source_name: source.name.clone(),
                        declared: declared.clone(),
                        actual: actual.clone(),
                    });
                }
            }
            resolved_producers.push(actual);
        }

        for (source, producer) in self.sources.iter_mut().zip(resolved_producers) {
            source.producing_pipeline = producer;
        }

        self.violations.extend(found);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn violations(yaml: &str) -> Vec<ConfigViolation> {
        match load_from_str(yaml) {
            Ok(_) => panic!("expected configuration to be rejected"),
            Err(err) => err.violations().to_vec(),
        }
    }

    #[test]
    fn every_declared_source_is_retrievable() {
        let registry = load_from_str(
            r#"
sources:
  a: { location: DATA/a.parquet, format: parquet }
  b: { location: DATA/b.parquet, format: parquet }
pipelines:
  p: { inputs: [a], produces: [b] }
services:
  s: { consumes: [b] }
"#,
        )
        .unwrap();

        for name in ["a", "b"] {
            assert_eq!(registry.get_source(name).unwrap().name, name);
        }
        assert_eq!(registry.get_source("b").unwrap().producing_pipeline.as_deref(), Some("p"));
        assert_eq!(registry.get_source("a").unwrap().producing_pipeline, None);
    }

    #[test]
    fn dangling_reference_names_the_missing_source() {
        let found = violations(
            r#"
sources:
  a: { location: DATA/a.parquet, format: parquet }
services:
  s: { consumes: [a, ghost] }
"#,
        );

        assert_eq!(
            found,
            vec![ConfigViolation::DanglingReference {
                kind: EntityKind::Service,
                owner: "s".to_string(),
                field: "consumes",
                target_kind: EntityKind::Source,
                target: "ghost".to_string(),
            }]
        );
    }

    #[test]
    fn two_producers_for_one_source_fail() {
        let found = violations(
            r#"
sources:
  a: { location: DATA/a.parquet, format: parquet }
pipelines:
  first: { produces: [a] }
  second: { produces: [a] }
"#,
        );

        assert_eq!(
            found,
            vec![ConfigViolation::MultipleProducers {
                source_name: "a".to_string(),
                pipelines: vec!["first".to_string(), "second".to_string()],
            }]
        );
    }

    #[test]
    fn all_violations_reported_in_one_pass() {
        let found = violations(
            r#"
sources:
  no_location: { format: parquet }
  blank_format: { location: DATA/x.csv, format: "  " }
  typed: { location: DATA/t.parquet, format: parquet, schema_ref: missing_schema }
pipelines:
  p: { produces: [nowhere] }
dashboards:
  d: { services: [ghost_service] }
"#,
        );

        assert_eq!(found.len(), 5, "{:#?}", found);
        assert!(found.contains(&ConfigViolation::MissingField {
            kind: EntityKind::Source,
            name: "no_location".to_string(),
            field: "location",
        }));
        assert!(found.contains(&ConfigViolation::MissingField {
            kind: EntityKind::Source,
            name: "blank_format".to_string(),
            field: "format",
        }));
        for missing in ["nowhere", "ghost_service", "missing_schema"] {
            assert!(found.iter().any(|v| matches!(
                v,
                ConfigViolation::DanglingReference { target, .. } if target == missing
            )));
        }
    }

    #[test]
    fn duplicate_names_within_and_across_documents() {
        let mut loader = RegistryLoader::new();
        loader.add_str(
            "one.yaml",
            "sources:\n  a: { location: x, format: csv }\n  a: { location: y, format: csv }\n",
            DocumentFormat::Yaml,
        );
        loader.add_str(
            "two.json",
            r#"{
                "sources": {"a": {"location": "z", "format": "csv"}},
                "services": {"a_service": {"consumes": ["a"]}}
            }"#,
            DocumentFormat::Json,
        );
        loader.add_str(
            "three.yaml",
            "dashboards:\n  a_service: { consumes: [a] }\n",
            DocumentFormat::Yaml,
        );

        let err = loader.build().unwrap_err();
        assert_eq!(
            err.violations(),
            &[
                ConfigViolation::DuplicateName {
                    kind: EntityKind::Source,
                    name: "a".to_string(),
                    document: "one.yaml".to_string(),
                },
                ConfigViolation::DuplicateName {
                    kind: EntityKind::Source,
                    name: "a".to_string(),
                    document: "two.json".to_string(),
                },
                ConfigViolation::ConsumerNameCollision {
                    name: "a_service".to_string(),
                    first: EntityKind::Service,
                    second: EntityKind::Dashboard,
                },
            ]
        );
    }

    #[test]
    fn declared_producer_must_match() {
        let found = violations(
            r#"
sources:
  a: { location: DATA/a.parquet, format: parquet, producing_pipeline: loader }
  b: { location: DATA/b.parquet, format: parquet, producing_pipeline: other }
pipelines:
  loader: { produces: [a, b] }
"#,
        );

        assert_eq!(
            found,
            vec![ConfigViolation::ProducerMismatch {
                source_name: "b".to_string(),
                declared: "other".to_string(),
                actual: Some("loader".to_string()),
            }]
        );
    }

    #[test]
    fn parse_and_version_errors_do_not_hide_other_violations() {
        let mut loader = RegistryLoader::new();
        loader.add_str("broken.yaml", "sources: [unclosed", DocumentFormat::Yaml);
        loader.add_str("future.yaml", "version: 2\nsources: {}\n", DocumentFormat::Yaml);
        loader.add_str("ok.yaml", "services:\n  s: { consumes: [ghost] }\n", DocumentFormat::Yaml);

        let err = loader.build().unwrap_err();
        let found = err.violations();
        assert_eq!(found.len(), 3);
        assert!(matches!(
            &found[0],
            ConfigViolation::Parse { document, .. } if document == "broken.yaml"
        ));
        assert_eq!(
            found[1],
            ConfigViolation::UnsupportedVersion {
                document: "future.yaml".to_string(),
                version: 2,
            }
        );
        assert!(matches!(
            &found[2],
            ConfigViolation::DanglingReference { target, .. } if target == "ghost"
        ));
    }

    #[test]
    fn repeated_references_are_collapsed() {
        let registry = load_from_str(
            "sources:\n  a: { location: x, format: csv }\nservices:\n  s: { consumes: [a, a] }\n",
        )
        .unwrap();
        assert_eq!(registry.get_service("s").unwrap().consumes, vec!["a".to_string()]);
    }

    #[test]
    fn load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let sources = dir.path().join("sources.yaml");
        let consumers = dir.path().join("consumers.json");
        std::fs::write(&sources, "sources:\n  a: { location: DATA/a.csv, format: csv }\n").unwrap();
        std::fs::write(&consumers, r#"{"services": {"s": {"consumes": ["a"]}}}"#).unwrap();

        let registry = load_documents(&[sources, consumers]).unwrap();
        assert_eq!(registry.get_sources_for_service("s").unwrap().len(), 1);

        let err = load_documents(&[dir.path().join("absent.yaml")]).unwrap_err();
        assert!(matches!(err.violations(), [ConfigViolation::Unreadable { .. }]));
    }
}
