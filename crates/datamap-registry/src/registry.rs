//! Immutable registry snapshot and name-based lookups

use datamap_core::{
    DashboardBinding, DataSource, EntityKind, LookupError, PipelineOutput, Schema,
    ServiceBinding,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// A validated, fully-linked set of registry entities
///
/// Only the loader constructs registries, so every reference between
/// entities is known to resolve. Entities are kept in declaration order.
#[derive(Debug, Clone, Serialize)]
pub struct Registry {
    sources: Vec<DataSource>,
    pipelines: Vec<PipelineOutput>,
    services: Vec<ServiceBinding>,
    dashboards: Vec<DashboardBinding>,
    schemas: Vec<Schema>,

    /// Base directory relative locations resolve against
    #[serde(skip)]
    data_root: PathBuf,

    #[serde(skip)]
    source_index: HashMap<String, usize>,
    #[serde(skip)]
    pipeline_index: HashMap<String, usize>,
    #[serde(skip)]
    service_index: HashMap<String, usize>,
    #[serde(skip)]
    dashboard_index: HashMap<String, usize>,
    #[serde(skip)]
    schema_index: HashMap<String, usize>,

    /// Source name -> index of its producing pipeline
    #[serde(skip)]
    producer_index: HashMap<String, usize>,

    #[serde(skip)]
    fingerprint: String,
}

fn index_by<T>(items: &[T], name: impl Fn(&T) -> &str) -> HashMap<String, usize> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| (name(item).to_string(), i))
        .collect()
}

impl Registry {
    pub(crate) fn from_parts(
        sources: Vec<DataSource>,
        pipelines: Vec<PipelineOutput>,
        services: Vec<ServiceBinding>,
        dashboards: Vec<DashboardBinding>,
        schemas: Vec<Schema>,
    ) -> Self {
        let mut producer_index = HashMap::new();
        for (i, pipeline) in pipelines.iter().enumerate() {
            for produced in &pipeline.produces {
                producer_index.entry(produced.clone()).or_insert(i);
            }
        }

        let mut registry = Self {
            source_index: index_by(&sources, |s| s.name.as_str()),
            pipeline_index: index_by(&pipelines, |p| p.pipeline_name.as_str()),
            service_index: index_by(&services, |s| s.service_name.as_str()),
            dashboard_index: index_by(&dashboards, |d| d.dashboard_name.as_str()),
            schema_index: index_by(&schemas, |s| s.name.as_str()),
            producer_index,
            sources,
            pipelines,
            services,
            dashboards,
            schemas,
            data_root: PathBuf::from("."),
            fingerprint: String::new(),
        };
        registry.fingerprint = registry.compute_fingerprint();
        registry
    }

    pub(crate) fn with_data_root(mut self, data_root: PathBuf) -> Self {
        self.data_root = data_root;
        self
    }

    fn compute_fingerprint(&self) -> String {
        // Serializing plain structs and vectors cannot fail
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    /// SHA-256 over the canonical JSON form of every entity
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Base directory relative source locations resolve against
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn sources(&self) -> &[DataSource] {
        &self.sources
    }

    pub fn pipelines(&self) -> &[PipelineOutput] {
        &self.pipelines
    }

    pub fn services(&self) -> &[ServiceBinding] {
        &self.services
    }

    pub fn dashboards(&self) -> &[DashboardBinding] {
        &self.dashboards
    }

    pub fn schemas(&self) -> &[Schema] {
        &self.schemas
    }

    /// Look up a data source by name
    pub fn get_source(&self, name: &str) -> Result<&DataSource, LookupError> {
        self.source_index
            .get(name)
            .map(|&i| &self.sources[i])
            .ok_or_else(|| LookupError::not_found(EntityKind::Source, name))
    }

    pub fn get_pipeline(&self, name: &str) -> Result<&PipelineOutput, LookupError> {
        self.pipeline_index
            .get(name)
            .map(|&i| &self.pipelines[i])
            .ok_or_else(|| LookupError::not_found(EntityKind::Pipeline, name))
    }

    pub fn get_service(&self, name: &str) -> Result<&ServiceBinding, LookupError> {
        self.service_index
            .get(name)
            .map(|&i| &self.services[i])
            .ok_or_else(|| LookupError::not_found(EntityKind::Service, name))
    }

    pub fn get_dashboard(&self, name: &str) -> Result<&DashboardBinding, LookupError> {
        self.dashboard_index
            .get(name)
            .map(|&i| &self.dashboards[i])
            .ok_or_else(|| LookupError::not_found(EntityKind::Dashboard, name))
    }

    pub fn get_schema(&self, name: &str) -> Result<&Schema, LookupError> {
        self.schema_index
            .get(name)
            .map(|&i| &self.schemas[i])
            .ok_or_else(|| LookupError::not_found(EntityKind::Schema, name))
    }

    /// Schema declared for a source via `schema_ref`
    pub fn schema_for_source(&self, source_name: &str) -> Result<&Schema, LookupError> {
        let source = self.get_source(source_name)?;
        let schema_ref = source
            .schema_ref
            .as_deref()
            .ok_or_else(|| LookupError::NoSchema(source_name.to_string()))?;
        self.get_schema(schema_ref)
    }

    /// Sources consumed by a service, in `consumes` order
    pub fn get_sources_for_service(
        &self,
        service_name: &str,
    ) -> Result<Vec<&DataSource>, LookupError> {
        let service = self.get_service(service_name)?;
        service
            .consumes
            .iter()
            .map(|name| self.get_source(name))
            .collect()
    }

    /// Sources a dashboard reads, directly or through its services
    ///
    /// The dashboard's own `consumes` come first, then each service's sources
    /// in service order. Duplicates keep their first position.
    pub fn get_sources_for_dashboard(
        &self,
        dashboard_name: &str,
    ) -> Result<Vec<&DataSource>, LookupError> {
        let dashboard = self.get_dashboard(dashboard_name)?;

        let mut seen = HashSet::new();
        let mut result = Vec::new();

        let mut names: Vec<&String> = dashboard.consumes.iter().collect();
        for service_name in &dashboard.services {
            names.extend(self.get_service(service_name)?.consumes.iter());
        }

        for name in names {
            if seen.insert(name.as_str()) {
                result.push(self.get_source(name)?);
            }
        }

        Ok(result)
    }

    /// The pipeline producing a source, if any
    pub fn get_pipeline_for_source(
        &self,
        source_name: &str,
    ) -> Result<Option<&PipelineOutput>, LookupError> {
        self.get_source(source_name)?;
        Ok(self
            .producer_index
            .get(source_name)
            .map(|&i| &self.pipelines[i]))
    }

    /// Kind of a pipeline, service or dashboard name
    ///
    /// Consumer names are unique across the three kinds.
    pub fn consumer_kind(&self, name: &str) -> Option<EntityKind> {
        if self.pipeline_index.contains_key(name) {
            Some(EntityKind::Pipeline)
        } else if self.service_index.contains_key(name) {
            Some(EntityKind::Service)
        } else if self.dashboard_index.contains_key(name) {
            Some(EntityKind::Dashboard)
        } else {
            None
        }
    }
}
