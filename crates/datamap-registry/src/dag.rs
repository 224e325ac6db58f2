//! Dependency graph construction and traversal
//!
//! Nodes are sources, pipelines, services and dashboards. Structural edges run
//! from producer to consumer:
//!
//! - source -> pipeline (pipeline input)
//! - pipeline -> source (pipeline output)
//! - source -> service, source -> dashboard
//! - service -> dashboard
//!
//! Impact queries walk these edges forward, dependency queries walk them
//! backward. Cycles are found once, when the resolver is built.

use crate::path::{normalize, LocationPattern};
use crate::registry::Registry;
use datamap_core::{EntityKind, LookupError};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

/// Index of a node in the graph
type NodeId = usize;

/// A graph node, as reported by [`DependencyResolver::topological_order`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GraphNode {
    pub kind: EntityKind,
    pub name: String,
}

impl std::fmt::Display for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Dependency query errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// Forward and backward reachability over a registry snapshot
///
/// The resolver copies what it needs out of the registry, so it does not
/// borrow the snapshot it was built from.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    nodes: Vec<GraphNode>,

    sources: HashMap<String, NodeId>,
    consumers: HashMap<String, NodeId>,

    /// Structural producer -> consumer edges, in declaration order
    downstream: Vec<Vec<NodeId>>,

    /// Structural consumer -> producer edges, in declaration order
    upstream: Vec<Vec<NodeId>>,

    /// Source -> producing pipeline
    producer: HashMap<NodeId, NodeId>,

    /// Pipeline -> sources it produces
    outputs: HashMap<NodeId, Vec<NodeId>>,

    /// Node -> index into `cycles`
    on_cycle: HashMap<NodeId, usize>,
    cycles: Vec<Vec<NodeId>>,

    patterns: Vec<LocationPattern>,
}

impl DependencyResolver {
    /// Build the graph for a registry snapshot
    pub fn new(registry: &Registry) -> Self {
        let mut builder = GraphBuilder::default();

        for source in registry.sources() {
            builder.add(EntityKind::Source, &source.name);
        }
        for pipeline in registry.pipelines() {
            builder.add(EntityKind::Pipeline, &pipeline.pipeline_name);
        }
        for service in registry.services() {
            builder.add(EntityKind::Service, &service.service_name);
        }
        for dashboard in registry.dashboards() {
            builder.add(EntityKind::Dashboard, &dashboard.dashboard_name);
        }

        // Edges are added per consumer in declaration order, so each source's
        // children come out as pipelines, then services, then dashboards.
        for pipeline in registry.pipelines() {
            let p = builder.consumers[&pipeline.pipeline_name];
            for input in &pipeline.inputs {
                builder.edge(builder.sources[input], p);
            }
            for output in &pipeline.produces {
                let s = builder.sources[output];
                builder.edge(p, s);
                builder.producer.insert(s, p);
                builder.outputs.entry(p).or_default().push(s);
            }
        }
        for service in registry.services() {
            let svc = builder.consumers[&service.service_name];
            for consumed in &service.consumes {
                builder.edge(builder.sources[consumed], svc);
            }
        }
        for dashboard in registry.dashboards() {
            let d = builder.consumers[&dashboard.dashboard_name];
            for consumed in &dashboard.consumes {
                builder.edge(builder.sources[consumed], d);
            }
            for service in &dashboard.services {
                builder.edge(builder.consumers[service], d);
            }
        }

        let mut patterns = Vec::with_capacity(registry.sources().len());
        for source in registry.sources() {
            match LocationPattern::compile(&source.name, &source.location) {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => tracing::warn!(
                    source = %source.name,
                    error = %e,
                    "location template cannot be matched against paths"
                ),
            }
        }

        let mut resolver = Self {
            nodes: builder.nodes,
            sources: builder.sources,
            consumers: builder.consumers,
            downstream: builder.downstream,
            upstream: builder.upstream,
            producer: builder.producer,
            outputs: builder.outputs,
            on_cycle: HashMap::new(),
            cycles: Vec::new(),
            patterns,
        };
        resolver.detect_cycles();

        for cycle in &resolver.cycles {
            tracing::warn!(cycle = %resolver.cycle_names(cycle).join(" -> "), "dependency cycle");
        }

        resolver
    }

    /// Pipelines, services and dashboards affected if `source_name` changes
    ///
    /// Breadth-first from the source: its producing pipeline, pipelines reading
    /// it, services and dashboards consuming it, then onward through the
    /// sources those pipelines produce and the dashboards listing those
    /// services.
    pub fn get_impact_chain(&self, source_name: &str) -> Result<Vec<String>, GraphError> {
        let start = self.source_id(source_name)?;
        self.ensure_acyclic(start)?;

        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::new();
        let mut result = Vec::new();

        // The producer is affected but not expanded: its other outputs do not
        // depend on this source.
        if let Some(&producer) = self.producer.get(&start) {
            visited.insert(producer);
            result.push(self.nodes[producer].name.clone());
        }
        queue.extend(self.downstream[start].iter().copied());

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            self.ensure_acyclic(current)?;

            if self.nodes[current].kind != EntityKind::Source {
                result.push(self.nodes[current].name.clone());
            }

            for &child in &self.downstream[current] {
                if !visited.contains(&child) {
                    queue.push_back(child);
                }
            }
        }

        tracing::debug!(source = source_name, affected = result.len(), "impact chain");
        Ok(result)
    }

    /// Sources a pipeline, service or dashboard transitively depends on
    ///
    /// For a pipeline this includes the sources it produces.
    pub fn get_dependency_chain(&self, consumer_name: &str) -> Result<Vec<String>, GraphError> {
        let start = self.consumer_id(consumer_name)?;
        self.ensure_acyclic(start)?;

        let mut visited = HashSet::from([start]);
        let mut queue: VecDeque<NodeId> = self.upstream[start].iter().copied().collect();
        if let Some(outputs) = self.outputs.get(&start) {
            queue.extend(outputs.iter().copied());
        }

        let mut result = Vec::new();
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            self.ensure_acyclic(current)?;

            if self.nodes[current].kind == EntityKind::Source {
                result.push(self.nodes[current].name.clone());
            }

            for &parent in &self.upstream[current] {
                if !visited.contains(&parent) {
                    queue.push_back(parent);
                }
            }
        }

        tracing::debug!(consumer = consumer_name, sources = result.len(), "dependency chain");
        Ok(result)
    }

    /// Sources with no producer and no consumer, in declaration order
    pub fn find_orphans(&self) -> Vec<String> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(id, node)| {
                node.kind == EntityKind::Source
                    && self.upstream[*id].is_empty()
                    && self.downstream[*id].is_empty()
            })
            .map(|(_, node)| node.name.clone())
            .collect()
    }

    /// Paths matching no source location template
    ///
    /// Paths are compared with forward slashes and without a leading `./`.
    /// Output keeps input order and drops repeated paths.
    pub fn find_unregistered<I, P>(&self, actual_paths: I) -> Vec<String>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut unregistered = Vec::new();

        for path in actual_paths {
            let path = path.as_ref();
            if self.matching_source(path).is_none() && seen.insert(normalize(path)) {
                unregistered.push(path.to_string());
            }
        }
        unregistered
    }

    /// First source (declaration order) whose location template matches `path`
    pub fn matching_source(&self, path: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| pattern.matches(path))
            .map(|pattern| pattern.source_name())
    }

    /// Compiled location patterns, one per source
    pub fn patterns(&self) -> &[LocationPattern] {
        &self.patterns
    }

    /// Every node ordered so producers come before consumers
    ///
    /// Ties keep declaration order: sources, pipelines, services, dashboards.
    pub fn topological_order(&self) -> Result<Vec<GraphNode>, GraphError> {
        if let Some(cycle) = self.cycles.first() {
            return Err(self.cycle_error(cycle));
        }

        let mut in_degree: Vec<usize> = self.upstream.iter().map(Vec::len).collect();
        let mut queue: VecDeque<NodeId> = (0..self.nodes.len())
            .filter(|&id| in_degree[id] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        // Kahn's algorithm
        while let Some(node) = queue.pop_front() {
            order.push(self.nodes[node].clone());
            for &child in &self.downstream[node] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        Ok(order)
    }

    /// Cycles found when the graph was built, as node names with the first
    /// node repeated at the end
    pub fn cycles(&self) -> Vec<Vec<String>> {
        self.cycles.iter().map(|c| self.cycle_names(c)).collect()
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    fn source_id(&self, name: &str) -> Result<NodeId, LookupError> {
        self.sources
            .get(name)
            .copied()
            .ok_or_else(|| LookupError::not_found(EntityKind::Source, name))
    }

    fn consumer_id(&self, name: &str) -> Result<NodeId, LookupError> {
        // Consumer names are unique across pipelines, services and dashboards
        self.consumers
            .get(name)
            .copied()
            .ok_or_else(|| LookupError::UnknownConsumer(name.to_string()))
    }

    fn ensure_acyclic(&self, node: NodeId) -> Result<(), GraphError> {
        match self.on_cycle.get(&node) {
            Some(&index) => Err(self.cycle_error(&self.cycles[index])),
            None => Ok(()),
        }
    }

    fn cycle_error(&self, cycle: &[NodeId]) -> GraphError {
        GraphError::CyclicDependency {
            cycle: self.cycle_names(cycle),
        }
    }

    fn cycle_names(&self, cycle: &[NodeId]) -> Vec<String> {
        let mut names: Vec<String> = cycle.iter().map(|&id| self.nodes[id].name.clone()).collect();
        if let Some(first) = names.first().cloned() {
            names.push(first);
        }
        names
    }

    /// Depth-first search recording every back edge as a cycle
    fn detect_cycles(&mut self) {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack: Vec<NodeId> = Vec::new();
        let mut cycles: Vec<Vec<NodeId>> = Vec::new();

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }

            // Iterative DFS: (node, next child index)
            let mut frames: Vec<(NodeId, usize)> = vec![(root, 0)];
            marks[root] = Mark::OnStack;
            stack.push(root);

            while let Some(frame) = frames.last_mut() {
                let (node, next) = *frame;
                if let Some(&child) = self.downstream[node].get(next) {
                    frame.1 += 1;
                    match marks[child] {
                        Mark::Unvisited => {
                            marks[child] = Mark::OnStack;
                            stack.push(child);
                            frames.push((child, 0));
                        }
                        Mark::OnStack => {
                            if let Some(start) = stack.iter().position(|&n| n == child) {
                                cycles.push(stack[start..].to_vec());
                            }
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                    frames.pop();
                }
            }
        }

        for (index, cycle) in cycles.iter().enumerate() {
            for &node in cycle {
                self.on_cycle.entry(node).or_insert(index);
            }
        }
        self.cycles = cycles;
    }
}

#[derive(Default)]
struct GraphBuilder {
    nodes: Vec<GraphNode>,
    sources: HashMap<String, NodeId>,
    consumers: HashMap<String, NodeId>,
    downstream: Vec<Vec<NodeId>>,
    upstream: Vec<Vec<NodeId>>,
    producer: HashMap<NodeId, NodeId>,
    outputs: HashMap<NodeId, Vec<NodeId>>,
}

impl GraphBuilder {
    fn add(&mut self, kind: EntityKind, name: &str) {
        let id = self.nodes.len();
        self.nodes.push(GraphNode {
            kind,
            name: name.to_string(),
        });
        self.downstream.push(Vec::new());
        self.upstream.push(Vec::new());

        let index = if kind == EntityKind::Source {
            &mut self.sources
        } else {
            &mut self.consumers
        };
        index.insert(name.to_string(), id);
    }

    fn edge(&mut self, from: NodeId, to: NodeId) {
        if !self.downstream[from].contains(&to) {
            self.downstream[from].push(to);
            self.upstream[to].push(from);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_from_str;
    use pretty_assertions::assert_eq;

    const SCENARIO: &str = r#"
sources:
  ohlcv_raw:
    location: DATA/raw/ohlcv/{date}.parquet
    format: parquet
pipelines:
  ohlcv_updater:
    produces: [ohlcv_raw]
services:
  technical_service:
    consumes: [ohlcv_raw]
dashboards:
  technical_dashboard:
    consumes: []
    services: [technical_service]
"#;

    const LAYERED: &str = r#"
sources:
  ohlcv_raw:
    location: DATA/raw/ohlcv/{date}.parquet
    format: parquet
  indicators:
    location: DATA/processed/indicators/{date}.parquet
    format: parquet
  universe:
    location: DATA/reference/universe.csv
    format: csv
  news:
    location: DATA/raw/news/{date}.json
    format: json
  legacy_export:
    location: DATA/exports/legacy.csv
    format: csv
pipelines:
  ohlcv_updater:
    produces: [ohlcv_raw]
    inputs: [universe]
  indicator_builder:
    inputs: [ohlcv_raw]
    produces: [indicators]
services:
  technical_service:
    consumes: [indicators]
  news_service:
    consumes: [news]
dashboards:
  market_overview:
    consumes: [ohlcv_raw]
    services: [technical_service]
  news_dashboard:
    services: [news_service]
"#;

    fn resolver(yaml: &str) -> DependencyResolver {
        DependencyResolver::new(&load_from_str(yaml).unwrap())
    }

    #[test]
    fn impact_chain_scenario() {
        let resolver = resolver(SCENARIO);
        assert_eq!(
            resolver.get_impact_chain("ohlcv_raw").unwrap(),
            vec!["ohlcv_updater", "technical_service", "technical_dashboard"]
        );
    }

    #[test]
    fn impact_chain_follows_pipeline_outputs() {
        let resolver = resolver(LAYERED);

        assert_eq!(
            resolver.get_impact_chain("ohlcv_raw").unwrap(),
            vec!["ohlcv_updater", "indicator_builder", "market_overview", "technical_service"]
        );
        assert_eq!(
            resolver.get_impact_chain("universe").unwrap(),
            vec!["ohlcv_updater", "indicator_builder", "market_overview", "technical_service"]
        );
        assert!(resolver.get_impact_chain("legacy_export").unwrap().is_empty());
    }

    #[test]
    fn dependency_chain_walks_backward() {
        let resolver = resolver(LAYERED);

        assert_eq!(
            resolver.get_dependency_chain("technical_service").unwrap(),
            vec!["indicators", "ohlcv_raw", "universe"]
        );
        assert_eq!(
            resolver.get_dependency_chain("market_overview").unwrap(),
            vec!["ohlcv_raw", "indicators", "universe"]
        );
        assert_eq!(
            resolver.get_dependency_chain("ohlcv_updater").unwrap(),
            vec!["universe", "ohlcv_raw"]
        );
    }

    #[test]
    fn impact_and_dependency_chains_round_trip() {
        for yaml in [SCENARIO, LAYERED] {
            let registry = load_from_str(yaml).unwrap();
            let resolver = DependencyResolver::new(&registry);

            for source in registry.sources() {
                for affected in resolver.get_impact_chain(&source.name).unwrap() {
                    let deps = resolver.get_dependency_chain(&affected).unwrap();
                    assert!(
                        deps.contains(&source.name),
                        "{} not in dependency chain of {}: {:?}",
                        source.name,
                        affected,
                        deps
                    );
                }
            }
        }
    }

    #[test]
    fn traversal_is_deterministic() {
        let a = resolver(LAYERED);
        let b = resolver(LAYERED);
        assert_eq!(
            a.get_impact_chain("universe").unwrap(),
            b.get_impact_chain("universe").unwrap()
        );
        assert_eq!(
            a.get_dependency_chain("market_overview").unwrap(),
            a.get_dependency_chain("market_overview").unwrap()
        );
    }

    #[test]
    fn unknown_names() {
        let resolver = resolver(SCENARIO);
        assert_eq!(
            resolver.get_impact_chain("nope").unwrap_err(),
            GraphError::Lookup(LookupError::not_found(EntityKind::Source, "nope"))
        );
        assert_eq!(
            resolver.get_dependency_chain("ohlcv_raw").unwrap_err(),
            GraphError::Lookup(LookupError::UnknownConsumer("ohlcv_raw".to_string()))
        );
    }

    #[test]
    fn cycle_is_reported_instead_of_looping() {
        let resolver = resolver(
            r#"
sources:
  a:
    location: DATA/a.parquet
    format: parquet
  b:
    location: DATA/b.parquet
    format: parquet
  c:
    location: DATA/c.parquet
    format: parquet
pipelines:
  p1:
    inputs: [a]
    produces: [b]
  p2:
    inputs: [b]
    produces: [a]
services:
  reader:
    consumes: [c]
"#,
        );

        assert!(resolver.has_cycles());
        assert_eq!(resolver.cycles(), vec![vec!["a", "p1", "b", "p2", "a"]]);

        match resolver.get_impact_chain("a").unwrap_err() {
            GraphError::CyclicDependency { cycle } => assert!(cycle.contains(&"p2".to_string())),
            other => panic!("expected cycle error, got {other:?}"),
        }
        assert!(resolver.get_dependency_chain("p1").is_err());
        assert!(resolver.topological_order().is_err());

        // Nodes off the cycle still answer
        assert_eq!(resolver.get_impact_chain("c").unwrap(), vec!["reader"]);
    }

    #[test]
    fn orphans_in_declaration_order() {
        let resolver = resolver(
            r#"
sources:
  used:
    location: DATA/used.csv
    format: csv
  zz_orphan:
    location: DATA/zz.csv
    format: csv
  produced_only:
    location: DATA/p.csv
    format: csv
  aa_orphan:
    location: DATA/aa.csv
    format: csv
pipelines:
  loader:
    produces: [produced_only]
services:
  svc:
    consumes: [used]
"#,
        );
        assert_eq!(resolver.find_orphans(), vec!["zz_orphan", "aa_orphan"]);
    }

    #[test]
    fn unregistered_paths() {
        let resolver = resolver(LAYERED);

        assert_eq!(
            resolver.find_unregistered(["DATA/processed/foo.parquet"]),
            vec!["DATA/processed/foo.parquet"]
        );

        let found = resolver.find_unregistered([
            "DATA/raw/ohlcv/2024-05-01.parquet",
            "./DATA/reference/universe.csv",
            "DATA/raw/ohlcv/2024/05/01.parquet",
            "DATA/tmp/scratch.csv",
            "DATA/tmp/scratch.csv",
        ]);
        assert_eq!(found, vec!["DATA/raw/ohlcv/2024/05/01.parquet", "DATA/tmp/scratch.csv"]);

        assert_eq!(
            resolver.matching_source("DATA/processed/indicators/2024-05-01.parquet"),
            Some("indicators")
        );
    }

    #[test]
    fn topological_order_puts_producers_first() {
        let resolver = resolver(LAYERED);
        let order = resolver.topological_order().unwrap();
        assert_eq!(order.len(), 11);

        let position = |name: &str| order.iter().position(|n| n.name == name).unwrap();
        assert!(position("universe") < position("ohlcv_updater"));
        assert!(position("ohlcv_updater") < position("ohlcv_raw"));
        assert!(position("ohlcv_raw") < position("indicator_builder"));
        assert!(position("indicators") < position("technical_service"));
        assert!(position("technical_service") < position("market_overview"));
        assert_eq!(order[0].to_string(), "source:universe");
    }
}
