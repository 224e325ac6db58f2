//! Registry loading, lookup and graph queries
//!
//! This crate handles:
//! - Parsing registry documents (YAML/JSON) and validating them as a whole
//! - The immutable [`Registry`] snapshot and its name-based lookups
//! - The process-wide snapshot handle with atomic reload
//! - Resolving source names to concrete locations
//! - Impact and dependency chains over the source/pipeline/service/dashboard graph

pub mod document;
pub mod loader;
pub mod registry;
pub mod path;
pub mod dag;
pub mod handle;

pub use document::{DocumentFormat, RegistryDocument, SUPPORTED_VERSION};
pub use loader::{load_documents, load_from_config, load_from_str, RegistryLoader};
pub use registry::Registry;
pub use path::{
    fill_template, params, ArtifactMeta, ArtifactStore, LocalStore, LocationPattern, PathError,
    PathResolver, ResolveOptions, TemplateParams, DEFAULT_EXISTENCE_TIMEOUT,
};
pub use dag::{DependencyResolver, GraphError, GraphNode};
pub use handle::{
    get_data_path, get_registry, install_registry, reload_registry, RegistryError, RegistryHandle,
};
