//! Process-wide registry snapshot
//!
//! A [`RegistryHandle`] holds the current snapshot behind an `ArcSwap`: readers
//! take a cheap `Arc` and never lock, a reload builds a fresh registry and
//! swaps it in with one atomic store. The global handle is initialized once,
//! on first use, from the tool configuration.

use crate::loader::load_from_config;
use crate::path::{PathError, PathResolver, TemplateParams};
use crate::registry::Registry;
use arc_swap::ArcSwap;
use datamap_core::{Config, ConfigError};
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::sync::Arc;

/// Atomically swappable registry snapshot
#[derive(Debug)]
pub struct RegistryHandle {
    current: ArcSwap<Registry>,
}

impl RegistryHandle {
    pub fn new(registry: Registry) -> Self {
        Self {
            current: ArcSwap::from_pointee(registry),
        }
    }

    /// The current snapshot
    pub fn load(&self) -> Arc<Registry> {
        self.current.load_full()
    }

    /// Replace the snapshot, returning the previous one
    pub fn swap(&self, registry: Registry) -> Arc<Registry> {
        let previous = self.current.swap(Arc::new(registry));
        tracing::info!(
            previous = previous.fingerprint(),
            current = self.current.load().fingerprint(),
            "registry snapshot swapped"
        );
        previous
    }

    /// Build a new snapshot and swap it in only if the build succeeds
    ///
    /// On failure the current snapshot stays in place.
    pub fn reload_with<F>(&self, build: F) -> Result<Arc<Registry>, ConfigError>
    where
        F: FnOnce() -> Result<Registry, ConfigError>,
    {
        let registry = build()?;
        self.swap(registry);
        Ok(self.load())
    }
}

static GLOBAL: OnceCell<RegistryHandle> = OnceCell::new();

fn discover_and_load() -> Result<Registry, ConfigError> {
    let config = Config::discover()?;
    load_from_config(&config)
}

/// The process-wide registry snapshot
///
/// Built on first call from the configuration named by `DATAMAP_CONFIG` (or
/// `./datamap.toml`). Concurrent first calls build it once.
pub fn get_registry() -> Result<Arc<Registry>, ConfigError> {
    GLOBAL
        .get_or_try_init(|| discover_and_load().map(RegistryHandle::new))
        .map(RegistryHandle::load)
}

/// Rebuild the process-wide registry from configuration and swap it in
///
/// Readers holding the previous snapshot keep using it until they drop it.
/// If the rebuild fails the current snapshot is kept.
pub fn reload_registry() -> Result<Arc<Registry>, ConfigError> {
    match GLOBAL.get() {
        Some(handle) => handle.reload_with(discover_and_load),
        None => get_registry(),
    }
}

/// Install an externally built registry as the process-wide snapshot
pub fn install_registry(registry: Registry) -> Arc<Registry> {
    match GLOBAL.try_insert(RegistryHandle::new(registry)) {
        Ok(handle) => handle.load(),
        Err((existing, rejected)) => {
            let registry = Arc::try_unwrap(rejected.current.into_inner())
                .unwrap_or_else(|shared| (*shared).clone());
            existing.swap(registry);
            existing.load()
        }
    }
}

/// Errors from [`get_data_path`]
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Path(#[from] PathError),
}

/// Resolve a source's location against the process-wide registry
pub fn get_data_path(name: &str, params: &TemplateParams) -> Result<PathBuf, RegistryError> {
    let registry = get_registry()?;
    let path = PathResolver::new(&registry).resolve(name, params)?;
    Ok(path)
}
