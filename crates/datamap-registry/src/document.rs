//! Registry document parsing
//!
//! A registry document is a YAML (or JSON) file with up to five collections,
//! each a mapping from entity name to its fields:
//!
//! ```yaml
//! version: 1
//! sources:
//!   ohlcv_raw:
//!     category: market_data
//!     location: DATA/raw/ohlcv/{date}.parquet
//!     format: parquet
//!     schema_ref: ohlcv
//! pipelines:
//!   ohlcv_updater:
//!     produces: [ohlcv_raw]
//! services:
//!   technical_service:
//!     consumes: [ohlcv_raw]
//! dashboards:
//!   technical_dashboard:
//!     services: [technical_service]
//! schemas:
//!   ohlcv:
//!     columns:
//!       - { name: symbol, type: string }
//!       - { name: close, type: float64, nullable: true }
//! ```
//!
//! Mappings are read in declaration order and duplicate names are kept, so
//! the loader can report them instead of silently keeping the last one.

use datamap_core::{Column, HealthThresholds};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

/// Document schema version understood by this loader
pub const SUPPORTED_VERSION: u32 = 1;

/// Encoding of a registry document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// Pick the format from a file extension (YAML unless `.json`)
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// Name -> definition mapping that keeps declaration order and duplicates
#[derive(Debug, Clone, PartialEq)]
pub struct NamedEntries<T>(pub Vec<(String, T)>);

impl<T> Default for NamedEntries<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> NamedEntries<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for NamedEntries<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = NamedEntries<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping from entity name to its definition")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, value)) = map.next_entry::<String, T>()? {
                    entries.push((name, value));
                }
                Ok(NamedEntries(entries))
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(NamedEntries::default())
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

/// One registry document, before linking
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryDocument {
    /// Document schema version (defaults to the supported one)
    #[serde(default)]
    pub version: Option<u32>,

    #[serde(default)]
    pub sources: Option<NamedEntries<SourceDecl>>,

    #[serde(default)]
    pub pipelines: Option<NamedEntries<PipelineDecl>>,

    #[serde(default)]
    pub services: Option<NamedEntries<ServiceDecl>>,

    #[serde(default)]
    pub dashboards: Option<NamedEntries<DashboardDecl>>,

    #[serde(default)]
    pub schemas: Option<NamedEntries<SchemaDecl>>,
}

impl RegistryDocument {
    /// Parse a document in the given format
    pub fn parse(contents: &str, format: DocumentFormat) -> Result<Self, String> {
        match format {
            DocumentFormat::Yaml => {
                // An empty file is a valid, empty document
                if contents.trim().is_empty() {
                    return Ok(Self::default());
                }
                serde_yaml::from_str(contents).map_err(|e| e.to_string())
            }
            DocumentFormat::Json => serde_json::from_str(contents).map_err(|e| e.to_string()),
        }
    }
}

/// Declared fields of a data source
///
/// Required fields are optional here so that a missing one is reported as a
/// validation finding alongside every other problem, not as a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceDecl {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub schema_ref: Option<String>,
    #[serde(default)]
    pub producing_pipeline: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub health: Option<HealthThresholds>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDecl {
    #[serde(default)]
    pub produces: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDecl {
    #[serde(default)]
    pub consumes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DashboardDecl {
    #[serde(default)]
    pub consumes: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDecl {
    #[serde(default)]
    pub columns: Vec<Column>,
}
