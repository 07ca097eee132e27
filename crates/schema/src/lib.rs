//! Nexus hierarchy schema: which ancestor types every resource type hangs under.
//!
//! Ancestor lists are kept in declared (root-to-leaf) order. That order feeds
//! identifier composition, so it is never sorted or deduplicated silently.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;
use tracing::debug;

pub mod tenancy;

pub type Ancestors = SmallVec<[String; 4]>;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("reading schema file {}", path.display())]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("parsing schema document")]
    Parse(#[from] serde_yaml::Error),
    #[error("schema document must be a mapping of type -> [ancestor types]")]
    Shape,
    #[error("{0} lists itself as an ancestor")]
    SelfAncestor(String),
    #[error("{resource_type} lists ancestor {ancestor} more than once")]
    DuplicateAncestor { resource_type: String, ancestor: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaEntry {
    pub resource_type: String,
    pub ancestors: Ancestors,
}

/// Static mapping from resource type to its ordered ancestor types.
#[derive(Debug, Clone, Default)]
pub struct HierarchySchema {
    entries: Vec<SchemaEntry>,
    index: FxHashMap<String, usize>,
}

impl HierarchySchema {
    /// Build from `(type, ancestors)` pairs. A later pair for the same type replaces the earlier one.
    pub fn from_entries<I, T, A>(entries: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (T, A)>,
        T: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        let mut schema = Self::default();
        for (ty, ancestors) in entries {
            let entry = SchemaEntry {
                resource_type: ty.into(),
                ancestors: ancestors.into_iter().map(Into::into).collect(),
            };
            validate_entry(&entry)?;
            match schema.index.get(&entry.resource_type) {
                Some(&i) => schema.entries[i] = entry,
                None => {
                    schema.index.insert(entry.resource_type.clone(), schema.entries.len());
                    schema.entries.push(entry);
                }
            }
        }
        Ok(schema)
    }

    /// Parse a YAML (or JSON) mapping `{ "<type>": ["<ancestor>", ...] }`.
    pub fn from_yaml_str(doc: &str) -> Result<Self, SchemaError> {
        let map: serde_yaml::Mapping = serde_yaml::from_str(doc)?;
        let mut pairs = Vec::with_capacity(map.len());
        for (k, v) in map {
            let ty = k.as_str().ok_or(SchemaError::Shape)?.to_string();
            let ancestors: Vec<String> = match v {
                serde_yaml::Value::Null => Vec::new(),
                other => serde_yaml::from_value(other)?,
            };
            pairs.push((ty, ancestors));
        }
        Self::from_entries(pairs)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let doc = std::fs::read_to_string(path).map_err(|source| SchemaError::Io { path: path.to_path_buf(), source })?;
        let schema = Self::from_yaml_str(&doc)?;
        debug!(path = %path.display(), types = schema.len(), "hierarchy schema loaded");
        Ok(schema)
    }

    /// Ordered ancestors of `resource_type`, or `None` when the type is unknown.
    pub fn ancestors(&self, resource_type: &str) -> Option<&[String]> {
        self.index.get(resource_type).map(|&i| self.entries[i].ancestors.as_slice())
    }

    /// Last declared ancestor, i.e. the direct parent type.
    pub fn direct_parent(&self, resource_type: &str) -> Option<&str> {
        self.ancestors(resource_type).and_then(|a| a.last()).map(String::as_str)
    }

    pub fn contains(&self, resource_type: &str) -> bool { self.index.contains_key(resource_type) }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Entries in declaration order.
    pub fn entries(&self) -> &[SchemaEntry] { &self.entries }

    /// Ancestor types referenced somewhere but never declared themselves.
    pub fn undeclared_ancestors(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .entries
            .iter()
            .flat_map(|e| e.ancestors.iter())
            .map(String::as_str)
            .filter(|a| !self.contains(a))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

fn validate_entry(entry: &SchemaEntry) -> Result<(), SchemaError> {
    for (i, a) in entry.ancestors.iter().enumerate() {
        if *a == entry.resource_type {
            return Err(SchemaError::SelfAncestor(entry.resource_type.clone()));
        }
        if entry.ancestors[..i].contains(a) {
            return Err(SchemaError::DuplicateAncestor {
                resource_type: entry.resource_type.clone(),
                ancestor: a.clone(),
            });
        }
    }
    Ok(())
}
