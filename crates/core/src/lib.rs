//! Nexus core types: labels, resolved identifiers and resource events.

#![forbid(unsafe_code)]

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder bound to an ancestor type whose label was not supplied.
pub const DEFAULT_LABEL_VALUE: &str = "default";

/// Label carrying the user-facing name of a Nexus object.
pub const DISPLAY_NAME_LABEL: &str = "nexus/display_name";

/// Hex length of a [`ResolvedIdentifier`] (160-bit digest).
pub const IDENTIFIER_HEX_LEN: usize = 40;

/// Ancestor resource type -> ancestor name, supplied per resource instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceLabels(FxHashMap<String, String>);

impl ResourceLabels {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, ancestor_type: impl Into<String>, name: impl Into<String>) -> Option<String> {
        self.0.insert(ancestor_type.into(), name.into())
    }

    pub fn get(&self, ancestor_type: &str) -> Option<&str> {
        self.0.get(ancestor_type).map(String::as_str)
    }

    /// Label value for `ancestor_type`, or [`DEFAULT_LABEL_VALUE`] when absent.
    pub fn value_or_default(&self, ancestor_type: &str) -> &str {
        self.get(ancestor_type).unwrap_or(DEFAULT_LABEL_VALUE)
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResourceLabels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier must be 40 hex characters, got {0}")]
    Length(usize),
    #[error("identifier contains non lowercase-hex character {0:?}")]
    Charset(char),
}

/// Hierarchy-hashed name used as a resource's durable key.
///
/// Always [`IDENTIFIER_HEX_LEN`] lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResolvedIdentifier(String);

impl ResolvedIdentifier {
    pub fn parse(s: impl Into<String>) -> Result<Self, IdentifierError> {
        let s = s.into();
        if s.len() != IDENTIFIER_HEX_LEN {
            return Err(IdentifierError::Length(s.len()));
        }
        if let Some(c) = s.chars().find(|c| !matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(IdentifierError::Charset(c));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_string(self) -> String { self.0 }
}

impl TryFrom<String> for ResolvedIdentifier {
    type Error = IdentifierError;
    fn try_from(s: String) -> Result<Self, Self::Error> { Self::parse(s) }
}

impl From<ResolvedIdentifier> for String {
    fn from(id: ResolvedIdentifier) -> Self { id.0 }
}

impl AsRef<str> for ResolvedIdentifier {
    fn as_ref(&self) -> &str { &self.0 }
}

impl fmt::Display for ResolvedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    Applied,
    Deleted,
}

/// A create/update/delete notification for one resource instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceEvent {
    pub kind: EventKind,
    pub resource_type: String,
    pub declared_name: String,
    /// Ancestor type -> ancestor declared name.
    #[serde(default)]
    pub labels: ResourceLabels,
    /// Stable object identity (`metadata.uid`). Events sharing a uid describe
    /// the same object even when its name or parent labels change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ResourceEvent {
    pub fn applied(resource_type: impl Into<String>, declared_name: impl Into<String>, labels: ResourceLabels) -> Self {
        Self::new(EventKind::Applied, resource_type, declared_name, labels)
    }

    pub fn deleted(resource_type: impl Into<String>, declared_name: impl Into<String>, labels: ResourceLabels) -> Self {
        Self::new(EventKind::Deleted, resource_type, declared_name, labels)
    }

    fn new(kind: EventKind, resource_type: impl Into<String>, declared_name: impl Into<String>, labels: ResourceLabels) -> Self {
        Self { kind, resource_type: resource_type.into(), declared_name: declared_name.into(), labels, uid: None }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Same object, same labels, flipped to a delete.
    pub fn into_deleted(mut self) -> Self {
        self.kind = EventKind::Deleted;
        self
    }
}

pub mod prelude {
    pub use super::{
        EventKind, ResolvedIdentifier, ResourceEvent, ResourceLabels, DEFAULT_LABEL_VALUE, DISPLAY_NAME_LABEL,
    };
}
