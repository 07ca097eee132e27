//! Nexus name resolver: hierarchy-aware, deterministic resource identifiers.
//!
//! The hashed key for a resource is composed as
//! `"<ancestorType>:<ancestorName>/" ... "<resourceType>:<declaredName>"`,
//! walking ancestors in the order the schema declares them. Missing ancestor
//! labels contribute [`nexus_core::DEFAULT_LABEL_VALUE`].

#![forbid(unsafe_code)]

use std::sync::Arc;

use metrics::counter;
use nexus_core::{ResolvedIdentifier, ResourceLabels, IDENTIFIER_HEX_LEN};
use nexus_schema::HierarchySchema;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Direct parent of a resource, resolved from the child's own labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub resource_type: String,
    pub declared_name: String,
    pub identifier: ResolvedIdentifier,
}

/// Resolver bound to a shared schema. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NameResolver {
    schema: Arc<HierarchySchema>,
}

impl NameResolver {
    pub fn new(schema: Arc<HierarchySchema>) -> Self { Self { schema } }

    pub fn schema(&self) -> &HierarchySchema { &self.schema }

    pub fn resolve(&self, resource_type: &str, labels: &ResourceLabels, declared_name: &str) -> ResolvedIdentifier {
        resolve_identifier(&self.schema, resource_type, labels, declared_name)
    }

    pub fn compose_key(&self, resource_type: &str, labels: &ResourceLabels, declared_name: &str) -> String {
        compose_key(&self.schema, resource_type, labels, declared_name)
    }

    pub fn resolve_parent(&self, resource_type: &str, labels: &ResourceLabels) -> Option<ParentRef> {
        resolve_parent(&self.schema, resource_type, labels)
    }
}

/// Warn about and count a resource type the schema does not declare.
pub fn report_unknown_type(resource_type: &str) {
    warn!(resource_type, "resource type not in hierarchy schema; hashing without ancestors");
    counter!("nexus_naming_unknown_type_total", 1u64);
}

fn ancestors_or_empty<'a>(schema: &'a HierarchySchema, resource_type: &str) -> &'a [String] {
    match schema.ancestors(resource_type) {
        Some(a) => a,
        None => {
            report_unknown_type(resource_type);
            &[]
        }
    }
}

/// Build the pre-hash key for a resource.
pub fn compose_key(schema: &HierarchySchema, resource_type: &str, labels: &ResourceLabels, declared_name: &str) -> String {
    let ancestors = ancestors_or_empty(schema, resource_type);
    let mut key = String::new();
    for a in ancestors {
        key.push_str(a);
        key.push(':');
        key.push_str(labels.value_or_default(a));
        key.push('/');
    }
    key.push_str(resource_type);
    key.push(':');
    key.push_str(declared_name);
    key
}

/// Hash a composed key into an identifier: SHA-256 truncated to 160 bits, lowercase hex.
pub fn digest_key(key: &str) -> ResolvedIdentifier {
    let sum = Sha256::digest(key.as_bytes());
    let hexed = hex::encode(&sum[..IDENTIFIER_HEX_LEN / 2]);
    // hex::encode only yields lowercase hex of the requested width
    ResolvedIdentifier::parse(hexed).unwrap_or_else(|e| unreachable!("digest encoding: {e}"))
}

/// Compute the identifier of `declared_name` of `resource_type` placed under `labels`.
///
/// Unknown resource types are hashed as roots (no ancestors) and reported via
/// a warning and the `nexus_naming_unknown_type_total` counter.
pub fn resolve_identifier(
    schema: &HierarchySchema,
    resource_type: &str,
    labels: &ResourceLabels,
    declared_name: &str,
) -> ResolvedIdentifier {
    digest_key(&compose_key(schema, resource_type, labels, declared_name))
}

/// Resolve the direct parent (last declared ancestor) of `resource_type`.
///
/// The parent's name comes from `labels[parent_type]` (or the sentinel), and
/// its identifier is computed against the parent's own ancestors, which the
/// child's labels carry as well.
pub fn resolve_parent(schema: &HierarchySchema, resource_type: &str, labels: &ResourceLabels) -> Option<ParentRef> {
    let parent_type = schema.direct_parent(resource_type)?;
    let declared_name = labels.value_or_default(parent_type).to_string();
    let identifier = resolve_identifier(schema, parent_type, labels, &declared_name);
    Some(ParentRef { resource_type: parent_type.to_string(), declared_name, identifier })
}
