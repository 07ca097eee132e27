//! Built-in edge-orchestrator tenancy hierarchy.

use crate::HierarchySchema;

pub const MULTI_TENANCY: &str = "multitenancies.tenancy.edge-orchestrator.intel.com";
pub const CONFIG: &str = "configs.config.edge-orchestrator.intel.com";
pub const ORG: &str = "orgs.org.edge-orchestrator.intel.com";
pub const ORG_WATCHER: &str = "orgwatchers.orgwatcher.edge-orchestrator.intel.com";
pub const ORG_ACTIVE_WATCHER: &str = "orgactivewatchers.orgactivewatcher.edge-orchestrator.intel.com";
pub const FOLDER: &str = "folders.folder.edge-orchestrator.intel.com";
pub const PROJECT: &str = "projects.project.edge-orchestrator.intel.com";
pub const PROJECT_WATCHER: &str = "projectwatchers.projectwatcher.edge-orchestrator.intel.com";
pub const PROJECT_ACTIVE_WATCHER: &str = "projectactivewatchers.projectactivewatcher.edge-orchestrator.intel.com";
pub const RUNTIME: &str = "runtimes.runtime.edge-orchestrator.intel.com";
pub const RUNTIME_ORG: &str = "runtimeorgs.runtimeorg.edge-orchestrator.intel.com";
pub const RUNTIME_FOLDER: &str = "runtimefolders.runtimefolder.edge-orchestrator.intel.com";
pub const RUNTIME_PROJECT: &str = "runtimeprojects.runtimeproject.edge-orchestrator.intel.com";

/// `(type, ancestors)` in root-to-leaf order.
pub const TENANCY_HIERARCHY: &[(&str, &[&str])] = &[
    (MULTI_TENANCY, &[]),
    (CONFIG, &[MULTI_TENANCY]),
    (ORG, &[MULTI_TENANCY]),
    (ORG_WATCHER, &[MULTI_TENANCY, CONFIG]),
    (ORG_ACTIVE_WATCHER, &[MULTI_TENANCY, ORG]),
    (FOLDER, &[MULTI_TENANCY, ORG]),
    (PROJECT, &[MULTI_TENANCY, ORG, FOLDER]),
    (PROJECT_WATCHER, &[MULTI_TENANCY, CONFIG]),
    (PROJECT_ACTIVE_WATCHER, &[MULTI_TENANCY, ORG, FOLDER, PROJECT]),
    (RUNTIME, &[MULTI_TENANCY]),
    (RUNTIME_ORG, &[MULTI_TENANCY, RUNTIME]),
    (RUNTIME_FOLDER, &[MULTI_TENANCY, RUNTIME, RUNTIME_ORG]),
    (RUNTIME_PROJECT, &[MULTI_TENANCY, RUNTIME, RUNTIME_ORG, RUNTIME_FOLDER]),
];

impl HierarchySchema {
    /// The edge-orchestrator tenancy hierarchy compiled into the binary.
    pub fn tenancy() -> Self {
        let mut schema = Self::default();
        for (ty, ancestors) in TENANCY_HIERARCHY {
            schema.index.insert((*ty).to_string(), schema.entries.len());
            schema.entries.push(crate::SchemaEntry {
                resource_type: (*ty).to_string(),
                ancestors: ancestors.iter().map(|a| (*a).to_string()).collect(),
            });
        }
        schema
    }
}
