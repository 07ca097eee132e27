//! Nexus kubehub: discovery and list+watch wiring that turns Nexus custom
//! resources into [`ResourceEvent`]s.
//!
//! A resource type is the CRD name, `<plural>.<group>`, the same string the
//! hierarchy schema is keyed by and the same string parents use as label keys
//! on their children.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use futures::TryStreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    runtime::watcher::{self, Event},
    Client,
};
use metrics::counter;
use nexus_core::{EventKind, ResourceEvent, ResourceLabels, DISPLAY_NAME_LABEL};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl DiscoveredResource {
    pub fn resource_type(&self) -> String { resource_type_of(&self.plural, &self.group) }
}

/// CRD-style name used as the hierarchy key: `<plural>.<group>`, or the bare plural for core kinds.
pub fn resource_type_of(plural: &str, group: &str) -> String {
    if group.is_empty() { plural.to_string() } else { format!("{plural}.{group}") }
}

/// Discover served resources, optionally only those whose group ends with `group_suffix`.
pub async fn discover(group_suffix: Option<&str>) -> Result<Vec<DiscoveredResource>> {
    let client = Client::try_default().await?;
    let discovery = Discovery::new(client).run().await?;
    let mut out = Vec::new();
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if let Some(sfx) = group_suffix {
                if !ar.group.ends_with(sfx) { continue; }
            }
            let namespaced = matches!(caps.scope, Scope::Namespaced);
            out.push(DiscoveredResource {
                group: ar.group.clone(),
                version: ar.version.clone(),
                kind: ar.kind.clone(),
                plural: ar.plural.clone(),
                namespaced,
            });
        }
    }
    out.sort_by(|a, b| a.group.cmp(&b.group).then(a.plural.cmp(&b.plural)));
    Ok(out)
}

async fn find_api_resource(client: Client, resource_type: &str) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if resource_type_of(&ar.plural, &ar.group) == resource_type {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("resource type not served: {}", resource_type))
}

/// Build an event from object metadata. The declared name is the display-name
/// label when set, else `metadata.name`; labels are carried over as-is.
pub fn event_from_meta(resource_type: &str, meta: &ObjectMeta, kind: EventKind) -> Option<ResourceEvent> {
    let empty = BTreeMap::new();
    let raw_labels = meta.labels.as_ref().unwrap_or(&empty);
    let declared_name = raw_labels
        .get(DISPLAY_NAME_LABEL)
        .map(String::as_str)
        .or(meta.name.as_deref())
        .filter(|n| !n.is_empty())?
        .to_string();
    let labels: ResourceLabels = raw_labels.iter().filter(|(k, _)| k.as_str() != DISPLAY_NAME_LABEL).collect();
    Some(ResourceEvent { kind, resource_type: resource_type.to_string(), declared_name, labels, uid: meta.uid.clone() })
}

/// Per-watch memory of live objects, keyed by `metadata.uid`.
///
/// A watch restart relists the world; objects deleted while the watch was
/// down only show up as missing from that list. The tracker turns them into
/// deletes using the last event seen for each uid.
#[derive(Debug, Default)]
pub struct WatchTracker {
    resource_type: String,
    seen: FxHashMap<String, ResourceEvent>,
}

impl WatchTracker {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self { resource_type: resource_type.into(), seen: FxHashMap::default() }
    }

    pub fn len(&self) -> usize { self.seen.len() }
    pub fn is_empty(&self) -> bool { self.seen.is_empty() }

    pub fn applied(&mut self, meta: &ObjectMeta) -> Option<ResourceEvent> {
        let ev = event_from_meta(&self.resource_type, meta, EventKind::Applied)?;
        if let Some(uid) = &ev.uid {
            self.seen.insert(uid.clone(), ev.clone());
        }
        Some(ev)
    }

    pub fn deleted(&mut self, meta: &ObjectMeta) -> Option<ResourceEvent> {
        let last = meta.uid.as_ref().and_then(|uid| self.seen.remove(uid));
        event_from_meta(&self.resource_type, meta, EventKind::Deleted).or_else(|| last.map(ResourceEvent::into_deleted))
    }

    /// Events for a relist: deletes for remembered objects missing from
    /// `listed`, then applies for everything listed.
    pub fn restarted<'a>(&mut self, listed: impl IntoIterator<Item = &'a ObjectMeta>) -> Vec<ResourceEvent> {
        let mut previous = std::mem::take(&mut self.seen);
        let applied: Vec<ResourceEvent> = listed
            .into_iter()
            .filter_map(|meta| {
                if let Some(uid) = &meta.uid {
                    previous.remove(uid);
                }
                self.applied(meta)
            })
            .collect();
        let mut gone: Vec<ResourceEvent> = previous.into_values().map(ResourceEvent::into_deleted).collect();
        gone.sort_by(|a, b| a.declared_name.cmp(&b.declared_name).then_with(|| a.uid.cmp(&b.uid)));
        if !gone.is_empty() {
            debug!(resource_type = %self.resource_type, count = gone.len(), "objects vanished across watch restart");
            counter!("nexus_kubehub_resync_deletes_total", gone.len() as u64);
        }
        gone.extend(applied);
        gone
    }
}

async fn forward(resource_type: &str, ev: Option<ResourceEvent>, tx: &mpsc::Sender<ResourceEvent>) -> Result<()> {
    match ev {
        Some(ev) => {
            counter!("nexus_kubehub_events_total", 1u64);
            tx.send(ev).await.map_err(|_| anyhow!("event receiver closed"))
        }
        None => {
            warn!(resource_type, "object without a name; skipped");
            Ok(())
        }
    }
}

/// Start list+watch for `resource_type` (`<plural>.<group>`) and send events into the provided channel.
pub async fn start_watcher(resource_type: &str, namespace: Option<&str>, tx: mpsc::Sender<ResourceEvent>) -> Result<()> {
    let client = Client::try_default().await?;
    let (ar, namespaced) = find_api_resource(client.clone(), resource_type).await?;

    let api: Api<DynamicObject> = if namespaced {
        match namespace {
            Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
            None => Api::all_with(client.clone(), &ar),
        }
    } else {
        Api::all_with(client.clone(), &ar)
    };

    let cfg = watcher::Config::default();
    let stream = watcher::watcher(api, cfg);
    futures::pin_mut!(stream);
    info!(resource_type, ns = ?namespace, "watcher started");
    let mut tracker = WatchTracker::new(resource_type);
    while let Some(ev) = stream.try_next().await? {
        match ev {
            Event::Applied(o) => forward(resource_type, tracker.applied(&o.metadata), &tx).await?,
            Event::Deleted(o) => forward(resource_type, tracker.deleted(&o.metadata), &tx).await?,
            Event::Restarted(list) => {
                debug!(count = list.len(), "watch restart");
                for ev in tracker.restarted(list.iter().map(|o| &o.metadata)) {
                    forward(resource_type, Some(ev), &tx).await?;
                }
            }
        }
    }
    warn!("watcher stream ended");
    Ok(())
}
