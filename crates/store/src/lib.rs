//! Nexus store: parent/child existence cache and the event ingest loop feeding it.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use nexus_core::{EventKind, ResolvedIdentifier, ResourceEvent};
use nexus_naming::NameResolver;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub mod cache;

pub use cache::ParentChildCache;

/// A resolved parent -> child edge, ready to be written to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub kind: EventKind,
    pub parent_type: String,
    pub parent_id: ResolvedIdentifier,
    pub child_type: String,
    pub child_id: ResolvedIdentifier,
    pub uid: Option<String>,
}

impl Link {
    fn same_edge(&self, other: &Link) -> bool {
        self.parent_type == other.parent_type
            && self.parent_id == other.parent_id
            && self.child_type == other.child_type
            && self.child_id == other.child_id
    }
}

/// Objects with a uid coalesce by uid, so a rename or re-parent collapses
/// into its latest state. Objects without one coalesce by resolved child.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LinkKey {
    Uid(String),
    Child(String, ResolvedIdentifier),
}

impl LinkKey {
    fn of(link: &Link) -> Self {
        match &link.uid {
            Some(uid) => LinkKey::Uid(uid.clone()),
            None => LinkKey::Child(link.child_type.clone(), link.child_id.clone()),
        }
    }
}

/// Coalescing queue: FIFO by first arrival, latest event per object wins.
/// Never drops; `push` reports when the queue is full.
pub struct Coalescer {
    map: FxHashMap<LinkKey, Link>,
    order: VecDeque<LinkKey>,
    cap: usize,
}

impl Coalescer {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap: cap.max(1) }
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }

    /// Queue a link; returns `true` once the queue holds `cap` distinct objects.
    pub fn push(&mut self, link: Link) -> bool {
        let key = LinkKey::of(&link);
        if !self.map.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.map.insert(key, link);
        self.map.len() >= self.cap
    }

    pub fn drain_ready(&mut self) -> Vec<Link> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(key) = self.order.pop_front() {
            if let Some(l) = self.map.remove(&key) {
                out.push(l);
            }
        }
        out
    }
}

/// Events the writer could not turn into links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounts {
    /// Schema roots: nothing to hang them under.
    pub roots: u64,
    /// Types missing from the hierarchy schema.
    pub unknown_types: u64,
}

/// Turns resource events into cache writes.
///
/// Remembers the edge last written for every uid so that an update moving an
/// object (new parent labels or display name) unlinks the old edge, and a
/// delete unlinks whatever edge the object currently holds.
pub struct CacheWriter {
    cache: Arc<ParentChildCache>,
    resolver: NameResolver,
    by_uid: FxHashMap<String, Link>,
    skipped: SkipCounts,
    epoch: u64,
}

impl CacheWriter {
    pub fn new(cache: Arc<ParentChildCache>, resolver: NameResolver) -> Self {
        Self { cache, resolver, by_uid: FxHashMap::default(), skipped: SkipCounts::default(), epoch: 0 }
    }

    pub fn epoch(&self) -> u64 { self.epoch }
    pub fn cache(&self) -> &Arc<ParentChildCache> { &self.cache }
    pub fn skipped(&self) -> SkipCounts { self.skipped }

    /// Number of objects whose current edge is known by uid.
    pub fn tracked(&self) -> usize { self.by_uid.len() }

    /// Resolve an event into a link. Root and unknown types yield `None`.
    pub fn link(&mut self, ev: &ResourceEvent) -> Option<Link> {
        if !self.resolver.schema().contains(&ev.resource_type) {
            nexus_naming::report_unknown_type(&ev.resource_type);
            self.skipped.unknown_types += 1;
            return None;
        }
        let Some(parent) = self.resolver.resolve_parent(&ev.resource_type, &ev.labels) else {
            counter!("nexus_ingest_root_skipped_total", 1u64);
            debug!(resource_type = %ev.resource_type, name = %ev.declared_name, "no parent; not cached");
            self.skipped.roots += 1;
            return None;
        };
        Some(Link {
            kind: ev.kind,
            parent_type: parent.resource_type,
            parent_id: parent.identifier,
            child_type: ev.resource_type.clone(),
            child_id: self.resolver.resolve(&ev.resource_type, &ev.labels, &ev.declared_name),
            uid: ev.uid.clone(),
        })
    }

    fn unlink(&self, l: &Link) {
        self.cache.remove_child(&l.parent_type, l.parent_id.as_str(), &l.child_type, l.child_id.as_str());
    }

    /// Write a batch to the cache and advance the epoch.
    pub fn apply(&mut self, batch: Vec<Link>) {
        histogram!("nexus_ingest_batch_size", batch.len() as f64);
        for l in batch {
            match l.kind {
                EventKind::Applied => {
                    if let Some(uid) = &l.uid {
                        if let Some(prev) = self.by_uid.insert(uid.clone(), l.clone()) {
                            if !prev.same_edge(&l) {
                                debug!(uid = %uid, child_type = %l.child_type, "object moved; unlinking previous edge");
                                self.unlink(&prev);
                            }
                        }
                    }
                    self.cache.add_child(&l.parent_type, l.parent_id.as_str(), &l.child_type, l.child_id.as_str());
                }
                EventKind::Deleted => {
                    if let Some(prev) = l.uid.as_ref().and_then(|uid| self.by_uid.remove(uid)) {
                        if !prev.same_edge(&l) {
                            self.unlink(&prev);
                        }
                    }
                    self.unlink(&l);
                }
            }
        }
        self.epoch = self.epoch.saturating_add(1);
        gauge!("nexus_ingest_epoch", self.epoch as f64);
    }

    /// Resolve and apply events directly, bypassing the queue.
    pub fn apply_events<'a>(&mut self, events: impl IntoIterator<Item = &'a ResourceEvent>) {
        let batch: Vec<Link> = events.into_iter().filter_map(|ev| self.link(ev)).collect();
        self.apply(batch);
    }
}

/// Handle for readers: the shared cache plus a subscription to batch epochs.
#[derive(Clone)]
pub struct IngestHandle {
    cache: Arc<ParentChildCache>,
    epoch_rx: watch::Receiver<u64>,
}

impl IngestHandle {
    pub fn cache(&self) -> &Arc<ParentChildCache> { &self.cache }
    pub fn epoch(&self) -> u64 { *self.epoch_rx.borrow() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }
}

/// Spawn an ingest loop writing events into `cache`. Returns a sender for events and a handle for reads.
///
/// Dropping every sender drains pending events and stops the loop.
pub fn spawn_ingest(cap: usize, cache: Arc<ParentChildCache>, resolver: NameResolver) -> (mpsc::Sender<ResourceEvent>, IngestHandle) {
    let (tx, mut rx) = mpsc::channel::<ResourceEvent>(cap.max(1));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let handle = IngestHandle { cache: Arc::clone(&cache), epoch_rx };

    tokio::spawn(async move {
        let mut coalescer = Coalescer::with_capacity(cap);
        let mut writer = CacheWriter::new(cache, resolver);
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(8));
        let flush = |coalescer: &mut Coalescer, writer: &mut CacheWriter| {
            let batch = coalescer.drain_ready();
            if !batch.is_empty() {
                writer.apply(batch);
                let _ = epoch_tx.send(writer.epoch());
            }
        };
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(ev) => {
                            if let Some(link) = writer.link(&ev) {
                                if coalescer.push(link) {
                                    flush(&mut coalescer, &mut writer);
                                }
                            }
                        }
                        None => {
                            debug!("event channel closed; draining and exiting ingest loop");
                            flush(&mut coalescer, &mut writer);
                            break;
                        }
                    }
                }
                _ = ticker.tick() => flush(&mut coalescer, &mut writer),
            }
        }
        info!(epoch = writer.epoch(), "ingest loop stopped");
    });

    (tx, handle)
}
