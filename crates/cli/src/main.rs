use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use nexus_core::{EventKind, ResourceEvent, ResourceLabels};
use nexus_naming::NameResolver;
use nexus_schema::HierarchySchema;
use nexus_store::{spawn_ingest, ParentChildCache};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "nexusctl", version, about = "Nexus tenancy naming and hierarchy cache tool")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Hierarchy schema file (YAML or JSON); the built-in tenancy hierarchy when unset
    #[arg(long = "schema", env = "NEXUS_SCHEMA", global = true)]
    schema: Option<std::path::PathBuf>,

    /// Ingest queue capacity
    #[arg(long = "queue-cap", env = "NEXUS_QUEUE_CAP", global = true, default_value_t = 2048)]
    queue_cap: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute the resolved identifier of a resource
    Resolve {
        /// Resource type, e.g. "projects.project.edge-orchestrator.intel.com"
        #[arg(long = "type")]
        resource_type: String,
        /// Declared (display) name
        name: String,
        /// Ancestor label as <ancestorType>=<name>; repeatable
        #[arg(short = 'l', long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
        /// Print the pre-hash key and direct parent as well
        #[arg(long = "explain", action = ArgAction::SetTrue)]
        explain: bool,
    },
    /// Print the hierarchy schema (optionally one type)
    Schema {
        #[arg(long = "type")]
        resource_type: Option<String>,
    },
    /// Replay a JSON Lines file of resource events into a cache and print the resulting hierarchy
    Replay {
        path: std::path::PathBuf,
        /// How long to wait for the ingest loop to settle
        #[arg(long = "wait-secs", env = "NEXUS_WAIT_SECS", default_value_t = 8)]
        wait_secs: u64,
    },
    /// Discover served resources, marking those known to the schema
    Discover {
        /// Only groups ending with this suffix
        #[arg(long = "group-suffix", default_value = "edge-orchestrator.intel.com")]
        group_suffix: String,
    },
    /// Watch resource types and print +/- cache changes
    Watch {
        /// Resource types to watch; every schema type when empty
        types: Vec<String>,
        /// Kubernetes namespace (all namespaces when unset)
        #[arg(long = "ns")]
        namespace: Option<String>,
    },
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected <ancestorType>=<name>, got {s:?}")),
    }
}

fn init_tracing() {
    let env = std::env::var("NEXUS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("NEXUS_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid NEXUS_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_schema(path: Option<&std::path::Path>) -> Result<HierarchySchema> {
    let schema = match path {
        Some(p) => HierarchySchema::from_path(p).with_context(|| format!("loading hierarchy schema {}", p.display()))?,
        None => HierarchySchema::tenancy(),
    };
    for a in schema.undeclared_ancestors() {
        warn!(ancestor = a, "ancestor type is not declared in the schema; it will hash as a root");
    }
    Ok(schema)
}

#[derive(serde::Serialize)]
struct ChildRow {
    parent_type: String,
    parent_name: String,
    parent_id: String,
    child_type: String,
    children: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let schema = Arc::new(load_schema(cli.schema.as_deref())?);
    let resolver = NameResolver::new(Arc::clone(&schema));

    match cli.command {
        Commands::Resolve { resource_type, name, labels, explain } => {
            let labels: ResourceLabels = labels.into_iter().collect();
            let id = resolver.resolve(&resource_type, &labels, &name);
            match cli.output {
                Output::Human => {
                    println!("{}", id);
                    if explain {
                        println!("key:    {}", resolver.compose_key(&resource_type, &labels, &name));
                        match resolver.resolve_parent(&resource_type, &labels) {
                            Some(p) => println!("parent: {}/{} ({})", p.resource_type, p.declared_name, p.identifier),
                            None => println!("parent: (root)"),
                        }
                    }
                }
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Resolved { identifier: String, key: Option<String>, parent: Option<ParentOut> }
                    #[derive(serde::Serialize)]
                    struct ParentOut { resource_type: String, declared_name: String, identifier: String }
                    let parent = resolver.resolve_parent(&resource_type, &labels).map(|p| ParentOut {
                        resource_type: p.resource_type,
                        declared_name: p.declared_name,
                        identifier: p.identifier.into_string(),
                    });
                    let out = Resolved {
                        identifier: id.into_string(),
                        key: explain.then(|| resolver.compose_key(&resource_type, &labels, &name)),
                        parent: if explain { parent } else { None },
                    };
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }
        Commands::Schema { resource_type } => {
            let entries: Vec<_> = schema
                .entries()
                .iter()
                .filter(|e| resource_type.as_deref().map(|t| e.resource_type == t).unwrap_or(true))
                .collect();
            if entries.is_empty() {
                if let Some(t) = resource_type {
                    return Err(anyhow!("resource type not in schema: {}", t));
                }
            }
            match cli.output {
                Output::Human => {
                    for e in entries {
                        if e.ancestors.is_empty() {
                            println!("{}  (root)", e.resource_type);
                        } else {
                            println!("{}  <- {}", e.resource_type, e.ancestors.join(" / "));
                        }
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
            }
        }
        Commands::Replay { path, wait_secs } => {
            let doc = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let mut events = Vec::new();
            for (i, line) in doc.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') { continue; }
                let ev: ResourceEvent = serde_json::from_str(line).with_context(|| format!("{}:{}: parsing event", path.display(), i + 1))?;
                events.push(ev);
            }
            info!(path = %path.display(), events = events.len(), "replay invoked");

            let (tx, handle) = spawn_ingest(cli.queue_cap, Arc::new(ParentChildCache::new()), resolver.clone());
            let mut rx = handle.subscribe_epoch();
            for ev in events.iter().cloned() {
                tx.send(ev).await.map_err(|_| anyhow!("ingest loop stopped early"))?;
            }
            drop(tx);

            // Wait until the loop closes its epoch channel (all events drained) or the deadline passes
            let deadline = Instant::now() + Duration::from_secs(wait_secs);
            loop {
                let now = Instant::now();
                if now >= deadline { warn!("replay wait deadline reached"); break; }
                match tokio::time::timeout(deadline - now, rx.changed()).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(_)) => break,
                    Err(_) => { warn!("replay wait deadline reached"); break; }
                }
            }

            let mut seen = std::collections::BTreeSet::new();
            let mut rows = Vec::new();
            for ev in &events {
                let Some(parent) = resolver.resolve_parent(&ev.resource_type, &ev.labels) else { continue };
                if !seen.insert((parent.resource_type.clone(), parent.identifier.clone(), ev.resource_type.clone())) { continue; }
                let mut children = handle.cache().list_children(&parent.resource_type, parent.identifier.as_str(), &ev.resource_type);
                children.sort_unstable();
                rows.push(ChildRow {
                    parent_type: parent.resource_type,
                    parent_name: parent.declared_name,
                    parent_id: parent.identifier.into_string(),
                    child_type: ev.resource_type.clone(),
                    children,
                });
            }
            match cli.output {
                Output::Human => {
                    for r in rows {
                        println!("{}/{} ({})", r.parent_type, r.parent_name, r.parent_id);
                        if r.children.is_empty() {
                            println!("  {}: (none)", r.child_type);
                        }
                        for c in r.children {
                            println!("  {}: {}", r.child_type, c);
                        }
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }
        Commands::Discover { group_suffix } => {
            info!(group_suffix = %group_suffix, "discover invoked");
            let suffix = (!group_suffix.is_empty()).then_some(group_suffix.as_str());
            match nexus_kubehub::discover(suffix).await {
                Ok(resources) => match cli.output {
                    Output::Human => {
                        for r in resources {
                            let scope = if r.namespaced { "namespaced" } else { "cluster" };
                            let known = if schema.contains(&r.resource_type()) { "schema" } else { "-" };
                            println!("{} • {} • {} • {}", r.resource_type(), r.kind, scope, known);
                        }
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&resources)?),
                },
                Err(e) => {
                    error!(error = ?e, "discover failed");
                    eprintln!("discover error: {}", e);
                }
            }
        }
        Commands::Watch { types, namespace } => {
            let types = if types.is_empty() {
                schema.entries().iter().map(|e| e.resource_type.clone()).collect()
            } else {
                types
            };
            info!(types = types.len(), ns = ?namespace, "watch invoked");
            let cache = Arc::new(ParentChildCache::new());
            let (ingest_tx, handle) = spawn_ingest(cli.queue_cap, Arc::clone(&cache), resolver.clone());
            let (tap_tx, mut tap_rx) = mpsc::channel::<ResourceEvent>(cli.queue_cap.max(1));

            let watchers: Vec<_> = types
                .into_iter()
                .map(|ty| {
                    let ns = namespace.clone();
                    let tap_tx = tap_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = nexus_kubehub::start_watcher(&ty, ns.as_deref(), tap_tx).await {
                            error!(resource_type = %ty, error = ?e, "watcher failed");
                        }
                    })
                })
                .collect();
            drop(tap_tx);

            loop {
                tokio::select! {
                    maybe = tap_rx.recv() => {
                        match maybe {
                            Some(ev) => {
                                let id = resolver.resolve(&ev.resource_type, &ev.labels, &ev.declared_name);
                                let sign = match ev.kind { EventKind::Applied => '+', EventKind::Deleted => '-' };
                                let parent = resolver
                                    .resolve_parent(&ev.resource_type, &ev.labels)
                                    .map(|p| format!("{}/{}", p.resource_type, p.declared_name))
                                    .unwrap_or_else(|| "(root)".to_string());
                                println!("{} {}/{} ({}) under {}", sign, ev.resource_type, ev.declared_name, id, parent);
                                // forward to ingest (best-effort)
                                let _ = ingest_tx.send(ev).await;
                            }
                            None => {
                                warn!("all watchers ended; exiting watch loop");
                                break;
                            }
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; shutting down watch loop");
                        break;
                    }
                }
            }

            // Graceful shutdown: close ingest and abort watchers so the final batch is applied
            drop(ingest_tx);
            for w in watchers { w.abort(); }
            warn!(epoch = handle.epoch(), "watch loop ended (graceful shutdown)");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_arguments_split_on_first_equals() {
        assert_eq!(parse_label("orgs=acme"), Ok(("orgs".to_string(), "acme".to_string())));
        assert_eq!(parse_label("orgs=a=b"), Ok(("orgs".to_string(), "a=b".to_string())));
        assert!(parse_label("=acme").is_err());
        assert!(parse_label("orgs").is_err());
    }

    #[test]
    fn cli_parses_resolve_invocation() {
        let cli = Cli::try_parse_from([
            "nexusctl", "resolve", "--type", "projects.project.edge-orchestrator.intel.com",
            "-l", "orgs.org.edge-orchestrator.intel.com=acme", "proj1", "--explain",
        ])
        .unwrap();
        match cli.command {
            Commands::Resolve { resource_type, name, labels, explain } => {
                assert_eq!(resource_type, "projects.project.edge-orchestrator.intel.com");
                assert_eq!(name, "proj1");
                assert_eq!(labels.len(), 1);
                assert!(explain);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
