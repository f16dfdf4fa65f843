//! Loading of node definitions and queue-to-node mappings.
//!
//! Both are read from directories of TOML files. Loading is best effort: a
//! directory or file that cannot be read or parsed is logged and skipped, and
//! whatever could be loaded from the remaining inputs is returned.
//!
//! Queue mapping files end in `node-to-queue-mapping.toml`:
//!
//! ```toml
//! [[node]]
//! id = "node-1"
//! queues = ["default", "high-mem"]
//! ```
//!
//! Node definition files end in `nodes.toml`:
//!
//! ```toml
//! [[node]]
//! id = "node-1"
//! address = "http://10.0.0.1:2001"
//! capacity = 8
//! ```
//!
//! A backend file, used by the queue-mux monitor, names the monitor that
//! tracks each queue's nodes:
//!
//! ```toml
//! [[queue]]
//! name = "default"
//! monitor = "assignment"
//!
//! [[queue]]
//! name = "gpu"
//! monitor = "feed"
//! feed_path = "/var/run/resmgr/gpu-loads.json"
//! poll_interval_ms = 2000
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::config::MonitorKind;
use crate::error::MappingError;
use crate::monitor::ResourceNode;

pub const QUEUE_MAPPING_SUFFIX: &str = "node-to-queue-mapping.toml";
pub const NODES_SUFFIX: &str = "nodes.toml";

/// Queue name to the ordered ids of the nodes serving it.
pub type QueueMapping = HashMap<String, Vec<String>>;

#[derive(Debug, Deserialize)]
struct QueueMappingFile {
    #[serde(default)]
    node: Vec<NodeQueues>,
}

#[derive(Debug, Deserialize)]
struct NodeQueues {
    id: String,
    #[serde(default)]
    queues: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NodesFile {
    #[serde(default)]
    node: Vec<ResourceNode>,
}

const DEFAULT_BACKEND_POLL_MS: u64 = 5_000;

#[derive(Debug, Deserialize)]
struct BackendsFile {
    #[serde(default)]
    queue: Vec<BackendEntry>,
}

#[derive(Debug, Deserialize)]
struct BackendEntry {
    name: String,
    monitor: String,
    feed_path: Option<PathBuf>,
    #[serde(default = "default_backend_poll_ms")]
    poll_interval_ms: u64,
}

fn default_backend_poll_ms() -> u64 {
    DEFAULT_BACKEND_POLL_MS
}

/// The monitor serving one queue under the queue-mux monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBackend {
    pub queue: String,
    pub monitor: MonitorKind,
}

/// Load the backend monitor of each queue from the TOML file at `uri`.
///
/// Entries with an unknown or nested queue-mux monitor are logged and
/// skipped. A later entry for the same queue replaces an earlier one.
pub fn load_backends(uri: &str) -> Result<Vec<QueueBackend>, MappingError> {
    let path = dir_path(uri)?;
    let file: BackendsFile = read_toml(&path)?;

    let mut backends: Vec<QueueBackend> = Vec::new();
    for entry in file.queue {
        let monitor = match MonitorKind::parse(
            &entry.monitor,
            entry.feed_path,
            entry.poll_interval_ms,
            None,
        ) {
            Ok(MonitorKind::QueueMux { .. }) => {
                tracing::warn!(queue = %entry.name, "Queue-mux backends cannot nest, skipping");
                continue;
            }
            Ok(monitor) => monitor,
            Err(e) => {
                tracing::warn!(queue = %entry.name, error = %e, "Skipping queue backend");
                continue;
            }
        };
        let backend = QueueBackend {
            queue: entry.name,
            monitor,
        };
        match backends.iter_mut().find(|b| b.queue == backend.queue) {
            Some(existing) => *existing = backend,
            None => backends.push(backend),
        }
    }

    tracing::info!(path = %path.display(), queues = backends.len(), "Queue backends loaded");
    Ok(backends)
}

/// Load the queue mapping from every `*node-to-queue-mapping.toml` file in
/// `dirs`. Node ids are appended in discovery order: directories in the order
/// given, files by name, nodes in file order.
pub fn load_queue_mapping(dirs: &[String]) -> QueueMapping {
    let mut mapping = QueueMapping::new();

    for path in mapping_files(dirs, QUEUE_MAPPING_SUFFIX) {
        let file: QueueMappingFile = match read_toml(&path) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping queue mapping file");
                continue;
            }
        };

        for node in file.node {
            for queue in node.queues {
                let nodes = mapping.entry(queue).or_default();
                if !nodes.contains(&node.id) {
                    nodes.push(node.id.clone());
                }
            }
        }
        tracing::debug!(path = %path.display(), "Loaded queue mapping file");
    }

    tracing::info!(queues = mapping.len(), "Queue mapping loaded");
    mapping
}

/// Load node definitions from every `*nodes.toml` file in `dirs`. A later
/// definition of the same node id replaces an earlier one.
pub fn load_nodes(dirs: &[String]) -> Vec<ResourceNode> {
    let mut nodes: Vec<ResourceNode> = Vec::new();

    for path in mapping_files(dirs, NODES_SUFFIX) {
        let file: NodesFile = match read_toml(&path) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping node definition file");
                continue;
            }
        };

        for node in file.node {
            match nodes.iter_mut().find(|n| n.id == node.id) {
                Some(existing) => *existing = node,
                None => nodes.push(node),
            }
        }
    }

    tracing::info!(nodes = nodes.len(), "Node definitions loaded");
    nodes
}

/// Every file in `dirs` whose name ends with `suffix`, bad directories skipped.
fn mapping_files(dirs: &[String], suffix: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for uri in dirs {
        match list_dir(uri, suffix) {
            Ok(mut found) => files.append(&mut found),
            Err(e) => {
                tracing::warn!(dir = %uri, error = %e, "Skipping mapping directory");
            }
        }
    }
    files
}

fn list_dir(uri: &str, suffix: &str) -> Result<Vec<PathBuf>, MappingError> {
    let dir = dir_path(uri)?;
    if !dir.is_dir() {
        return Err(MappingError::NotADirectory(dir));
    }

    let entries = fs::read_dir(&dir).map_err(|source| MappingError::Io {
        path: dir.clone(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(suffix))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Accepts either a plain filesystem path or a `file://` URI.
pub fn dir_path(uri: &str) -> Result<PathBuf, MappingError> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return Err(MappingError::InvalidUri {
            uri: uri.to_string(),
            reason: "empty".to_string(),
        });
    }
    if !trimmed.contains("://") {
        return Ok(PathBuf::from(trimmed));
    }

    let url = Url::parse(trimmed).map_err(|e| MappingError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "file" {
        return Err(MappingError::InvalidUri {
            uri: uri.to_string(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    url.to_file_path().map_err(|_| MappingError::InvalidUri {
        uri: uri.to_string(),
        reason: "not a local file path".to_string(),
    })
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, MappingError> {
    let text = fs::read_to_string(path).map_err(|source| MappingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| MappingError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
