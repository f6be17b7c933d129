//! Cluster-state view — a refreshable snapshot of worker nodes.
//!
//! The view caches the cluster manager's state document (activated worker
//! count plus per-worker records) behind a lock. `refresh()` fetches a new
//! document and atomically replaces the cached snapshot; readers clone the
//! snapshot so one placement decision sees a consistent cluster.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};

/// One worker node as reported by the cluster manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub id: String,
    pub hostname: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub resources: HashMap<String, serde_json::Value>,
}

impl Worker {
    /// Attribute lookup with the synthetic `hostname` attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        if name == "hostname" {
            return Some(&self.hostname);
        }

        self.attributes.get(name).map(String::as_str)
    }
}

/// A consistent point-in-time view of the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub activated_workers: u32,
    #[serde(default)]
    pub workers: Vec<Worker>,
}

impl ClusterSnapshot {
    /// Workers currently marked active.
    pub fn active_workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.iter().filter(|w| w.active)
    }
}

/// Fetches the cluster manager's state document.
#[async_trait]
pub trait ClusterStateSource: Send + Sync {
    async fn fetch(&self) -> ClusterResult<ClusterSnapshot>;
}

/// HTTP source reading `<master>/master/state.json`.
pub struct HttpStateSource {
    master: String,
    client: reqwest::Client,
}

/// Wire shape of the master state document.
#[derive(Deserialize)]
struct StateDocument {
    #[serde(default)]
    activated_slaves: f64,
    #[serde(default)]
    slaves: Vec<SlaveRecord>,
}

#[derive(Deserialize)]
struct SlaveRecord {
    #[serde(default)]
    id: String,
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    attributes: HashMap<String, String>,
    #[serde(default)]
    resources: HashMap<String, serde_json::Value>,
}

impl HttpStateSource {
    /// Create a source for the given master address; a bare `host:port` is
    /// promoted to an http URL and trailing slashes are stripped.
    pub fn new(master: &str) -> Self {
        let mut master = master.to_string();
        if !master.starts_with("http://") && !master.starts_with("https://") {
            master = format!("http://{master}");
        }
        let master = master.trim_end_matches('/').to_string();

        Self {
            master,
            client: reqwest::Client::new(),
        }
    }

    /// The normalized master URL.
    pub fn master(&self) -> &str {
        &self.master
    }
}

#[async_trait]
impl ClusterStateSource for HttpStateSource {
    async fn fetch(&self) -> ClusterResult<ClusterSnapshot> {
        let url = format!("{}/master/state.json", self.master);
        let document: StateDocument = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ClusterError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| ClusterError::Decode(e.to_string()))?;

        Ok(ClusterSnapshot {
            activated_workers: document.activated_slaves as u32,
            workers: document
                .slaves
                .into_iter()
                .map(|s| Worker {
                    id: s.id,
                    hostname: s.hostname,
                    active: s.active,
                    attributes: s.attributes,
                    resources: s.resources,
                })
                .collect(),
        })
    }
}

/// Thread-safe cached cluster view.
pub struct ClusterView {
    source: Box<dyn ClusterStateSource>,
    snapshot: RwLock<ClusterSnapshot>,
}

impl ClusterView {
    pub fn new(source: Box<dyn ClusterStateSource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(ClusterSnapshot::default()),
        }
    }

    /// Fetch a fresh state document and atomically replace the snapshot.
    pub async fn refresh(&self) -> ClusterResult<()> {
        let fresh = self.source.fetch().await?;
        debug!(
            activated_workers = fresh.activated_workers,
            workers = fresh.workers.len(),
            "cluster state refreshed"
        );

        let mut snapshot = self.snapshot.write().expect("cluster snapshot poisoned");
        *snapshot = fresh;
        Ok(())
    }

    /// A consistent clone of the current snapshot.
    pub fn snapshot(&self) -> ClusterSnapshot {
        self.snapshot
            .read()
            .expect("cluster snapshot poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(ClusterSnapshot);

    #[async_trait]
    impl ClusterStateSource for FixedSource {
        async fn fetch(&self) -> ClusterResult<ClusterSnapshot> {
            Ok(self.0.clone())
        }
    }

    fn worker(id: &str, hostname: &str, active: bool) -> Worker {
        Worker {
            id: id.to_string(),
            hostname: hostname.to_string(),
            active,
            attributes: HashMap::from([("rack".to_string(), "rack-1".to_string())]),
            resources: HashMap::new(),
        }
    }

    #[test]
    fn worker_attribute_resolves_hostname() {
        let w = worker("s1", "h1", true);
        assert_eq!(w.attribute("hostname"), Some("h1"));
        assert_eq!(w.attribute("rack"), Some("rack-1"));
        assert_eq!(w.attribute("zone"), None);
    }

    #[test]
    fn snapshot_filters_active_workers() {
        let snapshot = ClusterSnapshot {
            activated_workers: 1,
            workers: vec![worker("s1", "h1", true), worker("s2", "h2", false)],
        };
        let active: Vec<_> = snapshot.active_workers().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].hostname, "h1");
    }

    #[tokio::test]
    async fn refresh_replaces_snapshot() {
        let view = ClusterView::new(Box::new(FixedSource(ClusterSnapshot {
            activated_workers: 2,
            workers: vec![worker("s1", "h1", true), worker("s2", "h2", true)],
        })));

        assert_eq!(view.snapshot().activated_workers, 0);
        view.refresh().await.unwrap();

        let snapshot = view.snapshot();
        assert_eq!(snapshot.activated_workers, 2);
        assert_eq!(snapshot.workers.len(), 2);
    }

    #[test]
    fn http_source_normalizes_master_address() {
        let source = HttpStateSource::new("10.0.0.1:5050/");
        assert_eq!(source.master(), "http://10.0.0.1:5050");

        let source = HttpStateSource::new("https://master.internal");
        assert_eq!(source.master(), "https://master.internal");
    }

    #[test]
    fn state_document_decodes_master_shape() {
        let json = r#"{
            "activated_slaves": 2.0,
            "slaves": [
                {"id": "s1", "hostname": "h1", "active": true,
                 "attributes": {"rack": "rack-1"},
                 "resources": {"cpus": 4.0, "mem": 8192.0}}
            ]
        }"#;
        let doc: StateDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.activated_slaves as u32, 2);
        assert_eq!(doc.slaves[0].hostname, "h1");
        assert_eq!(doc.slaves[0].attributes["rack"], "rack-1");
    }
}
