//! Long-running manager client.
//!
//! The long-running manager is the external service that keeps
//! applications alive and reports how many of their tasks are running and
//! healthy. The trait is the seam; [`HttpManager`] speaks its v2 JSON API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use gantry_core::Docker;

use crate::error::{EngineError, EngineResult};

/// HTTP healthcheck attached to a created application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthcheckSpec {
    pub protocol: String,
    pub path: String,
    pub grace_period_seconds: u32,
    pub interval_seconds: u32,
    pub port_index: u32,
    pub max_consecutive_failures: u32,
    pub timeout_seconds: u32,
}

impl HealthcheckSpec {
    /// The defaults every stack application gets for its HTTP healthcheck.
    pub fn http(path: &str) -> Self {
        Self {
            protocol: "HTTP".to_string(),
            path: path.to_string(),
            grace_period_seconds: 120,
            interval_seconds: 60,
            port_index: 0,
            max_consecutive_failures: 3,
            timeout_seconds: 30,
        }
    }
}

/// The application record handed to the long-running manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppRecord {
    pub id: String,
    pub cmd: String,
    pub instances: u32,
    pub cpus: f64,
    pub mem: f64,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub constraints: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthcheckSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<Docker>,
}

/// Task counts reported for one managed application.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AppStatus {
    #[serde(default)]
    pub tasks_running: u32,
    #[serde(default)]
    pub tasks_healthy: u32,
}

/// One live task of a managed application.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManagerTask {
    pub id: String,
    pub host: String,
    #[serde(default)]
    pub ports: Vec<u16>,
}

/// Connection details of the manager itself.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerInfo {
    pub master: String,
}

/// The seam towards the long-running manager.
#[async_trait]
pub trait LongRunningManager: Send + Sync {
    async fn info(&self) -> EngineResult<ManagerInfo>;

    async fn create_application(&self, record: &AppRecord) -> EngineResult<()>;

    async fn application_status(&self, id: &str) -> EngineResult<AppStatus>;

    async fn tasks(&self, id: &str) -> EngineResult<Vec<ManagerTask>>;
}

/// HTTP client for the manager's v2 API.
pub struct HttpManager {
    base: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct InfoResponse {
    marathon_config: MasterConfig,
}

#[derive(Deserialize)]
struct MasterConfig {
    master: String,
}

#[derive(Deserialize)]
struct AppResponse {
    app: AppCounts,
}

#[derive(Deserialize)]
struct AppCounts {
    #[serde(rename = "tasksRunning", default)]
    tasks_running: u32,
    #[serde(rename = "tasksHealthy", default)]
    tasks_healthy: u32,
}

#[derive(Deserialize)]
struct TasksResponse {
    tasks: Vec<ManagerTask>,
}

impl HttpManager {
    pub fn new(url: &str) -> Self {
        let mut base = url.to_string();
        if !base.starts_with("http://") && !base.starts_with("https://") {
            base = format!("http://{base}");
        }

        Self {
            base: base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Connect with bounded retries, probing the info endpoint until the
    /// manager answers.
    pub async fn connect(url: &str, retries: u32, backoff: Duration) -> EngineResult<Self> {
        let manager = Self::new(url);
        let mut last_error = EngineError::Manager("no connection attempts".to_string());

        for attempt in 1..=retries.max(1) {
            info!(url, attempt, "connecting to long-running manager");
            match manager.info().await {
                Ok(_) => return Ok(manager),
                Err(e) => {
                    debug!(error = %e, "manager not reachable yet");
                    last_error = e;
                }
            }
            tokio::time::sleep(backoff).await;
        }

        warn!(url, "giving up on long-running manager");
        Err(last_error)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> EngineResult<T> {
        self.client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| EngineError::Manager(e.to_string()))?
            .error_for_status()
            .map_err(|e| EngineError::Manager(e.to_string()))?
            .json()
            .await
            .map_err(|e| EngineError::Manager(e.to_string()))
    }
}

#[async_trait]
impl LongRunningManager for HttpManager {
    async fn info(&self) -> EngineResult<ManagerInfo> {
        let response: InfoResponse = self.get_json("/v2/info").await?;
        Ok(ManagerInfo {
            master: response.marathon_config.master,
        })
    }

    async fn create_application(&self, record: &AppRecord) -> EngineResult<()> {
        debug!(application = %record.id, instances = record.instances, "creating application");
        self.client
            .post(self.url("/v2/apps"))
            .json(record)
            .send()
            .await
            .map_err(|e| EngineError::Manager(e.to_string()))?
            .error_for_status()
            .map_err(|e| EngineError::Manager(e.to_string()))?;
        Ok(())
    }

    async fn application_status(&self, id: &str) -> EngineResult<AppStatus> {
        let response: AppResponse = self.get_json(&format!("/v2/apps/{id}")).await?;
        Ok(AppStatus {
            tasks_running: response.app.tasks_running,
            tasks_healthy: response.app.tasks_healthy,
        })
    }

    async fn tasks(&self, id: &str) -> EngineResult<Vec<ManagerTask>> {
        let response: TasksResponse = self.get_json(&format!("/v2/apps/{id}/tasks")).await?;
        Ok(response.tasks)
    }
}
