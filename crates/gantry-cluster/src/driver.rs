//! Driver seam towards the cluster manager.
//!
//! The scheduler decides placements; the driver carries them to the cluster
//! manager: framework registration, task launches, offer declines and task
//! kills. A thin REST implementation is provided; anything that speaks the
//! manager's native protocol can be plugged in instead.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};
use crate::offer::Offer;

/// Lifecycle states a launched task moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Staging,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
    Error,
}

impl TaskState {
    /// Terminal without success.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskState::Failed | TaskState::Lost | TaskState::Error)
    }

    /// Terminal with success (finished or deliberately killed).
    pub fn is_complete(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Killed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Staging => "STAGING",
            TaskState::Starting => "STARTING",
            TaskState::Running => "RUNNING",
            TaskState::Finished => "FINISHED",
            TaskState::Failed => "FAILED",
            TaskState::Killed => "KILLED",
            TaskState::Lost => "LOST",
            TaskState::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

/// A status update for a launched task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub state: TaskState,
    #[serde(default)]
    pub message: String,
}

/// An artifact to fetch into the task sandbox before launch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactUri {
    pub value: String,
    pub extract: bool,
}

/// Everything the cluster manager needs to start one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub name: String,
    /// Shell command executed in the task sandbox.
    pub command: String,
    pub cpus: f64,
    pub mem: f64,
    #[serde(default)]
    pub uris: Vec<ArtifactUri>,
}

/// Identity under which the service registers with the cluster manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub name: String,
    pub user: String,
    pub role: String,
    /// Seconds the registration survives a disconnect.
    pub failover_timeout: f64,
    /// A previously persisted registration id, for re-registration.
    pub id: Option<String>,
}

/// Commands the scheduler issues against the cluster manager.
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    /// Register (or re-register) and return the registration id.
    async fn register(&self, info: &FrameworkInfo) -> ClusterResult<String>;

    /// Launch one task on an offer, refusing further offers from the same
    /// worker for `refuse_seconds`.
    async fn launch(&self, offer_id: &str, task: &TaskSpec, refuse_seconds: f64)
        -> ClusterResult<()>;

    /// Decline an offer with a reason.
    async fn decline(&self, offer_id: &str, reason: &str, refuse_seconds: f64)
        -> ClusterResult<()>;

    /// Ask the manager to resend previously declined offers.
    async fn revive(&self) -> ClusterResult<()>;
}

/// Events delivered by the cluster manager to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterEvent {
    Offer { offer: Offer },
    Status { status: TaskStatus },
}

/// REST driver speaking plain JSON to the manager's scheduler endpoint.
pub struct RestDriver {
    base: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct LaunchRequest<'a> {
    offer_id: &'a str,
    task: &'a TaskSpec,
    refuse_seconds: f64,
}

#[derive(Serialize)]
struct DeclineRequest<'a> {
    offer_id: &'a str,
    reason: &'a str,
    refuse_seconds: f64,
}

#[derive(Deserialize)]
struct RegisterResponse {
    framework_id: String,
}

impl RestDriver {
    pub fn new(master: &str) -> Self {
        let mut base = master.to_string();
        if !base.starts_with("http://") && !base.starts_with("https://") {
            base = format!("http://{base}");
        }

        Self {
            base: base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> ClusterResult<reqwest::Response> {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ClusterError::Driver(e.to_string()))
    }

    /// Fetch pending events for this framework; the manager keeps the
    /// request open until events are available or its poll window ends.
    pub async fn poll_events(&self, framework_id: &str) -> ClusterResult<Vec<ClusterEvent>> {
        let url = self.url(&format!("/scheduler/events?framework={framework_id}"));
        let events: Vec<ClusterEvent> = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ClusterError::Driver(e.to_string()))?
            .json()
            .await
            .map_err(|e| ClusterError::Decode(e.to_string()))?;

        Ok(events)
    }
}

#[async_trait]
impl ClusterDriver for RestDriver {
    async fn register(&self, info: &FrameworkInfo) -> ClusterResult<String> {
        let response: RegisterResponse = self
            .post("/scheduler/frameworks", info)
            .await?
            .json()
            .await
            .map_err(|e| ClusterError::Decode(e.to_string()))?;

        debug!(framework_id = %response.framework_id, "framework registered");
        Ok(response.framework_id)
    }

    async fn launch(
        &self,
        offer_id: &str,
        task: &TaskSpec,
        refuse_seconds: f64,
    ) -> ClusterResult<()> {
        self.post(
            "/scheduler/tasks",
            &LaunchRequest {
                offer_id,
                task,
                refuse_seconds,
            },
        )
        .await?;
        debug!(task_id = %task.id, offer_id, "task launched");
        Ok(())
    }

    async fn decline(
        &self,
        offer_id: &str,
        reason: &str,
        refuse_seconds: f64,
    ) -> ClusterResult<()> {
        self.post(
            "/scheduler/declines",
            &DeclineRequest {
                offer_id,
                reason,
                refuse_seconds,
            },
        )
        .await?;
        Ok(())
    }

    async fn revive(&self) -> ClusterResult<()> {
        self.post("/scheduler/revive", &HashMap::<&str, &str>::new())
            .await?;
        Ok(())
    }
}
