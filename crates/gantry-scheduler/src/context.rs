//! Per-application context inside the run-once scheduler.
//!
//! One context tracks one staged application: how many instances are still
//! waiting for a matching offer, and the tasks launched so far with the
//! offer attributes captured at launch. Constraint checks use the
//! attributes of sibling tasks as history, which is what gives UNIQUE,
//! CLUSTER and GROUP_BY their meaning relative to already-placed peers.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use gantry_cluster::{
    ArtifactUri, ClusterDriver, ClusterResult, Offer, TaskSpec, TaskState, TaskStatus,
};
use gantry_constraints::{check_attributes, Constraint};
use gantry_core::{Application, ApplicationRunStatus};

/// Seconds the cluster manager withholds offers from a worker after a
/// launch or decline.
pub const REFUSE_SECONDS: f64 = 10.0;

/// One launched task and the offer attributes it was placed with.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: String,
    pub state: TaskState,
    pub attributes: HashMap<String, String>,
}

/// Context for one application staged for run-once placement.
pub struct RunOnceContext {
    application: Application,
    constraints: HashMap<String, Vec<Constraint>>,
    remaining: u32,
    tasks: Vec<TaskRecord>,
    status_tx: mpsc::Sender<ApplicationRunStatus>,
}

impl RunOnceContext {
    /// Create a context expecting `remaining` instance launches. The
    /// receiver gets the application's single terminal status.
    pub fn new(
        application: Application,
        constraints: HashMap<String, Vec<Constraint>>,
        remaining: u32,
    ) -> (Self, mpsc::Receiver<ApplicationRunStatus>) {
        let (status_tx, status_rx) = mpsc::channel(1);
        (
            Self {
                application,
                constraints,
                remaining,
                tasks: Vec::new(),
                status_tx,
            },
            status_rx,
        )
    }

    pub fn application_id(&self) -> &str {
        &self.application.id
    }

    /// Decide whether this context can take the offer. Returns a decline
    /// reason, or `None` when a task should be launched on it.
    pub fn matches(&self, offer: &Offer) -> Option<String> {
        if self.remaining == 0 {
            return Some("all instances are staged/running".to_string());
        }

        if self.constraints.is_empty() {
            if self.tasks.iter().any(|t| t.host() == offer.hostname) {
                return Some(format!(
                    "application instance is already staged/running on host {}",
                    offer.hostname
                ));
            }
        } else {
            let attributes = offer.attribute_map();
            if let Some(reason) =
                check_attributes(&self.constraints, &attributes, |name| {
                    self.sibling_attributes(name)
                })
            {
                return Some(reason);
            }
        }

        if self.application.cpu > offer.scalar("cpus") {
            return Some("no cpus".to_string());
        }

        if self.application.mem > offer.scalar("mem") {
            return Some("no mem".to_string());
        }

        None
    }

    /// Launch one task on the offer: decrement the remaining count, record
    /// the task as STAGING with the offer's attributes, and hand the launch
    /// to the driver with a refuse filter.
    pub async fn launch(&mut self, driver: &dyn ClusterDriver, offer: &Offer) -> ClusterResult<()> {
        self.remaining -= 1;
        let spec = self.task_spec(offer);
        self.tasks.push(TaskRecord {
            id: spec.id.clone(),
            state: TaskState::Staging,
            attributes: offer.attribute_map(),
        });

        debug!(
            application = %self.application.id,
            task = %spec.id,
            remaining = self.remaining,
            "launching run-once task"
        );
        driver.launch(&offer.id, &spec, REFUSE_SECONDS).await
    }

    /// Apply a status update for one of this context's tasks. Returns true
    /// when the context reached its terminal status and should be dropped.
    pub async fn status_update(&mut self, status: &TaskStatus) -> bool {
        let host = host_from_task_id(&status.task_id)
            .unwrap_or("unknown")
            .to_string();
        self.update_task_state(status);

        match status.state {
            TaskState::Running => {
                debug!(task = %status.task_id, "task running");
                false
            }
            state if state.is_failure() => {
                let message = format!(
                    "Application {} failed to run on host {} with status {}: {}",
                    self.application.id, host, state, status.message
                );
                let _ = self
                    .status_tx
                    .send(ApplicationRunStatus::failure(&self.application.id, message))
                    .await;
                true
            }
            state if state.is_complete() => {
                if self.all_tasks_finished() {
                    let _ = self
                        .status_tx
                        .send(ApplicationRunStatus::success(&self.application.id))
                        .await;
                    true
                } else {
                    false
                }
            }
            state => {
                warn!(task = %status.task_id, %state, "unexpected task state");
                false
            }
        }
    }

    fn all_tasks_finished(&self) -> bool {
        if self.remaining != 0 {
            debug!(
                application = %self.application.id,
                remaining = self.remaining,
                "instances not yet staged"
            );
            return false;
        }

        self.tasks.iter().all(|t| t.state.is_complete())
    }

    fn update_task_state(&mut self, status: &TaskStatus) {
        match self.tasks.iter_mut().find(|t| t.id == status.task_id) {
            Some(task) => task.state = status.state,
            None => warn!(task = %status.task_id, "status update for unknown task"),
        }
    }

    /// Attribute values of sibling tasks that are past STARTING, used as
    /// constraint history.
    fn sibling_attributes(&self, name: &str) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.state != TaskState::Starting)
            .filter_map(|t| t.attributes.get(name))
            .filter(|v| !v.is_empty())
            .cloned()
            .collect()
    }

    fn task_spec(&self, offer: &Offer) -> TaskSpec {
        let uris = self
            .application
            .artifact_urls
            .iter()
            .chain(&self.application.additional_artifacts)
            .map(|uri| ArtifactUri {
                value: uri.clone(),
                extract: true,
            })
            .collect();

        TaskSpec {
            id: format!(
                "{}|{}|{}",
                self.application.id,
                offer.hostname,
                Uuid::new_v4()
            ),
            name: format!("{}.{}", self.application.id, offer.hostname),
            command: self.application.launch_command.clone(),
            cpus: self.application.cpu,
            mem: self.application.mem,
            uris,
        }
    }
}

impl TaskRecord {
    fn host(&self) -> &str {
        self.attributes.get("hostname").map(String::as_str).unwrap_or("")
    }
}

/// Application id: the segment before the first `|` of a task id.
pub fn application_id_from_task_id(task_id: &str) -> Option<&str> {
    task_id.split_once('|').map(|(id, _)| id)
}

/// Host: the segment between the two `|` separators of a task id.
pub fn host_from_task_id(task_id: &str) -> Option<&str> {
    let (_, rest) = task_id.split_once('|')?;
    let (host, _) = rest.split_once('|')?;
    Some(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_constraints::parse_all;

    fn app(id: &str, cpu: f64, mem: f64) -> Application {
        Application {
            type_name: "run-once".to_string(),
            id: id.to_string(),
            cpu,
            mem,
            launch_command: "./run.sh".to_string(),
            ..Default::default()
        }
    }

    fn offer(id: &str, host: &str, cpus: f64, mem: f64) -> Offer {
        Offer {
            id: id.to_string(),
            hostname: host.to_string(),
            resources: HashMap::from([("cpus".to_string(), cpus), ("mem".to_string(), mem)]),
            attributes: HashMap::new(),
        }
    }

    struct NoopDriver;

    #[async_trait::async_trait]
    impl ClusterDriver for NoopDriver {
        async fn register(
            &self,
            _info: &gantry_cluster::FrameworkInfo,
        ) -> ClusterResult<String> {
            Ok("f-1".to_string())
        }

        async fn launch(
            &self,
            _offer_id: &str,
            _task: &TaskSpec,
            _refuse_seconds: f64,
        ) -> ClusterResult<()> {
            Ok(())
        }

        async fn decline(
            &self,
            _offer_id: &str,
            _reason: &str,
            _refuse_seconds: f64,
        ) -> ClusterResult<()> {
            Ok(())
        }

        async fn revive(&self) -> ClusterResult<()> {
            Ok(())
        }
    }

    fn unique_hostname() -> HashMap<String, Vec<Constraint>> {
        parse_all(&[vec!["hostname".to_string(), "UNIQUE".to_string()]]).unwrap()
    }

    #[test]
    fn task_id_parsing() {
        assert_eq!(application_id_from_task_id("app|h1|uuid"), Some("app"));
        assert_eq!(host_from_task_id("app|h1|uuid"), Some("h1"));
        assert_eq!(application_id_from_task_id("malformed"), None);
        assert_eq!(host_from_task_id("app|no-uuid"), None);
    }

    #[test]
    fn declines_when_no_instances_remain() {
        let (ctx, _rx) = RunOnceContext::new(app("a", 0.5, 512.0), HashMap::new(), 0);
        assert_eq!(
            ctx.matches(&offer("o1", "h1", 1.0, 1024.0)).as_deref(),
            Some("all instances are staged/running")
        );
    }

    #[test]
    fn declines_on_missing_resources() {
        let (ctx, _rx) = RunOnceContext::new(app("a", 2.0, 512.0), HashMap::new(), 1);
        assert_eq!(
            ctx.matches(&offer("o1", "h1", 1.0, 1024.0)).as_deref(),
            Some("no cpus")
        );

        let (ctx, _rx) = RunOnceContext::new(app("a", 0.5, 4096.0), HashMap::new(), 1);
        assert_eq!(
            ctx.matches(&offer("o1", "h1", 1.0, 1024.0)).as_deref(),
            Some("no mem")
        );
    }

    #[tokio::test]
    async fn unique_constraint_spreads_across_hosts() {
        let mut application = app("a", 0.5, 512.0);
        application.instances = "3".to_string();
        let (mut ctx, _rx) = RunOnceContext::new(application, unique_hostname(), 3);
        let driver = NoopDriver;

        // h1 accepted.
        assert!(ctx.matches(&offer("o1", "h1", 1.5, 2048.0)).is_none());
        ctx.launch(&driver, &offer("o1", "h1", 1.5, 2048.0)).await.unwrap();

        // Second offer from h1 declined by UNIQUE.
        assert_eq!(
            ctx.matches(&offer("o2", "h1", 1.5, 2048.0)).as_deref(),
            Some("hostname doesn't match unique")
        );

        // h2 and h3 accepted.
        assert!(ctx.matches(&offer("o3", "h2", 1.5, 2048.0)).is_none());
        ctx.launch(&driver, &offer("o3", "h2", 1.5, 2048.0)).await.unwrap();
        assert!(ctx.matches(&offer("o4", "h3", 1.5, 2048.0)).is_none());
        ctx.launch(&driver, &offer("o4", "h3", 1.5, 2048.0)).await.unwrap();

        // All three placed.
        assert_eq!(
            ctx.matches(&offer("o5", "h4", 1.5, 2048.0)).as_deref(),
            Some("all instances are staged/running")
        );
    }

    #[tokio::test]
    async fn without_constraints_a_host_is_used_once() {
        let (mut ctx, _rx) = RunOnceContext::new(app("a", 0.5, 512.0), HashMap::new(), 2);
        let driver = NoopDriver;

        ctx.launch(&driver, &offer("o1", "h1", 1.0, 1024.0)).await.unwrap();
        let reason = ctx.matches(&offer("o2", "h1", 1.0, 1024.0)).unwrap();
        assert!(reason.contains("already staged/running on host h1"));
    }

    #[tokio::test]
    async fn failure_status_emits_once_with_host_and_state() {
        let (mut ctx, mut rx) = RunOnceContext::new(app("a", 0.5, 512.0), HashMap::new(), 3);
        let driver = NoopDriver;
        for (o, h) in [("o1", "h1"), ("o2", "h2"), ("o3", "h3")] {
            ctx.launch(&driver, &offer(o, h, 1.0, 1024.0)).await.unwrap();
        }

        let task_on = |ctx: &RunOnceContext, host: &str| {
            ctx.tasks.iter().find(|t| t.host() == host).unwrap().id.clone()
        };

        let finished_h1 = TaskStatus {
            task_id: task_on(&ctx, "h1"),
            state: TaskState::Finished,
            message: String::new(),
        };
        let finished_h2 = TaskStatus {
            task_id: task_on(&ctx, "h2"),
            state: TaskState::Finished,
            message: String::new(),
        };
        let failed_h3 = TaskStatus {
            task_id: task_on(&ctx, "h3"),
            state: TaskState::Failed,
            message: "exit 1".to_string(),
        };

        assert!(!ctx.status_update(&finished_h1).await);
        assert!(!ctx.status_update(&finished_h2).await);
        assert!(ctx.status_update(&failed_h3).await);

        let status = rx.recv().await.unwrap();
        let error = status.error.unwrap();
        assert!(error.contains("failed to run on host h3"));
        assert!(error.contains("FAILED"));
        assert!(error.contains("exit 1"));
    }

    #[tokio::test]
    async fn success_emits_when_all_tasks_finish() {
        let (mut ctx, mut rx) = RunOnceContext::new(app("a", 0.5, 512.0), HashMap::new(), 2);
        let driver = NoopDriver;
        ctx.launch(&driver, &offer("o1", "h1", 1.0, 1024.0)).await.unwrap();
        ctx.launch(&driver, &offer("o2", "h2", 1.0, 1024.0)).await.unwrap();

        let task_ids: Vec<String> = ctx.tasks.iter().map(|t| t.id.clone()).collect();

        let running = TaskStatus {
            task_id: task_ids[0].clone(),
            state: TaskState::Running,
            message: String::new(),
        };
        assert!(!ctx.status_update(&running).await);

        let finished = |id: &str| TaskStatus {
            task_id: id.to_string(),
            state: TaskState::Finished,
            message: String::new(),
        };
        assert!(!ctx.status_update(&finished(&task_ids[0])).await);
        assert!(ctx.status_update(&finished(&task_ids[1])).await);

        let status = rx.recv().await.unwrap();
        assert!(status.error.is_none());
        assert_eq!(status.application_id, "a");
    }

    #[test]
    fn task_spec_carries_resources_and_artifacts() {
        let mut application = app("a", 0.5, 512.0);
        application.artifact_urls = vec!["http://repo/a.tgz".to_string()];
        application.additional_artifacts = vec!["http://repo/conf.tgz".to_string()];
        let (ctx, _rx) = RunOnceContext::new(application, HashMap::new(), 1);

        let spec = ctx.task_spec(&offer("o1", "h1", 1.0, 1024.0));
        assert_eq!(spec.name, "a.h1");
        assert!(spec.id.starts_with("a|h1|"));
        assert_eq!(spec.id.matches('|').count(), 2);
        assert_eq!(spec.cpus, 0.5);
        assert_eq!(spec.mem, 512.0);
        assert_eq!(spec.uris.len(), 2);
        assert!(spec.uris.iter().all(|u| u.extract));
    }
}
