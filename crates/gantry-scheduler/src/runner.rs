//! Run-once task runner — offer-driven placement of one-shot tasks.
//!
//! The runner keeps one [`RunOnceContext`] per staged application. Offers
//! are matched against every context; the first match launches exactly one
//! task. Status updates are routed by the application id embedded in the
//! task id, and a context is dropped once it emits its terminal status.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use gantry_cluster::{ClusterDriver, ClusterView, Offer, TaskStatus};
use gantry_core::{Application, ApplicationRunStatus};

use crate::context::{application_id_from_task_id, RunOnceContext};
use crate::error::SchedulerResult;
use crate::timetable::{parse_interval, parse_start_time, Timetable};

/// A runner capable of placing applications as one-shot tasks.
#[async_trait]
pub trait OnceTaskRunner: Send + Sync {
    /// Stage an application for placement; the receiver gets its single
    /// terminal status.
    async fn stage(
        &self,
        application: &Application,
        cluster: &ClusterView,
    ) -> mpsc::Receiver<ApplicationRunStatus>;

    /// Register the application's time schedule instead of staging it now.
    /// Returns the schedule id and a receiver that acknowledges the
    /// registration.
    async fn schedule(
        self: Arc<Self>,
        application: &Application,
        cluster: Arc<ClusterView>,
        timetable: Arc<Timetable>,
    ) -> (u64, mpsc::Receiver<ApplicationRunStatus>);

    /// Remove a registered schedule.
    fn delete_schedule(&self, id: u64, timetable: &Timetable);

    /// Offer one resource offer to this runner. `Ok(None)` means a task
    /// was launched; otherwise the decline reason is returned.
    async fn resource_offer(
        &self,
        driver: &dyn ClusterDriver,
        offer: &Offer,
    ) -> SchedulerResult<Option<String>>;

    /// Route a task status update. Returns true when this runner owned the
    /// task.
    async fn status_update(&self, status: &TaskStatus) -> bool;
}

/// The run-once runner, registered under the `run-once` application type.
#[derive(Default)]
pub struct RunOnceRunner {
    applications: Mutex<HashMap<String, RunOnceContext>>,
}

impl RunOnceRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A channel pre-loaded with one status, for immediate answers.
fn immediate(status: ApplicationRunStatus) -> mpsc::Receiver<ApplicationRunStatus> {
    let (tx, rx) = mpsc::channel(1);
    tx.try_send(status).expect("fresh channel");
    rx
}

#[async_trait]
impl OnceTaskRunner for RunOnceRunner {
    async fn stage(
        &self,
        application: &Application,
        cluster: &ClusterView,
    ) -> mpsc::Receiver<ApplicationRunStatus> {
        let snapshot = cluster.snapshot();
        let instances = match application.instance_count(&snapshot) {
            Ok(instances) => instances,
            Err(e) => return immediate(ApplicationRunStatus::failure(&application.id, e.to_string())),
        };

        // Nothing to place; succeed right away.
        if instances == 0 {
            return immediate(ApplicationRunStatus::success(&application.id));
        }

        let constraints = match application.parsed_constraints() {
            Ok(constraints) => constraints,
            Err(e) => return immediate(ApplicationRunStatus::failure(&application.id, e.to_string())),
        };

        let (context, status_rx) =
            RunOnceContext::new(application.clone(), constraints, instances);
        info!(application = %application.id, instances, "application staged");

        self.applications
            .lock()
            .await
            .insert(application.id.clone(), context);
        status_rx
    }

    async fn schedule(
        self: Arc<Self>,
        application: &Application,
        cluster: Arc<ClusterView>,
        timetable: Arc<Timetable>,
    ) -> (u64, mpsc::Receiver<ApplicationRunStatus>) {
        let start_time = if application.start_time.is_empty() {
            None
        } else {
            match parse_start_time(&application.start_time) {
                Ok(start) => Some(start),
                Err(e) => {
                    return (
                        0,
                        immediate(ApplicationRunStatus::failure(&application.id, e.to_string())),
                    )
                }
            }
        };

        let every = if application.time_schedule.is_empty() {
            None
        } else {
            match parse_interval(&application.time_schedule) {
                Ok(every) => Some(every),
                Err(e) => {
                    return (
                        0,
                        immediate(ApplicationRunStatus::failure(&application.id, e.to_string())),
                    )
                }
            }
        };

        let runner = self.clone();
        let staged = application.clone();
        let id = timetable.register(
            &application.id,
            start_time,
            every,
            Arc::new(move || {
                let runner = runner.clone();
                let application = staged.clone();
                let cluster = cluster.clone();
                Box::pin(async move {
                    debug!(application = %application.id, "staging scheduled application");
                    let mut status = runner.stage(&application, &cluster).await;
                    if let Some(status) = status.recv().await {
                        match status.error {
                            None => info!(application = %status.application_id, "scheduled run finished"),
                            Some(error) => {
                                warn!(application = %status.application_id, %error, "scheduled run failed")
                            }
                        }
                    }
                })
            }),
        );

        (id, immediate(ApplicationRunStatus::success(&application.id)))
    }

    fn delete_schedule(&self, id: u64, timetable: &Timetable) {
        timetable.cancel(id);
    }

    async fn resource_offer(
        &self,
        driver: &dyn ClusterDriver,
        offer: &Offer,
    ) -> SchedulerResult<Option<String>> {
        let mut applications = self.applications.lock().await;
        if applications.is_empty() {
            return Ok(Some("all tasks are running".to_string()));
        }

        let mut decline_reasons = Vec::new();
        for context in applications.values_mut() {
            match context.matches(offer) {
                None => {
                    context.launch(driver, offer).await?;
                    return Ok(None);
                }
                Some(reason) => decline_reasons.push(reason),
            }
        }

        Ok(Some(decline_reasons.join(", ")))
    }

    async fn status_update(&self, status: &TaskStatus) -> bool {
        let Some(application_id) = application_id_from_task_id(&status.task_id) else {
            return false;
        };

        let mut applications = self.applications.lock().await;
        let Some(context) = applications.get_mut(application_id) else {
            // Not a run-once task; let another runner take it.
            return false;
        };

        if context.status_update(status).await {
            applications.remove(application_id);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gantry_cluster::{
        ClusterResult, ClusterSnapshot, ClusterStateSource, FrameworkInfo, TaskSpec, TaskState,
        Worker,
    };
    use std::sync::Mutex as StdMutex;

    struct FixedSource(ClusterSnapshot);

    #[async_trait]
    impl ClusterStateSource for FixedSource {
        async fn fetch(&self) -> ClusterResult<ClusterSnapshot> {
            Ok(self.0.clone())
        }
    }

    async fn view(workers: u32) -> ClusterView {
        let snapshot = ClusterSnapshot {
            activated_workers: workers,
            workers: (0..workers)
                .map(|i| Worker {
                    id: format!("s{i}"),
                    hostname: format!("h{i}"),
                    active: true,
                    attributes: HashMap::new(),
                    resources: HashMap::new(),
                })
                .collect(),
        };
        let view = ClusterView::new(Box::new(FixedSource(snapshot)));
        view.refresh().await.unwrap();
        view
    }

    #[derive(Default)]
    struct RecordingDriver {
        launches: StdMutex<Vec<TaskSpec>>,
    }

    #[async_trait]
    impl ClusterDriver for RecordingDriver {
        async fn register(&self, _info: &FrameworkInfo) -> ClusterResult<String> {
            Ok("f-1".to_string())
        }

        async fn launch(
            &self,
            _offer_id: &str,
            task: &TaskSpec,
            _refuse_seconds: f64,
        ) -> ClusterResult<()> {
            self.launches.lock().unwrap().push(task.clone());
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

    fn app(id: &str, instances: &str) -> Application {
        Application {
            type_name: "run-once".to_string(),
            id: id.to_string(),
            cpu: 0.5,
            mem: 512.0,
            instances: instances.to_string(),
            launch_command: "./run.sh".to_string(),
            ..Default::default()
        }
    }

    fn offer(id: &str, host: &str) -> Offer {
        Offer {
            id: id.to_string(),
            hostname: host.to_string(),
            resources: HashMap::from([
                ("cpus".to_string(), 1.5),
                ("mem".to_string(), 2048.0),
            ]),
            attributes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn zero_instances_succeed_immediately() {
        let runner = RunOnceRunner::new();
        let cluster = view(0).await;

        let mut application = app("a", "all");
        application.constraints =
            vec![vec!["hostname".to_string(), "UNIQUE".to_string()]];

        let mut rx = runner.stage(&application, &cluster).await;
        let status = rx.recv().await.unwrap();
        assert!(status.error.is_none());
        assert!(runner.applications.lock().await.is_empty());
    }

    #[tokio::test]
    async fn offers_without_staged_applications_are_declined() {
        let runner = RunOnceRunner::new();
        let driver = RecordingDriver::default();

        let reason = runner
            .resource_offer(&driver, &offer("o1", "h1"))
            .await
            .unwrap();
        assert_eq!(reason.as_deref(), Some("all tasks are running"));
    }

    #[tokio::test]
    async fn unique_placement_across_hosts() {
        let runner = RunOnceRunner::new();
        let driver = RecordingDriver::default();
        let cluster = view(4).await;

        let mut application = app("a", "3");
        application.constraints =
            vec![vec!["hostname".to_string(), "UNIQUE".to_string()]];
        let _rx = runner.stage(&application, &cluster).await;

        // h1 taken, the duplicate h1 declined, h2 and h3 taken.
        assert!(runner.resource_offer(&driver, &offer("o1", "h1")).await.unwrap().is_none());
        let reason = runner
            .resource_offer(&driver, &offer("o2", "h1"))
            .await
            .unwrap()
            .unwrap();
        assert!(reason.contains("hostname doesn't match unique"));
        assert!(runner.resource_offer(&driver, &offer("o3", "h2")).await.unwrap().is_none());
        assert!(runner.resource_offer(&driver, &offer("o4", "h3")).await.unwrap().is_none());

        let launches = driver.launches.lock().unwrap();
        assert_eq!(launches.len(), 3);
        let mut hosts: Vec<_> = launches
            .iter()
            .map(|t| t.name.split('.').nth(1).unwrap().to_string())
            .collect();
        hosts.sort();
        assert_eq!(hosts, vec!["h1", "h2", "h3"]);
    }

    #[tokio::test]
    async fn status_updates_route_by_application_id() {
        let runner = RunOnceRunner::new();
        let driver = RecordingDriver::default();
        let cluster = view(2).await;

        let mut rx = runner.stage(&app("a", "1"), &cluster).await;
        assert!(runner.resource_offer(&driver, &offer("o1", "h1")).await.unwrap().is_none());

        let task_id = driver.launches.lock().unwrap()[0].id.clone();

        // A task of some other framework component is not ours.
        let foreign = TaskStatus {
            task_id: "other|h9|u".to_string(),
            state: TaskState::Finished,
            message: String::new(),
        };
        assert!(!runner.status_update(&foreign).await);

        let finished = TaskStatus {
            task_id,
            state: TaskState::Finished,
            message: String::new(),
        };
        assert!(runner.status_update(&finished).await);

        let status = rx.recv().await.unwrap();
        assert!(status.error.is_none());
        assert!(runner.applications.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failed_task_drops_the_context() {
        let runner = RunOnceRunner::new();
        let driver = RecordingDriver::default();
        let cluster = view(2).await;

        let mut rx = runner.stage(&app("a", "2"), &cluster).await;
        assert!(runner.resource_offer(&driver, &offer("o1", "h1")).await.unwrap().is_none());

        let task_id = driver.launches.lock().unwrap()[0].id.clone();
        let failed = TaskStatus {
            task_id,
            state: TaskState::Lost,
            message: "worker gone".to_string(),
        };
        assert!(runner.status_update(&failed).await);

        let status = rx.recv().await.unwrap();
        let error = status.error.unwrap();
        assert!(error.contains("Application a failed to run on host h1"));
        assert!(error.contains("LOST"));
        assert!(runner.applications.lock().await.is_empty());
    }

    #[tokio::test]
    async fn schedule_registers_and_acknowledges() {
        let runner = Arc::new(RunOnceRunner::new());
        let cluster = Arc::new(view(1).await);
        let timetable = Arc::new(Timetable::new());

        let mut application = app("nightly", "1");
        application.time_schedule = "1h".to_string();

        let (id, mut rx) = runner
            .clone()
            .schedule(&application, cluster.clone(), timetable.clone())
            .await;

        assert!(id > 0);
        assert!(rx.recv().await.unwrap().error.is_none());
        assert_eq!(timetable.entries().len(), 1);
        assert_eq!(timetable.entries()[0].name, "nightly");

        runner.delete_schedule(id, &timetable);
        assert!(timetable.entries().is_empty());
    }

    #[tokio::test]
    async fn schedule_rejects_bad_interval() {
        let runner = Arc::new(RunOnceRunner::new());
        let cluster = Arc::new(view(1).await);
        let timetable = Arc::new(Timetable::new());

        let mut application = app("nightly", "1");
        application.time_schedule = "whenever".to_string();

        let (_, mut rx) = runner
            .schedule(&application, cluster, timetable.clone())
            .await;
        let status = rx.recv().await.unwrap();
        assert!(status.error.unwrap().contains("invalid time schedule"));
        assert!(timetable.entries().is_empty());
    }
}
