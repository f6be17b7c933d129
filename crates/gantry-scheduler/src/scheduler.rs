//! Scheduler facade — registration, offer routing and status fan-out.
//!
//! Owns the driver handle, the registry of run-once task runners and the
//! timetable. The framework registration id is persisted through
//! [`FrameworkStorage`] so a restarted server re-registers under the same
//! identity. All offer decisions funnel through [`handle_offer`], keeping
//! placement serialized in one owner.
//!
//! [`handle_offer`]: Scheduler::handle_offer

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use gantry_cluster::{
    ClusterDriver, ClusterEvent, ClusterView, FrameworkInfo, Offer, TaskState, TaskStatus,
};
use gantry_core::{Application, ApplicationRunStatus};
use gantry_state::FrameworkStorage;

use crate::context::REFUSE_SECONDS;
use crate::error::{SchedulerError, SchedulerResult};
use crate::runner::OnceTaskRunner;
use crate::timetable::{ScheduledTask, Timetable};

/// Scheduler identity and registration settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub master: String,
    pub framework_name: String,
    pub framework_role: String,
    pub framework_user: String,
    pub failover_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            master: "127.0.0.1:5050".to_string(),
            framework_name: "gantry".to_string(),
            framework_role: "*".to_string(),
            framework_user: String::new(),
            // One week.
            failover_timeout: Duration::from_secs(168 * 3600),
        }
    }
}

/// The run-once scheduling facade.
pub struct Scheduler {
    config: SchedulerConfig,
    driver: Arc<dyn ClusterDriver>,
    cluster: Arc<ClusterView>,
    /// Immutable registry of run-once runners by application type, built at
    /// startup.
    runners: HashMap<String, Arc<dyn OnceTaskRunner>>,
    timetable: Arc<Timetable>,
    framework: Arc<Mutex<FrameworkStorage>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        driver: Arc<dyn ClusterDriver>,
        cluster: Arc<ClusterView>,
        runners: HashMap<String, Arc<dyn OnceTaskRunner>>,
        framework: Arc<Mutex<FrameworkStorage>>,
    ) -> Self {
        Self {
            config,
            driver,
            cluster,
            runners,
            timetable: Arc::new(Timetable::new()),
            framework,
        }
    }

    /// Types with a registered run-once runner.
    pub fn runner_types(&self) -> Vec<String> {
        self.runners.keys().cloned().collect()
    }

    pub fn cluster(&self) -> &Arc<ClusterView> {
        &self.cluster
    }

    /// Register with the cluster manager, reusing a persisted registration
    /// id when one exists, and persist the id we got back.
    pub async fn start(&self) -> SchedulerResult<()> {
        info!(name = %self.config.framework_name, "starting scheduler");

        let previous_id = self
            .framework
            .lock()
            .expect("framework storage poisoned")
            .framework_id
            .clone();

        let info = FrameworkInfo {
            name: self.config.framework_name.clone(),
            user: self.config.framework_user.clone(),
            role: self.config.framework_role.clone(),
            failover_timeout: self.config.failover_timeout.as_secs_f64(),
            id: previous_id,
        };

        let registered = self.driver.register(&info).await?;
        info!(framework_id = %registered, "scheduler registered");

        let mut framework = self.framework.lock().expect("framework storage poisoned");
        framework.framework_id = Some(registered);
        framework.save()?;
        Ok(())
    }

    /// Dispatch one application: schedule it when it carries a time
    /// schedule, stage it for placement otherwise. The receiver carries
    /// the application's single terminal status.
    pub async fn run_application(
        &self,
        application: &Application,
    ) -> mpsc::Receiver<ApplicationRunStatus> {
        debug!(application = %application.id, "run request received");

        let Some(runner) = self.runners.get(&application.type_name) else {
            let (tx, rx) = mpsc::channel(1);
            let error = SchedulerError::NoRunner(application.type_name.clone());
            tx.try_send(ApplicationRunStatus::failure(&application.id, error.to_string()))
                .expect("fresh channel");
            return rx;
        };

        if !application.start_time.is_empty() || !application.time_schedule.is_empty() {
            let (_, rx) = runner
                .clone()
                .schedule(application, self.cluster.clone(), self.timetable.clone())
                .await;
            return rx;
        }

        runner.stage(application, &self.cluster).await
    }

    /// Registered time schedules.
    pub fn scheduled_tasks(&self) -> Vec<ScheduledTask> {
        self.timetable.entries()
    }

    /// Remove a registered schedule by id.
    pub fn remove_scheduled(&self, id: u64) -> bool {
        let known = self.timetable.entries().iter().any(|t| t.id == id);
        info!(id, known, "deleting scheduled task");
        for runner in self.runners.values() {
            runner.delete_schedule(id, &self.timetable);
        }
        known
    }

    /// Decide one offer: the first runner that places a task consumes it,
    /// otherwise the offer is declined with the joined reasons.
    pub async fn handle_offer(&self, offer: Offer) {
        let mut decline_reasons = Vec::new();

        for (name, runner) in &self.runners {
            match runner.resource_offer(self.driver.as_ref(), &offer).await {
                Ok(None) => return,
                Ok(Some(reason)) => decline_reasons.push(reason),
                Err(e) => {
                    warn!(runner = %name, offer = %offer.id, error = %e, "offer processing failed")
                }
            }
        }

        let reason = decline_reasons.join(", ");
        debug!(offer = %offer.id, %reason, "declining offer");
        if let Err(e) = self
            .driver
            .decline(&offer.id, &reason, REFUSE_SECONDS)
            .await
        {
            warn!(offer = %offer.id, error = %e, "decline failed");
        }
    }

    /// Fan a task status update out to the runners. Finished tasks revive
    /// offers so waiting contexts see fresh ones.
    pub async fn handle_status(&self, status: TaskStatus) {
        info!(task = %status.task_id, state = %status.state, "status update");

        if status.state == TaskState::Finished {
            if let Err(e) = self.driver.revive().await {
                warn!(error = %e, "offer revival failed");
            }
        }

        for runner in self.runners.values() {
            if runner.status_update(&status).await {
                return;
            }
        }

        warn!(task = %status.task_id, "status update not handled by any task runner");
    }

    /// Dispatch one cluster event.
    pub async fn handle_event(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::Offer { offer } => self.handle_offer(offer).await,
            ClusterEvent::Status { status } => self.handle_status(status).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunOnceRunner;
    use async_trait::async_trait;
    use gantry_cluster::{ClusterResult, ClusterSnapshot, ClusterStateSource, TaskSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct EmptySource;

    #[async_trait]
    impl ClusterStateSource for EmptySource {
        async fn fetch(&self) -> ClusterResult<ClusterSnapshot> {
            Ok(ClusterSnapshot {
                activated_workers: 2,
                workers: Vec::new(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingDriver {
        registered: StdMutex<Vec<FrameworkInfo>>,
        launches: StdMutex<Vec<TaskSpec>>,
        declines: StdMutex<Vec<String>>,
        revives: AtomicUsize,
    }

    #[async_trait]
    impl ClusterDriver for RecordingDriver {
        async fn register(&self, info: &FrameworkInfo) -> ClusterResult<String> {
            self.registered.lock().unwrap().push(info.clone());
            Ok("framework-7".to_string())
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
            offer_id: &str,
            reason: &str,
            _refuse_seconds: f64,
        ) -> ClusterResult<()> {
            self.declines
                .lock()
                .unwrap()
                .push(format!("{offer_id}: {reason}"));
            Ok(())
        }

        async fn revive(&self) -> ClusterResult<()> {
            self.revives.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn framework_storage() -> Arc<Mutex<FrameworkStorage>> {
        let path = std::env::temp_dir().join(format!("gantry-sched-{}.json", uuid::Uuid::new_v4()));
        Arc::new(Mutex::new(
            FrameworkStorage::open(&format!("file:{}", path.display())).unwrap(),
        ))
    }

    async fn scheduler() -> (Arc<Scheduler>, Arc<RecordingDriver>) {
        let driver = Arc::new(RecordingDriver::default());
        let cluster = Arc::new(ClusterView::new(Box::new(EmptySource)));
        cluster.refresh().await.unwrap();

        let mut runners: HashMap<String, Arc<dyn OnceTaskRunner>> = HashMap::new();
        runners.insert("run-once".to_string(), Arc::new(RunOnceRunner::new()));

        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            driver.clone(),
            cluster,
            runners,
            framework_storage(),
        );
        (Arc::new(scheduler), driver)
    }

    fn app(id: &str, type_name: &str) -> Application {
        Application {
            type_name: type_name.to_string(),
            id: id.to_string(),
            cpu: 0.5,
            mem: 512.0,
            instances: "1".to_string(),
            launch_command: "./run.sh".to_string(),
            ..Default::default()
        }
    }

    fn offer(id: &str, host: &str) -> Offer {
        Offer {
            id: id.to_string(),
            hostname: host.to_string(),
            resources: HashMap::from([
                ("cpus".to_string(), 1.0),
                ("mem".to_string(), 1024.0),
            ]),
            attributes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn start_persists_the_registration_id() {
        let (scheduler, driver) = scheduler().await;
        scheduler.start().await.unwrap();

        assert_eq!(driver.registered.lock().unwrap().len(), 1);
        let stored = scheduler
            .framework
            .lock()
            .unwrap()
            .framework_id
            .clone();
        assert_eq!(stored.as_deref(), Some("framework-7"));
    }

    #[tokio::test]
    async fn unknown_type_fails_with_no_runner() {
        let (scheduler, _) = scheduler().await;

        let mut rx = scheduler.run_application(&app("a", "long-running")).await;
        let status = rx.recv().await.unwrap();
        assert_eq!(
            status.error.as_deref(),
            Some("no task runner for long-running")
        );
    }

    #[tokio::test]
    async fn staged_application_takes_the_first_matching_offer() {
        let (scheduler, driver) = scheduler().await;

        let _rx = scheduler.run_application(&app("a", "run-once")).await;
        scheduler.handle_offer(offer("o1", "h1")).await;

        assert_eq!(driver.launches.lock().unwrap().len(), 1);
        assert!(driver.declines.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmatched_offers_are_declined_with_reasons() {
        let (scheduler, driver) = scheduler().await;

        scheduler.handle_offer(offer("o1", "h1")).await;

        let declines = driver.declines.lock().unwrap();
        assert_eq!(declines.len(), 1);
        assert!(declines[0].contains("all tasks are running"));
    }

    #[tokio::test]
    async fn finished_status_revives_offers() {
        let (scheduler, driver) = scheduler().await;

        let _rx = scheduler.run_application(&app("a", "run-once")).await;
        scheduler.handle_offer(offer("o1", "h1")).await;
        let task_id = driver.launches.lock().unwrap()[0].id.clone();

        scheduler
            .handle_status(TaskStatus {
                task_id,
                state: TaskState::Finished,
                message: String::new(),
            })
            .await;

        assert_eq!(driver.revives.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn time_scheduled_application_is_listed_and_removable() {
        let (scheduler, _) = scheduler().await;

        let mut nightly = app("nightly", "run-once");
        nightly.time_schedule = "1h".to_string();

        let mut rx = scheduler.run_application(&nightly).await;
        assert!(rx.recv().await.unwrap().error.is_none());

        let tasks = scheduler.scheduled_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "nightly");

        assert!(scheduler.remove_scheduled(tasks[0].id));
        assert!(!scheduler.remove_scheduled(tasks[0].id));
        assert!(scheduler.scheduled_tasks().is_empty());
    }
}
