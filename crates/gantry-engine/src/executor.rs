//! Stack executor — dependency-ordered concurrent fan-out.
//!
//! Applications are dispatched as soon as every dependency is RUNNING, one
//! tokio task per application, reporting into a status channel sized to the
//! application count so runners never block on emitting. The first failure
//! aborts the run after persisting FAILED state; variables captured so far
//! are persisted on every success for partial recovery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use gantry_core::{Application, ApplicationRunStatus, RunRequest, RunState, Stack, Variables};
use gantry_scheduler::Scheduler;
use gantry_state::StateStorage;

use crate::adapter::AdapterRegistry;
use crate::error::{EngineError, EngineResult};
use crate::manager::LongRunningManager;
use crate::runner::{run_application, RunnerEnv, DEFAULT_AWAIT_BACKOFF};

/// Executes stacks against the engine's collaborators.
pub struct StackExecutor {
    manager: Arc<dyn LongRunningManager>,
    scheduler: Arc<Scheduler>,
    adapters: Arc<AdapterRegistry>,
    state: Arc<dyn StateStorage>,
    await_backoff: Duration,
}

impl StackExecutor {
    pub fn new(
        manager: Arc<dyn LongRunningManager>,
        scheduler: Arc<Scheduler>,
        adapters: Arc<AdapterRegistry>,
        state: Arc<dyn StateStorage>,
    ) -> Self {
        Self {
            manager,
            scheduler,
            adapters,
            state,
            await_backoff: DEFAULT_AWAIT_BACKOFF,
        }
    }

    /// Override the health-poll backoff (tests).
    pub fn with_await_backoff(mut self, backoff: Duration) -> Self {
        self.await_backoff = backoff;
        self
    }

    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.adapters
    }

    /// Run a merged stack to RUNNING, or fail on the first application
    /// failure. Returns the context with everything discovered during the
    /// run.
    pub async fn run(
        &self,
        stack: &Stack,
        request: &RunRequest,
        vars: Arc<Variables>,
    ) -> EngineResult<Arc<Variables>> {
        stack.validate(&self.adapters.task_runner_types())?;

        let stack_id = stack.id();
        let zone = request.zone.as_str();
        info!(stack = %stack_id, zone, "running stack");
        self.state
            .save_stack_status(&stack_id, zone, RunState::Staging)?;

        let result = self.run_inner(stack, request, &stack_id, vars).await;
        match &result {
            Ok(_) => self
                .state
                .save_stack_status(&stack_id, zone, RunState::Running)?,
            Err(e) => {
                warn!(stack = %stack_id, zone, error = %e, "stack run failed");
                self.state
                    .save_stack_status(&stack_id, zone, RunState::Failed)?;
            }
        }

        result
    }

    async fn run_inner(
        &self,
        stack: &Stack,
        request: &RunRequest,
        stack_id: &str,
        vars: Arc<Variables>,
    ) -> EngineResult<Arc<Variables>> {
        let info = self.manager.info().await?;
        vars.set_stack("master", info.master);
        vars.set_stack("zone", request.zone.clone());
        vars.set_stack("stack", stack.name.clone());

        let mut states: HashMap<String, RunState> = HashMap::new();
        let (status_tx, mut status_rx) =
            mpsc::channel::<ApplicationRunStatus>(stack.applications.len().max(1));

        if stack.applications.is_empty() {
            return Ok(vars);
        }

        self.mark_skipped(stack, &request.skip, &mut states, &status_tx)
            .await?;

        loop {
            self.dispatch_ready(stack, request.maxwait, &mut states, &vars, &status_tx);

            let Some(status) = status_rx.recv().await else {
                return Err(EngineError::Application(
                    "status channel closed mid-run".to_string(),
                ));
            };

            match status.error {
                Some(error) => {
                    warn!(application = %status.application_id, %error, "application failed");
                    self.state.save_application_status(
                        stack_id,
                        &request.zone,
                        &status.application_id,
                        RunState::Failed,
                    )?;
                    return Err(EngineError::Application(format!(
                        "{}: {error}",
                        status.application_id
                    )));
                }
                None => {
                    states.insert(status.application_id.clone(), RunState::Running);
                    self.state.save_application_status(
                        stack_id,
                        &request.zone,
                        &status.application_id,
                        RunState::Running,
                    )?;
                    self.state
                        .save_stack_variables(stack_id, &request.zone, &vars)?;

                    if self.all_running(stack, &states) {
                        return Ok(vars);
                    }
                }
            }
        }
    }

    /// Mark every application matching a skip pattern as RUNNING and queue
    /// its success, so dependants are released without a dispatch.
    async fn mark_skipped(
        &self,
        stack: &Stack,
        patterns: &[String],
        states: &mut HashMap<String, RunState>,
        status_tx: &mpsc::Sender<ApplicationRunStatus>,
    ) -> EngineResult<()> {
        for pattern in patterns {
            let regex = Regex::new(pattern)?;
            for application in stack.applications.values() {
                if regex.is_match(&application.id) && !states.contains_key(&application.id) {
                    info!(
                        application = %application.id,
                        pattern = %pattern,
                        "application matches skip pattern, skipping"
                    );
                    states.insert(application.id.clone(), RunState::Running);
                    let _ = status_tx
                        .send(ApplicationRunStatus::success(&application.id))
                        .await;
                }
            }
        }

        Ok(())
    }

    /// Dispatch every untracked application whose dependencies are all
    /// RUNNING.
    fn dispatch_ready(
        &self,
        stack: &Stack,
        max_wait: u32,
        states: &mut HashMap<String, RunState>,
        vars: &Arc<Variables>,
        status_tx: &mpsc::Sender<ApplicationRunStatus>,
    ) {
        for application in stack.applications.values() {
            if states.contains_key(&application.id) {
                continue;
            }

            if application.is_dependency_satisfied(states) {
                states.insert(application.id.clone(), RunState::Staging);
                debug!(application = %application.id, "dispatching application");
                self.spawn_runner(application.clone(), max_wait, vars.clone(), status_tx.clone());
            }
        }
    }

    fn spawn_runner(
        &self,
        mut application: Application,
        max_wait: u32,
        vars: Arc<Variables>,
        status_tx: mpsc::Sender<ApplicationRunStatus>,
    ) {
        let env = RunnerEnv {
            manager: self.manager.clone(),
            scheduler: self.scheduler.clone(),
            adapters: self.adapters.clone(),
            await_backoff: self.await_backoff,
        };

        tokio::spawn(async move {
            let status = match run_application(&mut application, &vars, &env, max_wait).await {
                Ok(()) => ApplicationRunStatus::success(&application.id),
                Err(e) => ApplicationRunStatus::failure(&application.id, e.to_string()),
            };
            let _ = status_tx.send(status).await;
        });
    }

    fn all_running(&self, stack: &Stack, states: &HashMap<String, RunState>) -> bool {
        stack
            .applications
            .values()
            .all(|a| states.get(&a.id) == Some(&RunState::Running))
    }
}
