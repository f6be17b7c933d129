//! Application runner — the lifecycle of one application in one stack run.
//!
//! Resolve variables, run the before-scheduler hook, dispatch (long-running
//! manager or run-once placement), await health, run the after-scheduler
//! hook, fill discovered values into the context, drive the task list with
//! its hooks, and finish with the after-tasks hook. The runner owns its
//! `Application` clone exclusively, so in-place resolution never races.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use gantry_core::{ensure_resolved, Application, Variables};
use gantry_scheduler::Scheduler;

use crate::adapter::AdapterRegistry;
use crate::error::{EngineError, EngineResult};
use crate::hooks::run_hook;
use crate::manager::{AppRecord, HealthcheckSpec, LongRunningManager};

/// Pause between health polls while awaiting a managed application.
pub const DEFAULT_AWAIT_BACKOFF: Duration = Duration::from_secs(5);

/// Collaborators one application runner needs.
#[derive(Clone)]
pub struct RunnerEnv {
    pub manager: Arc<dyn LongRunningManager>,
    pub scheduler: Arc<Scheduler>,
    pub adapters: Arc<AdapterRegistry>,
    pub await_backoff: Duration,
}

/// Run one application to its terminal state.
pub async fn run_application(
    application: &mut Application,
    vars: &Variables,
    env: &RunnerEnv,
    max_wait: u32,
) -> EngineResult<()> {
    debug!(application = %application.id, "running application");

    application.resolve_variables(vars);
    application.ensure_launch_resolved(vars)?;
    run_hook(
        &application.before_scheduler,
        &format!("{}_before_scheduler.sh", application.id),
    )
    .await?;

    if env.adapters.is_run_once(&application.type_name) {
        let mut status_rx = env.scheduler.run_application(application).await;
        match status_rx.recv().await {
            Some(status) => {
                if let Some(error) = status.error {
                    return Err(EngineError::Application(error));
                }
            }
            None => {
                return Err(EngineError::Application(
                    "status channel closed before a terminal status".to_string(),
                ))
            }
        }
    } else {
        let record = build_app_record(application, vars, env)?;
        env.manager.create_application(&record).await?;
        await_running_and_healthy(
            env.manager.as_ref(),
            application,
            max_wait,
            env.await_backoff,
        )
        .await?;
    }

    // The manager may have placed tasks by now, surfacing new values.
    application.resolve_variables(vars);
    ensure_resolved(vars, application.after_scheduler.iter().map(String::as_str))?;
    run_hook(
        &application.after_scheduler,
        &format!("{}_after_scheduler.sh", application.id),
    )
    .await?;

    if let Some(adapter) = env.adapters.task_runner(&application.type_name) {
        let tasks = env.manager.tasks(&application.id).await?;
        let first = tasks.first().ok_or(EngineError::TaskNotRunning)?;
        adapter.fill_context(vars, application, first).await?;
        info!(application = %application.id, context = %vars, "context filled");

        for index in 0..application.tasks.0.len() {
            application.resolve_variables(vars);
            let entry = application.tasks.0[index].clone();
            ensure_resolved(
                vars,
                application
                    .before_task
                    .iter()
                    .map(String::as_str)
                    .chain(entry.params.values().map(String::as_str)),
            )?;
            run_hook(
                &application.before_task,
                &format!("{}_before_task.sh", application.id),
            )
            .await?;

            info!(application = %application.id, task = %entry.name, "running task");
            adapter.run_task(vars, application, &entry).await?;

            application.resolve_variables(vars);
            ensure_resolved(vars, application.after_task.iter().map(String::as_str))?;
            run_hook(
                &application.after_task,
                &format!("{}_after_task.sh", application.id),
            )
            .await?;
        }
    }

    application.resolve_variables(vars);
    ensure_resolved(vars, application.after_tasks.iter().map(String::as_str))?;
    run_hook(
        &application.after_tasks,
        &format!("{}_after_tasks.sh", application.id),
    )
    .await
}

/// Derive the manager-side application record: scheduler flags folded into
/// the launch command, instances resolved against the cluster, artifacts
/// combined, and zone/stack labels mirrored into the environment.
pub fn build_app_record(
    application: &Application,
    vars: &Variables,
    env: &RunnerEnv,
) -> EngineResult<AppRecord> {
    let snapshot = env.scheduler.cluster().snapshot();
    let instances = application.instance_count(&snapshot)?;

    let mut labels = HashMap::new();
    for key in ["zone", "stack"] {
        if let Some(value) = vars.get(key) {
            if !value.is_empty() {
                labels.insert(key.to_string(), value);
            }
        }
    }

    let mut app_env = application.env.clone();
    if !labels.is_empty() {
        let mut parts = Vec::new();
        for key in ["zone", "stack"] {
            if let Some(value) = labels.get(key) {
                parts.push(format!("{key}={value}"));
            }
        }
        app_env.insert("STACK_LABELS".to_string(), parts.join(";"));
    }

    let healthcheck = if application.healthcheck.is_empty() {
        None
    } else {
        Some(HealthcheckSpec::http(&application.healthcheck))
    };

    Ok(AppRecord {
        id: application.id.clone(),
        cmd: application.launch_command_with_flags(),
        instances,
        cpus: application.cpu,
        mem: application.mem,
        ports: application.ports.clone(),
        uris: application
            .artifact_urls
            .iter()
            .chain(&application.additional_artifacts)
            .cloned()
            .collect(),
        user: application.user.clone(),
        env: app_env,
        labels,
        constraints: application.constraints.clone(),
        healthcheck,
        container: application.docker.clone(),
    })
}

/// Poll until the application reports running (and healthy, when it has a
/// healthcheck), up to `retries` polls with `backoff` between them.
pub async fn await_running_and_healthy(
    manager: &dyn LongRunningManager,
    application: &Application,
    retries: u32,
    backoff: Duration,
) -> EngineResult<()> {
    for _ in 0..=retries {
        match check_running_and_healthy(manager, application).await {
            Ok(()) => return Ok(()),
            Err(e) => debug!(application = %application.id, error = %e, "not yet healthy"),
        }
        tokio::time::sleep(backoff).await;
    }

    Err(EngineError::HealthTimeout { retries })
}

async fn check_running_and_healthy(
    manager: &dyn LongRunningManager,
    application: &Application,
) -> EngineResult<()> {
    let status = manager.application_status(&application.id).await?;

    if status.tasks_running == 0 {
        return Err(EngineError::TaskNotRunning);
    }

    if !application.healthcheck.is_empty() && status.tasks_healthy == 0 {
        return Err(EngineError::HealthcheckNotPassing);
    }

    Ok(())
}
