//! Adapter registry — pluggable per-type task runners.
//!
//! A task runner knows how to wire one kind of external sub-controller
//! after its application is up: it fills discovered values (host, ports,
//! API endpoint) into the stack context and drives the application's
//! ordered task list. Registries are built once at startup and shared
//! immutably, so concurrent runs never race on registration.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use gantry_core::{Application, TaskEntry, Variables};

use crate::error::EngineResult;
use crate::manager::ManagerTask;

/// Per-application-type adapter for post-launch wiring.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Insert runtime-discovered values (e.g. `<id>.host`, `<id>.portN`,
    /// `<id>.api`) into the context, from the application's first live
    /// task.
    async fn fill_context(
        &self,
        vars: &Variables,
        application: &Application,
        task: &ManagerTask,
    ) -> EngineResult<()>;

    /// Run one entry of the application's task list.
    async fn run_task(
        &self,
        vars: &Variables,
        application: &Application,
        task: &TaskEntry,
    ) -> EngineResult<()>;
}

/// Immutable adapter registry, built at service startup.
pub struct AdapterRegistry {
    task_runners: HashMap<String, Arc<dyn TaskRunner>>,
    run_once_types: HashSet<String>,
}

impl AdapterRegistry {
    pub fn new(
        task_runners: HashMap<String, Arc<dyn TaskRunner>>,
        run_once_types: HashSet<String>,
    ) -> Self {
        Self {
            task_runners,
            run_once_types,
        }
    }

    /// The adapter for an application type, when one is registered.
    pub fn task_runner(&self, type_name: &str) -> Option<&Arc<dyn TaskRunner>> {
        self.task_runners.get(type_name)
    }

    /// True when the type is placed as a one-shot task instead of being
    /// handed to the long-running manager.
    pub fn is_run_once(&self, type_name: &str) -> bool {
        self.run_once_types.contains(type_name)
    }

    /// Types that can drive in-container task lists; used by validation.
    pub fn task_runner_types(&self) -> HashSet<String> {
        self.task_runners.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopAdapter;

    #[async_trait]
    impl TaskRunner for NoopAdapter {
        async fn fill_context(
            &self,
            _vars: &Variables,
            _application: &Application,
            _task: &ManagerTask,
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn run_task(
            &self,
            _vars: &Variables,
            _application: &Application,
            _task: &TaskEntry,
        ) -> EngineResult<()> {
            Ok(())
        }
    }

    #[test]
    fn registry_lookups() {
        let mut task_runners: HashMap<String, Arc<dyn TaskRunner>> = HashMap::new();
        task_runners.insert("broker".to_string(), Arc::new(NoopAdapter));

        let registry = AdapterRegistry::new(
            task_runners,
            HashSet::from(["run-once".to_string()]),
        );

        assert!(registry.task_runner("broker").is_some());
        assert!(registry.task_runner("run-once").is_none());
        assert!(registry.is_run_once("run-once"));
        assert!(!registry.is_run_once("broker"));
        assert_eq!(
            registry.task_runner_types(),
            HashSet::from(["broker".to_string()])
        );
    }
}
