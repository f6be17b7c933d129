//! Application record — one deployable unit of a stack.
//!
//! An application is either kept alive by the long-running manager or placed
//! as a one-shot task on the cluster, depending on how its type is
//! registered. The record carries resources, placement constraints,
//! lifecycle hooks, in-container tasks and `${key}` variable tokens that are
//! substituted from the stack context at run time.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use gantry_cluster::ClusterSnapshot;
use gantry_constraints::{self as constraints, Constraint};

use crate::docker::Docker;
use crate::error::{CoreError, CoreResult};
use crate::status::RunState;
use crate::variables::Variables;

/// Matches the first `${key}` token left in a string.
fn variable_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\$\{[^}]*\}").expect("variable token regex"))
}

/// One named entry of an application's ordered task list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskEntry {
    pub name: String,
    pub params: BTreeMap<String, String>,
}

/// Ordered task list. Document order is significant, so this is a sequence
/// of named entries serialized as a mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskList(pub Vec<TaskEntry>);

impl TaskList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TaskEntry> {
        self.0.iter()
    }
}

impl Serialize for TaskList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for entry in &self.0 {
            map.serialize_entry(&entry.name, &entry.params)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TaskList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TaskListVisitor;

        impl<'de> Visitor<'de> for TaskListVisitor {
            type Value = TaskList;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a mapping of task name to parameter map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, params)) =
                    access.next_entry::<String, BTreeMap<String, String>>()?
                {
                    entries.push(TaskEntry { name, params });
                }
                Ok(TaskList(entries))
            }
        }

        deserializer.deserialize_map(TaskListVisitor)
    }
}

/// A deployable application within a stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Application {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
    pub version: String,
    pub cpu: f64,
    pub mem: f64,
    pub ports: Vec<u16>,
    /// "" (one instance), "all", or a positive integer.
    pub instances: String,
    /// Raw constraint tuples `[attribute, OP, args...]`.
    pub constraints: Vec<Vec<String>>,
    pub user: String,
    pub healthcheck: String,
    pub launch_command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub artifact_urls: Vec<String>,
    pub additional_artifacts: Vec<String>,
    /// Scheduler-side flags appended to the launch command as `--key value`.
    pub scheduler: HashMap<String, String>,
    pub tasks: TaskList,
    pub dependencies: Vec<String>,
    pub docker: Option<Docker>,
    pub start_time: String,
    pub time_schedule: String,

    pub before_scheduler: Vec<String>,
    pub after_scheduler: Vec<String>,
    pub before_task: Vec<String>,
    pub after_task: Vec<String>,
    pub after_tasks: Vec<String>,
}

impl Application {
    /// Validate the record against the invariants every runnable application
    /// must satisfy. `task_runner_types` is the set of adapter types that
    /// can drive in-container tasks.
    pub fn validate(&self, task_runner_types: &HashSet<String>) -> CoreResult<()> {
        if self.type_name.is_empty() {
            return Err(CoreError::NoType);
        }

        if !self.tasks.is_empty() && !task_runner_types.contains(&self.type_name) {
            return Err(CoreError::NoTaskRunner(self.type_name.clone()));
        }

        if self.id.is_empty() {
            return Err(CoreError::NoId);
        }

        if self.cpu <= 0.0 {
            return Err(CoreError::InvalidCpu);
        }

        if self.mem <= 0.0 {
            return Err(CoreError::InvalidMem);
        }

        if self.launch_command.is_empty() {
            return Err(CoreError::NoLaunchCommand);
        }

        if !self.instances.is_empty() && self.instances != "all" {
            match self.instances.parse::<i64>() {
                Ok(n) if n >= 1 => {}
                _ => return Err(CoreError::InvalidInstances),
            }
        }

        self.parsed_constraints()?;
        Ok(())
    }

    /// Parse the raw constraint tuples.
    pub fn parsed_constraints(&self) -> CoreResult<HashMap<String, Vec<Constraint>>> {
        Ok(constraints::parse_all(&self.constraints)?)
    }

    /// Resolve the instance count against the current cluster.
    ///
    /// `"all"` means every activated worker when the application carries no
    /// constraints, otherwise the number of workers the constraint set would
    /// accept, evaluated against a history that grows with each accepted
    /// worker.
    pub fn instance_count(&self, cluster: &ClusterSnapshot) -> CoreResult<u32> {
        if self.instances.is_empty() {
            return Ok(1);
        }

        if self.instances == "all" {
            if self.constraints.is_empty() {
                return Ok(cluster.activated_workers);
            }
            return Ok(self.matching_worker_count(cluster)?);
        }

        self.instances
            .parse::<u32>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or(CoreError::InvalidInstances)
    }

    fn matching_worker_count(&self, cluster: &ClusterSnapshot) -> CoreResult<u32> {
        let parsed = self.parsed_constraints()?;
        let mut history: HashMap<String, Vec<String>> = HashMap::new();
        let mut count = 0;

        for worker in cluster.active_workers() {
            let matches = parsed.iter().all(|(name, list)| {
                let Some(value) = worker.attribute(name) else {
                    return false;
                };
                let seen = history.get(name.as_str()).cloned().unwrap_or_default();
                list.iter().all(|c| c.matches(value, &seen))
            });

            if matches {
                count += 1;
                for name in parsed.keys() {
                    if let Some(value) = worker.attribute(name) {
                        history.entry(name.clone()).or_default().push(value.to_string());
                    }
                }
            }
        }

        Ok(count)
    }

    /// True when every dependency is RUNNING in `states`.
    pub fn is_dependency_satisfied(&self, states: &HashMap<String, RunState>) -> bool {
        for dependency in &self.dependencies {
            if states.get(dependency) != Some(&RunState::Running) {
                tracing::debug!(
                    application = %self.id,
                    dependency = %dependency,
                    "unsatisfied dependency"
                );
                return false;
            }
        }

        true
    }

    /// Substitute every `${key}` occurrence from the merged context view,
    /// in place: launch command, env values, scheduler values, args, task
    /// parameters and all hook command lists.
    pub fn resolve_variables(&mut self, vars: &Variables) {
        for (key, value) in vars.all() {
            let token = format!("${{{key}}}");

            replace_in(&mut self.launch_command, &token, &value);
            for v in self.env.values_mut() {
                replace_in(v, &token, &value);
            }
            for v in self.scheduler.values_mut() {
                replace_in(v, &token, &value);
            }
            for arg in &mut self.args {
                replace_in(arg, &token, &value);
            }
            for entry in &mut self.tasks.0 {
                for v in entry.params.values_mut() {
                    replace_in(v, &token, &value);
                }
            }

            for commands in [
                &mut self.before_scheduler,
                &mut self.after_scheduler,
                &mut self.before_task,
                &mut self.after_task,
                &mut self.after_tasks,
            ] {
                for command in commands.iter_mut() {
                    replace_in(command, &token, &value);
                }
            }
        }
    }

    /// Assert nothing launch-relevant still carries a `${...}` token:
    /// pre-scheduler hooks, launch command, scheduler flags, args and env.
    pub fn ensure_launch_resolved(&self, vars: &Variables) -> CoreResult<()> {
        ensure_resolved(
            vars,
            self.before_scheduler
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(self.launch_command.as_str()))
                .chain(self.scheduler.values().map(String::as_str))
                .chain(self.args.iter().map(String::as_str))
                .chain(self.env.values().map(String::as_str)),
        )
    }

    /// The launch command with scheduler flags appended as `--key value`,
    /// in stable key order.
    pub fn launch_command_with_flags(&self) -> String {
        let mut command = self.launch_command.clone();
        let mut keys: Vec<_> = self.scheduler.keys().collect();
        keys.sort();
        for key in keys {
            command.push_str(&format!(" --{key} {}", self.scheduler[key]));
        }

        command
    }
}

fn replace_in(target: &mut String, token: &str, value: &str) {
    if target.contains(token) {
        *target = target.replace(token, value);
    }
}

/// Fail with the first unresolved `${...}` token found in `values`,
/// reporting the available context.
pub fn ensure_resolved<'a>(
    vars: &Variables,
    values: impl IntoIterator<Item = &'a str>,
) -> CoreResult<()> {
    for value in values {
        if let Some(token) = variable_token().find(value) {
            return Err(CoreError::UnresolvedVariable {
                token: token.as_str().to_string(),
                context: vars.to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_types() -> HashSet<String> {
        HashSet::from(["foo".to_string()])
    }

    fn valid_app() -> Application {
        Application {
            type_name: "foo".to_string(),
            id: "a".to_string(),
            cpu: 0.5,
            mem: 512.0,
            launch_command: "sleep 10".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_application_passes() {
        assert!(valid_app().validate(&runner_types()).is_ok());
    }

    #[test]
    fn validation_covers_each_invariant() {
        let mut app = valid_app();
        app.type_name = String::new();
        assert!(matches!(app.validate(&runner_types()), Err(CoreError::NoType)));

        let mut app = valid_app();
        app.id = String::new();
        assert!(matches!(app.validate(&runner_types()), Err(CoreError::NoId)));

        let mut app = valid_app();
        app.cpu = 0.0;
        assert!(matches!(app.validate(&runner_types()), Err(CoreError::InvalidCpu)));

        let mut app = valid_app();
        app.mem = 0.0;
        assert!(matches!(app.validate(&runner_types()), Err(CoreError::InvalidMem)));

        let mut app = valid_app();
        app.launch_command = String::new();
        assert!(matches!(
            app.validate(&runner_types()),
            Err(CoreError::NoLaunchCommand)
        ));

        let mut app = valid_app();
        app.instances = "bar".to_string();
        assert!(matches!(
            app.validate(&runner_types()),
            Err(CoreError::InvalidInstances)
        ));

        let mut app = valid_app();
        app.instances = "0".to_string();
        assert!(matches!(
            app.validate(&runner_types()),
            Err(CoreError::InvalidInstances)
        ));

        let mut app = valid_app();
        app.constraints = vec![vec!["hostname".to_string(), "NEAR".to_string()]];
        assert!(app.validate(&runner_types()).is_err());
    }

    #[test]
    fn tasks_require_a_registered_runner_type() {
        let mut app = valid_app();
        app.type_name = "unknown".to_string();
        app.tasks = TaskList(vec![TaskEntry {
            name: "init".to_string(),
            params: BTreeMap::new(),
        }]);

        match app.validate(&runner_types()) {
            Err(CoreError::NoTaskRunner(t)) => assert_eq!(t, "unknown"),
            other => panic!("expected NoTaskRunner, got {other:?}"),
        }
    }

    #[test]
    fn instances_accept_blank_all_and_numbers() {
        let cluster = ClusterSnapshot {
            activated_workers: 3,
            workers: Vec::new(),
        };

        let mut app = valid_app();
        assert_eq!(app.instance_count(&cluster).unwrap(), 1);

        app.instances = "2".to_string();
        assert_eq!(app.instance_count(&cluster).unwrap(), 2);

        app.instances = "all".to_string();
        assert_eq!(app.instance_count(&cluster).unwrap(), 3);
    }

    #[test]
    fn all_instances_with_constraints_count_matching_workers() {
        use gantry_cluster::Worker;

        let worker = |id: &str, host: &str| Worker {
            id: id.to_string(),
            hostname: host.to_string(),
            active: true,
            attributes: HashMap::new(),
            resources: HashMap::new(),
        };

        let cluster = ClusterSnapshot {
            activated_workers: 3,
            workers: vec![worker("s1", "h1"), worker("s2", "h1"), worker("s3", "h2")],
        };

        let mut app = valid_app();
        app.instances = "all".to_string();
        app.constraints = vec![vec!["hostname".to_string(), "UNIQUE".to_string()]];

        // Two distinct hostnames — the second h1 fails UNIQUE against the
        // growing history.
        assert_eq!(app.instance_count(&cluster).unwrap(), 2);
    }

    #[test]
    fn dependency_satisfaction() {
        let mut app = valid_app();
        app.dependencies = vec!["b".to_string(), "c".to_string()];

        let mut states = HashMap::from([
            ("b".to_string(), RunState::Running),
            ("c".to_string(), RunState::Running),
        ]);
        assert!(app.is_dependency_satisfied(&states));

        states.insert("c".to_string(), RunState::Staging);
        assert!(!app.is_dependency_satisfied(&states));

        states.remove("c");
        assert!(!app.is_dependency_satisfied(&states));
    }

    #[test]
    fn resolve_substitutes_everywhere() {
        let vars = Variables::new();
        vars.set_stack("foo", "bar");

        let mut app = valid_app();
        app.launch_command = "./${foo}.sh".to_string();
        app.scheduler = HashMap::from([("flag".to_string(), "${foo}".to_string())]);
        app.env = HashMap::from([("NAME".to_string(), "${foo}".to_string())]);
        app.args = vec!["--opt=${foo}".to_string()];
        app.before_scheduler = vec!["${foo}".to_string()];
        app.tasks = TaskList(vec![TaskEntry {
            name: "init".to_string(),
            params: BTreeMap::from([("target".to_string(), "${foo}".to_string())]),
        }]);

        app.resolve_variables(&vars);

        assert_eq!(app.launch_command, "./bar.sh");
        assert_eq!(app.scheduler["flag"], "bar");
        assert_eq!(app.env["NAME"], "bar");
        assert_eq!(app.args[0], "--opt=bar");
        assert_eq!(app.before_scheduler[0], "bar");
        assert_eq!(app.tasks.0[0].params["target"], "bar");
    }

    #[test]
    fn resolution_is_idempotent() {
        let vars = Variables::new();
        vars.set_stack("foo", "bar");

        let mut app = valid_app();
        app.launch_command = "./${foo}.sh".to_string();

        app.resolve_variables(&vars);
        let once = app.clone();
        app.resolve_variables(&vars);

        assert_eq!(app, once);
    }

    #[test]
    fn ensure_resolved_reports_first_token_and_context() {
        let vars = Variables::new();
        vars.set_global("zone", "z1");

        let mut app = valid_app();
        app.launch_command = "./${foo}.sh".to_string();

        let err = app.ensure_launch_resolved(&vars).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Unresolved variable ${foo}."));
        assert!(message.contains("Available variables:"));
        assert!(message.contains("zone"));
    }

    #[test]
    fn launch_command_appends_sorted_scheduler_flags() {
        let mut app = valid_app();
        app.scheduler = HashMap::from([
            ("zk".to_string(), "zk://host:2181".to_string()),
            ("api".to_string(), "http://host:7000".to_string()),
        ]);

        assert_eq!(
            app.launch_command_with_flags(),
            "sleep 10 --api http://host:7000 --zk zk://host:2181"
        );
    }

    #[test]
    fn task_list_preserves_document_order() {
        let yaml = "first:\n  k: v\nsecond:\n  k: w\nthird: {}\n";
        let tasks: TaskList = serde_yaml::from_str(yaml).unwrap();
        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);

        let back = serde_yaml::to_string(&tasks).unwrap();
        let again: TaskList = serde_yaml::from_str(&back).unwrap();
        assert_eq!(tasks, again);
    }

    #[test]
    fn application_parses_document_field_names() {
        let yaml = r#"
type: run-once
id: cleaner
cpu: 0.5
mem: 256
instances: "all"
launch_command: ./clean.sh
constraints:
  - [hostname, UNIQUE]
artifact_urls:
  - http://repo/clean.tgz
scheduler:
  api: http://host:7000
before_scheduler:
  - echo start
"#;
        let app: Application = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(app.type_name, "run-once");
        assert_eq!(app.id, "cleaner");
        assert_eq!(app.instances, "all");
        assert_eq!(app.constraints[0], vec!["hostname", "UNIQUE"]);
        assert_eq!(app.before_scheduler, vec!["echo start"]);
    }
}
