//! Stack model — a declarative bundle of applications.
//!
//! Stacks form inheritance chains through their `from` parent link and merge
//! child-over-parent field-wise. The same merge drives both parent
//! resolution and layer composition.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::Application;
use crate::error::{CoreError, CoreResult};
use crate::layer::Layer;

/// A named set of applications with a parent link and a layer tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stack {
    pub namespace: String,
    pub name: String,
    /// Parent stack name; empty for a root.
    pub from: String,
    pub applications: HashMap<String, Application>,
    pub layer: Layer,
}

impl Stack {
    /// Parse a stack document.
    pub fn from_yaml(document: &str) -> CoreResult<Self> {
        Ok(serde_yaml::from_str(document)?)
    }

    /// Render the stack as a document.
    pub fn to_yaml(&self) -> CoreResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Stack identity: `namespace.name`, or just `name` without a namespace.
    pub fn id(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Validate every application in the stack.
    pub fn validate(&self, task_runner_types: &HashSet<String>) -> CoreResult<()> {
        for (name, application) in &self.applications {
            application
                .validate(task_runner_types)
                .map_err(|source| CoreError::InvalidApplication {
                    id: name.clone(),
                    source: Box::new(source),
                })?;
        }

        Ok(())
    }

    /// Merge a child layer into this stack, enforcing the layer ordering:
    /// a parent may only absorb a child at the same or a lower level.
    pub fn merge_layer(&mut self, child: &Stack) -> CoreResult<()> {
        if self.layer.level() < child.layer.level() {
            return Err(CoreError::IllegalLayerMerge {
                parent: self.layer.level(),
                child: child.layer.level(),
            });
        }

        self.merge(child);
        Ok(())
    }

    /// Merge `child` into this stack: the child's name wins, and each child
    /// application is inserted or merged field-wise into the parent's.
    pub fn merge(&mut self, child: &Stack) {
        debug!(parent = %self.name, child = %child.name, "merging stacks");
        self.name = child.name.clone();

        for (name, child_app) in &child.applications {
            match self.applications.get_mut(name) {
                None => {
                    self.applications.insert(name.clone(), child_app.clone());
                }
                Some(app) => merge_application(app, child_app),
            }
        }
    }
}

/// Field-wise child-over-parent application merge: non-empty scalars and
/// slices replace, scheduler entries upsert with empty values deleting,
/// a non-empty task list replaces wholesale.
fn merge_application(app: &mut Application, child: &Application) {
    set_string(&child.type_name, &mut app.type_name);
    set_string(&child.id, &mut app.id);
    set_string(&child.version, &mut app.version);
    set_f64(child.cpu, &mut app.cpu);
    set_f64(child.mem, &mut app.mem);
    set_slice(&child.ports, &mut app.ports);
    set_string(&child.instances, &mut app.instances);
    set_slice(&child.constraints, &mut app.constraints);
    set_string(&child.user, &mut app.user);
    set_string(&child.healthcheck, &mut app.healthcheck);
    set_string(&child.launch_command, &mut app.launch_command);
    set_slice(&child.args, &mut app.args);
    set_slice(&child.artifact_urls, &mut app.artifact_urls);
    set_slice(&child.additional_artifacts, &mut app.additional_artifacts);
    set_slice(&child.dependencies, &mut app.dependencies);
    set_string(&child.start_time, &mut app.start_time);
    set_string(&child.time_schedule, &mut app.time_schedule);

    if !child.env.is_empty() {
        app.env = child.env.clone();
    }

    for (key, value) in &child.scheduler {
        if value.is_empty() {
            app.scheduler.remove(key);
        } else {
            app.scheduler.insert(key.clone(), value.clone());
        }
    }

    if !child.tasks.is_empty() {
        app.tasks = child.tasks.clone();
    }

    if child.docker.is_some() {
        app.docker = child.docker.clone();
    }

    set_slice(&child.before_scheduler, &mut app.before_scheduler);
    set_slice(&child.after_scheduler, &mut app.after_scheduler);
    set_slice(&child.before_task, &mut app.before_task);
    set_slice(&child.after_task, &mut app.after_task);
    set_slice(&child.after_tasks, &mut app.after_tasks);
}

fn set_string(from: &str, to: &mut String) {
    if !from.is_empty() {
        *to = from.to_string();
    }
}

fn set_f64(from: f64, to: &mut f64) {
    if from != 0.0 {
        *to = from;
    }
}

fn set_slice<T: Clone>(from: &[T], to: &mut Vec<T>) {
    if !from.is_empty() {
        *to = from.to_vec();
    }
}
