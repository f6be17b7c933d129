//! Run states and per-application run statuses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of an application (or a whole stack) within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Staging,
    Running,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Staging => "staging",
            RunState::Running => "running",
            RunState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Terminal outcome of one dispatched application, emitted exactly once.
#[derive(Debug, Clone)]
pub struct ApplicationRunStatus {
    pub application_id: String,
    pub error: Option<String>,
}

impl ApplicationRunStatus {
    pub fn success(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            error: None,
        }
    }

    pub fn failure(application_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            error: Some(error.into()),
        }
    }
}
