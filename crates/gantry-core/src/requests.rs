//! Run request — the operator's ask to bring a stack up in a zone.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default number of health polls before a run gives up on an application.
pub const DEFAULT_APPLICATION_MAX_WAIT: u32 = 600;

/// Request to run a named stack in a named zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub name: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default = "default_max_wait")]
    pub maxwait: u32,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Regex patterns; matching application IDs are marked RUNNING without
    /// being dispatched.
    #[serde(default)]
    pub skip: Vec<String>,
}

fn default_max_wait() -> u32 {
    DEFAULT_APPLICATION_MAX_WAIT
}

impl RunRequest {
    pub fn new(name: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            zone: zone.into(),
            maxwait: DEFAULT_APPLICATION_MAX_WAIT,
            variables: HashMap::new(),
            skip: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maxwait_defaults_when_absent() {
        let request: RunRequest = serde_json::from_str(r#"{"name": "web", "zone": "z1"}"#).unwrap();
        assert_eq!(request.maxwait, DEFAULT_APPLICATION_MAX_WAIT);
        assert!(request.variables.is_empty());
        assert!(request.skip.is_empty());
    }

    #[test]
    fn full_request_parses() {
        let request: RunRequest = serde_json::from_str(
            r#"{"name": "web", "zone": "z1", "maxwait": 30,
                "variables": {"foo": "bar"}, "skip": ["^db-.*$"]}"#,
        )
        .unwrap();
        assert_eq!(request.maxwait, 30);
        assert_eq!(request.variables["foo"], "bar");
        assert_eq!(request.skip, vec!["^db-.*$"]);
    }
}
