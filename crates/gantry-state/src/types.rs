//! Persisted state types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gantry_core::{RunState, VariableScopes};

/// Persisted run state of one (stack, zone) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackState {
    pub name: String,
    pub zone: String,
    pub status: RunState,
    /// Per-application run states.
    #[serde(default)]
    pub applications: HashMap<String, RunState>,
    /// Variables captured so far, by scope.
    #[serde(default)]
    pub variables: VariableScopes,
    /// Time of the last transition; orders replay on import.
    pub timestamp: DateTime<Utc>,
}

impl StackState {
    pub fn new(name: &str, zone: &str, status: RunState) -> Self {
        Self {
            name: name.to_string(),
            zone: zone.to_string(),
            status,
            applications: HashMap::new(),
            variables: VariableScopes::default(),
            timestamp: Utc::now(),
        }
    }

    /// Composite key for the stack-states table.
    pub fn table_key(&self) -> String {
        state_key(&self.name, &self.zone)
    }
}

/// Composite `{stack}:{zone}` key.
pub fn state_key(stack: &str, zone: &str) -> String {
    format!("{stack}:{zone}")
}

/// Exportable service state: every stored stack document plus every
/// recorded run state. Importing on a fresh instance restores both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployState {
    /// Stack documents as YAML text.
    #[serde(rename = "Stacks")]
    pub stacks: Vec<String>,
    #[serde(rename = "RunningStacks")]
    pub running_stacks: Vec<StackState>,
}

/// Role attached to an API user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Regular,
}

impl UserRole {
    /// Parse the role name used by the create-user API; anything but
    /// `admin` is a regular user.
    pub fn from_name(name: &str) -> Self {
        if name == "admin" {
            UserRole::Admin
        } else {
            UserRole::Regular
        }
    }
}

/// An API user. `key` holds the sha256 digest of the issued key, never the
/// plaintext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub name: String,
    pub key: String,
    pub role: UserRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_key_is_stack_colon_zone() {
        assert_eq!(state_key("web", "z1"), "web:z1");
        let state = StackState::new("web", "z1", RunState::Staging);
        assert_eq!(state.table_key(), "web:z1");
    }

    #[test]
    fn user_role_from_name() {
        assert_eq!(UserRole::from_name("admin"), UserRole::Admin);
        assert_eq!(UserRole::from_name("regular"), UserRole::Regular);
        assert_eq!(UserRole::from_name("anything"), UserRole::Regular);
    }

    #[test]
    fn deploy_state_round_trip() {
        let deploy = DeployState {
            stacks: vec!["name: web\n".to_string()],
            running_stacks: vec![StackState::new("web", "z1", RunState::Running)],
        };
        let json = serde_json::to_string(&deploy).unwrap();
        assert!(json.contains("\"Stacks\""));
        assert!(json.contains("\"RunningStacks\""));

        let back: DeployState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stacks.len(), 1);
        assert_eq!(back.running_stacks[0].name, "web");
    }
}
