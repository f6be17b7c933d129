//! Three-scoped variable context for `${key}` substitution.
//!
//! Variables live in three scopes: global (service-wide, set from server
//! flags), arbitrary (provided with a run request) and stack (filled while a
//! stack executes, e.g. discovered hosts and ports). Reads resolve
//! stack > arbitrary > global. All operations are safe under concurrent
//! access; `all()` returns a merged snapshot.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// The three scope maps, in serialization form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableScopes {
    #[serde(default)]
    pub global: HashMap<String, String>,
    #[serde(default)]
    pub arbitrary: HashMap<String, String>,
    #[serde(default)]
    pub stack: HashMap<String, String>,
}

/// Thread-safe variable context.
#[derive(Debug, Default)]
pub struct Variables {
    scopes: RwLock<VariableScopes>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a context from previously captured scopes.
    pub fn from_scopes(scopes: VariableScopes) -> Self {
        Self {
            scopes: RwLock::new(scopes),
        }
    }

    pub fn set_global(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write().global.insert(key.into(), value.into());
    }

    pub fn set_arbitrary(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write().arbitrary.insert(key.into(), value.into());
    }

    pub fn set_stack(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write().stack.insert(key.into(), value.into());
    }

    /// Look a key up with stack > arbitrary > global precedence.
    pub fn get(&self, key: &str) -> Option<String> {
        let scopes = self.read();
        scopes
            .stack
            .get(key)
            .or_else(|| scopes.arbitrary.get(key))
            .or_else(|| scopes.global.get(key))
            .cloned()
    }

    /// Merged snapshot with stack overriding arbitrary overriding global.
    pub fn all(&self) -> HashMap<String, String> {
        let scopes = self.read();
        let mut all = scopes.global.clone();
        all.extend(scopes.arbitrary.iter().map(|(k, v)| (k.clone(), v.clone())));
        all.extend(scopes.stack.iter().map(|(k, v)| (k.clone(), v.clone())));
        all
    }

    /// Snapshot of the scope maps, preserving scope membership.
    pub fn snapshot(&self) -> VariableScopes {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, VariableScopes> {
        self.scopes.read().expect("variable context poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, VariableScopes> {
        self.scopes.write().expect("variable context poisoned")
    }
}

impl Clone for Variables {
    fn clone(&self) -> Self {
        Self::from_scopes(self.snapshot())
    }
}

impl fmt::Display for Variables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scopes = self.snapshot();
        match serde_json::to_string_pretty(&scopes) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("<unprintable variable context>"),
        }
    }
}

impl Serialize for Variables {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Variables {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Variables::from_scopes(VariableScopes::deserialize(
            deserializer,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_follows_scope_precedence() {
        let vars = Variables::new();
        vars.set_global("key", "global");
        assert_eq!(vars.get("key").as_deref(), Some("global"));

        vars.set_arbitrary("key", "arbitrary");
        assert_eq!(vars.get("key").as_deref(), Some("arbitrary"));

        vars.set_stack("key", "stack");
        assert_eq!(vars.get("key").as_deref(), Some("stack"));

        assert_eq!(vars.get("missing"), None);
    }

    #[test]
    fn all_merges_with_stack_winning() {
        let vars = Variables::new();
        vars.set_global("a", "1");
        vars.set_global("b", "1");
        vars.set_arbitrary("b", "2");
        vars.set_arbitrary("c", "2");
        vars.set_stack("c", "3");

        let all = vars.all();
        assert_eq!(all["a"], "1");
        assert_eq!(all["b"], "2");
        assert_eq!(all["c"], "3");
    }

    #[test]
    fn json_round_trip_preserves_scopes() {
        let vars = Variables::new();
        vars.set_global("g", "1");
        vars.set_arbitrary("a", "2");
        vars.set_stack("s", "3");

        let json = serde_json::to_string(&vars).unwrap();
        let back: Variables = serde_json::from_str(&json).unwrap();

        let scopes = back.snapshot();
        assert_eq!(scopes.global["g"], "1");
        assert_eq!(scopes.arbitrary["a"], "2");
        assert_eq!(scopes.stack["s"], "3");
        assert!(!scopes.global.contains_key("s"));
    }

    #[test]
    fn concurrent_writes_are_safe() {
        use std::sync::Arc;
        use std::thread;

        let vars = Arc::new(Variables::new());
        let mut handles = vec![];
        for i in 0..8 {
            let vars = vars.clone();
            handles.push(thread::spawn(move || {
                for j in 0..50 {
                    vars.set_stack(format!("k{i}-{j}"), "v");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(vars.all().len(), 8 * 50);
    }

    #[test]
    fn display_renders_all_three_scopes() {
        let vars = Variables::new();
        vars.set_global("zone", "z1");
        let text = vars.to_string();
        assert!(text.contains("global"));
        assert!(text.contains("arbitrary"));
        assert!(text.contains("stack"));
        assert!(text.contains("zone"));
    }
}
