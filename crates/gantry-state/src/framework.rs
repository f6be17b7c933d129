//! Framework persistence — registration id and bootstrap context.
//!
//! The scheduler's registration id and the context produced by the
//! bootstrap run survive restarts here, so a restarted server re-registers
//! under the same identity and re-imports against the same variables. The
//! backend is chosen by URI; `file:<path>` stores JSON on disk.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use gantry_core::VariableScopes;

use crate::error::{StateError, StateResult};

/// Persisted framework identity and bootstrap context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FrameworkRecord {
    framework_id: Option<String>,
    bootstrap_context: VariableScopes,
}

enum Backend {
    File(PathBuf),
}

/// Durable framework state with a pluggable backend.
pub struct FrameworkStorage {
    backend: Backend,
    pub framework_id: Option<String>,
    pub bootstrap_context: VariableScopes,
}

impl FrameworkStorage {
    /// Open storage for a `file:<path>` URI.
    pub fn open(uri: &str) -> StateResult<Self> {
        let (scheme, rest) = uri
            .split_once(':')
            .ok_or_else(|| StateError::UnsupportedStorage(uri.to_string()))?;

        let backend = match scheme {
            "file" => Backend::File(PathBuf::from(rest)),
            _ => return Err(StateError::UnsupportedStorage(uri.to_string())),
        };

        Ok(Self {
            backend,
            framework_id: None,
            bootstrap_context: VariableScopes::default(),
        })
    }

    /// Load persisted state. Missing or unreadable state is tolerated with
    /// a warning — a fresh deployment has nothing to recover.
    pub fn load(&mut self) {
        let Backend::File(path) = &self.backend;
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(_) => {
                warn!(path = %path.display(), "no framework state found, starting fresh");
                return;
            }
        };

        match serde_json::from_slice::<FrameworkRecord>(&raw) {
            Ok(record) => {
                self.framework_id = record.framework_id;
                self.bootstrap_context = record.bootstrap_context;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "unreadable framework state"),
        }
    }

    /// Persist the current state.
    pub fn save(&self) -> StateResult<()> {
        let record = FrameworkRecord {
            framework_id: self.framework_id.clone(),
            bootstrap_context: self.bootstrap_context.clone(),
        };
        let json = serde_json::to_vec(&record).map_err(|e| StateError::Serialize(e.to_string()))?;

        let Backend::File(path) = &self.backend;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("gantry-framework-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(matches!(
            FrameworkStorage::open("zk:zookeeper:2181/gantry"),
            Err(StateError::UnsupportedStorage(_))
        ));
        assert!(FrameworkStorage::open("nonsense").is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let path = temp_path();
        let uri = format!("file:{}", path.display());

        let mut storage = FrameworkStorage::open(&uri).unwrap();
        storage.framework_id = Some("framework-123".to_string());
        storage.bootstrap_context.stack.insert("db.host".to_string(), "h1".to_string());
        storage.save().unwrap();

        let mut restored = FrameworkStorage::open(&uri).unwrap();
        restored.load();
        assert_eq!(restored.framework_id.as_deref(), Some("framework-123"));
        assert_eq!(restored.bootstrap_context.stack["db.host"], "h1");

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn load_tolerates_missing_file() {
        let uri = format!("file:{}", temp_path().display());
        let mut storage = FrameworkStorage::open(&uri).unwrap();
        storage.load();
        assert!(storage.framework_id.is_none());
    }
}
