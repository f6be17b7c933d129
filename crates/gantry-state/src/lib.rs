//! gantry-state — embedded persistence for gantry.
//!
//! Backed by [redb](https://docs.rs/redb); every domain type is
//! JSON-serialized into `&str` → `&[u8]` tables. Four concerns live here:
//!
//! - [`stacks`] — stack documents with parent links and layer chains
//! - [`state`] — per-(stack, zone) run state, never deleted
//! - [`users`] — API users with digested keys
//! - [`framework`] — scheduler registration id and bootstrap context
//!
//! Each storage trait has a redb-backed implementation for the server and
//! an in-memory (or noop) one for dev mode and tests, chosen at
//! construction.

pub mod error;
pub mod framework;
pub mod import;
pub mod stacks;
pub mod state;
pub mod tables;
pub mod types;
pub mod users;

use std::path::Path;
use std::sync::Arc;

use redb::Database;

pub use error::{StateError, StateResult};
pub use framework::FrameworkStorage;
pub use import::{export_state, import_state};
pub use stacks::{MemoryStackStore, RedbStackStore, StackStorage};
pub use state::{MemoryStateStore, RedbStateStore, StateStorage};
pub use types::{state_key, DeployState, StackState, User, UserRole};
pub use users::{NoopUserStore, RedbUserStore, UserStorage};

/// Open (or create) the shared on-disk database all redb stores attach to.
pub fn open_database(path: &Path) -> StateResult<Arc<Database>> {
    let db = Database::create(path).map_err(|e| StateError::Open(e.to_string()))?;
    Ok(Arc::new(db))
}

/// Create an ephemeral in-memory database (for testing).
pub fn open_in_memory_database() -> StateResult<Arc<Database>> {
    let backend = redb::backends::InMemoryBackend::new();
    let db = Database::builder()
        .create_with_backend(backend)
        .map_err(|e| StateError::Open(e.to_string()))?;
    Ok(Arc::new(db))
}
