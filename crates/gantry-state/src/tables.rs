//! redb table definitions for the gantry stores.
//!
//! Every table maps `&str` keys to JSON-serialized values. Composite keys
//! use `{stack}:{zone}` for per-zone run state.

use redb::TableDefinition;

/// Stack documents keyed by stack name.
pub const STACKS: TableDefinition<&str, &[u8]> = TableDefinition::new("stacks");

/// Run states keyed by `{stack}:{zone}`.
pub const STACK_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("stack_states");

/// API users keyed by user name.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
