//! Run-state storage — stack/application statuses and captured variables.
//!
//! Every transition during a stack run is persisted under the `(stack,
//! zone)` pair so a fresh instance can observe, export and replay what was
//! running. Records are only ever created or updated, never deleted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use redb::{Database, ReadableTable};
use tracing::debug;

use gantry_core::{RunState, Variables};

use crate::error::{StateError, StateResult};
use crate::stacks::map_err;
use crate::tables::STACK_STATES;
use crate::types::{state_key, StackState};

/// Storage for per-(stack, zone) run state.
pub trait StateStorage: Send + Sync {
    fn save_stack_status(&self, stack: &str, zone: &str, status: RunState) -> StateResult<()>;

    fn save_application_status(
        &self,
        stack: &str,
        zone: &str,
        application: &str,
        status: RunState,
    ) -> StateResult<()>;

    fn save_stack_variables(&self, stack: &str, zone: &str, variables: &Variables)
        -> StateResult<()>;

    fn get_stack_state(&self, stack: &str, zone: &str) -> StateResult<StackState>;

    /// Every recorded state, for export.
    fn all_states(&self) -> StateResult<Vec<StackState>>;
}

fn update(
    existing: Option<StackState>,
    stack: &str,
    zone: &str,
    apply: impl FnOnce(&mut StackState),
) -> StackState {
    let mut state =
        existing.unwrap_or_else(|| StackState::new(stack, zone, RunState::Staging));
    apply(&mut state);
    state.timestamp = Utc::now();
    state
}

// ── redb backend ───────────────────────────────────────────────

/// Run-state store backed by redb.
#[derive(Clone)]
pub struct RedbStateStore {
    db: Arc<Database>,
}

impl RedbStateStore {
    pub fn new(db: Arc<Database>) -> StateResult<Self> {
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(STACK_STATES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(Self { db })
    }

    fn read(&self, key: &str) -> StateResult<Option<StackState>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STACK_STATES).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
            )),
            None => Ok(None),
        }
    }

    fn write(&self, state: &StackState) -> StateResult<()> {
        let key = state.table_key();
        let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(STACK_STATES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, status = %state.status, "stack state saved");
        Ok(())
    }

    fn modify(
        &self,
        stack: &str,
        zone: &str,
        apply: impl FnOnce(&mut StackState),
    ) -> StateResult<()> {
        let existing = self.read(&state_key(stack, zone))?;
        self.write(&update(existing, stack, zone, apply))
    }
}

impl StateStorage for RedbStateStore {
    fn save_stack_status(&self, stack: &str, zone: &str, status: RunState) -> StateResult<()> {
        self.modify(stack, zone, |state| state.status = status)
    }

    fn save_application_status(
        &self,
        stack: &str,
        zone: &str,
        application: &str,
        status: RunState,
    ) -> StateResult<()> {
        self.modify(stack, zone, |state| {
            state.applications.insert(application.to_string(), status);
        })
    }

    fn save_stack_variables(
        &self,
        stack: &str,
        zone: &str,
        variables: &Variables,
    ) -> StateResult<()> {
        let scopes = variables.snapshot();
        self.modify(stack, zone, move |state| state.variables = scopes)
    }

    fn get_stack_state(&self, stack: &str, zone: &str) -> StateResult<StackState> {
        self.read(&state_key(stack, zone))?
            .ok_or(StateError::StackStateMissing)
    }

    fn all_states(&self) -> StateResult<Vec<StackState>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STACK_STATES).map_err(map_err!(Table))?;
        let mut states = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            states.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(states)
    }
}

// ── in-memory backend ──────────────────────────────────────────

/// Mutex-guarded in-memory run-state store.
#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, StackState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn modify(
        &self,
        stack: &str,
        zone: &str,
        apply: impl FnOnce(&mut StackState),
    ) -> StateResult<()> {
        let mut states = self.states.lock().expect("state map poisoned");
        let key = state_key(stack, zone);
        let state = update(states.remove(&key), stack, zone, apply);
        states.insert(key, state);
        Ok(())
    }
}

impl StateStorage for MemoryStateStore {
    fn save_stack_status(&self, stack: &str, zone: &str, status: RunState) -> StateResult<()> {
        self.modify(stack, zone, |state| state.status = status)
    }

    fn save_application_status(
        &self,
        stack: &str,
        zone: &str,
        application: &str,
        status: RunState,
    ) -> StateResult<()> {
        self.modify(stack, zone, |state| {
            state.applications.insert(application.to_string(), status);
        })
    }

    fn save_stack_variables(
        &self,
        stack: &str,
        zone: &str,
        variables: &Variables,
    ) -> StateResult<()> {
        let scopes = variables.snapshot();
        self.modify(stack, zone, move |state| state.variables = scopes)
    }

    fn get_stack_state(&self, stack: &str, zone: &str) -> StateResult<StackState> {
        self.states
            .lock()
            .expect("state map poisoned")
            .get(&state_key(stack, zone))
            .cloned()
            .ok_or(StateError::StackStateMissing)
    }

    fn all_states(&self) -> StateResult<Vec<StackState>> {
        Ok(self
            .states
            .lock()
            .expect("state map poisoned")
            .values()
            .cloned()
            .collect())
    }
}
