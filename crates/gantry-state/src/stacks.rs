//! Stack storage — CRUD over stack documents with parent links.
//!
//! Two backends implement the same trait: a redb-backed store for the
//! server and a mutex-guarded in-memory store for tests and dev mode. The
//! merged-stack and layer-chain reads are shared trait logic built on the
//! backends' raw primitives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use redb::{Database, ReadableTable};
use tracing::{debug, info};

use gantry_core::Stack;

use crate::error::{StateError, StateResult};
use crate::tables::STACKS;

/// Storage for stack documents.
///
/// `insert_raw`, `get_raw`, `delete_raw` and `get_all` are backend
/// primitives; everything else is shared logic.
pub trait StackStorage: Send + Sync {
    /// Unconditionally write a stack document.
    fn insert_raw(&self, stack: &Stack) -> StateResult<()>;

    /// Fetch one stack without parent merging.
    fn get_raw(&self, name: &str) -> StateResult<Stack>;

    /// Remove one stack document, failing if absent.
    fn delete_raw(&self, name: &str) -> StateResult<()>;

    /// Every stored stack, unmerged.
    fn get_all(&self) -> StateResult<Vec<Stack>>;

    /// Store a new stack. Fails if the name is taken, if a non-empty parent
    /// does not exist, or if linking it would close a parent cycle.
    fn store_stack(&self, stack: &Stack) -> StateResult<()> {
        if self.get_raw(&stack.name).is_ok() {
            return Err(StateError::StackExists);
        }

        if !stack.from.is_empty() {
            let mut visited = std::collections::HashSet::new();
            let mut ancestor = stack.from.clone();
            loop {
                if ancestor == stack.name {
                    return Err(StateError::ParentCycle(stack.name.clone()));
                }
                if !visited.insert(ancestor.clone()) {
                    return Err(StateError::ParentCycle(ancestor));
                }
                let parent = self
                    .get_raw(&ancestor)
                    .map_err(|_| StateError::ParentMissing(ancestor.clone()))?;
                if parent.from.is_empty() {
                    break;
                }
                ancestor = parent.from;
            }
        }

        self.insert_raw(stack)?;
        debug!(stack = %stack.name, parent = %stack.from, "stack stored");
        Ok(())
    }

    /// Fetch a stack merged through its parent chain, child fields winning.
    fn get_stack(&self, name: &str) -> StateResult<Stack> {
        let stack = self.get_raw(name)?;
        if stack.from.is_empty() {
            return Ok(stack);
        }

        let mut parent = self.get_stack(&stack.from)?;
        parent.merge(&stack);
        Ok(parent)
    }

    /// Resolve the layer chain for a zone: zone alone, cluster alone, or
    /// datacenter ← cluster ← zone, depending on how far the parents reach.
    fn get_layer_chain(&self, zone: &str) -> StateResult<Stack> {
        let zone_layer = self.get_raw(zone)?;
        if zone_layer.from.is_empty() {
            return Ok(zone_layer);
        }

        let cluster = self.get_raw(&zone_layer.from)?;
        if cluster.from.is_empty() {
            return Ok(cluster);
        }

        let mut datacenter = self.get_raw(&cluster.from)?;
        datacenter.merge_layer(&cluster)?;
        datacenter.merge_layer(&zone_layer)?;
        Ok(datacenter)
    }

    /// Names of stacks whose parent is `name`.
    fn children_of(&self, name: &str) -> StateResult<Vec<String>> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|s| s.from == name)
            .map(|s| s.name)
            .collect())
    }

    /// Remove a stack. Without `force`, fails when dependant stacks exist;
    /// with `force`, removes the whole subtree.
    fn remove_stack(&self, name: &str, force: bool) -> StateResult<()> {
        self.get_raw(name).map_err(|_| StateError::StackMissing)?;

        info!(stack = name, force, "removing stack");
        let children = self.children_of(name)?;
        if !children.is_empty() {
            if !force {
                return Err(StateError::DependantStacks {
                    stack: name.to_string(),
                    children: children.join("\n"),
                });
            }
            for child in children {
                self.remove_stack(&child, force)?;
            }
        }

        self.delete_raw(name)
    }
}

// ── redb backend ───────────────────────────────────────────────

/// Convert any `Display` error into a `StateError` variant.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}
pub(crate) use map_err;

/// Stack store backed by redb.
#[derive(Clone)]
pub struct RedbStackStore {
    db: Arc<Database>,
}

impl RedbStackStore {
    /// Wrap a shared database, creating the stacks table if absent.
    pub fn new(db: Arc<Database>) -> StateResult<Self> {
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(STACKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(Self { db })
    }
}

impl StackStorage for RedbStackStore {
    fn insert_raw(&self, stack: &Stack) -> StateResult<()> {
        let value = serde_json::to_vec(stack).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(STACKS).map_err(map_err!(Table))?;
            table
                .insert(stack.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_raw(&self, name: &str) -> StateResult<Stack> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STACKS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))
            }
            None => Err(StateError::StackMissing),
        }
    }

    fn delete_raw(&self, name: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(STACKS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if existed {
            Ok(())
        } else {
            Err(StateError::StackMissing)
        }
    }

    fn get_all(&self) -> StateResult<Vec<Stack>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STACKS).map_err(map_err!(Table))?;
        let mut stacks = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            stacks.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(stacks)
    }
}

// ── in-memory backend ──────────────────────────────────────────

/// Mutex-guarded in-memory stack store for dev mode and tests.
#[derive(Default)]
pub struct MemoryStackStore {
    stacks: Mutex<HashMap<String, Stack>>,
}

impl MemoryStackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StackStorage for MemoryStackStore {
    fn insert_raw(&self, stack: &Stack) -> StateResult<()> {
        self.stacks
            .lock()
            .expect("stack map poisoned")
            .insert(stack.name.clone(), stack.clone());
        Ok(())
    }

    fn get_raw(&self, name: &str) -> StateResult<Stack> {
        self.stacks
            .lock()
            .expect("stack map poisoned")
            .get(name)
            .cloned()
            .ok_or(StateError::StackMissing)
    }

    fn delete_raw(&self, name: &str) -> StateResult<()> {
        match self.stacks.lock().expect("stack map poisoned").remove(name) {
            Some(_) => Ok(()),
            None => Err(StateError::StackMissing),
        }
    }

    fn get_all(&self) -> StateResult<Vec<Stack>> {
        Ok(self
            .stacks
            .lock()
            .expect("stack map poisoned")
            .values()
            .cloned()
            .collect())
    }
}
