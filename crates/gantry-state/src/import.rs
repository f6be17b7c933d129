//! State export and import.
//!
//! Export captures every stored stack document (as YAML text) plus every
//! recorded run state. Import restores the stacks in a parent-respecting
//! order, then hands back the previously RUNNING states sorted by
//! timestamp so the caller can re-run them oldest-first.

use gantry_core::{RunState, Stack};
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::stacks::StackStorage;
use crate::state::StateStorage;
use crate::types::{DeployState, StackState};

/// Capture the full service state for export.
pub fn export_state(
    stacks: &dyn StackStorage,
    state: &dyn StateStorage,
) -> StateResult<DeployState> {
    let mut documents = Vec::new();
    for stack in stacks.get_all()? {
        documents.push(
            stack
                .to_yaml()
                .map_err(|e| StateError::Document(e.to_string()))?,
        );
    }

    Ok(DeployState {
        stacks: documents,
        running_stacks: state.all_states()?,
    })
}

/// Insert the exported stacks into `stacks`, repeating passes so a stack is
/// only inserted after its parent. A pass without progress means a parent
/// is missing from the export: fail with the orphan's name.
///
/// Returns the previously RUNNING states sorted by timestamp ascending,
/// ready to be re-run in order.
pub fn import_state(
    deploy: &DeployState,
    stacks: &dyn StackStorage,
) -> StateResult<Vec<StackState>> {
    let mut pending = Vec::new();
    for document in &deploy.stacks {
        pending
            .push(Stack::from_yaml(document).map_err(|e| StateError::Document(e.to_string()))?);
    }

    while !pending.is_empty() {
        let mut remaining = Vec::new();
        let before = pending.len();

        for stack in pending {
            let parent_ready = stack.from.is_empty() || stacks.get_raw(&stack.from).is_ok();
            if parent_ready {
                match stacks.store_stack(&stack) {
                    Ok(()) => debug!(stack = %stack.name, "stack imported"),
                    // Already present on this instance; nothing to do.
                    Err(StateError::StackExists) => {}
                    Err(e) => return Err(e),
                }
            } else {
                remaining.push(stack);
            }
        }

        if remaining.len() == before {
            return Err(StateError::OrphanStack(remaining[0].name.clone()));
        }
        pending = remaining;
    }

    let mut running: Vec<StackState> = deploy
        .running_stacks
        .iter()
        .filter(|s| s.status == RunState::Running)
        .cloned()
        .collect();
    running.sort_by_key(|s| s.timestamp);

    info!(
        stacks = deploy.stacks.len(),
        running = running.len(),
        "state imported"
    );
    Ok(running)
}
