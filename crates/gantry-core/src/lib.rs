//! gantry-core — the stack and application model.
//!
//! Domain types shared by every gantry crate: the [`Application`] record and
//! its validation, the [`Stack`] with parent and layer merging, the
//! three-scoped [`Variables`] context driving `${key}` substitution, run
//! states and run requests.

pub mod application;
pub mod docker;
pub mod error;
pub mod layer;
pub mod requests;
pub mod stack;
pub mod status;
pub mod variables;

pub use application::{ensure_resolved, Application, TaskEntry, TaskList};
pub use docker::{Docker, DockerPortMapping, DockerVolume};
pub use error::{CoreError, CoreResult};
pub use layer::Layer;
pub use requests::{RunRequest, DEFAULT_APPLICATION_MAX_WAIT};
pub use stack::Stack;
pub use status::{ApplicationRunStatus, RunState};
pub use variables::{VariableScopes, Variables};
