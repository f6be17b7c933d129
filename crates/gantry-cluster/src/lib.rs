//! gantry-cluster — cluster-manager plumbing for gantry.
//!
//! Three seams towards the cluster manager:
//!
//! - [`view`] — a refreshable, lock-protected snapshot of worker nodes used
//!   for instance resolution and placement decisions
//! - [`offer`] — resource offers as consumed by the run-once scheduler
//! - [`driver`] — the command channel (register, launch, decline, revive)
//!   plus the event types the manager delivers back

pub mod driver;
pub mod error;
pub mod offer;
pub mod view;

pub use driver::{
    ArtifactUri, ClusterDriver, ClusterEvent, FrameworkInfo, RestDriver, TaskSpec, TaskState,
    TaskStatus,
};
pub use error::{ClusterError, ClusterResult};
pub use offer::Offer;
pub use view::{ClusterSnapshot, ClusterStateSource, ClusterView, HttpStateSource, Worker};
