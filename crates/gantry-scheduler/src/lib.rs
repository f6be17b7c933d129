//! gantry-scheduler — offer-driven run-once placement.
//!
//! Applications typed for one-shot execution are staged into per-application
//! contexts and matched against live resource offers under their placement
//! constraints. Status updates aggregate per application into a single
//! terminal success or failure. Time-scheduled applications register on the
//! [`Timetable`] instead of staging immediately.
//!
//! [`Timetable`]: timetable::Timetable

pub mod context;
pub mod error;
pub mod runner;
pub mod scheduler;
pub mod timetable;

pub use context::{application_id_from_task_id, host_from_task_id, RunOnceContext, REFUSE_SECONDS};
pub use error::{SchedulerError, SchedulerResult};
pub use runner::{OnceTaskRunner, RunOnceRunner};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use timetable::{parse_interval, parse_start_time, ScheduledTask, Timetable};
