//! Event-driven reminder scheduler.
//!
//! [`registry`] holds per-entity cancellable timers, [`entity`] derives which
//! timers an announcement or meeting implies, and [`runner`] owns the
//! registry on the event loop and fires due tasks.

pub mod entity;
pub mod registry;
pub mod runner;
pub mod tasks;

pub use entity::{DerivationRules, ScheduledEntity};
pub use registry::TimerRegistry;
pub use runner::{ActionExecutor, ReloadEntry, Scheduler, SchedulerHandle};
pub use tasks::{
    DeferredAction, EntityKey, EntityKind, PlannedTask, RegistryOp, Task, TaskEntry,
    TaskName, TaskStatus,
};
