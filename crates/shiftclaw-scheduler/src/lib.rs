//! # ShiftClaw Scheduler
//!
//! Lightweight deferred-callback scheduler and notification dispatch.
//!
//! Registrations are derived state, rebuilt from group settings and open
//! sessions. Recurrence is fixed-rate; handlers re-check live state when they
//! fire.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (keyed tasks)
//!   ├── Once:      "group:7:timer:break:42:smoke"  → BreakTimeout
//!   ├── Recurring: "group:7:jobs:report-daily-21:00@UTC" → DailyReport (every 24h)
//!   └── tick(now) → FiredTask → TaskHandler
//!                                  └── Notification → NotifySink (best-effort)
//! ```

pub mod dispatch;
pub mod engine;
pub mod notify;
pub mod tasks;

pub use dispatch::{MemorySink, NotifySink, TracingSink, dispatch_best_effort};
pub use engine::{FiredTask, ReconcileReport, SchedulerEngine, SharedScheduler, TaskHandler, spawn_scheduler};
pub use notify::{Notification, NotifyPriority, NotifyRouter};
pub use tasks::{CallbackSpec, Task, TaskAction, TaskType, WorkEdge, keys};
