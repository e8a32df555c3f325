//! # ShiftClaw Core
//!
//! Configuration, error type and domain vocabulary shared by the scheduler and
//! attendance crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::ShiftClawConfig;
pub use error::{Result, ShiftClawError};
pub use types::{BreakKind, BreakPolicy, DayWindow, GroupId, HourMinute, MemberId, WorkSchedule};
