//! # TaskHive Scheduler
//!
//! Turns recurring definitions into ordinary queue jobs.
//!
//! ## Features
//!
//! - Interval, daily, weekly, monthly and cron schedules (UTC)
//! - Enable/disable without losing the definition
//! - Missed runs are skipped, never replayed

pub mod cron_job;
pub mod error;
pub mod schedule;
pub mod scheduler;

pub use cron_job::CronJob;
pub use error::SchedulerError;
pub use schedule::{CronExpr, Schedule};
pub use scheduler::{DEFAULT_TICK, Scheduler};
