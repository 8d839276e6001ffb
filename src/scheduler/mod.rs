//! Scheduler service module.

mod engine;

pub use engine::{CronScheduler, SchedulerError, SchedulerStatus};
