//! Core domain types: jobs, schedules, and the calculators behind them.

pub mod clock;
pub mod cron;
pub mod job;
pub mod schedule;
pub mod types;
