//! Scheduler subsystem: process table, lottery selection, sleep/wakeup.

mod lottery;
mod scheduler;
mod table;

pub use scheduler::{SchedStats, Scheduler, SleepWake, register_switch_hook};
pub use table::Proc;
