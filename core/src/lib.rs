//! lottos core: the process table and the lottery scheduler.
//!
//! Everything a cooperative single-CPU kernel needs to decide "who runs
//! next": process state machine, ticket accounting with compensation for
//! early yielders, sleep/wakeup on wait channels, quantum burn-down, and
//! alarm expiry. The actual context switch is the embedder's; the scheduler
//! calls out through a registered hook.

#![no_std]

pub mod scheduler;

pub use scheduler::{Proc, SchedStats, Scheduler, SleepWake, register_switch_hook};

#[cfg(test)]
extern crate std;
