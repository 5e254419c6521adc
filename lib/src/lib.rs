//! Ambient kernel services shared by every lottos subsystem.
//!
//! Nothing in here knows about processes or buffers; this crate is the
//! plumbing layer the core subsystems stand on: structured logging with a
//! pluggable backend, and the interrupt-disable primitive that brackets
//! every critical section in a single-CPU cooperative kernel.

#![no_std]

pub mod irq;
pub mod klog;

pub use irq::{IrqGuard, irq_depth, register_irq_backend};
pub use klog::{KlogLevel, KlogSink, klog_register_sink, max_level, set_max_level};

#[cfg(test)]
extern crate std;
