//! lottos shared ABI types.
//!
//! This crate provides the canonical definitions for the types and constants
//! shared between the lottos kernel subsystems: process identity and state,
//! wait channels, signal numbers, and compile-time configuration. Having a
//! single source of truth eliminates duplicate definitions and lets the
//! scheduler and the buffer cache agree on vocabulary without depending on
//! each other's internals.

#![no_std]
#![forbid(unsafe_code)]

pub mod config;
pub mod proc;
pub mod signal;

pub use config::*;
pub use proc::*;
pub use signal::*;
