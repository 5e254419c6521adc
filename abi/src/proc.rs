//! Process vocabulary shared between kernel subsystems.
//!
//! This module contains **only** the identity, state, and wait-channel types
//! that form the stable interface between the scheduler and its clients.
//! Kernel-internal details (the process entry itself, ticket accounting,
//! the table) live in `lottos_core::scheduler`.

use crate::config::MAX_PROCS;

/// Index of a slot in the process table.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Pid(pub usize);

/// The distinguished idle process. Always present, never in the lottery.
pub const IDLE: Pid = Pid(0);

/// First process-table slot eligible for ordinary processes.
pub const FIRST_PROC: usize = 1;

/// One past the last process-table slot.
pub const LAST_PROC: usize = MAX_PROCS;

// --- ProcState ---

/// Type-safe process state with explicit state-machine semantics.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProcState {
    /// Process-table slot is not in use.
    #[default]
    Unused = 0,
    /// Runnable, holding tickets in the next lottery.
    Ready = 1,
    /// Currently executing on the CPU.
    Running = 2,
    /// Suspended by `stop`; leaves only via `resume`.
    Stopped = 3,
    /// Asleep on a wait channel.
    Waiting = 4,
    /// Terminated, awaiting reaping by its father.
    Zombie = 5,
}

impl ProcState {
    #[inline]
    pub const fn can_transition_to(self, target: Self) -> bool {
        match self {
            Self::Unused => matches!(target, Self::Ready),
            Self::Ready => matches!(target, Self::Running | Self::Stopped | Self::Zombie),
            Self::Running => matches!(
                target,
                Self::Ready | Self::Waiting | Self::Stopped | Self::Zombie
            ),
            Self::Stopped => matches!(target, Self::Ready | Self::Zombie),
            Self::Waiting => matches!(target, Self::Ready | Self::Zombie),
            Self::Zombie => matches!(target, Self::Unused),
        }
    }

    /// True for the states the lottery walk may count tickets for.
    #[inline]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

// --- WaitChannel ---

/// Identity of an event a process may sleep on.
///
/// A channel is a value, not a pointer: the sleeper records the channel in
/// its process entry and `wakeup` matches on equality. Nothing here owns
/// anything, so tearing a sleeper off a channel is a single field write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitChannel {
    /// The buffer at this pool index is locked by someone else.
    Buffer(usize),
    /// The buffer pool has no free buffer at all.
    AnyFreeBuffer,
    /// An embedder-defined event (pipe, tty, child exit, ...).
    Event(u32),
}
