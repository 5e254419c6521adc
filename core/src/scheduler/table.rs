//! The process table.
//!
//! A fixed array of slots; slot 0 is the idle process and is always
//! occupied. The scheduler owns the table outright. Wait-channel
//! membership is recorded *in* the sleeping process (`chan`), never as a
//! list hanging off the event, so waking a process is a pair of field
//! writes and nothing ever dangles.

use lottos_abi::{
    FIRST_PROC, IDLE, LAST_PROC, MAX_PROCS, Pid, ProcState, SIG_EMPTY, SigSet, WaitChannel,
};

/// One process-table entry, as seen by the scheduler.
///
/// Creation, address spaces, and file tables are the embedder's business;
/// this is only the state the selection algorithm reads and writes.
#[derive(Clone, Copy, Debug)]
pub struct Proc {
    pub state: ProcState,
    /// Remaining quantum ticks.
    pub counter: u32,
    /// Scheduling priority; lower is more urgent.
    pub priority: i32,
    /// User-controlled courtesy value.
    pub nice: i32,
    /// Lottery tickets held, recomputed at every dispatch.
    pub tickets: i32,
    /// Bonus tickets for having yielded before the quantum ran out.
    pub compensation: i32,
    /// Tick at which `SIGALRM` fires; 0 means unarmed.
    pub alarm: u64,
    /// Parent process, receiver of `SIGCHLD`.
    pub father: Pid,
    /// Event this process is sleeping on, when `state` is `Waiting`.
    pub chan: Option<WaitChannel>,
    /// Signals posted but not yet taken by the embedder.
    pub pending: SigSet,
}

impl Proc {
    pub const fn unused() -> Self {
        Self {
            state: ProcState::Unused,
            counter: 0,
            priority: 0,
            nice: 0,
            tickets: 0,
            compensation: 0,
            alarm: 0,
            father: IDLE,
            chan: None,
            pending: SIG_EMPTY,
        }
    }
}

pub(crate) struct ProcTable {
    slots: [Proc; MAX_PROCS],
}

impl ProcTable {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [const { Proc::unused() }; MAX_PROCS],
        }
    }

    #[inline]
    pub(crate) fn get(&self, pid: Pid) -> &Proc {
        &self.slots[pid.0]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, pid: Pid) -> &mut Proc {
        &mut self.slots[pid.0]
    }

    /// Find a free slot among the ordinary (non-idle) entries.
    pub(crate) fn alloc(&mut self) -> Option<Pid> {
        (FIRST_PROC..LAST_PROC)
            .find(|&i| self.slots[i].state == ProcState::Unused)
            .map(Pid)
    }
}
