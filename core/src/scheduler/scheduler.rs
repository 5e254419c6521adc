//! Process selection: lottery with compensation tickets.
//!
//! The scheduler is an explicit value constructed once at boot, not a pile
//! of statics; the embedder (or a test) owns it and threads it through. All
//! state transitions happen with interrupts masked. The only thing that
//! leaves this module is the identity of the next process to run, handed to
//! the embedder's context-switch hook.
//!
//! Selection, on every yield:
//!
//! 1. If the outgoing process is still `Running` it yielded voluntarily:
//!    award compensation tickets for the unspent part of its quantum and
//!    mark it `Ready`.
//! 2. Walk the table once, expiring alarms and summing `tickets +
//!    compensation` over the `Ready` set.
//! 3. Draw a winning ticket and walk the ready set again; the first process
//!    whose running sum reaches the ticket wins. An empty ready set falls
//!    through to the idle process.
//! 4. Dispatch: reset priority, quantum, and tickets; clear compensation.

use spin::Once;

use lottos_abi::{
    FIRST_PROC, IDLE, LAST_PROC, NICE_MAX, NICE_MIN, PRIO_USER, PROC_QUANTUM, Pid, ProcState,
    SIGALRM, SIGCHLD, SigSet, WaitChannel, sig_bit,
};
use lottos_lib::irq;

use super::lottery::{compensation_for, initial_tickets, lottery_rand, winning_ticket};
use super::table::{Proc, ProcTable};

/// The embedder's context-switch primitive. Receives the outgoing and the
/// incoming process; by the time it runs, the incoming one is `Running`.
pub type SwitchHook = fn(from: Pid, to: Pid);

static SWITCH_HOOK: Once<SwitchHook> = Once::new();

/// Register the context-switch primitive. First call wins.
pub fn register_switch_hook(hook: SwitchHook) {
    SWITCH_HOOK.call_once(|| hook);
}

/// Running counters, mostly for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchedStats {
    pub switches: u64,
    pub yields: u64,
    pub sleeps: u64,
    pub wakeups: u64,
}

/// Blocking interface the rest of the kernel programs against.
///
/// Subsystems that put callers to sleep (the buffer cache, pipes, ...) take
/// an `S: SleepWake` instead of the concrete scheduler, so their wait
/// protocols can be driven step by step in tests.
pub trait SleepWake {
    /// Put the current process to sleep on `chan` at the given priority.
    /// Returns when the process is next dispatched; the caller must
    /// revalidate everything it knew before sleeping.
    fn sleep_on(&mut self, chan: WaitChannel, priority: i32);

    /// Make every process sleeping on `chan` runnable.
    fn wakeup_all(&mut self, chan: WaitChannel);
}

pub struct Scheduler {
    table: ProcTable,
    current: Pid,
    last: Pid,
    ticks: u64,
    stats: SchedStats,
}

impl Scheduler {
    /// A freshly booted machine: only the idle process exists, and it is
    /// what the CPU is executing.
    pub fn new() -> Self {
        let mut table = ProcTable::new();
        let idle = table.get_mut(IDLE);
        idle.state = ProcState::Running;
        idle.counter = PROC_QUANTUM;
        Self {
            table,
            current: IDLE,
            last: IDLE,
            ticks: 0,
            stats: SchedStats::default(),
        }
    }

    // --- Accessors ---

    #[inline]
    pub fn current(&self) -> Pid {
        self.current
    }

    /// The process that was running before the most recent selection.
    #[inline]
    pub fn last_proc(&self) -> Pid {
        self.last
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[inline]
    pub fn proc(&self, pid: Pid) -> &Proc {
        self.table.get(pid)
    }

    #[inline]
    pub fn stats(&self) -> &SchedStats {
        &self.stats
    }

    // --- Admission ---

    /// Admit a new process and make it runnable.
    ///
    /// Only the scheduling half of process creation lives here; stacks,
    /// address spaces, and the rest belong to the embedder. The new process
    /// is fathered by the current one. Returns `None` when the table is
    /// full.
    pub fn spawn(&mut self, nice: i32) -> Option<Pid> {
        let _irq = irq::off();
        let nice = nice.clamp(NICE_MIN, NICE_MAX);
        let pid = self.table.alloc()?;
        let father = self.current;
        let p = self.table.get_mut(pid);
        *p = Proc::unused();
        p.priority = PRIO_USER;
        p.nice = nice;
        p.tickets = initial_tickets(PRIO_USER, nice);
        p.father = father;
        self.sched(pid);
        Some(pid)
    }

    // --- State transitions ---

    /// Make `pid` runnable with an exhausted quantum.
    pub fn sched(&mut self, pid: Pid) {
        let p = self.table.get_mut(pid);
        debug_assert!(p.state.can_transition_to(ProcState::Ready));
        p.state = ProcState::Ready;
        p.counter = 0;
    }

    /// Suspend the current process, tell its father, and pick someone else.
    pub fn stop(&mut self) {
        let cur = self.current;
        if cur == IDLE {
            panic!("stop: idle process cannot stop");
        }
        let father = {
            let _irq = irq::off();
            let p = self.table.get_mut(cur);
            p.state = ProcState::Stopped;
            p.father
        };
        self.send_signal(father, SIGCHLD);
        self.yield_now();
    }

    /// Undo a `stop`. A no-op unless `pid` is actually stopped.
    pub fn resume(&mut self, pid: Pid) {
        let _irq = irq::off();
        if self.table.get(pid).state == ProcState::Stopped {
            self.sched(pid);
        }
    }

    // --- Signals and alarms ---

    /// Post `signo` to `pid`. Delivery happens at the embedder's leisure.
    pub fn send_signal(&mut self, pid: Pid, signo: u8) {
        let _irq = irq::off();
        self.table.get_mut(pid).pending |= sig_bit(signo);
    }

    /// Fetch and clear the pending set of `pid`.
    pub fn take_pending(&mut self, pid: Pid) -> SigSet {
        let _irq = irq::off();
        let p = self.table.get_mut(pid);
        core::mem::take(&mut p.pending)
    }

    /// Arm `pid`'s alarm for the given absolute tick; 0 disarms.
    pub fn set_alarm(&mut self, pid: Pid, tick: u64) {
        let _irq = irq::off();
        self.table.get_mut(pid).alarm = tick;
    }

    // --- Clock ---

    /// Account one timer tick. Returns `true` when the running process has
    /// exhausted its quantum; the caller yields on its way back to user
    /// mode. The scheduler itself never preempts.
    pub fn clock_tick(&mut self) -> bool {
        let _irq = irq::off();
        self.ticks = self.ticks.wrapping_add(1);
        if self.current == IDLE {
            return false;
        }
        let p = self.table.get_mut(self.current);
        if p.counter > 0 {
            p.counter -= 1;
        }
        p.counter == 0
    }

    // --- Selection ---

    /// Give up the CPU and run the lottery.
    pub fn yield_now(&mut self) {
        let _irq = irq::off();
        self.stats.yields += 1;
        let prev = self.current;

        {
            let p = self.table.get_mut(prev);
            if p.state == ProcState::Running {
                // Voluntary yield: trade the unspent quantum for tickets.
                if prev != IDLE {
                    p.compensation = compensation_for(p.tickets, p.counter);
                }
                p.state = ProcState::Ready;
            }
        }
        self.last = prev;

        // One walk: expire alarms, count tickets over the ready set.
        let now = self.ticks;
        let mut total: i64 = 0;
        for i in FIRST_PROC..LAST_PROC {
            let p = self.table.get_mut(Pid(i));
            if p.state == ProcState::Unused {
                continue;
            }
            if p.alarm != 0 && p.alarm < now {
                p.alarm = 0;
                p.pending |= sig_bit(SIGALRM);
            }
            if p.state.is_ready() {
                total += i64::from(p.tickets + p.compensation);
            }
        }

        let next = if total == 0 {
            IDLE
        } else {
            let winner = winning_ticket(lottery_rand(self.ticks), total);
            let mut sum: i64 = 0;
            let mut chosen = IDLE;
            for i in FIRST_PROC..LAST_PROC {
                let p = self.table.get(Pid(i));
                if p.state.is_ready() {
                    sum += i64::from(p.tickets + p.compensation);
                    if sum >= winner {
                        chosen = Pid(i);
                        break;
                    }
                }
            }
            chosen
        };

        self.dispatch(prev, next);
    }

    fn dispatch(&mut self, prev: Pid, next: Pid) {
        let p = self.table.get_mut(next);
        if next != IDLE {
            p.priority = PRIO_USER;
            p.tickets = initial_tickets(p.priority, p.nice);
            p.compensation = 0;
        }
        p.state = ProcState::Running;
        p.counter = PROC_QUANTUM;
        self.current = next;
        if next != prev {
            self.stats.switches += 1;
            if let Some(hook) = SWITCH_HOOK.get() {
                hook(prev, next);
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SleepWake for Scheduler {
    /// Block the current process on `chan` and run the lottery.
    ///
    /// The sleep is uninterruptible at this layer; only `wakeup_all` on the
    /// same channel makes the process runnable again. Spurious wakeups are
    /// legal, so callers re-check their condition on return.
    fn sleep_on(&mut self, chan: WaitChannel, priority: i32) {
        let _irq = irq::off();
        let cur = self.current;
        if cur == IDLE {
            panic!("sleep_on: idle process cannot sleep");
        }
        self.stats.sleeps += 1;
        let p = self.table.get_mut(cur);
        debug_assert_eq!(p.state, ProcState::Running);
        p.chan = Some(chan);
        p.priority = priority;
        p.state = ProcState::Waiting;
        self.yield_now();
    }

    fn wakeup_all(&mut self, chan: WaitChannel) {
        let _irq = irq::off();
        for i in FIRST_PROC..LAST_PROC {
            let pid = Pid(i);
            let p = self.table.get_mut(pid);
            if p.state == ProcState::Waiting && p.chan == Some(chan) {
                p.chan = None;
                self.sched(pid);
                self.stats.wakeups += 1;
            }
        }
    }
}
