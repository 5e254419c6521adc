//! Lottery arithmetic: the draw and the compensation formula.
//!
//! Both are pure functions so the selection walk in `scheduler.rs` stays
//! readable and the numbers are testable in isolation.

use lottos_abi::{NORMALIZATION_VALUE, PROC_QUANTUM};

/// Pseudo-random value in `[0, 32767]`, reseeded from the tick counter on
/// every call.
///
/// This is the classic libc LCG. Reseeding per call means two draws within
/// the same tick return the same value; the scheduler accepts that bias in
/// exchange for runs that replay exactly from a tick trace.
#[inline]
pub(crate) fn lottery_rand(ticks: u64) -> u32 {
    let seed = ticks.wrapping_mul(1_103_515_245).wrapping_add(12_345);
    ((seed / 65_536) % 32_768) as u32
}

/// Map a raw random value onto a winning ticket in `[1, total]`.
#[inline]
pub(crate) fn winning_ticket(rand: u32, total: i64) -> i64 {
    (rand as i64) * total / 32_768 + 1
}

/// Bonus tickets for a process that yielded with `counter` quantum ticks
/// still unspent.
///
/// A process that used a fraction `used / PROC_QUANTUM` of its quantum gets
/// its tickets scaled by the inverse fraction, minus the tickets it already
/// holds. Integer arithmetic throughout: `tickets * PROC_QUANTUM / used`
/// truncates toward zero, so the bonus rounds down. No bonus for a full or
/// an untouched quantum.
#[inline]
pub(crate) fn compensation_for(tickets: i32, counter: u32) -> i32 {
    let used = PROC_QUANTUM.saturating_sub(counter);
    if used == 0 || used >= PROC_QUANTUM {
        return 0;
    }
    tickets * PROC_QUANTUM as i32 / used as i32 - tickets
}

/// Seed tickets for a process with the given priority and nice value.
#[inline]
pub(crate) fn initial_tickets(priority: i32, nice: i32) -> i32 {
    -priority + NORMALIZATION_VALUE - nice
}
