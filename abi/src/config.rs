//! Compile-time kernel configuration.
//!
//! Every tunable of the buffer cache and the scheduler lives here. These are
//! build-time constants; there is no runtime configuration surface.

// --- Buffer cache ---

/// Number of buffers in the system pool. Bounded by the reserved buffer
/// area; raising it past 512 requires revisiting that reservation.
pub const NR_BUFFERS: usize = 256;

/// Number of hash buckets in the buffer cache index. Prime, so that the
/// `dev ^ num` key spreads across buckets even for sequential block runs.
pub const BUFFERS_HASHTAB_SIZE: usize = 53;

/// Bytes per disk block, and therefore per buffer data region.
pub const BLOCK_SIZE: usize = 1024;

/// Blocks of the inode map held pinned by the file system above us.
pub const IMAP_SIZE: usize = 4;

/// Blocks of the zone map held pinned by the file system above us.
pub const ZMAP_SIZE: usize = 8;

// The file system pins the inode and zone maps in the cache for its whole
// lifetime; they must never consume more than a sliver of the pool.
const _: () = assert!(IMAP_SIZE + ZMAP_SIZE <= NR_BUFFERS / 16);

// --- Scheduler ---

/// Number of process-table slots, including the idle slot.
pub const MAX_PROCS: usize = 32;

/// Quantum length, in clock ticks.
pub const PROC_QUANTUM: u32 = 100;

/// Priority of a process sleeping on a buffer. Lower is more urgent.
pub const PRIO_BUFFER: i32 = -40;

/// Baseline priority of a dispatched process.
pub const PRIO_USER: i32 = 20;

/// Offset that maps `-priority - nice` onto a positive ticket count.
/// With `PRIO_USER` and nice in [`NICE_MIN`, `NICE_MAX`] every runnable
/// process holds at least one ticket.
pub const NORMALIZATION_VALUE: i32 = 40;

/// Most favourable nice value.
pub const NICE_MIN: i32 = -20;

/// Least favourable nice value. Capped one below the classic 20 so a
/// maximally nice process still holds a ticket.
pub const NICE_MAX: i32 = 19;
