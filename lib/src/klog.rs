//! Kernel logging subsystem.
//!
//! Log lines funnel through a single **sink**, a trait object the embedder
//! registers once at boot (first registration wins, like every other HAL
//! hook in lottos). Until a sink exists every line is dropped: this crate
//! owns no console hardware, and a deterministic simulation has no use for
//! one either.
//!
//! # Sink contract
//!
//! [`KlogSink::line`] receives the pre-formatted arguments for a single
//! log line and must:
//!
//! 1. Write the text atomically, so lines from concurrent contexts do not
//!    interleave.
//! 2. Append the trailing newline itself; callers never include one.
//!
//! Filtering happens before dispatch: a line above the current maximum
//! level never reaches the sink.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use spin::Once;

// ---------------------------------------------------------------------------
// Levels and filtering
// ---------------------------------------------------------------------------

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Most verbose level currently let through. `Info` from boot.
static MAX_LEVEL: AtomicU8 = AtomicU8::new(KlogLevel::Info as u8);

/// Raise or lower the verbosity ceiling.
pub fn set_max_level(level: KlogLevel) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// The verbosity ceiling currently in effect.
pub fn max_level() -> KlogLevel {
    match MAX_LEVEL.load(Ordering::Relaxed) {
        0 => KlogLevel::Error,
        1 => KlogLevel::Warn,
        2 => KlogLevel::Info,
        3 => KlogLevel::Debug,
        _ => KlogLevel::Trace,
    }
}

/// Would a line at `level` reach the sink right now?
#[inline]
pub fn enabled(level: KlogLevel) -> bool {
    level as u8 <= MAX_LEVEL.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Sink registration and dispatch
// ---------------------------------------------------------------------------

/// Receiver of formatted log lines.
///
/// `Sync` because the sink is shared process-wide; implementations bring
/// their own locking.
pub trait KlogSink: Sync {
    /// Emit one line. The text carries no trailing newline.
    fn line(&self, args: fmt::Arguments<'_>);
}

static SINK: Once<&'static dyn KlogSink> = Once::new();

/// Install the log sink. First call wins; later calls are ignored.
pub fn klog_register_sink(sink: &'static dyn KlogSink) {
    SINK.call_once(|| sink);
}

/// Filter and forward one line. Prefer the `klog_*!` macros.
pub fn log(level: KlogLevel, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    if let Some(sink) = SINK.get() {
        sink.line(args);
    }
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

/// Log at an explicit level; the level-named macros below all expand to
/// this.
#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {
        $crate::klog::log($level, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Error, $($arg)*) };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Info, $($arg)*) };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Debug, $($arg)*) };
}

#[macro_export]
macro_rules! klog_trace {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::KlogLevel::Trace, $($arg)*) };
}
