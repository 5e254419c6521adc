//! Interrupt masking, the kernel's only mutual-exclusion primitive.
//!
//! lottos is a single-CPU cooperative kernel: a critical section is a span
//! with interrupts disabled, nothing more. [`off`] disables interrupts and
//! returns a guard; dropping the guard re-enables them once the outermost
//! guard goes away. Sections nest, so a helper can take its own guard
//! without caring whether its caller already holds one.
//!
//! The crate itself has no way to touch an interrupt flag. The embedder
//! registers the real disable/enable pair once at boot via
//! [`register_irq_backend`]; until then (and on hosted builds, forever)
//! masking is pure bookkeeping, which is exactly what a deterministic
//! simulation wants.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Once;

/// The embedder's actual interrupt-flag operations.
#[derive(Clone, Copy)]
pub struct IrqBackend {
    /// Mask interrupts on the CPU.
    pub disable: fn(),
    /// Unmask interrupts on the CPU.
    pub enable: fn(),
}

static BACKEND: Once<IrqBackend> = Once::new();

/// Current nesting depth of [`off`] guards.
static DEPTH: AtomicU32 = AtomicU32::new(0);

/// Register the hardware interrupt-flag operations. First call wins.
pub fn register_irq_backend(backend: IrqBackend) {
    BACKEND.call_once(|| backend);
}

/// Nesting depth of live [`IrqGuard`]s. Zero means interrupts are open.
#[inline]
pub fn irq_depth() -> u32 {
    DEPTH.load(Ordering::Relaxed)
}

/// A live interrupt-disabled section. Not `Send`: the section must end on
/// the CPU that opened it.
pub struct IrqGuard {
    _not_send: PhantomData<*mut ()>,
}

/// Disable interrupts and return a guard for the critical section.
///
/// The outermost guard performs the real disable; inner guards only bump
/// the depth. Matches the classic push/pop discipline, so calling this
/// while already masked is always safe.
#[must_use = "interrupts re-enable when the guard drops"]
pub fn off() -> IrqGuard {
    if DEPTH.fetch_add(1, Ordering::Acquire) == 0 {
        if let Some(backend) = BACKEND.get() {
            (backend.disable)();
        }
    }
    IrqGuard {
        _not_send: PhantomData,
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if DEPTH.fetch_sub(1, Ordering::Release) == 1 {
            if let Some(backend) = BACKEND.get() {
                (backend.enable)();
            }
        }
    }
}
