//! Kernel stack guard.
//!
//! A block of magic words is written at the bottom of the kernel stack at
//! boot. Overflow scribbles over the block; [`check`] notices and reports a
//! fatal overflow with the usage numbers. [`usage_current`] doubles as the
//! peak-usage probe.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::config::{KERNEL_STACK_BOTTOM, KERNEL_STACK_TOP};

/// Guard word pattern.
pub const GUARD_MAGIC: u32 = 0x57AC_6A8D;

/// Bytes of guard zone at the stack bottom.
pub const GUARD_BYTES: usize = 64;

const GUARD_WORDS: usize = GUARD_BYTES / 4;

/// Guard over one stack range `[bottom, top)`.
pub struct StackGuard {
    bottom: usize,
    top: usize,
}

impl StackGuard {
    /// Install the guard: fill `[bottom, bottom + GUARD_BYTES)` with the
    /// magic pattern.
    ///
    /// # Safety
    ///
    /// The guard zone must be writable and must not contain live data.
    pub unsafe fn install(bottom: usize, top: usize) -> Self {
        let words = bottom as *mut u32;
        // SAFETY: caller guarantees the zone is writable and dead.
        unsafe {
            for i in 0..GUARD_WORDS {
                words.add(i).write_volatile(GUARD_MAGIC);
            }
        }
        Self { bottom, top }
    }

    /// True if every guard word is intact.
    pub fn check(&self) -> bool {
        let words = self.bottom as *const u32;
        // SAFETY: the zone stays mapped for the stack's lifetime.
        unsafe { (0..GUARD_WORDS).all(|i| words.add(i).read_volatile() == GUARD_MAGIC) }
    }

    /// Usage implied by a stack pointer value.
    pub fn usage_of(&self, sp: usize) -> usize {
        self.top.saturating_sub(sp)
    }

    pub fn bottom(&self) -> usize {
        self.bottom
    }

    pub fn top(&self) -> usize {
        self.top
    }
}

static KERNEL_GUARD: Mutex<Option<StackGuard>> = Mutex::new(None);
static PEAK_USAGE: AtomicUsize = AtomicUsize::new(0);

/// Install the guard on the boot kernel stack.
pub fn init() {
    // SAFETY: the bottom of the boot stack is unused this early; the boot
    // contract hands over ESP well above the guard zone.
    let guard = unsafe { StackGuard::install(KERNEL_STACK_BOTTOM, KERNEL_STACK_TOP) };
    *KERNEL_GUARD.lock() = Some(guard);
    log::info!(
        target: "stack",
        "guard installed at {:#010x}..{:#010x}",
        KERNEL_STACK_BOTTOM,
        KERNEL_STACK_BOTTOM + GUARD_BYTES
    );
}

/// Current kernel stack usage; updates the peak counter.
pub fn usage_current() -> usize {
    let sp = crate::arch::stack_pointer();
    let usage = KERNEL_GUARD
        .lock()
        .as_ref()
        .map(|g| g.usage_of(sp))
        .unwrap_or(0);
    PEAK_USAGE.fetch_max(usage, Ordering::Relaxed);
    usage
}

/// Peak kernel stack usage seen by [`usage_current`].
pub fn usage_peak() -> usize {
    PEAK_USAGE.load(Ordering::Relaxed)
}

/// Verify the guard zone; a trampled guard is a fatal overflow.
pub fn check() {
    let guard = KERNEL_GUARD.lock();
    if let Some(g) = guard.as_ref() {
        if !g.check() {
            let current = g.usage_of(crate::arch::stack_pointer());
            panic!(
                "kernel stack overflow: guard trampled (stack {:#010x}..{:#010x}, current {} bytes, peak {} bytes)",
                g.bottom(),
                g.top(),
                current,
                usage_peak()
            );
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn guarded_buffer() -> (&'static mut [u8], StackGuard) {
        let buf: &'static mut [u8] = Vec::leak(vec![0u8; 4096]);
        let bottom = buf.as_ptr() as usize;
        let top = bottom + buf.len();
        let guard = unsafe { StackGuard::install(bottom, top) };
        (buf, guard)
    }

    #[test]
    fn test_intact_guard_passes() {
        let (_buf, guard) = guarded_buffer();
        assert!(guard.check());
    }

    #[test]
    fn test_trampled_guard_detected() {
        let (buf, guard) = guarded_buffer();
        buf[GUARD_BYTES / 2] = 0;
        assert!(!guard.check());
    }

    #[test]
    fn test_usage_math() {
        let (_buf, guard) = guarded_buffer();
        let top = guard.top();
        assert_eq!(guard.usage_of(top), 0);
        assert_eq!(guard.usage_of(top - 512), 512);
        // An sp above the top never underflows.
        assert_eq!(guard.usage_of(top + 16), 0);
    }
}
