//! Architecture abstraction layer.
//!
//! Bare-metal IA-32 lives in [`x86`]; every entry point used by the
//! portable kernel has a host stub so the subsystem logic builds and tests
//! on the development machine.

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use x86::{
    disable_interrupts, enable_interrupts, halt, init_early, init_interrupts, stack_pointer,
    without_interrupts,
};

// ---------------------------------------------------------------------------
// Host stubs
// ---------------------------------------------------------------------------

/// Early console bring-up (no-op on the host).
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn init_early() {}

/// Interrupt-controller bring-up (no-op on the host).
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn init_interrupts() {}

/// Halt until the next interrupt (spin hint on the host).
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn halt() {
    core::hint::spin_loop();
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn enable_interrupts() {}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn disable_interrupts() {}

/// Run `f` with interrupts disabled, restoring the previous state after.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn without_interrupts<R, F: FnOnce() -> R>(f: F) -> R {
    f()
}

/// Current stack pointer. Meaningless on the host; returns a fixed value so
/// the stack-usage probe stays inert in tests.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn stack_pointer() -> usize {
    crate::config::KERNEL_STACK_TOP
}
