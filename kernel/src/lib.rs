//! cupid-os kernel library
//!
//! Core substrate for a 32-bit x86 hobby operating system: physical and
//! heap memory management, a round-robin kernel-thread scheduler, a mounted
//! virtual filesystem with a FAT16 adapter, a syscall table for loaded user
//! programs, and a compositing window manager over a VBE framebuffer.
//!
//! The crate builds for two targets. On bare metal (`target_os = "none"`)
//! it is `no_std` and the canary heap is the global allocator. On the host
//! the same subsystem logic builds against `std` so the unit tests run
//! under the standard harness.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(all(target_arch = "x86", target_os = "none"), feature(abi_x86_interrupt))]

#[cfg(feature = "alloc")]
extern crate alloc;

// Host target: use the system allocator so unit tests can allocate normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

// Bare metal: the tracked canary heap is the global allocator.
#[cfg(target_os = "none")]
#[global_allocator]
static KERNEL_ALLOCATOR: mm::heap::KernelAllocator = mm::heap::KernelAllocator;

#[macro_use]
pub mod print;

pub mod arch;
pub mod config;
pub mod desktop;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod graphics;
pub mod irq;
pub mod loader;
pub mod logger;
pub mod mm;
pub mod panic;
pub mod process;
pub mod sched;
pub mod services;
pub mod sync;
pub mod syscall;
pub mod timer;

// Re-exports used across subsystem boundaries
pub use mm::{PhysicalAddress, VirtualAddress, PAGE_SIZE};
pub use process::ProcessId;

/// Heap allocation error handler.
///
/// Allocation failure inside the kernel surfaces as a null return from the
/// heap; reaching this handler means an `alloc` collection path could not
/// recover, which is unrecoverable in a no_std kernel.
#[cfg(all(target_os = "none", feature = "alloc"))]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
