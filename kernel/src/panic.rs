//! Kernel panic path.
//!
//! Fatal errors (heap corruption, stack overflow, CPU faults) end here:
//! interrupts off, banner, the panic message, a register snapshot, a
//! bounded frame back-chain walk, a hex window of the stack, and a system
//! summary, then halt. Every line is rendered directly through the
//! emergency serial writer; nothing here allocates and no varargs are
//! forwarded between functions.

#![allow(dead_code)]

use core::sync::atomic::{AtomicBool, Ordering};

/// Guards against recursive panics (a fault inside the dump).
static IN_PANIC: AtomicBool = AtomicBool::new(false);

/// Bound on the back-chain walk.
const MAX_FRAMES: usize = 64;

/// Bytes of stack dumped around ESP.
const STACK_WINDOW: usize = 64;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod x86_impl {
    use super::*;
    use crate::arch::x86::serial::panic_print;
    use crate::config::{KERNEL_STACK_BOTTOM, KERNEL_STACK_TOP};

    struct Registers {
        esp: u32,
        ebp: u32,
        eflags: u32,
    }

    fn capture_registers() -> Registers {
        let (esp, ebp, eflags): (u32, u32, u32);
        // SAFETY: reads CPU registers without side effects.
        unsafe {
            core::arch::asm!(
                "mov {0}, esp",
                "mov {1}, ebp",
                "pushfd",
                "pop {2}",
                out(reg) esp,
                out(reg) ebp,
                out(reg) eflags,
            );
        }
        Registers { esp, ebp, eflags }
    }

    fn plausible_stack_addr(addr: u32) -> bool {
        (addr as usize) >= KERNEL_STACK_BOTTOM + 8 && (addr as usize) < KERNEL_STACK_TOP
    }

    /// Walk saved-EBP frame links: `[ebp]` is the caller's EBP, `[ebp+4]`
    /// the return address. Stops at the first implausible link.
    fn dump_backtrace(mut ebp: u32) {
        panic_print(format_args!("back-chain:\n"));
        for frame in 0..MAX_FRAMES {
            if !plausible_stack_addr(ebp) {
                break;
            }
            // SAFETY: plausible_stack_addr keeps the reads inside the
            // kernel stack window, which is always mapped.
            let (next, ret) = unsafe {
                (
                    (ebp as *const u32).read_volatile(),
                    ((ebp + 4) as *const u32).read_volatile(),
                )
            };
            panic_print(format_args!("  #{:02} eip={:#010x}\n", frame, ret));
            if next <= ebp {
                break;
            }
            ebp = next;
        }
    }

    fn dump_stack_window(esp: u32) {
        panic_print(format_args!("stack at esp={:#010x}:\n", esp));
        let start = esp as usize;
        for row in 0..(STACK_WINDOW / 16) {
            let base = start + row * 16;
            if base + 16 > KERNEL_STACK_TOP {
                break;
            }
            // SAFETY: bounded to the mapped kernel stack window.
            let words = unsafe {
                [
                    (base as *const u32).read_volatile(),
                    ((base + 4) as *const u32).read_volatile(),
                    ((base + 8) as *const u32).read_volatile(),
                    ((base + 12) as *const u32).read_volatile(),
                ]
            };
            panic_print(format_args!(
                "  {:#010x}: {:08x} {:08x} {:08x} {:08x}\n",
                base, words[0], words[1], words[2], words[3]
            ));
        }
    }

    fn dump_summary() {
        let uptime = crate::timer::uptime_ticks();
        let heap = crate::mm::heap::stats();
        let (free_pages, total_pages) = {
            let pmm = crate::mm::FRAME_ALLOCATOR.lock();
            (pmm.free_pages(), pmm.total_pages())
        };
        panic_print(format_args!(
            "uptime {} ticks; heap {}/{} bytes active/peak; {}/{} pages free\n",
            uptime, heap.active_bytes, heap.peak_bytes, free_pages, total_pages
        ));
    }

    /// The bare-metal panic handler body.
    pub fn handle(info: &core::panic::PanicInfo) -> ! {
        crate::arch::disable_interrupts();

        if IN_PANIC.swap(true, Ordering::SeqCst) {
            // Panic inside the panic path: stop immediately.
            loop {
                crate::arch::halt();
            }
        }

        panic_print(format_args!("\n==== KERNEL PANIC ====\n"));
        panic_print(format_args!("{}\n", info.message()));
        if let Some(location) = info.location() {
            panic_print(format_args!(
                "at {}:{}\n",
                location.file(),
                location.line()
            ));
        }

        let regs = capture_registers();
        panic_print(format_args!(
            "esp={:#010x} ebp={:#010x} eflags={:#010x}\n",
            regs.esp, regs.ebp, regs.eflags
        ));
        dump_backtrace(regs.ebp);
        dump_stack_window(regs.esp);
        dump_summary();
        panic_print(format_args!("system halted.\n"));

        loop {
            crate::arch::halt();
        }
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use x86_impl::handle;

/// Host builds use the standard panic machinery; this stub keeps callers
/// portable.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn handle(info: &core::panic::PanicInfo) -> ! {
    let _ = (info, &IN_PANIC, MAX_FRAMES, STACK_WINDOW);
    loop {
        crate::arch::halt();
    }
}
