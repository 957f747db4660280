//! IA-32 architecture support: interrupt control, serial console, 8259 PIC,
//! PIT timer, IDT, context switch, CMOS RTC.

pub mod context;
pub mod idt;
pub mod pic;
pub mod pit;
pub mod rtc;
pub mod serial;

/// Early console bring-up: only the serial port, so boot messages work
/// before any other subsystem exists.
pub fn init_early() {
    serial::init();
}

/// Interrupt plumbing: remapped PIC, PIT at the configured tick rate, and
/// the IDT. Runs after the memory subsystems are up; interrupts stay
/// disabled until the caller enables them once the scheduler is ready.
pub fn init_interrupts() {
    pic::init();
    pit::init(crate::config::TICK_HZ);
    idt::init();
}

/// Halt the CPU until the next interrupt.
pub fn halt() {
    // SAFETY: `hlt` only pauses the CPU; execution resumes at the next
    // interrupt.
    unsafe { x86::halt() };
}

/// Enable maskable interrupts.
pub fn enable_interrupts() {
    // SAFETY: sti has no memory effects; callers only enable interrupts
    // outside critical sections.
    unsafe { x86::irq::enable() };
}

/// Disable maskable interrupts.
pub fn disable_interrupts() {
    // SAFETY: cli has no memory effects.
    unsafe { x86::irq::disable() };
}

/// Run `f` with interrupts disabled, restoring the previous IF state.
pub fn without_interrupts<R, F: FnOnce() -> R>(f: F) -> R {
    let flags = flags_register();
    let was_enabled = flags & (1 << 9) != 0;
    if was_enabled {
        disable_interrupts();
    }
    let result = f();
    if was_enabled {
        enable_interrupts();
    }
    result
}

/// Read EFLAGS.
fn flags_register() -> u32 {
    let flags: u32;
    // SAFETY: pushfd/pop reads EFLAGS without side effects.
    unsafe {
        core::arch::asm!("pushfd", "pop {}", out(reg) flags, options(preserves_flags));
    }
    flags
}

/// Read the current stack pointer.
pub fn stack_pointer() -> usize {
    let esp: usize;
    // SAFETY: reading ESP has no side effects.
    unsafe {
        core::arch::asm!("mov {}, esp", out(reg) esp, options(nomem, nostack, preserves_flags));
    }
    esp
}
