//! IRQ line dispatch.
//!
//! A fixed table of handlers for the 16 remapped PIC lines. The
//! architecture's interrupt stubs call [`dispatch`]; subsystems register
//! their handlers at boot. Handlers run in interrupt context and must not
//! block or context-switch.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

/// PIC line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqLine(pub u8);

impl IrqLine {
    pub const TIMER: IrqLine = IrqLine(0);
    pub const KEYBOARD: IrqLine = IrqLine(1);
    pub const MOUSE: IrqLine = IrqLine(12);

    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// IRQ handler callback.
pub type IrqHandler = fn();

const LINES: usize = 16;

static HANDLERS: Mutex<[Option<IrqHandler>; LINES]> = Mutex::new([None; LINES]);
static DISPATCH_COUNT: AtomicU64 = AtomicU64::new(0);

/// Register a handler for a line, replacing any previous one.
pub fn register(line: IrqLine, handler: IrqHandler) {
    if line.as_index() < LINES {
        HANDLERS.lock()[line.as_index()] = Some(handler);
    }
}

/// Invoke the handler registered for a line, if any.
pub fn dispatch(line: IrqLine) {
    if line.as_index() >= LINES {
        return;
    }
    DISPATCH_COUNT.fetch_add(1, Ordering::Relaxed);
    let handler = HANDLERS.lock()[line.as_index()];
    if let Some(handler) = handler {
        handler();
    }
}

/// Total interrupts dispatched since boot.
pub fn dispatch_count() -> u64 {
    DISPATCH_COUNT.load(Ordering::Relaxed)
}

/// Wire the standard device handlers.
pub fn init() {
    register(IrqLine::TIMER, crate::timer::tick);
    register(IrqLine::KEYBOARD, crate::drivers::keyboard::irq_handler);
    register(IrqLine::MOUSE, crate::drivers::mouse::irq_handler);
    log::info!(target: "irq", "handlers registered for timer/keyboard/mouse");
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;

    static FIRED: AtomicU32 = AtomicU32::new(0);

    fn test_handler() {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn test_register_and_dispatch() {
        register(IrqLine(7), test_handler);
        let before = FIRED.load(Ordering::Relaxed);
        dispatch(IrqLine(7));
        dispatch(IrqLine(7));
        assert_eq!(FIRED.load(Ordering::Relaxed), before + 2);
    }

    #[test]
    fn test_unregistered_line_is_silent() {
        dispatch(IrqLine(11));
        dispatch(IrqLine(42)); // out of range
    }
}
