//! 8253/8254 programmable interval timer, channel 0.

use x86::io::outb;

const PIT_CH0: u16 = 0x40;
const PIT_CMD: u16 = 0x43;

/// PIT input clock in Hz.
const PIT_BASE_HZ: u32 = 1_193_182;

/// Program channel 0 as a rate generator firing `hz` times per second.
pub fn init(hz: u32) {
    let divisor = (PIT_BASE_HZ / hz).clamp(1, 65535) as u16;
    // SAFETY: command 0x36 = channel 0, lobyte/hibyte, mode 3; the PIT
    // owns these ports.
    unsafe {
        outb(PIT_CMD, 0x36);
        outb(PIT_CH0, (divisor & 0xFF) as u8);
        outb(PIT_CH0, (divisor >> 8) as u8);
    }
}
