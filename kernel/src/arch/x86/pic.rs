//! 8259 programmable interrupt controller.
//!
//! Remaps the two cascaded PICs away from the CPU exception range and
//! provides end-of-interrupt signalling. Device-level programming beyond
//! remap/mask/EOI lives with the individual drivers.

use x86::io::outb;

/// Vector base for IRQ 0-7 after remap.
pub const PIC1_OFFSET: u8 = 0x20;
/// Vector base for IRQ 8-15 after remap.
pub const PIC2_OFFSET: u8 = 0x28;

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

const CMD_INIT: u8 = 0x11;
const CMD_EOI: u8 = 0x20;
const MODE_8086: u8 = 0x01;

/// Remap the PICs and unmask timer, keyboard, cascade, and mouse lines.
pub fn init() {
    // SAFETY: standard 8259 initialization word sequence; these ports are
    // owned by the PIC.
    unsafe {
        outb(PIC1_CMD, CMD_INIT);
        outb(PIC2_CMD, CMD_INIT);
        outb(PIC1_DATA, PIC1_OFFSET);
        outb(PIC2_DATA, PIC2_OFFSET);
        outb(PIC1_DATA, 1 << 2); // slave on IRQ2
        outb(PIC2_DATA, 2);
        outb(PIC1_DATA, MODE_8086);
        outb(PIC2_DATA, MODE_8086);

        // Unmask: IRQ0 timer, IRQ1 keyboard, IRQ2 cascade; IRQ12 mouse.
        outb(PIC1_DATA, !0b0000_0111);
        outb(PIC2_DATA, !0b0001_0000);
    }
}

/// Signal end-of-interrupt for the given IRQ line (0-15).
pub fn end_of_interrupt(irq: u8) {
    // SAFETY: EOI writes are the documented completion handshake.
    unsafe {
        if irq >= 8 {
            outb(PIC2_CMD, CMD_EOI);
        }
        outb(PIC1_CMD, CMD_EOI);
    }
}
