//! Interrupt descriptor table.
//!
//! 256 IA-32 interrupt gates. CPU faults get minimal reporting handlers
//! that feed the panic path; remapped PIC lines dispatch through
//! [`crate::irq`].

use core::mem::size_of;

use lazy_static::lazy_static;
use x86::dtables::{lidt, DescriptorTablePointer};

use super::pic;
use crate::irq::IrqLine;

/// Kernel code segment selector from the boot GDT (flat model).
const KERNEL_CS: u16 = 0x08;

/// One IA-32 interrupt gate descriptor.
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn interrupt_gate(handler: usize) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector: KERNEL_CS,
            zero: 0,
            // present, ring 0, 32-bit interrupt gate
            type_attr: 0x8E,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, align(8))]
struct Idt {
    entries: [IdtEntry; 256],
}

impl Idt {
    fn new() -> Self {
        let mut idt = Self {
            entries: [IdtEntry::missing(); 256],
        };

        idt.entries[0] = IdtEntry::interrupt_gate(divide_error as usize);
        idt.entries[6] = IdtEntry::interrupt_gate(invalid_opcode as usize);
        idt.entries[13] = IdtEntry::interrupt_gate(general_protection as usize);
        idt.entries[14] = IdtEntry::interrupt_gate(page_fault as usize);

        idt.entries[pic::PIC1_OFFSET as usize] = IdtEntry::interrupt_gate(irq0_timer as usize);
        idt.entries[pic::PIC1_OFFSET as usize + 1] =
            IdtEntry::interrupt_gate(irq1_keyboard as usize);
        idt.entries[pic::PIC2_OFFSET as usize + 4] = IdtEntry::interrupt_gate(irq12_mouse as usize);

        idt
    }

    fn load(&'static self) {
        let ptr = DescriptorTablePointer {
            limit: (size_of::<Idt>() - 1) as u16,
            base: self as *const _ as *const IdtEntry,
        };
        // SAFETY: the IDT is 'static; the pointer stays valid for the
        // kernel's lifetime.
        unsafe { lidt(&ptr) };
    }
}

lazy_static! {
    static ref IDT: Idt = Idt::new();
}

/// Build and install the IDT.
pub fn init() {
    IDT.load();
}

// ---------------------------------------------------------------------------
// Fault handlers
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct InterruptFrame {
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

extern "x86-interrupt" fn divide_error(frame: InterruptFrame) {
    panic!("divide error at {:#010x}", frame.eip);
}

extern "x86-interrupt" fn invalid_opcode(frame: InterruptFrame) {
    panic!("invalid opcode at {:#010x}", frame.eip);
}

extern "x86-interrupt" fn general_protection(frame: InterruptFrame, error_code: u32) {
    panic!(
        "general protection fault at {:#010x} (error {:#x})",
        frame.eip, error_code
    );
}

extern "x86-interrupt" fn page_fault(frame: InterruptFrame, error_code: u32) {
    let cr2 = unsafe { x86::controlregs::cr2() };
    panic!(
        "page fault at {:#010x} accessing {:#010x} (error {:#x})",
        frame.eip, cr2, error_code
    );
}

// ---------------------------------------------------------------------------
// PIC line handlers
// ---------------------------------------------------------------------------

extern "x86-interrupt" fn irq0_timer(_frame: InterruptFrame) {
    crate::irq::dispatch(IrqLine::TIMER);
    pic::end_of_interrupt(0);
}

extern "x86-interrupt" fn irq1_keyboard(_frame: InterruptFrame) {
    crate::irq::dispatch(IrqLine::KEYBOARD);
    pic::end_of_interrupt(1);
}

extern "x86-interrupt" fn irq12_mouse(_frame: InterruptFrame) {
    crate::irq::dispatch(IrqLine::MOUSE);
    pic::end_of_interrupt(12);
}
