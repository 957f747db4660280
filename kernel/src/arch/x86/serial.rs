//! COM1 serial console.
//!
//! 16550-style UART driven over `x86::io` ports. The kernel console and the
//! `log` sink both end up here, so one QEMU `-serial` capture carries the
//! full boot transcript.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;
use x86::io::{inb, outb};

const COM1: u16 = 0x3F8;

/// Line status register bit: transmitter holding register empty.
const LSR_THRE: u8 = 1 << 5;

pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        Self { base }
    }

    /// Program 115200 8N1 with FIFOs enabled.
    fn init(&mut self) {
        // SAFETY: writes to the COM1 register block only configure the UART.
        unsafe {
            outb(self.base + 1, 0x00); // disable UART interrupts
            outb(self.base + 3, 0x80); // DLAB on
            outb(self.base, 0x01); // divisor 1 = 115200 baud
            outb(self.base + 1, 0x00);
            outb(self.base + 3, 0x03); // 8N1, DLAB off
            outb(self.base + 2, 0xC7); // FIFO on, clear, 14-byte threshold
            outb(self.base + 4, 0x0B); // DTR | RTS | OUT2
        }
    }

    fn write_byte(&mut self, byte: u8) {
        // SAFETY: polling LSR then writing THR is the documented transmit
        // sequence; the port block belongs to this driver.
        unsafe {
            while inb(self.base + 5) & LSR_THRE == 0 {
                core::hint::spin_loop();
            }
            outb(self.base, byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

lazy_static! {
    static ref SERIAL1: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1));
}

/// Initialize COM1.
pub fn init() {
    SERIAL1.lock().init();
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    super::without_interrupts(|| {
        let _ = SERIAL1.lock().write_fmt(args);
    });
}

/// Emergency writer for the panic path: bypasses the lock in case the
/// panicking context holds it.
pub fn panic_print(args: fmt::Arguments) {
    use core::fmt::Write;

    let mut port = SerialPort::new(COM1);
    let _ = port.write_fmt(args);
}
