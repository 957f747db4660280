//! PS/2 keyboard driver.
//!
//! The IRQ1 handler reads scancodes from port 0x60, decodes them with
//! `pc_keyboard` (ScancodeSet1, US layout), and pushes single-byte key
//! codes into a lock-free SPSC ring: printable ASCII as-is, specials as
//! codes at 0x80 and up. The desktop loop and the shell are the consumer.
//!
//! On non-bare-metal builds the ring is fed by tests via [`inject_key`].

use core::sync::atomic::{AtomicUsize, Ordering};

/// Escape, as it arrives from the layout decoder.
pub const KEY_ESCAPE: u8 = 0x1B;
/// Enter / carriage return.
pub const KEY_ENTER: u8 = b'\n';
/// Backspace.
pub const KEY_BACKSPACE: u8 = 0x08;

/// Single-byte codes for non-ASCII keys.
pub const KEY_UP: u8 = 0x80;
pub const KEY_DOWN: u8 = 0x81;
pub const KEY_LEFT: u8 = 0x82;
pub const KEY_RIGHT: u8 = 0x83;
pub const KEY_HOME: u8 = 0x84;
pub const KEY_END: u8 = 0x85;
pub const KEY_DELETE: u8 = 0x86;

/// Ring buffer size for decoded key bytes (power of 2).
const KEY_BUFFER_SIZE: usize = 256;

/// Lock-free single-producer single-consumer ring. The producer is the
/// IRQ1 handler; the consumer is whoever drains events at a safe point.
struct KeyBuffer {
    buf: [u8; KEY_BUFFER_SIZE],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl KeyBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; KEY_BUFFER_SIZE],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    fn push(&mut self, byte: u8) {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) & (KEY_BUFFER_SIZE - 1);
        let tail = self.tail.load(Ordering::Acquire);
        if next == tail {
            return; // full: drop the key
        }
        self.buf[head] = byte;
        self.head.store(next, Ordering::Release);
    }

    fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        let byte = self.buf[tail];
        self.tail
            .store((tail + 1) & (KEY_BUFFER_SIZE - 1), Ordering::Release);
        Some(byte)
    }
}

// SAFETY: head/tail are synchronized with atomics; one producer (IRQ) and
// one consumer make the data slots race-free.
unsafe impl Send for KeyBuffer {}
unsafe impl Sync for KeyBuffer {}

static mut KEY_BUFFER: KeyBuffer = KeyBuffer::new();

/// Read the next decoded key byte, if any (non-blocking, consumer side).
pub fn read_key() -> Option<u8> {
    // SAFETY: single consumer; pop only touches slots the producer has
    // published.
    #[allow(static_mut_refs)]
    unsafe {
        KEY_BUFFER.pop()
    }
}

/// Push a key byte as if the hardware produced it.
pub fn inject_key(byte: u8) {
    // SAFETY: callers take the producer role: the IRQ handler on bare
    // metal, the test body on the host.
    #[allow(static_mut_refs)]
    unsafe {
        KEY_BUFFER.push(byte);
    }
}

// ---------------------------------------------------------------------------
// Bare-metal IRQ side
// ---------------------------------------------------------------------------

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod x86_impl {
    use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, Keyboard, ScancodeSet1};
    use spin::Mutex;

    use super::*;

    static KEYBOARD: Mutex<Option<Keyboard<layouts::Us104Key, ScancodeSet1>>> = Mutex::new(None);

    pub fn init() {
        let kb = Keyboard::new(
            ScancodeSet1::new(),
            layouts::Us104Key,
            HandleControl::MapLettersToUnicode,
        );
        *KEYBOARD.lock() = Some(kb);
    }

    /// IRQ1: read and decode one scancode. Must not print or take any
    /// lock shared with non-IRQ code.
    pub fn irq_handler() {
        // SAFETY: reading port 0x60 is the required acknowledgement of
        // the keyboard controller.
        let scancode = unsafe { x86::io::inb(0x60) };

        let mut guard = KEYBOARD.lock();
        if let Some(ref mut keyboard) = *guard {
            if let Ok(Some(event)) = keyboard.add_byte(scancode) {
                if let Some(key) = keyboard.process_keyevent(event) {
                    match key {
                        DecodedKey::Unicode(ch) => {
                            if ch.is_ascii() {
                                inject_key(ch as u8);
                            }
                        }
                        DecodedKey::RawKey(code) => {
                            let byte = match code {
                                KeyCode::ArrowUp => Some(KEY_UP),
                                KeyCode::ArrowDown => Some(KEY_DOWN),
                                KeyCode::ArrowLeft => Some(KEY_LEFT),
                                KeyCode::ArrowRight => Some(KEY_RIGHT),
                                KeyCode::Home => Some(KEY_HOME),
                                KeyCode::End => Some(KEY_END),
                                KeyCode::Delete => Some(KEY_DELETE),
                                _ => None,
                            };
                            if let Some(byte) = byte {
                                inject_key(byte);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use x86_impl::{init, irq_handler};

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn init() {}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn irq_handler() {}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    // One test, because the ring is a process-wide global and the harness
    // runs tests concurrently.
    #[test]
    fn test_ring_order_and_overflow() {
        while read_key().is_some() {}
        inject_key(b'a');
        inject_key(b'b');
        inject_key(KEY_ESCAPE);
        assert_eq!(read_key(), Some(b'a'));
        assert_eq!(read_key(), Some(b'b'));
        assert_eq!(read_key(), Some(KEY_ESCAPE));
        assert_eq!(read_key(), None);

        for _ in 0..KEY_BUFFER_SIZE + 16 {
            inject_key(b'x');
        }
        let mut drained = 0;
        while read_key().is_some() {
            drained += 1;
        }
        // One slot stays empty to distinguish full from empty.
        assert_eq!(drained, KEY_BUFFER_SIZE - 1);
    }
}
