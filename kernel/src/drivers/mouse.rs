//! PS/2 mouse driver.
//!
//! IRQ12 feeds packet bytes into a three-byte decoder; completed packets
//! update the global mouse state (position clamped to the screen, button
//! bits, change flag). The desktop loop takes snapshots with
//! [`take_update`], which consumes the change flag.

use spin::Mutex;

use crate::config::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Left button bit in the packet flags and in [`MouseState::buttons`].
pub const BUTTON_LEFT: u8 = 0x01;
pub const BUTTON_RIGHT: u8 = 0x02;
pub const BUTTON_MIDDLE: u8 = 0x04;

/// Decoded movement from one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseDelta {
    pub dx: i32,
    pub dy: i32,
    /// Wheel movement. The basic three-byte protocol carries none, so the
    /// decoder always reports 0 here; an IntelliMouse fourth byte would
    /// populate it without touching anything downstream.
    pub scroll: i32,
    pub buttons: u8,
}

/// Three-byte PS/2 packet decoder.
///
/// Byte 0 carries button bits, sign bits, and an always-set bit 3 used to
/// regain sync; bytes 1 and 2 are the X and Y deltas (Y grows upward on
/// the wire, downward on screen).
pub struct PacketDecoder {
    phase: usize,
    bytes: [u8; 3],
}

impl PacketDecoder {
    pub const fn new() -> Self {
        Self {
            phase: 0,
            bytes: [0; 3],
        }
    }

    pub fn feed(&mut self, byte: u8) -> Option<MouseDelta> {
        if self.phase == 0 && byte & 0x08 == 0 {
            // Out of sync: discard until a plausible flags byte.
            return None;
        }
        self.bytes[self.phase] = byte;
        self.phase += 1;
        if self.phase < 3 {
            return None;
        }
        self.phase = 0;

        let flags = self.bytes[0];
        // Overflowed packets are garbage; drop them.
        if flags & 0xC0 != 0 {
            return None;
        }
        let mut dx = self.bytes[1] as i32;
        let mut dy = self.bytes[2] as i32;
        if flags & 0x10 != 0 {
            dx -= 256;
        }
        if flags & 0x20 != 0 {
            dy -= 256;
        }
        Some(MouseDelta {
            dx,
            dy: -dy,
            scroll: 0,
            buttons: flags & 0x07,
        })
    }
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Current pointer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseState {
    pub x: i32,
    pub y: i32,
    pub buttons: u8,
    /// Wheel delta accumulated since the last [`take_update`] snapshot.
    pub scroll: i32,
    /// Set by the IRQ side on any change, cleared by [`take_update`].
    pub changed: bool,
}

impl MouseState {
    const fn new() -> Self {
        Self {
            x: (SCREEN_WIDTH / 2) as i32,
            y: (SCREEN_HEIGHT / 2) as i32,
            buttons: 0,
            scroll: 0,
            changed: false,
        }
    }

    pub fn left_down(&self) -> bool {
        self.buttons & BUTTON_LEFT != 0
    }

    pub fn right_down(&self) -> bool {
        self.buttons & BUTTON_RIGHT != 0
    }

    fn apply(&mut self, delta: MouseDelta) {
        self.x = (self.x + delta.dx).clamp(0, SCREEN_WIDTH as i32 - 1);
        self.y = (self.y + delta.dy).clamp(0, SCREEN_HEIGHT as i32 - 1);
        self.buttons = delta.buttons;
        self.scroll += delta.scroll;
        self.changed = true;
    }
}

static MOUSE: Mutex<MouseState> = Mutex::new(MouseState::new());
static DECODER: Mutex<PacketDecoder> = Mutex::new(PacketDecoder::new());

/// Apply a decoded delta to the global state.
pub fn apply_delta(delta: MouseDelta) {
    MOUSE.lock().apply(delta);
}

/// Snapshot the state if it changed since the last call. Consumes the
/// change flag and the accumulated scroll delta; the caller runs with
/// interrupts briefly disabled inside.
pub fn take_update() -> Option<MouseState> {
    crate::arch::without_interrupts(|| {
        let mut mouse = MOUSE.lock();
        if !mouse.changed {
            return None;
        }
        let snapshot = MouseState {
            changed: true,
            ..*mouse
        };
        mouse.changed = false;
        mouse.scroll = 0;
        Some(snapshot)
    })
}

/// Current state without consuming the change flag (modal dialogs poll
/// this).
pub fn peek() -> MouseState {
    crate::arch::without_interrupts(|| *MOUSE.lock())
}

#[cfg(all(test, not(target_os = "none")))]
pub(crate) fn reset_for_test() {
    *MOUSE.lock() = MouseState::new();
}

// ---------------------------------------------------------------------------
// Bare-metal IRQ side
// ---------------------------------------------------------------------------

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod x86_impl {
    use super::*;

    const PS2_DATA: u16 = 0x60;
    const PS2_STATUS: u16 = 0x64;
    const PS2_CMD: u16 = 0x64;

    fn wait_write() {
        // SAFETY: polling the controller status register.
        unsafe {
            while x86::io::inb(PS2_STATUS) & 0x02 != 0 {
                core::hint::spin_loop();
            }
        }
    }

    fn mouse_command(cmd: u8) {
        // SAFETY: 0xD4 routes the next data byte to the auxiliary device;
        // the standard enable sequence.
        unsafe {
            wait_write();
            x86::io::outb(PS2_CMD, 0xD4);
            wait_write();
            x86::io::outb(PS2_DATA, cmd);
            // Consume the ACK.
            let _ = x86::io::inb(PS2_DATA);
        }
    }

    /// Enable the auxiliary device and packet streaming.
    pub fn init() {
        // SAFETY: standard controller command sequence.
        unsafe {
            wait_write();
            x86::io::outb(PS2_CMD, 0xA8); // enable aux port
            wait_write();
            x86::io::outb(PS2_CMD, 0x20); // read command byte
            let cmd = x86::io::inb(PS2_DATA) | 0x02; // aux IRQ on
            wait_write();
            x86::io::outb(PS2_CMD, 0x60);
            wait_write();
            x86::io::outb(PS2_DATA, cmd);
        }
        mouse_command(0xF6); // defaults
        mouse_command(0xF4); // enable streaming
    }

    /// IRQ12: feed one byte to the decoder.
    pub fn irq_handler() {
        // SAFETY: reading port 0x60 pops the controller output buffer.
        let byte = unsafe { x86::io::inb(PS2_DATA) };
        let delta = DECODER.lock().feed(byte);
        if let Some(delta) = delta {
            apply_delta(delta);
        }
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use x86_impl::{init, irq_handler};

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn init() {}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn irq_handler() {
    let _ = &DECODER;
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_positive_motion() {
        let mut dec = PacketDecoder::new();
        assert_eq!(dec.feed(0x08), None);
        assert_eq!(dec.feed(5), None);
        let delta = dec.feed(3).expect("third byte completes the packet");
        assert_eq!(
            delta,
            MouseDelta {
                dx: 5,
                dy: -3,
                scroll: 0,
                buttons: 0
            }
        );
    }

    #[test]
    fn test_decoder_sign_extension() {
        let mut dec = PacketDecoder::new();
        // X sign bit set, dx byte 0xFB = -5; Y sign bit set, 0xFE = -2.
        dec.feed(0x08 | 0x10 | 0x20);
        dec.feed(0xFB);
        let delta = dec.feed(0xFE).expect("packet");
        assert_eq!(delta.dx, -5);
        assert_eq!(delta.dy, 2, "wire Y is inverted for screen space");
    }

    #[test]
    fn test_decoder_buttons_and_resync() {
        let mut dec = PacketDecoder::new();
        // Garbage byte without bit 3: dropped, decoder stays at phase 0.
        assert_eq!(dec.feed(0x00), None);
        dec.feed(0x08 | BUTTON_LEFT);
        dec.feed(0);
        let delta = dec.feed(0).expect("packet");
        assert_eq!(delta.buttons, BUTTON_LEFT);
    }

    #[test]
    fn test_decoder_drops_overflow_packets() {
        let mut dec = PacketDecoder::new();
        dec.feed(0x08 | 0x40);
        dec.feed(10);
        assert_eq!(dec.feed(10), None);
    }

    // One test for the global state: the harness runs tests concurrently.
    #[test]
    fn test_state_clamps_and_scroll_is_consumed() {
        reset_for_test();
        apply_delta(MouseDelta {
            dx: 10_000,
            dy: -10_000,
            scroll: 0,
            buttons: 0,
        });
        let state = take_update().expect("change flag set");
        assert_eq!(state.x, SCREEN_WIDTH as i32 - 1);
        assert_eq!(state.y, 0);
        assert!(take_update().is_none(), "flag consumed by the snapshot");

        // Scroll deltas accumulate across packets and drain with the
        // snapshot that reports them.
        apply_delta(MouseDelta {
            dx: 0,
            dy: 0,
            scroll: 2,
            buttons: 0,
        });
        apply_delta(MouseDelta {
            dx: 0,
            dy: 0,
            scroll: 1,
            buttons: 0,
        });
        let state = take_update().expect("scroll raises the change flag");
        assert_eq!(state.scroll, 3);
        assert!(take_update().is_none());
        assert_eq!(peek().scroll, 0, "snapshot drained the accumulator");
    }
}
