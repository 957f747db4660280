//! Double-buffered VBE framebuffer.
//!
//! All drawing lands in a kernel back buffer; [`Framebuffer::flip`] is the
//! single commit point that copies it to the linear framebuffer whose
//! physical base the bootloader published. On the host there is no LFB
//! and flips stop at the back buffer, which is what the tests inspect.

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::{Color, Rect};
use crate::config::{SCREEN_HEIGHT, SCREEN_WIDTH, VBE_INFO_SLOT};

pub struct Framebuffer {
    width: usize,
    height: usize,
    back: Vec<u32>,
    lfb: Option<*mut u32>,
}

// SAFETY: the raw LFB pointer is only dereferenced while the global Mutex
// is held; the mapped region is valid for the kernel's lifetime.
unsafe impl Send for Framebuffer {}

impl Framebuffer {
    pub const fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            back: Vec::new(),
            lfb: None,
        }
    }

    /// Allocate the back buffer and remember the LFB base, if any.
    pub fn configure(&mut self, width: usize, height: usize, lfb: Option<*mut u32>) {
        self.width = width;
        self.height = height;
        self.back = vec![0u32; width * height];
        self.lfb = lfb;
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Read one back-buffer pixel (tests and cursor save/restore).
    pub fn pixel(&self, x: i32, y: i32) -> Option<Color> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(Color(self.back[y as usize * self.width + x as usize]))
    }

    pub fn draw_pixel(&mut self, x: i32, y: i32, color: Color) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        self.back[y as usize * self.width + x as usize] = color.to_u32();
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Color) {
        let x0 = rect.x.max(0);
        let y0 = rect.y.max(0);
        let x1 = (rect.x + rect.width as i32).min(self.width as i32);
        let y1 = (rect.y + rect.height as i32).min(self.height as i32);
        for y in y0..y1 {
            let row = y as usize * self.width;
            for x in x0..x1 {
                self.back[row + x as usize] = color.to_u32();
            }
        }
    }

    /// Rectangle outline.
    pub fn draw_rect(&mut self, rect: Rect, color: Color) {
        for x in rect.x..rect.x + rect.width as i32 {
            self.draw_pixel(x, rect.y, color);
            self.draw_pixel(x, rect.y + rect.height as i32 - 1, color);
        }
        for y in rect.y..rect.y + rect.height as i32 {
            self.draw_pixel(rect.x, y, color);
            self.draw_pixel(rect.x + rect.width as i32 - 1, y, color);
        }
    }

    pub fn clear(&mut self, color: Color) {
        self.back.fill(color.to_u32());
    }

    /// Darken a region, used behind modal dialogs.
    pub fn dim_rect(&mut self, rect: Rect) {
        let x0 = rect.x.max(0);
        let y0 = rect.y.max(0);
        let x1 = (rect.x + rect.width as i32).min(self.width as i32);
        let y1 = (rect.y + rect.height as i32).min(self.height as i32);
        for y in y0..y1 {
            let row = y as usize * self.width;
            for x in x0..x1 {
                let px = self.back[row + x as usize];
                self.back[row + x as usize] = (px >> 1) & 0x007F_7F7F;
            }
        }
    }

    /// Commit the back buffer to the screen.
    pub fn flip(&mut self) {
        if let Some(lfb) = self.lfb {
            // SAFETY: the LFB mapping covers width*height pixels per the
            // paging bootstrap; the back buffer has the same length.
            unsafe {
                core::ptr::copy_nonoverlapping(self.back.as_ptr(), lfb, self.back.len());
            }
        }
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

static FRAMEBUFFER: Mutex<Framebuffer> = Mutex::new(Framebuffer::new());

/// Execute a closure with the framebuffer (mutable access)
pub fn with_framebuffer<R, F: FnOnce(&mut Framebuffer) -> R>(f: F) -> R {
    f(&mut FRAMEBUFFER.lock())
}

/// Read the LFB physical base the bootloader left in low memory.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn boot_lfb_base() -> Option<usize> {
    // SAFETY: the VBE info slot is identity-mapped low memory written by
    // the bootloader before handoff.
    let base = unsafe { (VBE_INFO_SLOT as *const u32).read_volatile() } as usize;
    if base == 0 {
        None
    } else {
        Some(base)
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn boot_lfb_base() -> Option<usize> {
    let _ = VBE_INFO_SLOT;
    None
}

/// Initialize the 640x480 double-buffered framebuffer.
pub fn init() {
    let lfb = boot_lfb_base().map(|base| base as *mut u32);
    FRAMEBUFFER
        .lock()
        .configure(SCREEN_WIDTH, SCREEN_HEIGHT, lfb);
    log::info!(
        target: "fb",
        "{}x{} framebuffer, lfb {}",
        SCREEN_WIDTH,
        SCREEN_HEIGHT,
        if lfb.is_some() { "mapped" } else { "absent" }
    );
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn small() -> Framebuffer {
        let mut fb = Framebuffer::new();
        fb.configure(16, 16, None);
        fb
    }

    #[test]
    fn test_fill_clips_to_bounds() {
        let mut fb = small();
        fb.fill_rect(Rect::new(-4, -4, 8, 8), Color::WHITE);
        assert_eq!(fb.pixel(0, 0), Some(Color::WHITE));
        assert_eq!(fb.pixel(3, 3), Some(Color::WHITE));
        assert_eq!(fb.pixel(4, 4), Some(Color::BLACK));
    }

    #[test]
    fn test_out_of_bounds_pixel_ignored() {
        let mut fb = small();
        fb.draw_pixel(99, 99, Color::WHITE);
        fb.draw_pixel(-1, 0, Color::WHITE);
        assert_eq!(fb.pixel(99, 99), None);
    }

    #[test]
    fn test_dim_halves_channels() {
        let mut fb = small();
        fb.clear(Color(0x00FF_FF00));
        fb.dim_rect(Rect::new(0, 0, 16, 1));
        assert_eq!(fb.pixel(0, 0), Some(Color(0x007F_7F00)));
        assert_eq!(fb.pixel(0, 1), Some(Color(0x00FF_FF00)));
    }
}
