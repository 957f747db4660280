//! Physical frame allocator.
//!
//! One bit per 4 KiB frame over the fixed 32 MiB RAM window; bit set means
//! allocated. `init` pre-reserves everything the kernel must never hand
//! out: the image itself, the BIOS/VGA hole, the kernel stack window, the
//! user-program load window, and the framebuffer. Allocation failures
//! return `None` and are escalated by the caller; the allocator itself
//! never panics.

use spin::Mutex;

use super::{align_down, align_up, PhysicalAddress};
use crate::config::{
    BIOS_HOLE_END, BIOS_HOLE_START, FRAMEBUFFER_BYTES, KERNEL_STACK_BOTTOM, KERNEL_STACK_TOP,
    PAGE_SIZE, RAM_WINDOW_SIZE, USER_LOAD_BASE, USER_LOAD_WINDOW,
};

/// Frames covered by the bitmap.
pub const TOTAL_FRAMES: usize = RAM_WINDOW_SIZE / PAGE_SIZE;

const BITMAP_WORDS: usize = TOTAL_FRAMES / 64;

/// Bitmap frame allocator over the managed RAM window.
pub struct FrameAllocator {
    /// One bit per frame; set = allocated.
    bitmap: [u64; BITMAP_WORDS],
    free_frames: usize,
}

impl FrameAllocator {
    pub const fn new() -> Self {
        Self {
            bitmap: [0; BITMAP_WORDS],
            free_frames: TOTAL_FRAMES,
        }
    }

    /// Reset the bitmap and reserve the fixed regions.
    ///
    /// `kernel_end` is the first byte past the loaded kernel image (handed
    /// over by the bootloader). `framebuffer_base` is the physical LFB base
    /// published in the VBE info slot, if one was found.
    pub fn init(&mut self, kernel_end: usize, framebuffer_base: Option<usize>) {
        self.bitmap = [0; BITMAP_WORDS];
        self.free_frames = TOTAL_FRAMES;

        self.reserve_region(0, align_up(kernel_end, PAGE_SIZE));
        self.reserve_region(BIOS_HOLE_START, BIOS_HOLE_END - BIOS_HOLE_START);
        self.reserve_region(KERNEL_STACK_BOTTOM, KERNEL_STACK_TOP - KERNEL_STACK_BOTTOM);
        self.reserve_region(USER_LOAD_BASE, USER_LOAD_WINDOW);
        if let Some(base) = framebuffer_base {
            self.reserve_region(base, FRAMEBUFFER_BYTES);
        }
    }

    #[inline]
    fn is_set(&self, frame: usize) -> bool {
        self.bitmap[frame / 64] & (1 << (frame % 64)) != 0
    }

    #[inline]
    fn set(&mut self, frame: usize) {
        if !self.is_set(frame) {
            self.bitmap[frame / 64] |= 1 << (frame % 64);
            self.free_frames -= 1;
        }
    }

    #[inline]
    fn clear(&mut self, frame: usize) {
        if self.is_set(frame) {
            self.bitmap[frame / 64] &= !(1 << (frame % 64));
            self.free_frames += 1;
        }
    }

    /// Allocate `count` physically contiguous frames. First-fit scan that
    /// tracks the current run length.
    pub fn alloc_contiguous(&mut self, count: usize) -> Option<PhysicalAddress> {
        if count == 0 || count > self.free_frames {
            return None;
        }

        let mut run_start = 0;
        let mut run_len = 0;
        for frame in 0..TOTAL_FRAMES {
            if self.is_set(frame) {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = frame;
            }
            run_len += 1;
            if run_len == count {
                for f in run_start..run_start + count {
                    self.set(f);
                }
                return Some(PhysicalAddress::new(run_start * PAGE_SIZE));
            }
        }
        None
    }

    /// Allocate a single frame. Scans whole words at a time before probing
    /// individual bits, which is the common fast path.
    pub fn alloc_page(&mut self) -> Option<PhysicalAddress> {
        for (word_idx, word) in self.bitmap.iter().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let frame = word_idx * 64 + bit;
            self.set(frame);
            return Some(PhysicalAddress::new(frame * PAGE_SIZE));
        }
        None
    }

    /// Free one frame. Misaligned or out-of-range addresses are ignored.
    pub fn free_page(&mut self, addr: PhysicalAddress) {
        if !addr.is_page_aligned() || addr.as_usize() >= RAM_WINDOW_SIZE {
            return;
        }
        self.clear(addr.frame_index());
    }

    /// Mark every frame overlapping `[start, start + size)` as allocated.
    /// Re-reserving an already reserved frame is idempotent.
    pub fn reserve_region(&mut self, start: usize, size: usize) {
        if size == 0 {
            return;
        }
        let first = align_down(start, PAGE_SIZE) / PAGE_SIZE;
        let last = align_up(start + size, PAGE_SIZE) / PAGE_SIZE;
        for frame in first..last.min(TOTAL_FRAMES) {
            self.set(frame);
        }
    }

    /// Clear every frame overlapping `[start, start + size)`.
    pub fn release_region(&mut self, start: usize, size: usize) {
        if size == 0 {
            return;
        }
        let first = align_down(start, PAGE_SIZE) / PAGE_SIZE;
        let last = align_up(start + size, PAGE_SIZE) / PAGE_SIZE;
        for frame in first..last.min(TOTAL_FRAMES) {
            self.clear(frame);
        }
    }

    pub fn free_pages(&self) -> usize {
        self.free_frames
    }

    pub fn total_pages(&self) -> usize {
        TOTAL_FRAMES
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Global frame allocator instance
pub static FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::new());

/// Initialize the global allocator from the boot handoff.
pub fn init(kernel_end: usize, framebuffer_base: Option<usize>) {
    let mut pmm = FRAME_ALLOCATOR.lock();
    pmm.init(kernel_end, framebuffer_base);
    log::info!(
        target: "pmm",
        "{} of {} frames free after reservations",
        pmm.free_pages(),
        pmm.total_pages()
    );
}

/// Allocate `count` contiguous pages from the global allocator, returning
/// the physical base address. Used by the heap growth path.
pub fn alloc_pages(count: usize) -> Option<usize> {
    FRAME_ALLOCATOR
        .lock()
        .alloc_contiguous(count)
        .map(|p| p.as_usize())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn fresh() -> FrameAllocator {
        // Window fully free: no reservations, so accounting is exact.
        FrameAllocator::new()
    }

    #[test]
    fn test_alloc_free_accounting() {
        let mut pmm = fresh();
        let total = pmm.total_pages();

        let a = pmm.alloc_contiguous(3).expect("3-frame run should fit");
        let b = pmm.alloc_page().expect("single frame should fit");
        assert_eq!(pmm.free_pages(), total - 4);

        pmm.free_page(b);
        pmm.free_page(a);
        pmm.free_page(PhysicalAddress::new(a.as_usize() + PAGE_SIZE));
        pmm.free_page(PhysicalAddress::new(a.as_usize() + 2 * PAGE_SIZE));
        assert_eq!(pmm.free_pages(), total);
    }

    #[test]
    fn test_contiguous_run_is_marked() {
        let mut pmm = fresh();
        let base = pmm.alloc_contiguous(8).expect("8-frame run should fit");
        let first = base.frame_index();
        for frame in first..first + 8 {
            assert!(pmm.is_set(frame), "frame {} should be allocated", frame);
        }
        // The next single-page allocation must land past the run.
        let next = pmm.alloc_page().expect("allocator not exhausted");
        assert!(next.frame_index() >= first + 8 || next.frame_index() < first);
    }

    #[test]
    fn test_reserve_is_idempotent() {
        let mut pmm = fresh();
        pmm.reserve_region(0x10000, 0x4000);
        let free_after_first = pmm.free_pages();
        pmm.reserve_region(0x10000, 0x4000);
        pmm.reserve_region(0x11000, 0x1000); // overlaps the first
        assert_eq!(pmm.free_pages(), free_after_first);
    }

    #[test]
    fn test_reserve_rounds_outward() {
        let mut pmm = fresh();
        let before = pmm.free_pages();
        // One byte straddling no boundary still costs the whole page.
        pmm.reserve_region(PAGE_SIZE + 1, 1);
        assert_eq!(pmm.free_pages(), before - 1);
        // A two-byte region straddling a page boundary costs two pages.
        pmm.reserve_region(3 * PAGE_SIZE - 1, 2);
        assert_eq!(pmm.free_pages(), before - 3);
    }

    #[test]
    fn test_misaligned_free_is_ignored() {
        let mut pmm = fresh();
        let page = pmm.alloc_page().expect("fresh allocator");
        let before = pmm.free_pages();
        pmm.free_page(PhysicalAddress::new(page.as_usize() + 1));
        pmm.free_page(PhysicalAddress::new(RAM_WINDOW_SIZE + PAGE_SIZE));
        assert_eq!(pmm.free_pages(), before);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut pmm = fresh();
        pmm.reserve_region(0, RAM_WINDOW_SIZE);
        assert!(pmm.alloc_page().is_none());
        assert!(pmm.alloc_contiguous(1).is_none());
    }

    #[test]
    fn test_init_reserves_fixed_regions() {
        let mut pmm = fresh();
        pmm.init(0x0002_0000, Some(0x00E0_0000));
        // BIOS hole
        assert!(pmm.is_set(BIOS_HOLE_START / PAGE_SIZE));
        // Kernel image below kernel_end
        assert!(pmm.is_set(0));
        assert!(pmm.is_set(0x0001_F000 / PAGE_SIZE));
        // Kernel stack window
        assert!(pmm.is_set(KERNEL_STACK_BOTTOM / PAGE_SIZE));
        // User load window
        assert!(pmm.is_set(USER_LOAD_BASE / PAGE_SIZE));
        // Framebuffer
        assert!(pmm.is_set(0x00E0_0000 / PAGE_SIZE));
    }
}
