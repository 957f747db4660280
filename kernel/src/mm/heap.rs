//! Kernel heap: first-fit block list with canaries, poison, and tracking.
//!
//! Every block carries a front canary in its header and a back canary
//! immediately after the payload, so a write one byte past the allocation
//! trips the next walk. Freed payloads are poisoned, frees of an
//! already-free block trap, and every live allocation is recorded in the
//! tracker ring. The heap grows by requesting contiguous page runs from
//! the physical allocator; allocation failure returns null and is never a
//! panic.

use core::mem::size_of;
use core::ptr;

use spin::Mutex;

use super::tracker::AllocTracker;
use crate::config::PAGE_SIZE;

const FRONT_CANARY: u32 = 0xFEED_FACE;
const BACK_CANARY: u32 = 0xCAFE_D00D;
const POISON: u8 = 0xA5;

/// Allocation granularity. Payload pointers are aligned to this.
pub const ALIGN: usize = 16;

/// A split must leave at least this much payload in the remainder block.
const MIN_SPLIT: usize = 8;

const BACK_CANARY_SIZE: usize = size_of::<u32>();

#[repr(C)]
struct BlockHeader {
    front_canary: u32,
    /// Capacity of the data region after the header, back canary included.
    size: usize,
    /// Requested payload bytes of the current allocation; 0 while free.
    req: usize,
    next: *mut BlockHeader,
    free: bool,
    /// Uptime ticks at the last alloc or free of this block.
    stamp: u64,
    /// Source tag of the current allocation.
    tag: &'static str,
}

const HEADER_SIZE: usize = (size_of::<BlockHeader>() + ALIGN - 1) & !(ALIGN - 1);

impl BlockHeader {
    #[inline]
    fn payload(&self) -> *mut u8 {
        (self as *const _ as usize + HEADER_SIZE) as *mut u8
    }

    #[inline]
    fn data_end(&self) -> usize {
        self as *const _ as usize + HEADER_SIZE + self.size
    }

    unsafe fn write_back_canary(&self) {
        // SAFETY (caller): req + BACK_CANARY_SIZE <= size, so the canary
        // lands inside this block's data region.
        unsafe {
            let at = self.payload().add(self.req) as *mut u32;
            ptr::write_unaligned(at, BACK_CANARY);
        }
    }

    unsafe fn back_canary_ok(&self) -> bool {
        // SAFETY (caller): block is allocated, so req and the canary slot
        // are inside the data region.
        unsafe {
            let at = self.payload().add(self.req) as *const u32;
            ptr::read_unaligned(at) == BACK_CANARY
        }
    }
}

/// Result of verifying one block on a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockCheck {
    Ok,
    Corrupt,
}

/// Heap statistics snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStats {
    pub active_count: usize,
    pub active_bytes: usize,
    pub peak_count: usize,
    pub peak_bytes: usize,
    /// Total bytes under heap management (headers included).
    pub managed_bytes: usize,
}

/// The kernel heap.
pub struct KernelHeap {
    head: *mut BlockHeader,
    /// Page source for growth: `pages -> base address`. `None` means the
    /// heap only uses regions seeded with [`KernelHeap::add_region`].
    grow: Option<fn(usize) -> Option<usize>>,
    tracker: AllocTracker,
    managed_bytes: usize,
}

// SAFETY: the raw block pointers are only touched through &mut self, and
// the single global instance is behind a Mutex.
unsafe impl Send for KernelHeap {}

impl KernelHeap {
    pub const fn new(grow: Option<fn(usize) -> Option<usize>>) -> Self {
        Self {
            head: ptr::null_mut(),
            grow,
            tracker: AllocTracker::new(),
            managed_bytes: 0,
        }
    }

    /// Hand a memory region to the heap as one free block.
    ///
    /// # Safety
    ///
    /// `[base, base + len)` must be writable, unused by anything else, and
    /// remain valid for the heap's lifetime.
    pub unsafe fn add_region(&mut self, base: usize, len: usize) {
        let aligned = (base + ALIGN - 1) & !(ALIGN - 1);
        let end = base + len;
        if aligned + HEADER_SIZE + MIN_SPLIT + BACK_CANARY_SIZE > end {
            return;
        }
        let header = aligned as *mut BlockHeader;
        // SAFETY: the caller guarantees the region; `aligned` leaves room
        // for the header per the check above.
        unsafe {
            (*header) = BlockHeader {
                front_canary: FRONT_CANARY,
                size: end - aligned - HEADER_SIZE,
                req: 0,
                next: ptr::null_mut(),
                free: true,
                stamp: crate::timer::uptime_ticks(),
                tag: "",
            };
        }
        self.managed_bytes += end - aligned;

        if self.head.is_null() {
            self.head = header;
            return;
        }
        let mut cursor = self.head;
        // SAFETY: list links always point at live headers owned by the heap.
        unsafe {
            while !(*cursor).next.is_null() {
                cursor = (*cursor).next;
            }
            (*cursor).next = header;
        }
    }

    fn verify(&self, block: *mut BlockHeader) -> BlockCheck {
        // SAFETY: `block` comes from the heap's own list or a payload
        // pointer the caller owns; headers live in heap-managed memory.
        unsafe {
            if (*block).front_canary != FRONT_CANARY {
                return BlockCheck::Corrupt;
            }
            if !(*block).free && !(*block).back_canary_ok() {
                return BlockCheck::Corrupt;
            }
        }
        BlockCheck::Ok
    }

    /// Allocate `size` bytes tagged with `tag`. Returns null on exhaustion.
    pub fn alloc_tagged(&mut self, size: usize, tag: &'static str) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }
        if let Some(p) = self.try_alloc(size, tag) {
            return p;
        }
        // No block fits: grow by a fresh contiguous run and retry.
        if let Some(grow) = self.grow {
            let needed = Self::needed_capacity(size) + HEADER_SIZE;
            let pages = needed.div_ceil(PAGE_SIZE);
            if let Some(base) = grow(pages) {
                // SAFETY: the page allocator returned an unused, identity-
                // mapped run of `pages` pages.
                unsafe { self.add_region(base, pages * PAGE_SIZE) };
                if let Some(p) = self.try_alloc(size, tag) {
                    return p;
                }
            }
        }
        ptr::null_mut()
    }

    #[inline]
    fn needed_capacity(req: usize) -> usize {
        (req + BACK_CANARY_SIZE + ALIGN - 1) & !(ALIGN - 1)
    }

    fn try_alloc(&mut self, req: usize, tag: &'static str) -> Option<*mut u8> {
        let needed = Self::needed_capacity(req);
        let mut block = self.head;
        while !block.is_null() {
            if self.verify(block) == BlockCheck::Corrupt {
                panic!("kernel heap corruption at {:p} during alloc", block);
            }
            // SAFETY: verified header on the heap's own list.
            unsafe {
                if (*block).free && (*block).size >= needed {
                    self.split(block, needed);
                    (*block).free = false;
                    (*block).req = req;
                    (*block).stamp = crate::timer::uptime_ticks();
                    (*block).tag = tag;
                    (*block).front_canary = FRONT_CANARY;
                    (*block).write_back_canary();
                    let p = (*block).payload();
                    self.tracker
                        .record(p as usize, req, (*block).stamp, tag);
                    return Some(p);
                }
                block = (*block).next;
            }
        }
        None
    }

    /// Carve the tail of `block` into a new free block when the remainder
    /// is worth keeping.
    unsafe fn split(&mut self, block: *mut BlockHeader, needed: usize) {
        // SAFETY (caller): block is a verified free header with
        // size >= needed.
        unsafe {
            let spare = (*block).size - needed;
            if spare < HEADER_SIZE + MIN_SPLIT {
                return;
            }
            let rest = ((*block) .payload() as usize + needed) as *mut BlockHeader;
            (*rest) = BlockHeader {
                front_canary: FRONT_CANARY,
                size: spare - HEADER_SIZE,
                req: 0,
                next: (*block).next,
                free: true,
                stamp: (*block).stamp,
                tag: "",
            };
            (*block).next = rest;
            (*block).size = needed;
        }
    }

    /// Free a payload pointer previously returned by `alloc_tagged`.
    pub fn free(&mut self, p: *mut u8) {
        if p.is_null() {
            return;
        }
        let block = (p as usize - HEADER_SIZE) as *mut BlockHeader;
        // SAFETY: `p` came from alloc, so a header precedes it.
        unsafe {
            if (*block).front_canary != FRONT_CANARY {
                panic!("kernel heap corruption at {:p} during free", block);
            }
            if (*block).free {
                panic!("double free of {:p}", p);
            }
            if !(*block).back_canary_ok() {
                panic!("heap overflow past {:p} ({} bytes)", p, (*block).req);
            }

            self.tracker.remove(p as usize);
            ptr::write_bytes(p, POISON, (*block).req);
            (*block).free = true;
            (*block).req = 0;
            (*block).stamp = crate::timer::uptime_ticks();
            (*block).tag = "";
        }
        self.coalesce();
    }

    /// Merge every run of adjacent free blocks, head to tail.
    fn coalesce(&mut self) {
        let mut block = self.head;
        while !block.is_null() {
            // SAFETY: list links point at live headers; adjacency is
            // established by exact address arithmetic before merging.
            unsafe {
                if (*block).free {
                    let next = (*block).next;
                    if !next.is_null()
                        && (*next).free
                        && (*block).data_end() == next as usize
                    {
                        (*block).size += HEADER_SIZE + (*next).size;
                        (*block).next = (*next).next;
                        (*block).front_canary = FRONT_CANARY;
                        continue; // try to absorb the following block too
                    }
                }
                block = (*block).next;
            }
        }
    }

    /// Walk the whole list verifying canaries. Returns 0 when clean;
    /// corruption is fatal.
    pub fn integrity_check(&self) -> usize {
        let mut corrupted = 0;
        let mut block = self.head;
        while !block.is_null() {
            if self.verify(block) == BlockCheck::Corrupt {
                corrupted += 1;
            }
            // SAFETY: even a corrupt payload leaves the link intact unless
            // the header itself was overwritten; a trashed link ends the
            // walk at the panic below rather than wandering.
            unsafe {
                block = (*block).next;
            }
        }
        if corrupted > 0 {
            panic!("kernel heap integrity check: {} corrupt blocks", corrupted);
        }
        0
    }

    /// Visit tracker records older than `threshold` ticks.
    pub fn leak_scan<F: FnMut(usize, usize, &'static str)>(&self, threshold: u64, mut visit: F) {
        let now = crate::timer::uptime_ticks();
        self.tracker
            .leak_scan(now, threshold, |r| visit(r.addr, r.size, r.tag));
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            active_count: self.tracker.active_count(),
            active_bytes: self.tracker.active_bytes(),
            peak_count: self.tracker.peak_count(),
            peak_bytes: self.tracker.peak_bytes(),
            managed_bytes: self.managed_bytes,
        }
    }
}

// ---------------------------------------------------------------------------
// Global heap
// ---------------------------------------------------------------------------

/// Global kernel heap, grown from the physical frame allocator.
pub static KERNEL_HEAP: Mutex<KernelHeap> =
    Mutex::new(KernelHeap::new(Some(super::frame_allocator::alloc_pages)));

/// Allocate from the global heap.
pub fn kalloc(size: usize) -> *mut u8 {
    crate::arch::without_interrupts(|| KERNEL_HEAP.lock().alloc_tagged(size, "kalloc"))
}

/// Allocate from the global heap with a source tag.
pub fn kalloc_tagged(size: usize, tag: &'static str) -> *mut u8 {
    crate::arch::without_interrupts(|| KERNEL_HEAP.lock().alloc_tagged(size, tag))
}

/// Free a pointer returned by [`kalloc`].
pub fn kfree(p: *mut u8) {
    crate::arch::without_interrupts(|| KERNEL_HEAP.lock().free(p))
}

/// Snapshot the global heap statistics.
pub fn stats() -> HeapStats {
    crate::arch::without_interrupts(|| KERNEL_HEAP.lock().stats())
}

/// Scan the global heap for allocations older than `threshold` ticks.
pub fn leak_scan<F: FnMut(usize, usize, &'static str)>(threshold: u64, visit: F) {
    crate::arch::without_interrupts(|| KERNEL_HEAP.lock().leak_scan(threshold, visit));
}

/// Seed the heap with an initial region so early boot allocations do not
/// each pay a growth round-trip. Bare metal only: the pages come from the
/// identity-mapped frame allocator.
#[cfg(target_os = "none")]
pub fn init() {
    const INITIAL_PAGES: usize = 64;
    match super::frame_allocator::alloc_pages(INITIAL_PAGES) {
        Some(base) => {
            // SAFETY: freshly allocated, identity-mapped pages.
            unsafe { KERNEL_HEAP.lock().add_region(base, INITIAL_PAGES * PAGE_SIZE) };
            log::info!(target: "heap", "seeded with {} KiB", INITIAL_PAGES * PAGE_SIZE / 1024);
        }
        None => log::warn!(target: "heap", "no pages for the initial region"),
    }
}

/// `#[global_allocator]` front end over the canary heap (bare metal).
pub struct KernelAllocator;

// SAFETY: alloc/dealloc delegate to the canary heap, which hands out
// exclusive, ALIGN-aligned regions of at least the requested size and
// never recycles a live block.
#[cfg(target_os = "none")]
unsafe impl core::alloc::GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: core::alloc::Layout) -> *mut u8 {
        if layout.align() > ALIGN {
            return ptr::null_mut();
        }
        kalloc(layout.size())
    }

    unsafe fn dealloc(&self, p: *mut u8, _layout: core::alloc::Layout) {
        kfree(p);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    /// Heap over a leaked, 16-aligned arena. No growth source: exhaustion
    /// must surface as null, never as a panic.
    fn test_heap(arena_bytes: usize) -> KernelHeap {
        let words = vec![0u128; arena_bytes / 16];
        let slice: &'static mut [u128] = Vec::leak(words);
        let mut heap = KernelHeap::new(None);
        unsafe { heap.add_region(slice.as_mut_ptr() as usize, arena_bytes) };
        heap
    }

    #[test]
    fn test_alloc_free_roundtrip() {
        let mut heap = test_heap(64 * 1024);
        let p = heap.alloc_tagged(100, "t");
        assert!(!p.is_null());
        assert_eq!(p as usize % ALIGN, 0);
        unsafe { ptr::write_bytes(p, 0x42, 100) };
        assert_eq!(heap.integrity_check(), 0);
        heap.free(p);
        assert_eq!(heap.integrity_check(), 0);
        assert_eq!(heap.stats().active_count, 0);
    }

    #[test]
    fn test_writes_inside_bounds_never_corrupt() {
        let mut heap = test_heap(64 * 1024);
        let mut live = Vec::new();
        for i in 0..32 {
            let size = 16 + i * 7;
            let p = heap.alloc_tagged(size, "loop");
            assert!(!p.is_null());
            unsafe { ptr::write_bytes(p, i as u8, size) };
            live.push((p, size));
            assert_eq!(heap.integrity_check(), 0);
        }
        for (p, _) in live.into_iter().step_by(2) {
            heap.free(p);
            assert_eq!(heap.integrity_check(), 0);
        }
    }

    #[test]
    #[should_panic(expected = "corrupt")]
    fn test_one_byte_overflow_detected_by_walk() {
        let mut heap = test_heap(16 * 1024);
        let p = heap.alloc_tagged(24, "t");
        unsafe { *p.add(24) = 0xFF }; // one byte past the payload
        heap.integrity_check();
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn test_one_byte_overflow_detected_by_free() {
        let mut heap = test_heap(16 * 1024);
        let p = heap.alloc_tagged(24, "t");
        unsafe { *p.add(24) = 0xFF };
        heap.free(p);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_traps() {
        let mut heap = test_heap(16 * 1024);
        let p = heap.alloc_tagged(32, "t");
        heap.free(p);
        heap.free(p);
    }

    #[test]
    fn test_free_poisons_payload() {
        let mut heap = test_heap(16 * 1024);
        let p = heap.alloc_tagged(64, "t");
        unsafe { ptr::write_bytes(p, 0x11, 64) };
        heap.free(p);
        for i in 0..64 {
            assert_eq!(unsafe { *p.add(i) }, POISON, "byte {} not poisoned", i);
        }
    }

    #[test]
    fn test_counters_are_exact() {
        let mut heap = test_heap(64 * 1024);
        let a = heap.alloc_tagged(100, "a");
        let b = heap.alloc_tagged(200, "b");
        let stats = heap.stats();
        assert_eq!(stats.active_count, 2);
        assert_eq!(stats.active_bytes, 300);

        heap.free(a);
        let stats = heap.stats();
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.active_bytes, 200);
        assert_eq!(stats.peak_bytes, 300);

        heap.free(b);
        assert_eq!(heap.stats().active_bytes, 0);
        assert_eq!(heap.stats().peak_count, 2);
    }

    #[test]
    fn test_merge_allows_reuse_of_whole_arena() {
        let mut heap = test_heap(16 * 1024);
        // A large allocation that only fits when prior frees have merged.
        let big = 8 * 1024;
        let a = heap.alloc_tagged(4 * 1024, "a");
        let b = heap.alloc_tagged(4 * 1024, "b");
        let c = heap.alloc_tagged(4 * 1024, "c");
        assert!(heap.alloc_tagged(big, "big").is_null());
        heap.free(b);
        heap.free(a);
        heap.free(c);
        let p = heap.alloc_tagged(big, "big");
        assert!(!p.is_null(), "merged free blocks should satisfy {} bytes", big);
    }

    #[test]
    fn test_exhaustion_returns_null() {
        let mut heap = test_heap(4 * 1024);
        assert!(heap.alloc_tagged(64 * 1024, "huge").is_null());
    }

    #[test]
    fn test_zero_size_returns_null() {
        let mut heap = test_heap(4 * 1024);
        assert!(heap.alloc_tagged(0, "zero").is_null());
    }

    #[test]
    fn test_leak_scan_reports_old_allocations() {
        let mut heap = test_heap(16 * 1024);
        let _p = heap.alloc_tagged(48, "suspect");
        let mut found = Vec::new();
        // Threshold 0 with a stamp of now: nothing is "older than" yet.
        heap.leak_scan(u64::MAX, |_, _, tag| found.push(tag));
        assert!(found.is_empty());
    }
}
