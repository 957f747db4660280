//! Kernel-wide configuration constants.
//!
//! Every tunable that more than one subsystem depends on lives here so the
//! memory map reads in one place. Addresses follow the boot contract: the
//! kernel image is identity-loaded at its link address, the bootloader
//! leaves the VBE framebuffer physical base at [`VBE_INFO_SLOT`], and ESP
//! points into the 64 KiB kernel stack below [`KERNEL_STACK_TOP`].

/// Size of one physical page / frame.
pub const PAGE_SIZE: usize = 4096;

/// Managed physical RAM window (bitmap covers exactly this much).
pub const RAM_WINDOW_SIZE: usize = 32 * 1024 * 1024;

/// Bytes of RAM identity-mapped by the bootstrap page tables.
pub const IDENTITY_MAP_SIZE: usize = RAM_WINDOW_SIZE;

/// BIOS / VGA hole that must never be handed out.
pub const BIOS_HOLE_START: usize = 0x000A_0000;
pub const BIOS_HOLE_END: usize = 0x0010_0000;

/// Kernel stack: 64 KiB ending just below 0x90000, per the boot handoff.
pub const KERNEL_STACK_TOP: usize = 0x0009_0000;
pub const KERNEL_STACK_SIZE: usize = 64 * 1024;
pub const KERNEL_STACK_BOTTOM: usize = KERNEL_STACK_TOP - KERNEL_STACK_SIZE;

/// Low-memory slot where the bootloader publishes the 32-bit physical
/// address of the VBE linear framebuffer.
pub const VBE_INFO_SLOT: usize = 0x0000_5000;

/// Framebuffer geometry: 640x480 XRGB8888.
pub const SCREEN_WIDTH: usize = 640;
pub const SCREEN_HEIGHT: usize = 480;
pub const FRAMEBUFFER_BYTES: usize = SCREEN_WIDTH * SCREEN_HEIGHT * 4;

/// Fixed load window for user program images.
pub const USER_LOAD_BASE: usize = 0x0140_0000;
pub const USER_LOAD_WINDOW: usize = 4 * 1024 * 1024;

/// Process table size and stack bounds.
pub const MAX_PROCESSES: usize = 32;
pub const MIN_STACK: usize = 16 * 1024;
pub const DEFAULT_STACK: usize = 64 * 1024;

/// Scheduler quantum in timer ticks.
pub const DEFAULT_QUANTUM: u32 = 4;

/// Timer tick rate programmed into the PIT.
pub const TICK_HZ: u32 = 100;

/// Open file descriptor table size.
pub const MAX_OPEN_FILES: usize = 32;

/// Mount table size.
pub const MAX_MOUNTS: usize = 8;

/// Window manager limits.
pub const MAX_WINDOWS: usize = 16;
pub const TITLEBAR_HEIGHT: i32 = 20;
pub const CLOSE_BOX: i32 = 14;

/// Minimum number of pixels of a window that must stay on screen while
/// dragging, in both axes.
pub const DRAG_KEEP_ONSCREEN: i32 = 20;
