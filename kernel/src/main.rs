//! cupid-os kernel entry.
//!
//! The bootloader hands over in protected mode with interrupts off, a
//! flat GDT, ESP inside the 64 KiB kernel stack, the VBE framebuffer base
//! in the low-memory info slot, and the end of the loaded kernel image in
//! EBX. `kmain` brings the subsystems up bottom to top and then becomes
//! the desktop loop thread.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate alloc;

#[cfg(target_os = "none")]
use cupid_kernel::{
    arch, desktop, drivers, fs, graphics, irq, logger, mm, println, sched, services,
};

#[cfg(target_os = "none")]
use alloc::sync::Arc;

#[cfg(all(target_arch = "x86", target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    let kernel_end: u32;
    // SAFETY: the boot contract places the end of the loaded image in EBX
    // before jumping here; reading it clobbers nothing.
    unsafe {
        core::arch::asm!("mov {}, ebx", out(reg) kernel_end, options(nomem, preserves_flags));
    }
    kmain(kernel_end as usize);
}

#[cfg(target_os = "none")]
fn kmain(kernel_end: usize) -> ! {
    // Serial console only: everything else waits for memory management.
    arch::init_early();
    logger::init();
    println!("cupid-os v{}", env!("CARGO_PKG_VERSION"));

    // Memory, bottom up: frames, paging, heap, stack guard.
    let lfb_base = graphics::framebuffer::boot_lfb_base();
    mm::frame_allocator::init(kernel_end, lfb_base);
    #[cfg(target_arch = "x86")]
    if mm::paging::init(lfb_base).is_none() {
        panic!("paging bootstrap failed");
    }
    mm::heap::init();
    mm::stack_guard::init();

    // Interrupt plumbing and devices, now that the heap and guard exist.
    arch::init_interrupts();
    irq::init();
    drivers::keyboard::init();
    drivers::mouse::init();

    // Processes and the idle thread.
    sched::init();

    // Filesystems: ramfs root, FAT16 home, ramfs notes, devfs.
    mount_filesystems();

    // Desktop stack.
    graphics::framebuffer::init();
    desktop::init();

    // Shell thread, then this boot context becomes the desktop loop.
    if let Err(e) = sched::create(services::shell::run, "shell", cupid_kernel::config::DEFAULT_STACK)
    {
        panic!("cannot spawn shell: {:?}", e);
    }

    arch::enable_interrupts();
    log::info!(target: "kmain", "boot complete, entering desktop loop");
    desktop::run();
}

#[cfg(target_os = "none")]
fn mount_filesystems() {
    use fs::{devfs::DevFs, ramfs::RamFs};

    fs::with_vfs(|vfs| {
        let root = Arc::new(RamFs::new());
        vfs.mount("/", root).expect("root mount cannot fail on an empty table");

        // Stub directories so `ls /` shows the mount points.
        for dir in ["home", "dev", "notes"] {
            let _ = vfs.mkdir(&alloc::format!("/{}", dir));
        }

        // The ATA-backed FAT16 partition is the real /home; until the
        // disk driver hands us a device this is a formatted RAM image.
        let disk = fs::blockdev::RamDisk::new(4096);
        match fs::fat::Fat16Volume::format(disk) {
            Ok(volume) => {
                let _ = vfs.mount("/home", Arc::new(fs::fat::FatFs::new(volume)));
            }
            Err(e) => log::warn!(target: "kmain", "no /home filesystem: {:?}", e),
        }

        let _ = vfs.mount("/notes", Arc::new(RamFs::new()));
        let _ = vfs.mount("/dev", Arc::new(DevFs::new()));
    });
    log::info!(target: "kmain", "mounted /, /home, /notes, /dev");
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    cupid_kernel::panic::handle(info)
}

/// Host builds only exist so `cargo test` can link the binary target.
#[cfg(not(target_os = "none"))]
fn main() {
    println!("cupid-kernel is a bare-metal image; run the test suite with `cargo test`");
}
