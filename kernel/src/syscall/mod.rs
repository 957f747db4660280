//! Kernel syscall table.
//!
//! One `#[repr(C)]` record of `extern "C"` function pointers, passed by
//! pointer to every user program's `_start`. The record layout IS the
//! user ABI: new entries go at the end, existing entries never move or
//! change signature. Errors cross the boundary as negative kind codes
//! (see [`errno`]), never as Rust types.

use crate::drivers::rtc;
use crate::error::FsError;
use crate::fs::{self, OpenFlags, SeekFrom};
use crate::graphics::{with_framebuffer, Color, Rect};
use crate::process::ProcessId;
use crate::services::shell;

/// Negative error codes of the user ABI.
pub mod errno {
    pub const EINVAL: i32 = -1;
    pub const ENOENT: i32 = -2;
    pub const EIO: i32 = -3;
    pub const ENOSYS: i32 = -4;
    pub const EISDIR: i32 = -5;
    pub const ENOTDIR: i32 = -6;
    pub const ENOSPC: i32 = -7;
    pub const EMFILE: i32 = -8;
}

/// Map a VFS error kind to its ABI code.
pub fn fs_errno(e: FsError) -> i32 {
    match e {
        FsError::Inval => errno::EINVAL,
        FsError::NoEnt => errno::ENOENT,
        FsError::Io => errno::EIO,
        FsError::NoSys => errno::ENOSYS,
        FsError::IsDir => errno::EISDIR,
        FsError::NotDir => errno::ENOTDIR,
        FsError::NoSpc => errno::ENOSPC,
        FsError::MFile => errno::EMFILE,
    }
}

/// Directory entry as seen by user programs.
#[repr(C)]
pub struct SysDirEntry {
    pub name: [u8; 64],
    pub name_len: u32,
    pub size: u32,
    /// 0 = file, 1 = directory, 2 = device.
    pub kind: u32,
}

/// Stat result as seen by user programs.
#[repr(C)]
pub struct SysStat {
    pub size: u32,
    /// 0 = file, 1 = directory, 2 = device.
    pub kind: u32,
}

/// Wall-clock time as seen by user programs.
#[repr(C)]
pub struct SysDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// The syscall table. Field order is the ABI; append-only.
#[repr(C)]
pub struct SyscallTable {
    // stdio
    pub print: extern "C" fn(*const u8, usize),
    pub putchar: extern "C" fn(u8),
    /// Next key event as a nonzero byte, 0 when none is pending.
    pub read_event: extern "C" fn() -> u32,

    // memory
    pub alloc: extern "C" fn(usize) -> *mut u8,
    pub free: extern "C" fn(*mut u8),

    // vfs
    pub open: extern "C" fn(*const u8, usize, u32) -> i32,
    pub read: extern "C" fn(i32, *mut u8, usize) -> i32,
    pub write: extern "C" fn(i32, *const u8, usize) -> i32,
    pub seek: extern "C" fn(i32, i32, u32) -> i32,
    pub close: extern "C" fn(i32) -> i32,
    pub readdir: extern "C" fn(i32, *mut SysDirEntry) -> i32,
    pub stat: extern "C" fn(*const u8, usize, *mut SysStat) -> i32,
    pub mkdir: extern "C" fn(*const u8, usize) -> i32,
    pub unlink: extern "C" fn(*const u8, usize) -> i32,
    pub rename: extern "C" fn(*const u8, usize, *const u8, usize) -> i32,
    pub copy: extern "C" fn(*const u8, usize, *const u8, usize) -> i32,

    // process
    pub yield_cpu: extern "C" fn(),
    pub exit: extern "C" fn(i32) -> !,
    pub exec: extern "C" fn(*const u8, usize) -> i32,
    pub kill: extern "C" fn(u32) -> i32,
    pub getpid: extern "C" fn() -> u32,

    // graphics
    pub fill_rect: extern "C" fn(i32, i32, u32, u32, u32),
    pub draw_pixel: extern "C" fn(i32, i32, u32),
    pub flip: extern "C" fn(),

    // widgets
    pub widget_button: extern "C" fn(i32, i32, u32, u32, u32),

    // dialogs
    pub dialog_message: extern "C" fn(*const u8, usize) -> i32,
    pub dialog_confirm: extern "C" fn(*const u8, usize) -> i32,
    pub dialog_input: extern "C" fn(*const u8, usize, *mut u8, usize) -> i32,
    pub dialog_open_file: extern "C" fn(*const u8, usize, *mut u8, usize) -> i32,

    // time
    pub uptime_ms: extern "C" fn() -> u64,
    pub rtc_now: extern "C" fn(*mut SysDateTime),

    // shell state
    pub get_cwd: extern "C" fn(*mut u8, usize) -> usize,
    pub set_cwd: extern "C" fn(*const u8, usize) -> i32,
}

/// The one table instance handed to user programs.
static SYSCALL_TABLE: SyscallTable = SyscallTable {
    print: sys_print,
    putchar: sys_putchar,
    read_event: sys_read_event,
    alloc: sys_alloc,
    free: sys_free,
    open: sys_open,
    read: sys_read,
    write: sys_write,
    seek: sys_seek,
    close: sys_close,
    readdir: sys_readdir,
    stat: sys_stat,
    mkdir: sys_mkdir,
    unlink: sys_unlink,
    rename: sys_rename,
    copy: sys_copy,
    yield_cpu: sys_yield,
    exit: sys_exit,
    exec: sys_exec,
    kill: sys_kill,
    getpid: sys_getpid,
    fill_rect: sys_fill_rect,
    draw_pixel: sys_draw_pixel,
    flip: sys_flip,
    widget_button: sys_widget_button,
    dialog_message: sys_dialog_message,
    dialog_confirm: sys_dialog_confirm,
    dialog_input: sys_dialog_input,
    dialog_open_file: sys_dialog_open_file,
    uptime_ms: sys_uptime_ms,
    rtc_now: sys_rtc_now,
    get_cwd: sys_get_cwd,
    set_cwd: sys_set_cwd,
};

/// Pointer handed to `_start`.
pub fn table_ptr() -> *const SyscallTable {
    &SYSCALL_TABLE
}

/// Borrow a user string. Non-UTF-8 input surfaces as `Inval` at the call
/// sites via `None`.
///
/// # Safety
///
/// `ptr..ptr+len` must be readable. User programs share the kernel
/// address space, so the only defense here is length sanity.
unsafe fn user_str<'a>(ptr: *const u8, len: usize) -> Option<&'a str> {
    if ptr.is_null() || len > 4096 {
        return None;
    }
    // SAFETY: per contract above.
    let bytes = unsafe { core::slice::from_raw_parts(ptr, len) };
    core::str::from_utf8(bytes).ok()
}

fn kind_code(kind: fs::NodeKind) -> u32 {
    match kind {
        fs::NodeKind::File => 0,
        fs::NodeKind::Directory => 1,
        fs::NodeKind::Device => 2,
    }
}

// ---------------------------------------------------------------------------
// stdio
// ---------------------------------------------------------------------------

extern "C" fn sys_print(ptr: *const u8, len: usize) {
    // SAFETY: ABI contract; bounds-checked in user_str.
    if let Some(text) = unsafe { user_str(ptr, len) } {
        print!("{}", text);
    }
}

extern "C" fn sys_putchar(byte: u8) {
    print!("{}", byte as char);
}

extern "C" fn sys_read_event() -> u32 {
    crate::drivers::keyboard::read_key().map(|b| b as u32).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// memory
// ---------------------------------------------------------------------------

extern "C" fn sys_alloc(size: usize) -> *mut u8 {
    crate::mm::heap::kalloc_tagged(size, "user")
}

extern "C" fn sys_free(ptr: *mut u8) {
    crate::mm::heap::kfree(ptr);
}

// ---------------------------------------------------------------------------
// vfs
// ---------------------------------------------------------------------------

extern "C" fn sys_open(ptr: *const u8, len: usize, flags: u32) -> i32 {
    // SAFETY: ABI contract.
    let Some(path) = (unsafe { user_str(ptr, len) }) else {
        return errno::EINVAL;
    };
    let flags = OpenFlags::from_bits_truncate(flags);
    match fs::with_vfs(|vfs| vfs.open(path, flags)) {
        Ok(fd) => fd as i32,
        Err(e) => fs_errno(e),
    }
}

extern "C" fn sys_read(fd: i32, buf: *mut u8, len: usize) -> i32 {
    if fd < 0 || buf.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: ABI contract: the buffer is owned by the caller.
    let buf = unsafe { core::slice::from_raw_parts_mut(buf, len) };
    match fs::with_vfs(|vfs| vfs.read(fd as usize, buf)) {
        Ok(n) => n as i32,
        Err(e) => fs_errno(e),
    }
}

extern "C" fn sys_write(fd: i32, buf: *const u8, len: usize) -> i32 {
    if fd < 0 || buf.is_null() {
        return errno::EINVAL;
    }
    // SAFETY: ABI contract.
    let buf = unsafe { core::slice::from_raw_parts(buf, len) };
    match fs::with_vfs(|vfs| vfs.write(fd as usize, buf)) {
        Ok(n) => n as i32,
        Err(e) => fs_errno(e),
    }
}

extern "C" fn sys_seek(fd: i32, offset: i32, whence: u32) -> i32 {
    if fd < 0 {
        return errno::EINVAL;
    }
    let from = match whence {
        0 => SeekFrom::Start(offset.max(0) as usize),
        1 => SeekFrom::Current(offset as isize),
        2 => SeekFrom::End(offset as isize),
        _ => return errno::EINVAL,
    };
    match fs::with_vfs(|vfs| vfs.seek(fd as usize, from)) {
        Ok(pos) => pos as i32,
        Err(e) => fs_errno(e),
    }
}

extern "C" fn sys_close(fd: i32) -> i32 {
    if fd < 0 {
        return errno::EINVAL;
    }
    match fs::with_vfs(|vfs| vfs.close(fd as usize)) {
        Ok(()) => 0,
        Err(e) => fs_errno(e),
    }
}

extern "C" fn sys_readdir(fd: i32, out: *mut SysDirEntry) -> i32 {
    if fd < 0 || out.is_null() {
        return errno::EINVAL;
    }
    match fs::with_vfs(|vfs| vfs.readdir(fd as usize)) {
        Ok(Some(entry)) => {
            let mut name = [0u8; 64];
            let n = entry.name.len().min(64);
            name[..n].copy_from_slice(&entry.name.as_bytes()[..n]);
            // SAFETY: `out` is caller-owned per the ABI contract.
            unsafe {
                out.write(SysDirEntry {
                    name,
                    name_len: n as u32,
                    size: entry.size as u32,
                    kind: kind_code(entry.kind),
                });
            }
            1
        }
        Ok(None) => 0,
        Err(e) => fs_errno(e),
    }
}

extern "C" fn sys_stat(ptr: *const u8, len: usize, out: *mut SysStat) -> i32 {
    // SAFETY: ABI contract.
    let Some(path) = (unsafe { user_str(ptr, len) }) else {
        return errno::EINVAL;
    };
    if out.is_null() {
        return errno::EINVAL;
    }
    match fs::with_vfs(|vfs| vfs.stat(path)) {
        Ok(stat) => {
            // SAFETY: `out` is caller-owned per the ABI contract.
            unsafe {
                out.write(SysStat {
                    size: stat.size as u32,
                    kind: kind_code(stat.kind),
                });
            }
            0
        }
        Err(e) => fs_errno(e),
    }
}

extern "C" fn sys_mkdir(ptr: *const u8, len: usize) -> i32 {
    // SAFETY: ABI contract.
    let Some(path) = (unsafe { user_str(ptr, len) }) else {
        return errno::EINVAL;
    };
    match fs::with_vfs(|vfs| vfs.mkdir(path)) {
        Ok(()) => 0,
        Err(e) => fs_errno(e),
    }
}

extern "C" fn sys_unlink(ptr: *const u8, len: usize) -> i32 {
    // SAFETY: ABI contract.
    let Some(path) = (unsafe { user_str(ptr, len) }) else {
        return errno::EINVAL;
    };
    match fs::with_vfs(|vfs| vfs.unlink(path)) {
        Ok(()) => 0,
        Err(e) => fs_errno(e),
    }
}

extern "C" fn sys_rename(old: *const u8, old_len: usize, new: *const u8, new_len: usize) -> i32 {
    // SAFETY: ABI contract.
    let (Some(old), Some(new)) = (unsafe { user_str(old, old_len) }, unsafe {
        user_str(new, new_len)
    }) else {
        return errno::EINVAL;
    };
    match fs::with_vfs(|vfs| vfs.rename(old, new)) {
        Ok(()) => 0,
        Err(e) => fs_errno(e),
    }
}

extern "C" fn sys_copy(src: *const u8, src_len: usize, dst: *const u8, dst_len: usize) -> i32 {
    // SAFETY: ABI contract.
    let (Some(src), Some(dst)) = (unsafe { user_str(src, src_len) }, unsafe {
        user_str(dst, dst_len)
    }) else {
        return errno::EINVAL;
    };
    let result = fs::with_vfs(|vfs| {
        let text = vfs.read_text(src)?;
        vfs.write_text(dst, &text)
    });
    match result {
        Ok(()) => 0,
        Err(e) => fs_errno(e),
    }
}

// ---------------------------------------------------------------------------
// process
// ---------------------------------------------------------------------------

extern "C" fn sys_yield() {
    crate::sched::yield_now();
}

extern "C" fn sys_exit(code: i32) -> ! {
    crate::sched::exit(code);
    // The exit path only falls through when the scheduler refuses (idle
    // thread); there is nothing sensible left to do but spin.
    loop {
        crate::arch::halt();
    }
}

extern "C" fn sys_exec(ptr: *const u8, len: usize) -> i32 {
    // SAFETY: ABI contract.
    let Some(path) = (unsafe { user_str(ptr, len) }) else {
        return errno::EINVAL;
    };
    let image = match fs::with_vfs(|vfs| {
        let fd = vfs.open(path, OpenFlags::RDONLY)?;
        let mut bytes = alloc::vec::Vec::new();
        let mut buf = [0u8; 512];
        loop {
            match vfs.read(fd, &mut buf) {
                Ok(0) => break,
                Ok(n) => bytes.extend_from_slice(&buf[..n]),
                Err(e) => {
                    let _ = vfs.close(fd);
                    return Err(e);
                }
            }
        }
        vfs.close(fd)?;
        Ok(bytes)
    }) {
        Ok(bytes) => bytes,
        Err(e) => return fs_errno(e),
    };
    let name = path.rsplit('/').next().unwrap_or(path);
    match crate::loader::spawn(&image, name) {
        Ok(pid) => pid.as_u32() as i32,
        Err(_) => errno::EIO,
    }
}

extern "C" fn sys_kill(pid: u32) -> i32 {
    match crate::sched::kill(ProcessId(pid)) {
        Ok(()) => 0,
        Err(_) => errno::EINVAL,
    }
}

extern "C" fn sys_getpid() -> u32 {
    crate::sched::current_pid().as_u32()
}

// ---------------------------------------------------------------------------
// graphics and widgets
// ---------------------------------------------------------------------------

extern "C" fn sys_fill_rect(x: i32, y: i32, w: u32, h: u32, color: u32) {
    with_framebuffer(|fb| fb.fill_rect(Rect::new(x, y, w, h), Color(color)));
}

extern "C" fn sys_draw_pixel(x: i32, y: i32, color: u32) {
    with_framebuffer(|fb| fb.draw_pixel(x, y, Color(color)));
}

extern "C" fn sys_flip() {
    with_framebuffer(|fb| fb.flip());
}

extern "C" fn sys_widget_button(x: i32, y: i32, w: u32, h: u32, pressed: u32) {
    with_framebuffer(|fb| {
        let face = if pressed != 0 {
            Color::rgb(0x70, 0x70, 0x70)
        } else {
            Color::rgb(0xA0, 0xA0, 0xA0)
        };
        fb.fill_rect(Rect::new(x, y, w, h), face);
        fb.draw_rect(Rect::new(x, y, w, h), Color::BLACK);
    });
}

// ---------------------------------------------------------------------------
// dialogs
// ---------------------------------------------------------------------------

extern "C" fn sys_dialog_message(ptr: *const u8, len: usize) -> i32 {
    // SAFETY: ABI contract.
    let Some(text) = (unsafe { user_str(ptr, len) }) else {
        return errno::EINVAL;
    };
    crate::desktop::dialogs::message(text);
    0
}

extern "C" fn sys_dialog_confirm(ptr: *const u8, len: usize) -> i32 {
    // SAFETY: ABI contract.
    let Some(text) = (unsafe { user_str(ptr, len) }) else {
        return errno::EINVAL;
    };
    match crate::desktop::dialogs::confirm(text) {
        crate::desktop::dialogs::DialogResult::Confirmed => 1,
        _ => 0,
    }
}

fn copy_out(text: &str, out: *mut u8, cap: usize) -> i32 {
    let n = text.len().min(cap);
    // SAFETY: `out` is caller-owned with capacity `cap` per the ABI.
    unsafe {
        core::ptr::copy_nonoverlapping(text.as_ptr(), out, n);
    }
    n as i32
}

extern "C" fn sys_dialog_input(prompt: *const u8, len: usize, out: *mut u8, cap: usize) -> i32 {
    // SAFETY: ABI contract.
    let Some(prompt) = (unsafe { user_str(prompt, len) }) else {
        return errno::EINVAL;
    };
    if out.is_null() {
        return errno::EINVAL;
    }
    match crate::desktop::dialogs::input(prompt) {
        crate::desktop::dialogs::DialogResult::Text(text) => copy_out(&text, out, cap),
        _ => -1,
    }
}

extern "C" fn sys_dialog_open_file(dir: *const u8, len: usize, out: *mut u8, cap: usize) -> i32 {
    // SAFETY: ABI contract.
    let Some(dir) = (unsafe { user_str(dir, len) }) else {
        return errno::EINVAL;
    };
    if out.is_null() {
        return errno::EINVAL;
    }
    match crate::desktop::dialogs::open_file(dir) {
        crate::desktop::dialogs::DialogResult::Text(name) => copy_out(&name, out, cap),
        _ => -1,
    }
}

// ---------------------------------------------------------------------------
// time and shell state
// ---------------------------------------------------------------------------

extern "C" fn sys_uptime_ms() -> u64 {
    crate::timer::uptime_ms()
}

extern "C" fn sys_rtc_now(out: *mut SysDateTime) {
    if out.is_null() {
        return;
    }
    let now = rtc::now();
    // SAFETY: `out` is caller-owned per the ABI contract.
    unsafe {
        out.write(SysDateTime {
            year: now.year,
            month: now.month,
            day: now.day,
            hour: now.hour,
            minute: now.minute,
            second: now.second,
        });
    }
}

extern "C" fn sys_get_cwd(out: *mut u8, cap: usize) -> usize {
    if out.is_null() {
        return 0;
    }
    let cwd = shell::cwd();
    copy_out(&cwd, out, cap) as usize
}

extern "C" fn sys_set_cwd(ptr: *const u8, len: usize) -> i32 {
    // SAFETY: ABI contract.
    let Some(path) = (unsafe { user_str(ptr, len) }) else {
        return errno::EINVAL;
    };
    match fs::with_vfs(|vfs| vfs.stat(path)) {
        Ok(stat) if stat.is_dir() => {
            shell::set_cwd(path);
            0
        }
        Ok(_) => errno::ENOTDIR,
        Err(e) => fs_errno(e),
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::fs::ramfs::RamFs;
    use alloc::sync::Arc;

    fn ensure_root() {
        fs::with_vfs(|vfs| {
            let _ = vfs.mount("/", Arc::new(RamFs::new()));
        });
    }

    #[test]
    fn test_table_pointer_stable() {
        assert_eq!(table_ptr(), table_ptr());
        assert!(!table_ptr().is_null());
    }

    #[test]
    fn test_open_missing_returns_enoent_kind() {
        ensure_root();
        let path = b"/no/such";
        let fd = sys_open(path.as_ptr(), path.len(), OpenFlags::RDONLY.bits());
        assert_eq!(fd, errno::ENOENT);
    }

    #[test]
    fn test_write_read_roundtrip_through_table() {
        ensure_root();
        let path = b"/sys_t1.txt";
        let flags = OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC;
        let fd = sys_open(path.as_ptr(), path.len(), flags.bits());
        assert!(fd >= 0);
        let data = b"via the table";
        assert_eq!(sys_write(fd, data.as_ptr(), data.len()), data.len() as i32);
        assert_eq!(sys_close(fd), 0);

        let fd = sys_open(path.as_ptr(), path.len(), OpenFlags::RDONLY.bits());
        assert!(fd >= 0);
        let mut buf = [0u8; 32];
        let n = sys_read(fd, buf.as_mut_ptr(), buf.len());
        assert_eq!(&buf[..n as usize], data);
        assert_eq!(sys_close(fd), 0);
        assert_eq!(sys_close(fd), errno::EINVAL);
    }

    #[test]
    fn test_stat_and_errno_mapping() {
        ensure_root();
        let path = b"/sys_missing";
        let mut stat = SysStat { size: 0, kind: 0 };
        assert_eq!(
            sys_stat(path.as_ptr(), path.len(), &mut stat),
            errno::ENOENT
        );
        assert_eq!(fs_errno(FsError::IsDir), errno::EISDIR);
        assert_eq!(fs_errno(FsError::MFile), errno::EMFILE);
    }

    #[test]
    fn test_bad_pointers_are_einval() {
        assert_eq!(
            sys_open(core::ptr::null(), 4, OpenFlags::RDONLY.bits()),
            errno::EINVAL
        );
        assert_eq!(sys_read(-1, core::ptr::null_mut(), 0), errno::EINVAL);
        assert_eq!(sys_close(-3), errno::EINVAL);
    }

    #[test]
    fn test_getpid_before_scheduler() {
        // The global scheduler is not started in unit tests: PID 0.
        assert_eq!(sys_getpid(), 0);
    }
}
