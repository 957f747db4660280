//! Virtual filesystem layer.
//!
//! A mount table with longest-prefix resolution in front of per-filesystem
//! vtables. Filesystems implement [`FileSystem`] and hand out opaque
//! [`FileHandle`] objects; operations a filesystem does not support fall
//! through to `NoSys` defaults. The descriptor table and the generic
//! copy-then-unlink rename live here too.

pub mod blockdev;
pub mod devfs;
pub mod fat;
pub mod file;
pub mod ramfs;

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;

use bitflags::bitflags;
use spin::Mutex;

use crate::config::MAX_MOUNTS;
use crate::error::{FsError, FsResult};

pub use file::{Fd, FileTable};

/// Maximum filename length in a directory entry.
pub const NAME_MAX: usize = 64;

bitflags! {
    /// Open flags. Bit values are the user ABI and must not change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0x0001;
        const WRONLY = 0x0002;
        const RDWR   = 0x0003;
        const CREAT  = 0x0100;
        const TRUNC  = 0x0200;
        const APPEND = 0x0400;
    }
}

impl OpenFlags {
    pub fn readable(&self) -> bool {
        self.contains(OpenFlags::RDONLY) || self.contains(OpenFlags::RDWR)
    }

    pub fn writable(&self) -> bool {
        self.contains(OpenFlags::WRONLY) || self.contains(OpenFlags::RDWR)
    }
}

/// Seek origin.
#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    Start(usize),
    Current(isize),
    End(isize),
}

/// Directory entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    Device,
}

/// One directory entry as returned by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: usize,
    pub kind: NodeKind,
}

/// Stat result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: usize,
    pub kind: NodeKind,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// An open file or directory, owned by the filesystem that created it.
pub trait FileHandle: Send {
    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize>;

    fn write(&mut self, _data: &[u8]) -> FsResult<usize> {
        Err(FsError::NoSys)
    }

    fn seek(&mut self, _from: SeekFrom) -> FsResult<usize> {
        Err(FsError::NoSys)
    }

    /// Next directory entry, `None` at the end.
    fn readdir(&mut self) -> FsResult<Option<DirEntry>> {
        Err(FsError::NoSys)
    }

    /// Release filesystem-side state. Called exactly once by the
    /// descriptor table; must be safe to call on a partially initialized
    /// handle.
    fn close(&mut self) -> FsResult<()> {
        Ok(())
    }
}

impl core::fmt::Debug for dyn FileHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("<dyn FileHandle>")
    }
}

/// Filesystem operations vtable. Relative paths never start with `/`;
/// the empty path names the filesystem root.
pub trait FileSystem: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, relpath: &str, flags: OpenFlags) -> FsResult<Box<dyn FileHandle>>;

    fn stat(&self, _relpath: &str) -> FsResult<FileStat> {
        Err(FsError::NoSys)
    }

    fn mkdir(&self, _relpath: &str) -> FsResult<()> {
        Err(FsError::NoSys)
    }

    fn unlink(&self, _relpath: &str) -> FsResult<()> {
        Err(FsError::NoSys)
    }

    /// Flush filesystem state to its backing store.
    fn sync(&self) -> FsResult<()> {
        Ok(())
    }
}

impl core::fmt::Debug for dyn FileSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("<dyn FileSystem>")
    }
}

/// One mount table entry.
struct MountEntry {
    path: String,
    fs: Arc<dyn FileSystem>,
}

/// The VFS: mount table plus descriptor table.
pub struct Vfs {
    mounts: [Option<MountEntry>; MAX_MOUNTS],
    files: FileTable,
}

impl Vfs {
    pub const fn new() -> Self {
        Self {
            mounts: [const { None }; MAX_MOUNTS],
            files: FileTable::new(),
        }
    }

    /// Mount a filesystem at an absolute path. At most one mount per
    /// exact path; mount paths carry no trailing slash except the root.
    pub fn mount(&mut self, path: &str, fs: Arc<dyn FileSystem>) -> FsResult<()> {
        if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) {
            return Err(FsError::Inval);
        }
        if self
            .mounts
            .iter()
            .flatten()
            .any(|m| m.path == path)
        {
            return Err(FsError::Inval);
        }
        let slot = self
            .mounts
            .iter_mut()
            .find(|m| m.is_none())
            .ok_or(FsError::NoSpc)?;
        *slot = Some(MountEntry {
            path: path.to_string(),
            fs,
        });
        Ok(())
    }

    /// Unmount the filesystem at an exact path.
    pub fn unmount(&mut self, path: &str) -> FsResult<()> {
        for slot in self.mounts.iter_mut() {
            if slot.as_ref().is_some_and(|m| m.path == path) {
                if let Some(entry) = slot.take() {
                    let _ = entry.fs.sync();
                }
                return Ok(());
            }
        }
        Err(FsError::NoEnt)
    }

    /// Longest-prefix mount resolution. Returns the filesystem and the
    /// relative path with its single leading `/` stripped.
    pub fn resolve(&self, path: &str) -> FsResult<(Arc<dyn FileSystem>, String)> {
        if !path.starts_with('/') {
            return Err(FsError::Inval);
        }
        let mut best: Option<&MountEntry> = None;
        for entry in self.mounts.iter().flatten() {
            let matches = if entry.path == "/" {
                true
            } else {
                path == entry.path
                    || (path.starts_with(entry.path.as_str())
                        && path.as_bytes().get(entry.path.len()) == Some(&b'/'))
            };
            if matches && best.is_none_or(|b| entry.path.len() > b.path.len()) {
                best = Some(entry);
            }
        }
        let entry = best.ok_or(FsError::NoEnt)?;
        let rest = if entry.path == "/" {
            &path[1..]
        } else {
            path[entry.path.len()..].trim_start_matches('/')
        };
        Ok((entry.fs.clone(), rest.to_string()))
    }

    // -- descriptor-table front end ------------------------------------

    pub fn open(&mut self, path: &str, flags: OpenFlags) -> FsResult<Fd> {
        let (fs, rel) = self.resolve(path)?;
        let handle = fs.open(&rel, flags)?;
        self.files.install(handle, flags)
    }

    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> FsResult<usize> {
        self.files.read(fd, buf)
    }

    pub fn write(&mut self, fd: Fd, data: &[u8]) -> FsResult<usize> {
        self.files.write(fd, data)
    }

    pub fn seek(&mut self, fd: Fd, from: SeekFrom) -> FsResult<usize> {
        self.files.seek(fd, from)
    }

    pub fn readdir(&mut self, fd: Fd) -> FsResult<Option<DirEntry>> {
        self.files.readdir(fd)
    }

    pub fn close(&mut self, fd: Fd) -> FsResult<()> {
        self.files.close(fd)
    }

    pub fn stat(&self, path: &str) -> FsResult<FileStat> {
        let (fs, rel) = self.resolve(path)?;
        fs.stat(&rel)
    }

    pub fn mkdir(&self, path: &str) -> FsResult<()> {
        let (fs, rel) = self.resolve(path)?;
        fs.mkdir(&rel)
    }

    pub fn unlink(&self, path: &str) -> FsResult<()> {
        let (fs, rel) = self.resolve(path)?;
        fs.unlink(&rel)
    }

    /// Generic rename: copy then unlink. Never renames directories. On a
    /// short copy the destination is removed so no truncated file is left
    /// behind; the source is only unlinked after a complete copy.
    pub fn rename(&mut self, old: &str, new: &str) -> FsResult<()> {
        let stat = self.stat(old)?;
        if stat.is_dir() {
            return Err(FsError::IsDir);
        }

        let src = self.open(old, OpenFlags::RDONLY)?;
        let dst = match self.open(
            new,
            OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC,
        ) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = self.close(src);
                return Err(e);
            }
        };

        let mut copied = 0usize;
        let mut buf = vec![0u8; 512];
        let result = loop {
            match self.read(src, &mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => match self.write(dst, &buf[..n]) {
                    Ok(w) if w == n => copied += n,
                    Ok(_) => break Err(FsError::Io),
                    Err(e) => break Err(e),
                },
                Err(e) => break Err(e),
            }
        };
        let _ = self.close(src);
        let close_dst = self.close(dst);

        if result.is_err() || close_dst.is_err() || copied != stat.size {
            let _ = self.unlink(new);
            return Err(result.err().or(close_dst.err()).unwrap_or(FsError::Io));
        }

        // Both files exist and match; only now may the source go away. A
        // failure here must surface even though the copy succeeded.
        self.unlink(old)
    }

    /// Read a whole file as a string.
    pub fn read_text(&mut self, path: &str) -> FsResult<String> {
        let fd = self.open(path, OpenFlags::RDONLY)?;
        let mut out = alloc::vec::Vec::new();
        let mut buf = [0u8; 512];
        loop {
            match self.read(fd, &mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) => {
                    let _ = self.close(fd);
                    return Err(e);
                }
            }
        }
        self.close(fd)?;
        String::from_utf8(out).map_err(|_| FsError::Io)
    }

    /// Write a whole file from a string, creating or truncating it.
    pub fn write_text(&mut self, path: &str, text: &str) -> FsResult<()> {
        let fd = self.open(
            path,
            OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC,
        )?;
        let mut written = 0;
        let data = text.as_bytes();
        while written < data.len() {
            match self.write(fd, &data[written..]) {
                Ok(0) => {
                    let _ = self.close(fd);
                    return Err(FsError::NoSpc);
                }
                Ok(n) => written += n,
                Err(e) => {
                    let _ = self.close(fd);
                    return Err(e);
                }
            }
        }
        self.close(fd)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

/// Global VFS instance.
pub static VFS: Mutex<Vfs> = Mutex::new(Vfs::new());

/// Convenience wrappers over the global VFS.
pub fn with_vfs<R, F: FnOnce(&mut Vfs) -> R>(f: F) -> R {
    f(&mut VFS.lock())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::ramfs::RamFs;
    use super::*;

    fn vfs_with_mounts() -> Vfs {
        let mut vfs = Vfs::new();
        vfs.mount("/", Arc::new(RamFs::new())).expect("root mount");
        vfs.mount("/home", Arc::new(RamFs::new())).expect("home mount");
        vfs.mount("/home/sub", Arc::new(RamFs::new()))
            .expect("nested mount");
        vfs
    }

    #[test]
    fn test_longest_prefix_resolution() {
        let vfs = vfs_with_mounts();

        let (fs, rel) = vfs.resolve("/home/t.txt").expect("resolves");
        assert_eq!(fs.name(), "ramfs");
        assert_eq!(rel, "t.txt");

        let (_, rel) = vfs.resolve("/home/sub/deep/x").expect("resolves");
        assert_eq!(rel, "deep/x");

        // "/homework" must not match the "/home" mount.
        let (_, rel) = vfs.resolve("/homework").expect("root catches it");
        assert_eq!(rel, "homework");

        // Exact mount path resolves to the filesystem root.
        let (_, rel) = vfs.resolve("/home").expect("resolves");
        assert_eq!(rel, "");
    }

    #[test]
    fn test_relative_paths_rejected() {
        let vfs = vfs_with_mounts();
        assert_eq!(vfs.resolve("home/t.txt").unwrap_err(), FsError::Inval);
    }

    #[test]
    fn test_duplicate_mount_rejected() {
        let mut vfs = vfs_with_mounts();
        assert_eq!(
            vfs.mount("/home", Arc::new(RamFs::new())).unwrap_err(),
            FsError::Inval
        );
        assert_eq!(
            vfs.mount("/bad/", Arc::new(RamFs::new())).unwrap_err(),
            FsError::Inval
        );
    }

    #[test]
    fn test_write_read_roundtrip() {
        let mut vfs = vfs_with_mounts();
        vfs.write_text("/home/t.txt", "hello\n").expect("write");
        assert_eq!(vfs.read_text("/home/t.txt").expect("read"), "hello\n");
    }

    #[test]
    fn test_open_missing_is_noent() {
        let mut vfs = vfs_with_mounts();
        assert_eq!(
            vfs.open("/no/such", OpenFlags::RDONLY).unwrap_err(),
            FsError::NoEnt
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut vfs = vfs_with_mounts();
        vfs.write_text("/a.txt", "x").expect("write");
        let fd = vfs.open("/a.txt", OpenFlags::RDONLY).expect("open");
        vfs.close(fd).expect("first close succeeds");
        assert_eq!(vfs.close(fd).unwrap_err(), FsError::Inval);
    }

    #[test]
    fn test_rename_moves_contents() {
        let mut vfs = vfs_with_mounts();
        vfs.write_text("/home/a.txt", "payload").expect("write");
        vfs.rename("/home/a.txt", "/home/b.txt").expect("rename");

        assert_eq!(vfs.read_text("/home/b.txt").expect("read"), "payload");
        assert_eq!(vfs.stat("/home/a.txt").unwrap_err(), FsError::NoEnt);
    }

    #[test]
    fn test_rename_across_mounts() {
        let mut vfs = vfs_with_mounts();
        vfs.write_text("/home/a.txt", "cross").expect("write");
        vfs.rename("/home/a.txt", "/notes.txt").expect("rename");
        assert_eq!(vfs.read_text("/notes.txt").expect("read"), "cross");
    }

    #[test]
    fn test_rename_directory_refused() {
        let mut vfs = vfs_with_mounts();
        vfs.mkdir("/home/d").expect("mkdir");
        assert_eq!(
            vfs.rename("/home/d", "/home/e").unwrap_err(),
            FsError::IsDir
        );
    }

    #[test]
    fn test_absent_op_maps_to_nosys() {
        let mut vfs = vfs_with_mounts();
        vfs.mount("/dev", Arc::new(super::devfs::DevFs::new()))
            .expect("dev mount");
        // devfs implements no mkdir/unlink: the default vtable slots answer.
        assert_eq!(vfs.mkdir("/dev/sub").unwrap_err(), FsError::NoSys);
        assert_eq!(vfs.unlink("/dev/null").unwrap_err(), FsError::NoSys);
    }

    #[test]
    fn test_rename_missing_source() {
        let mut vfs = vfs_with_mounts();
        assert_eq!(
            vfs.rename("/home/ghost", "/home/b").unwrap_err(),
            FsError::NoEnt
        );
    }
}
