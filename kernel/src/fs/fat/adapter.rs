//! FAT16 VFS adapter.
//!
//! Translates the driver's whole-file write model into VFS semantics.
//! Writes never touch the driver directly: they accumulate in a growing
//! buffer and are flushed on close, with the previous on-disk contents
//! captured as a backup first. A failed flush restores the backup; a
//! failed restore is the one place the adapter can lose data, and it says
//! so loudly.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::driver::Fat16Volume;
use crate::error::{FsError, FsResult};
use crate::fs::blockdev::BlockDevice;
use crate::fs::{DirEntry, FileHandle, FileStat, FileSystem, NodeKind, OpenFlags, SeekFrom};

/// FAT16 filesystem mounted into the VFS.
pub struct FatFs<D: BlockDevice> {
    volume: Arc<Mutex<Fat16Volume<D>>>,
}

impl<D: BlockDevice> FatFs<D> {
    pub fn new(volume: Fat16Volume<D>) -> Self {
        Self {
            volume: Arc::new(Mutex::new(volume)),
        }
    }
}

// ---------------------------------------------------------------------------
// Write buffer
// ---------------------------------------------------------------------------

/// Round a byte count up to a whole number of sectors.
fn round_to_sector(bytes: usize) -> usize {
    bytes.div_ceil(512) * 512
}

/// Capacity growth rule: double, then round the request up to a 512-byte
/// multiple.
pub(crate) fn grow_capacity(current: usize, needed: usize) -> usize {
    round_to_sector(needed.max(current * 2))
}

/// Append-only accumulation buffer for buffered writes.
struct WriteBuffer {
    data: Vec<u8>,
    capacity: usize,
    grow_count: u32,
}

impl WriteBuffer {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            capacity: 0,
            grow_count: 0,
        }
    }

    fn from_existing(data: Vec<u8>) -> Self {
        let capacity = round_to_sector(data.len());
        Self {
            data,
            capacity,
            grow_count: 0,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        let needed = self.data.len() + bytes.len();
        if needed > self.capacity {
            self.capacity = grow_capacity(self.capacity, needed);
            self.grow_count += 1;
            self.data.reserve_exact(self.capacity - self.data.len());
        }
        self.data.extend_from_slice(bytes);
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

struct FatReadHandle<D: BlockDevice> {
    volume: Arc<Mutex<Fat16Volume<D>>>,
    file: super::driver::FatFile,
    pos: u32,
}

impl<D: BlockDevice + 'static> FileHandle for FatReadHandle<D> {
    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let n = self.volume.lock().read_file(&self.file, self.pos, buf)?;
        self.pos += n as u32;
        Ok(n)
    }

    fn seek(&mut self, from: SeekFrom) -> FsResult<usize> {
        self.pos = clamp_seek(from, self.pos as usize, self.file.size as usize)? as u32;
        Ok(self.pos as usize)
    }
}

struct FatWriteHandle<D: BlockDevice> {
    volume: Arc<Mutex<Fat16Volume<D>>>,
    path: String,
    buffer: WriteBuffer,
    pos: usize,
    dirty: bool,
    flushed: bool,
}

impl<D: BlockDevice> FatWriteHandle<D> {
    /// Flush the buffered payload: capture the on-disk contents as a
    /// backup, delete, write the new payload, and roll the backup in when
    /// the write comes up short.
    fn flush(&mut self) -> FsResult<()> {
        let mut vol = self.volume.lock();

        let backup: Option<Vec<u8>> = match vol.open_file(&self.path) {
            Ok(file) => {
                let mut old = alloc::vec![0u8; file.size as usize];
                match vol.read_file(&file, 0, &mut old) {
                    Ok(n) if n == old.len() => Some(old),
                    _ => None,
                }
            }
            Err(_) => None,
        };

        let _ = vol.delete(&self.path);

        match vol.write_file(&self.path, &self.buffer.data) {
            Ok(n) if n == self.buffer.len() => Ok(()),
            _ => {
                // Clear any partial state before restoring.
                let _ = vol.delete(&self.path);
                match backup {
                    Some(old) => match vol.write_file(&self.path, &old) {
                        Ok(n) if n == old.len() => {
                            log::warn!(
                                target: "fat",
                                "flush of {} failed, previous contents restored",
                                self.path
                            );
                            Err(FsError::Io)
                        }
                        _ => {
                            log::error!(
                                target: "fat",
                                "CRITICAL: flush of {} failed and backup restore failed, file lost",
                                self.path
                            );
                            Err(FsError::Io)
                        }
                    },
                    None => {
                        log::error!(
                            target: "fat",
                            "CRITICAL: flush of {} failed with no captured backup",
                            self.path
                        );
                        Err(FsError::Io)
                    }
                }
            }
        }
    }
}

impl<D: BlockDevice + 'static> FileHandle for FatWriteHandle<D> {
    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        // Reads on a write handle observe the buffered contents.
        let data = &self.buffer.data;
        if self.pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        self.buffer.push(data);
        self.pos = self.buffer.len();
        self.dirty = true;
        Ok(data.len())
    }

    fn seek(&mut self, from: SeekFrom) -> FsResult<usize> {
        self.pos = clamp_seek(from, self.pos, self.buffer.len())?;
        Ok(self.pos)
    }

    fn close(&mut self) -> FsResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        if !self.dirty {
            return Ok(());
        }
        self.flush()
    }
}

/// Seek with the position clamped to `[0, size]`.
fn clamp_seek(from: SeekFrom, pos: usize, size: usize) -> FsResult<usize> {
    let target = match from {
        SeekFrom::Start(p) => p as isize,
        SeekFrom::Current(d) => pos as isize + d,
        SeekFrom::End(d) => size as isize + d,
    };
    Ok(target.clamp(0, size as isize) as usize)
}

struct FatDirHandle {
    entries: Vec<DirEntry>,
    next: usize,
}

impl FileHandle for FatDirHandle {
    fn read(&mut self, _buf: &mut [u8]) -> FsResult<usize> {
        Err(FsError::IsDir)
    }

    fn readdir(&mut self) -> FsResult<Option<DirEntry>> {
        let entry = self.entries.get(self.next).cloned();
        if entry.is_some() {
            self.next += 1;
        }
        Ok(entry)
    }
}

/// Sort a directory snapshot: `..` pinned first, then directories, then
/// files, alphabetical case-insensitive within each group.
fn sort_snapshot(entries: &mut [DirEntry]) {
    entries.sort_by(|a, b| {
        let rank = |e: &DirEntry| match (e.name.as_str(), e.kind) {
            ("..", _) => 0u8,
            (_, NodeKind::Directory) => 1,
            _ => 2,
        };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| {
                let an = a.name.to_ascii_lowercase();
                let bn = b.name.to_ascii_lowercase();
                an.cmp(&bn)
            })
    });
}

// ---------------------------------------------------------------------------
// FileSystem impl
// ---------------------------------------------------------------------------

impl<D: BlockDevice + 'static> FileSystem for FatFs<D> {
    fn name(&self) -> &'static str {
        "fat16"
    }

    fn open(&self, relpath: &str, flags: OpenFlags) -> FsResult<Box<dyn FileHandle>> {
        let rel = relpath.trim_matches('/').to_string();

        // Directories (including the root) open as sorted snapshots.
        let is_dir = {
            let mut vol = self.volume.lock();
            rel.is_empty()
                || rel == "."
                || vol.stat_path(&rel).map(|e| e.is_dir()).unwrap_or(false)
        };
        if is_dir {
            let rel = if rel == "." { String::new() } else { rel };
            let raw = self.volume.lock().list_dir(&rel)?;
            let mut entries: Vec<DirEntry> = raw
                .into_iter()
                .map(|e| DirEntry {
                    kind: if e.is_dir() {
                        NodeKind::Directory
                    } else {
                        NodeKind::File
                    },
                    size: e.size as usize,
                    name: e.name,
                })
                .collect();
            sort_snapshot(&mut entries);
            return Ok(Box::new(FatDirHandle { entries, next: 0 }));
        }

        if flags.writable() {
            let mut vol = self.volume.lock();
            let exists = vol.exists(&rel);
            if !exists && !flags.contains(OpenFlags::CREAT) {
                return Err(FsError::NoEnt);
            }
            if exists && flags.contains(OpenFlags::TRUNC) {
                vol.delete(&rel)?;
                vol.write_file(&rel, &[])?;
            } else if !exists {
                vol.write_file(&rel, &[])?;
            }

            // Append mode starts from the current contents; everything
            // else starts from an empty buffer that replaces the file.
            let buffer = if flags.contains(OpenFlags::APPEND) && exists
                && !flags.contains(OpenFlags::TRUNC)
            {
                let file = vol.open_file(&rel)?;
                let mut old = alloc::vec![0u8; file.size as usize];
                let n = vol.read_file(&file, 0, &mut old)?;
                old.truncate(n);
                WriteBuffer::from_existing(old)
            } else {
                WriteBuffer::new()
            };

            let pos = buffer.len();
            return Ok(Box::new(FatWriteHandle {
                volume: self.volume.clone(),
                path: rel,
                buffer,
                pos,
                dirty: false,
                flushed: false,
            }));
        }

        let file = self.volume.lock().open_file(&rel)?;
        Ok(Box::new(FatReadHandle {
            volume: self.volume.clone(),
            file,
            pos: 0,
        }))
    }

    fn stat(&self, relpath: &str) -> FsResult<FileStat> {
        let entry = self.volume.lock().stat_path(relpath)?;
        Ok(FileStat {
            size: entry.size as usize,
            kind: if entry.is_dir() {
                NodeKind::Directory
            } else {
                NodeKind::File
            },
        })
    }

    fn mkdir(&self, relpath: &str) -> FsResult<()> {
        self.volume.lock().make_dir(relpath)
    }

    fn unlink(&self, relpath: &str) -> FsResult<()> {
        self.volume.lock().delete(relpath)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::fs::blockdev::RamDisk;

    fn fatfs() -> FatFs<RamDisk> {
        FatFs::new(Fat16Volume::format(RamDisk::new(4096)).expect("format"))
    }

    fn write_all(fs: &FatFs<RamDisk>, path: &str, data: &[u8]) -> FsResult<()> {
        let mut h = fs.open(path, OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC)?;
        h.write(data)?;
        h.close()
    }

    fn read_all(fs: &FatFs<RamDisk>, path: &str) -> FsResult<Vec<u8>> {
        let mut h = fs.open(path, OpenFlags::RDONLY)?;
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = h.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        h.close()?;
        Ok(out)
    }

    #[test]
    fn test_buffered_write_reaches_disk_on_close() {
        let fs = fatfs();
        let mut h = fs
            .open("t.txt", OpenFlags::WRONLY | OpenFlags::CREAT)
            .expect("open");
        h.write(b"hello ").expect("write");
        // Nothing on disk until close.
        assert_eq!(
            fs.stat("t.txt").expect("created empty on open").size,
            0,
            "writes must be buffered, not written through"
        );
        h.write(b"world").expect("write");
        h.close().expect("flush");

        assert_eq!(read_all(&fs, "t.txt").expect("read"), b"hello world");
    }

    #[test]
    fn test_large_write_grows_buffer_by_doubling() {
        let fs = fatfs();
        let payload: Vec<u8> = (0..70_000u32).map(|i| (i % 253) as u8).collect();
        // Write in chunks so the buffer must grow several times.
        let mut h = fs
            .open("big.bin", OpenFlags::WRONLY | OpenFlags::CREAT)
            .expect("open");
        for chunk in payload.chunks(4096) {
            h.write(chunk).expect("write");
        }
        h.close().expect("flush");

        assert_eq!(read_all(&fs, "big.bin").expect("read"), payload);
    }

    #[test]
    fn test_write_buffer_doubles_under_chunked_writes() {
        let mut buffer = WriteBuffer::new();
        for _ in 0..20 {
            buffer.push(&[0u8; 100]);
        }
        assert_eq!(buffer.len(), 2000);
        // 512 -> 1024 -> 2048: at least two doubling rounds happened.
        assert!(buffer.grow_count >= 2);
        assert!(buffer.capacity >= 2048);
        assert_eq!(buffer.capacity % 512, 0);
    }

    #[test]
    fn test_grow_capacity_doubles_then_rounds() {
        assert_eq!(grow_capacity(0, 7), 512);
        assert_eq!(grow_capacity(512, 513), 1024);
        assert_eq!(grow_capacity(1024, 1025), 2048);
        // A jump larger than double rounds the request itself.
        assert_eq!(grow_capacity(512, 70_000), 70_144);
        assert_eq!(70_144 % 512, 0);
    }

    #[test]
    fn test_creat_absent_creates_empty() {
        let fs = fatfs();
        let h = fs
            .open("new.txt", OpenFlags::WRONLY | OpenFlags::CREAT)
            .expect("open");
        drop(h);
        assert_eq!(fs.stat("new.txt").expect("exists").size, 0);
    }

    #[test]
    fn test_open_absent_without_creat() {
        let fs = fatfs();
        assert_eq!(
            fs.open("ghost.txt", OpenFlags::WRONLY).unwrap_err(),
            FsError::NoEnt
        );
        assert_eq!(
            fs.open("ghost.txt", OpenFlags::RDONLY).unwrap_err(),
            FsError::NoEnt
        );
    }

    #[test]
    fn test_append_keeps_existing_bytes() {
        let fs = fatfs();
        write_all(&fs, "log.txt", b"one\n").expect("write");
        let mut h = fs
            .open("log.txt", OpenFlags::WRONLY | OpenFlags::APPEND)
            .expect("open");
        h.write(b"two\n").expect("write");
        h.close().expect("flush");
        assert_eq!(read_all(&fs, "log.txt").expect("read"), b"one\ntwo\n");
    }

    #[test]
    fn test_directory_snapshot_sorted_dirs_first() {
        let fs = fatfs();
        write_all(&fs, "zeta.txt", b"z").expect("write");
        write_all(&fs, "alpha.txt", b"a").expect("write");
        fs.mkdir("music").expect("mkdir");
        fs.mkdir("docs").expect("mkdir");

        let mut dir = fs.open("", OpenFlags::RDONLY).expect("open root");
        let mut names = Vec::new();
        while let Some(e) = dir.readdir().expect("readdir") {
            names.push(e.name);
        }
        assert_eq!(names, vec!["DOCS", "MUSIC", "ALPHA.TXT", "ZETA.TXT"]);
    }

    #[test]
    fn test_subdir_snapshot_pins_dotdot() {
        let fs = fatfs();
        fs.mkdir("sub").expect("mkdir");
        write_all(&fs, "sub/a.txt", b"a").expect("write");

        let mut dir = fs.open("sub", OpenFlags::RDONLY).expect("open");
        let first = dir.readdir().expect("readdir").expect("entry");
        assert_eq!(first.name, "..");
        let second = dir.readdir().expect("readdir").expect("entry");
        assert_eq!(second.name, "A.TXT");
    }

    #[test]
    fn test_seek_clamped_to_file_size() {
        let fs = fatfs();
        write_all(&fs, "s.txt", b"0123456789").expect("write");
        let mut h = fs.open("s.txt", OpenFlags::RDONLY).expect("open");
        assert_eq!(h.seek(SeekFrom::Start(9999)).expect("seek"), 10);
        assert_eq!(h.seek(SeekFrom::End(-4)).expect("seek"), 6);
        let mut buf = [0u8; 16];
        assert_eq!(h.read(&mut buf).expect("read"), 4);
        assert_eq!(&buf[..4], b"6789");
        assert_eq!(h.seek(SeekFrom::Current(-100)).expect("seek"), 0);
    }

    #[test]
    fn test_stat_probes_dirs_then_files() {
        let fs = fatfs();
        fs.mkdir("d").expect("mkdir");
        write_all(&fs, "f.txt", b"abc").expect("write");

        assert_eq!(fs.stat("d").expect("dir").kind, NodeKind::Directory);
        let f = fs.stat("f.txt").expect("file");
        assert_eq!(f.kind, NodeKind::File);
        assert_eq!(f.size, 3);
        assert_eq!(fs.stat("nope").unwrap_err(), FsError::NoEnt);
    }

    #[test]
    fn test_flush_failure_rolls_back() {
        let fs = fatfs();
        write_all(&fs, "r.txt", b"original").expect("first write");

        // Window sized to kill the first FAT write of the new payload:
        // the preceding delete costs exactly 3 writes (two FAT copies
        // plus the directory slot) for a one-cluster file. The rollback
        // writes land after the window and succeed.
        fs.volume.lock().device_mut().fail_write_window(3, 1);

        let mut h = fs
            .open("r.txt", OpenFlags::WRONLY | OpenFlags::CREAT)
            .expect("open");
        h.write(b"replacement that will not stick").expect("write");
        assert_eq!(h.close().unwrap_err(), FsError::Io);

        assert_eq!(
            read_all(&fs, "r.txt").expect("file still present"),
            b"original",
            "failed flush must restore the pre-flush contents"
        );
    }

    #[test]
    fn test_flush_failure_without_recovery_reports_io() {
        let fs = fatfs();
        write_all(&fs, "doomed.txt", b"contents").expect("first write");
        {
            let mut vol = fs.volume.lock();
            vol.device_mut().fail_write_window(3, 1_000_000);
        }
        let mut h = fs
            .open("doomed.txt", OpenFlags::WRONLY | OpenFlags::CREAT)
            .expect("open");
        h.write(b"new").expect("write");
        assert_eq!(h.close().unwrap_err(), FsError::Io);
    }

    #[test]
    fn test_unlink_delegates_to_driver() {
        let fs = fatfs();
        write_all(&fs, "gone.txt", b"x").expect("write");
        fs.unlink("gone.txt").expect("unlink");
        assert_eq!(fs.stat("gone.txt").unwrap_err(), FsError::NoEnt);
    }
}
