//! File descriptor table.
//!
//! Open handles are owned here. `open` hands out the smallest free index;
//! `close` releases the filesystem-side handle before clearing the slot
//! and is idempotent from the caller's point of view (a second close is
//! `Inval`, never corruption).

use alloc::boxed::Box;

use super::{DirEntry, FileHandle, OpenFlags, SeekFrom};
use crate::config::MAX_OPEN_FILES;
use crate::error::{FsError, FsResult};

/// File descriptor index.
pub type Fd = usize;

struct OpenFile {
    handle: Box<dyn FileHandle>,
    flags: OpenFlags,
    /// Byte position mirrored from the handle; monotonic except via seek.
    position: usize,
}

/// Fixed-size descriptor table.
pub struct FileTable {
    slots: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl FileTable {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_OPEN_FILES],
        }
    }

    /// Claim the smallest free descriptor for `handle`.
    pub fn install(&mut self, handle: Box<dyn FileHandle>, flags: OpenFlags) -> FsResult<Fd> {
        let fd = match self.slots.iter().position(|s| s.is_none()) {
            Some(fd) => fd,
            None => {
                // Descriptor table full: the handle must still be released.
                let mut handle = handle;
                let _ = handle.close();
                return Err(FsError::MFile);
            }
        };
        self.slots[fd] = Some(OpenFile {
            handle,
            flags,
            position: 0,
        });
        Ok(fd)
    }

    fn slot_mut(&mut self, fd: Fd) -> FsResult<&mut OpenFile> {
        self.slots
            .get_mut(fd)
            .and_then(|s| s.as_mut())
            .ok_or(FsError::Inval)
    }

    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> FsResult<usize> {
        let file = self.slot_mut(fd)?;
        if !file.flags.readable() {
            return Err(FsError::Inval);
        }
        let n = file.handle.read(buf)?;
        file.position += n;
        Ok(n)
    }

    pub fn write(&mut self, fd: Fd, data: &[u8]) -> FsResult<usize> {
        let file = self.slot_mut(fd)?;
        if !file.flags.writable() {
            return Err(FsError::Inval);
        }
        let n = file.handle.write(data)?;
        file.position += n;
        Ok(n)
    }

    pub fn seek(&mut self, fd: Fd, from: SeekFrom) -> FsResult<usize> {
        let file = self.slot_mut(fd)?;
        let pos = file.handle.seek(from)?;
        file.position = pos;
        Ok(pos)
    }

    pub fn readdir(&mut self, fd: Fd) -> FsResult<Option<DirEntry>> {
        self.slot_mut(fd)?.handle.readdir()
    }

    pub fn position(&self, fd: Fd) -> FsResult<usize> {
        self.slots
            .get(fd)
            .and_then(|s| s.as_ref())
            .map(|f| f.position)
            .ok_or(FsError::Inval)
    }

    /// Close a descriptor: release the handle, then clear the slot. The
    /// slot is cleared even when the filesystem-side close fails.
    pub fn close(&mut self, fd: Fd) -> FsResult<()> {
        let slot = self.slots.get_mut(fd).ok_or(FsError::Inval)?;
        match slot.take() {
            Some(mut file) => file.handle.close(),
            None => Err(FsError::Inval),
        }
    }

    /// Number of live descriptors.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}
