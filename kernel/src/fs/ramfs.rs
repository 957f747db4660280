//! RAM filesystem.
//!
//! Ephemeral tree over a path-keyed map: file contents in a `BTreeMap`,
//! directories as a set of relative paths. Backs `/notes` and any other
//! mount that should not survive a reboot.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use super::{DirEntry, FileHandle, FileStat, FileSystem, NodeKind, OpenFlags, SeekFrom};
use crate::error::{FsError, FsResult};

#[derive(Default)]
struct RamFsInner {
    /// File contents keyed by relative path.
    files: BTreeMap<String, Vec<u8>>,
    /// Directory relative paths. The root ("") is implicit.
    dirs: BTreeSet<String>,
}

impl RamFsInner {
    fn dir_exists(&self, rel: &str) -> bool {
        rel.is_empty() || self.dirs.contains(rel)
    }

    fn parent_of(rel: &str) -> &str {
        rel.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
    }

    /// Direct children of `rel`, files and directories.
    fn children(&self, rel: &str) -> Vec<DirEntry> {
        let prefix = if rel.is_empty() {
            String::new()
        } else {
            alloc::format!("{}/", rel)
        };
        let direct = |path: &str| -> Option<String> {
            let rest = path.strip_prefix(prefix.as_str())?;
            if rest.is_empty() || rest.contains('/') {
                None
            } else {
                Some(rest.to_string())
            }
        };

        let mut entries = Vec::new();
        for dir in self.dirs.iter() {
            if let Some(name) = direct(dir) {
                entries.push(DirEntry {
                    name,
                    size: 0,
                    kind: NodeKind::Directory,
                });
            }
        }
        for (path, data) in self.files.iter() {
            if let Some(name) = direct(path) {
                entries.push(DirEntry {
                    name,
                    size: data.len(),
                    kind: NodeKind::File,
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

/// In-memory filesystem instance.
pub struct RamFs {
    inner: Arc<RwLock<RamFsInner>>,
}

impl RamFs {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RamFsInner::default())),
        }
    }
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

struct RamFileHandle {
    inner: Arc<RwLock<RamFsInner>>,
    path: String,
    pos: usize,
    flags: OpenFlags,
}

impl FileHandle for RamFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        if !self.flags.readable() {
            return Err(FsError::Inval);
        }
        let inner = self.inner.read();
        let data = inner.files.get(&self.path).ok_or(FsError::NoEnt)?;
        if self.pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        if !self.flags.writable() {
            return Err(FsError::Inval);
        }
        let mut inner = self.inner.write();
        let file = inner.files.get_mut(&self.path).ok_or(FsError::NoEnt)?;
        if self.flags.contains(OpenFlags::APPEND) {
            self.pos = file.len();
        }
        let end = self.pos + data.len();
        if end > file.len() {
            file.resize(end, 0);
        }
        file[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(data.len())
    }

    fn seek(&mut self, from: SeekFrom) -> FsResult<usize> {
        let len = self
            .inner
            .read()
            .files
            .get(&self.path)
            .map(|d| d.len())
            .unwrap_or(0);
        let pos = match from {
            SeekFrom::Start(p) => p,
            SeekFrom::Current(d) => self
                .pos
                .checked_add_signed(d)
                .ok_or(FsError::Inval)?,
            SeekFrom::End(d) => len.checked_add_signed(d).ok_or(FsError::Inval)?,
        };
        self.pos = pos;
        Ok(pos)
    }
}

struct RamDirHandle {
    entries: Vec<DirEntry>,
    next: usize,
}

impl FileHandle for RamDirHandle {
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

impl FileSystem for RamFs {
    fn name(&self) -> &'static str {
        "ramfs"
    }

    fn open(&self, relpath: &str, flags: OpenFlags) -> FsResult<Box<dyn FileHandle>> {
        let rel = relpath.trim_matches('/');

        // Directories open as a pre-enumerated snapshot.
        if rel.is_empty() || rel == "." || self.inner.read().dir_exists(rel) {
            let rel = if rel == "." { "" } else { rel };
            let entries = self.inner.read().children(rel);
            return Ok(Box::new(RamDirHandle { entries, next: 0 }));
        }

        {
            let mut inner = self.inner.write();
            match inner.files.get_mut(rel) {
                Some(data) => {
                    if flags.contains(OpenFlags::TRUNC) && flags.writable() {
                        data.clear();
                    }
                }
                None => {
                    if !flags.contains(OpenFlags::CREAT) {
                        return Err(FsError::NoEnt);
                    }
                    if !inner.dir_exists(RamFsInner::parent_of(rel)) {
                        return Err(FsError::NoEnt);
                    }
                    inner.files.insert(rel.to_string(), Vec::new());
                }
            }
        }

        Ok(Box::new(RamFileHandle {
            inner: self.inner.clone(),
            path: rel.to_string(),
            pos: 0,
            flags,
        }))
    }

    fn stat(&self, relpath: &str) -> FsResult<FileStat> {
        let rel = relpath.trim_matches('/');
        let inner = self.inner.read();
        if rel.is_empty() || inner.dirs.contains(rel) {
            return Ok(FileStat {
                size: 0,
                kind: NodeKind::Directory,
            });
        }
        inner
            .files
            .get(rel)
            .map(|d| FileStat {
                size: d.len(),
                kind: NodeKind::File,
            })
            .ok_or(FsError::NoEnt)
    }

    fn mkdir(&self, relpath: &str) -> FsResult<()> {
        let rel = relpath.trim_matches('/');
        if rel.is_empty() {
            return Err(FsError::Inval);
        }
        let mut inner = self.inner.write();
        if inner.dirs.contains(rel) || inner.files.contains_key(rel) {
            return Err(FsError::Inval);
        }
        if !inner.dir_exists(RamFsInner::parent_of(rel)) {
            return Err(FsError::NoEnt);
        }
        inner.dirs.insert(rel.to_string());
        Ok(())
    }

    fn unlink(&self, relpath: &str) -> FsResult<()> {
        let rel = relpath.trim_matches('/');
        let mut inner = self.inner.write();
        if inner.files.remove(rel).is_some() {
            return Ok(());
        }
        if inner.dirs.contains(rel) {
            if !inner.children(rel).is_empty() {
                return Err(FsError::Inval);
            }
            inner.dirs.remove(rel);
            return Ok(());
        }
        Err(FsError::NoEnt)
    }
}
