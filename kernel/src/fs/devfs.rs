//! Device filesystem for `/dev`.
//!
//! A tiny fixed namespace: `null`, `zero`, and `console`. Reads and writes
//! go straight to the device semantics; there is nothing to persist.

use alloc::boxed::Box;
use alloc::string::ToString;
use alloc::vec::Vec;

use super::{DirEntry, FileHandle, FileStat, FileSystem, NodeKind, OpenFlags};
use crate::error::{FsError, FsResult};

const DEVICES: [&str; 3] = ["console", "null", "zero"];

pub struct DevFs;

impl DevFs {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DevFs {
    fn default() -> Self {
        Self::new()
    }
}

enum DevKind {
    Null,
    Zero,
    Console,
}

struct DevHandle {
    kind: DevKind,
}

impl FileHandle for DevHandle {
    fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        match self.kind {
            DevKind::Null | DevKind::Console => Ok(0),
            DevKind::Zero => {
                buf.fill(0);
                Ok(buf.len())
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> FsResult<usize> {
        match self.kind {
            DevKind::Null | DevKind::Zero => Ok(data.len()),
            DevKind::Console => {
                if let Ok(text) = core::str::from_utf8(data) {
                    print!("{}", text);
                }
                Ok(data.len())
            }
        }
    }
}

struct DevDirHandle {
    entries: Vec<DirEntry>,
    next: usize,
}

impl FileHandle for DevDirHandle {
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

impl FileSystem for DevFs {
    fn name(&self) -> &'static str {
        "devfs"
    }

    fn open(&self, relpath: &str, _flags: OpenFlags) -> FsResult<Box<dyn FileHandle>> {
        let rel = relpath.trim_matches('/');
        if rel.is_empty() || rel == "." {
            let entries = DEVICES
                .iter()
                .map(|name| DirEntry {
                    name: name.to_string(),
                    size: 0,
                    kind: NodeKind::Device,
                })
                .collect();
            return Ok(Box::new(DevDirHandle { entries, next: 0 }));
        }
        let kind = match rel {
            "null" => DevKind::Null,
            "zero" => DevKind::Zero,
            "console" => DevKind::Console,
            _ => return Err(FsError::NoEnt),
        };
        Ok(Box::new(DevHandle { kind }))
    }

    fn stat(&self, relpath: &str) -> FsResult<FileStat> {
        let rel = relpath.trim_matches('/');
        if rel.is_empty() {
            return Ok(FileStat {
                size: 0,
                kind: NodeKind::Directory,
            });
        }
        if DEVICES.contains(&rel) {
            Ok(FileStat {
                size: 0,
                kind: NodeKind::Device,
            })
        } else {
            Err(FsError::NoEnt)
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_zero_fills_and_null_sinks() {
        let fs = DevFs::new();
        let mut zero = fs.open("zero", OpenFlags::RDONLY).expect("open zero");
        let mut buf = [7u8; 8];
        assert_eq!(zero.read(&mut buf).expect("read"), 8);
        assert_eq!(buf, [0u8; 8]);

        let mut null = fs.open("null", OpenFlags::WRONLY).expect("open null");
        assert_eq!(null.write(b"discard").expect("write"), 7);
        assert_eq!(null.read(&mut buf).expect("read"), 0);
    }

    #[test]
    fn test_listing_names_all_devices() {
        let fs = DevFs::new();
        let mut dir = fs.open("", OpenFlags::RDONLY).expect("open root");
        let mut names = Vec::new();
        while let Some(e) = dir.readdir().expect("readdir") {
            names.push(e.name);
        }
        assert_eq!(names, vec!["console", "null", "zero"]);
    }

    #[test]
    fn test_unknown_device() {
        let fs = DevFs::new();
        assert_eq!(
            fs.open("tape0", OpenFlags::RDONLY).err(),
            Some(FsError::NoEnt)
        );
    }
}
