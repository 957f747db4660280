//! FAT16 sector-level driver.
//!
//! Namespace is the root directory plus one level of subdirectory, 8.3
//! names, case-insensitive. Files are read by position and written whole:
//! a write replaces the file's cluster chain atomically from the driver's
//! point of view. The VFS adapter above this layer adds write buffering
//! and rollback.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{FsError, FsResult};
use crate::fs::blockdev::{BlockDevice, SECTOR_SIZE};

/// Directory entry attribute: subdirectory.
pub const ATTR_DIRECTORY: u8 = 0x10;
/// Directory entry attribute: volume label (skipped in listings).
const ATTR_VOLUME_ID: u8 = 0x08;

const DIR_ENTRY_SIZE: usize = 32;
const ENTRY_FREE: u8 = 0x00;
const ENTRY_DELETED: u8 = 0xE5;

/// End-of-chain marker written into the FAT.
const FAT_EOC: u16 = 0xFFFF;
const FAT_FREE: u16 = 0x0000;

/// A directory: the fixed root region or a subdirectory's cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirRef {
    Root,
    Cluster(u16),
}

/// One parsed directory entry.
#[derive(Debug, Clone)]
pub struct RawDirEntry {
    pub name: String,
    pub attr: u8,
    pub first_cluster: u16,
    pub size: u32,
}

impl RawDirEntry {
    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }
}

/// Where an entry lives on disk, so it can be rewritten in place.
#[derive(Debug, Clone, Copy)]
struct EntrySlot {
    sector: u32,
    offset: usize,
}

/// An open file snapshot: enough to read by position.
#[derive(Debug, Clone, Copy)]
pub struct FatFile {
    pub first_cluster: u16,
    pub size: u32,
}

/// A mounted FAT16 volume over a block device.
pub struct Fat16Volume<D: BlockDevice> {
    device: D,
    sectors_per_cluster: u32,
    num_fats: u32,
    fat_size: u32,
    fat_start: u32,
    root_start: u32,
    root_sectors: u32,
    data_start: u32,
    cluster_count: u32,
}

impl<D: BlockDevice> Fat16Volume<D> {
    /// Direct access to the backing device.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Parse the BPB and mount.
    pub fn mount(mut device: D) -> FsResult<Self> {
        let mut bpb = [0u8; SECTOR_SIZE];
        device.read_sector(0, &mut bpb)?;

        let bytes_per_sector = u16::from_le_bytes([bpb[11], bpb[12]]) as usize;
        if bytes_per_sector != SECTOR_SIZE {
            return Err(FsError::Io);
        }
        let sectors_per_cluster = bpb[13] as u32;
        let reserved = u16::from_le_bytes([bpb[14], bpb[15]]) as u32;
        let num_fats = bpb[16] as u32;
        let root_entries = u16::from_le_bytes([bpb[17], bpb[18]]) as u32;
        let total_sectors = u16::from_le_bytes([bpb[19], bpb[20]]) as u32;
        let fat_size = u16::from_le_bytes([bpb[22], bpb[23]]) as u32;
        if sectors_per_cluster == 0 || num_fats == 0 || fat_size == 0 {
            return Err(FsError::Io);
        }

        let root_sectors = (root_entries * DIR_ENTRY_SIZE as u32).div_ceil(SECTOR_SIZE as u32);
        let fat_start = reserved;
        let root_start = fat_start + num_fats * fat_size;
        let data_start = root_start + root_sectors;
        let data_sectors = total_sectors.saturating_sub(data_start);
        let cluster_count = data_sectors / sectors_per_cluster;

        Ok(Self {
            device,
            sectors_per_cluster,
            num_fats,
            fat_size,
            fat_start,
            root_start,
            root_sectors,
            data_start,
            cluster_count,
        })
    }

    /// Write a fresh FAT16 layout onto the device and mount it.
    pub fn format(mut device: D) -> FsResult<Self> {
        let total_sectors = device.sector_count();
        let sectors_per_cluster = 4u32;
        let reserved = 1u32;
        let num_fats = 2u32;
        let root_entries = 512u32;
        // Enough FAT sectors to map every data sector; slight over-size is
        // harmless.
        let fat_size =
            (total_sectors / sectors_per_cluster * 2).div_ceil(SECTOR_SIZE as u32) + 1;

        let mut bpb = [0u8; SECTOR_SIZE];
        bpb[0] = 0xEB; // jump stub
        bpb[1] = 0x3C;
        bpb[2] = 0x90;
        bpb[3..11].copy_from_slice(b"CUPID1.0");
        bpb[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        bpb[13] = sectors_per_cluster as u8;
        bpb[14..16].copy_from_slice(&(reserved as u16).to_le_bytes());
        bpb[16] = num_fats as u8;
        bpb[17..19].copy_from_slice(&(root_entries as u16).to_le_bytes());
        bpb[19..21].copy_from_slice(&(total_sectors as u16).to_le_bytes());
        bpb[21] = 0xF8; // fixed disk
        bpb[22..24].copy_from_slice(&(fat_size as u16).to_le_bytes());
        bpb[510] = 0x55;
        bpb[511] = 0xAA;
        device.write_sector(0, &bpb)?;

        // Zero both FATs, then set the two reserved entries.
        let zero = [0u8; SECTOR_SIZE];
        for fat in 0..num_fats {
            for s in 0..fat_size {
                device.write_sector(reserved + fat * fat_size + s, &zero)?;
            }
        }
        let mut fat0 = [0u8; SECTOR_SIZE];
        fat0[0] = 0xF8;
        fat0[1] = 0xFF;
        fat0[2] = 0xFF;
        fat0[3] = 0xFF;
        for fat in 0..num_fats {
            device.write_sector(reserved + fat * fat_size, &fat0)?;
        }

        // Zero the root directory.
        let root_start = reserved + num_fats * fat_size;
        let root_sectors = (root_entries * DIR_ENTRY_SIZE as u32).div_ceil(SECTOR_SIZE as u32);
        for s in 0..root_sectors {
            device.write_sector(root_start + s, &zero)?;
        }

        Self::mount(device)
    }

    pub fn cluster_bytes(&self) -> usize {
        self.sectors_per_cluster as usize * SECTOR_SIZE
    }

    // -- FAT access ----------------------------------------------------

    fn fat_entry(&mut self, cluster: u16) -> FsResult<u16> {
        let byte = cluster as u32 * 2;
        let sector = self.fat_start + byte / SECTOR_SIZE as u32;
        let offset = (byte % SECTOR_SIZE as u32) as usize;
        let mut buf = [0u8; SECTOR_SIZE];
        self.device.read_sector(sector, &mut buf)?;
        Ok(u16::from_le_bytes([buf[offset], buf[offset + 1]]))
    }

    fn set_fat_entry(&mut self, cluster: u16, value: u16) -> FsResult<()> {
        let byte = cluster as u32 * 2;
        let offset = (byte % SECTOR_SIZE as u32) as usize;
        for fat in 0..self.num_fats {
            let sector = self.fat_start + fat * self.fat_size + byte / SECTOR_SIZE as u32;
            let mut buf = [0u8; SECTOR_SIZE];
            self.device.read_sector(sector, &mut buf)?;
            buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
            self.device.write_sector(sector, &buf)?;
        }
        Ok(())
    }

    fn alloc_cluster(&mut self) -> FsResult<u16> {
        for cluster in 2..(self.cluster_count + 2).min(0xFFF0) as u16 {
            if self.fat_entry(cluster)? == FAT_FREE {
                self.set_fat_entry(cluster, FAT_EOC)?;
                return Ok(cluster);
            }
        }
        Err(FsError::NoSpc)
    }

    fn free_chain(&mut self, first: u16) -> FsResult<()> {
        let mut cluster = first;
        while (2..0xFFF0).contains(&cluster) {
            let next = self.fat_entry(cluster)?;
            self.set_fat_entry(cluster, FAT_FREE)?;
            cluster = next;
        }
        Ok(())
    }

    fn cluster_lba(&self, cluster: u16) -> u32 {
        self.data_start + (cluster as u32 - 2) * self.sectors_per_cluster
    }

    // -- directory access ----------------------------------------------

    /// Sectors making up a directory, in order.
    fn dir_sectors(&mut self, dir: DirRef) -> FsResult<Vec<u32>> {
        match dir {
            DirRef::Root => Ok((self.root_start..self.root_start + self.root_sectors).collect()),
            DirRef::Cluster(first) => {
                let mut sectors = Vec::new();
                let mut cluster = first;
                while (2..0xFFF0).contains(&cluster) {
                    let lba = self.cluster_lba(cluster);
                    for s in 0..self.sectors_per_cluster {
                        sectors.push(lba + s);
                    }
                    cluster = self.fat_entry(cluster)?;
                }
                Ok(sectors)
            }
        }
    }

    /// Find an entry by 8.3 name. Returns the parsed entry and its slot.
    fn find_in_dir(&mut self, dir: DirRef, name83: &[u8; 11]) -> FsResult<(RawDirEntry, EntrySlot)> {
        for sector in self.dir_sectors(dir)? {
            let mut buf = [0u8; SECTOR_SIZE];
            self.device.read_sector(sector, &mut buf)?;
            for offset in (0..SECTOR_SIZE).step_by(DIR_ENTRY_SIZE) {
                let entry = &buf[offset..offset + DIR_ENTRY_SIZE];
                if entry[0] == ENTRY_FREE {
                    return Err(FsError::NoEnt);
                }
                if entry[0] == ENTRY_DELETED || entry[11] & ATTR_VOLUME_ID != 0 {
                    continue;
                }
                if &entry[0..11] == name83 {
                    return Ok((parse_entry(entry), EntrySlot { sector, offset }));
                }
            }
        }
        Err(FsError::NoEnt)
    }

    /// Find a free or deleted slot in a directory.
    fn free_slot(&mut self, dir: DirRef) -> FsResult<EntrySlot> {
        for sector in self.dir_sectors(dir)? {
            let mut buf = [0u8; SECTOR_SIZE];
            self.device.read_sector(sector, &mut buf)?;
            for offset in (0..SECTOR_SIZE).step_by(DIR_ENTRY_SIZE) {
                let first = buf[offset];
                if first == ENTRY_FREE || first == ENTRY_DELETED {
                    return Ok(EntrySlot { sector, offset });
                }
            }
        }
        Err(FsError::NoSpc)
    }

    fn write_slot(&mut self, slot: EntrySlot, entry: &[u8; DIR_ENTRY_SIZE]) -> FsResult<()> {
        let mut buf = [0u8; SECTOR_SIZE];
        self.device.read_sector(slot.sector, &mut buf)?;
        buf[slot.offset..slot.offset + DIR_ENTRY_SIZE].copy_from_slice(entry);
        self.device.write_sector(slot.sector, &buf)
    }

    /// Resolve a path of at most one subdirectory level to (dir, name).
    fn split_path(&mut self, path: &str) -> FsResult<(DirRef, [u8; 11])> {
        let path = path.trim_matches('/');
        match path.split_once('/') {
            None => Ok((DirRef::Root, to_83(path)?)),
            Some((dir, name)) => {
                if name.contains('/') {
                    return Err(FsError::NotDir);
                }
                let dir83 = to_83(dir)?;
                let (entry, _) = self.find_in_dir(DirRef::Root, &dir83)?;
                if !entry.is_dir() {
                    return Err(FsError::NotDir);
                }
                Ok((DirRef::Cluster(entry.first_cluster), to_83(name)?))
            }
        }
    }

    // -- public driver surface -----------------------------------------

    /// Look up a file (not a directory) by path.
    pub fn open_file(&mut self, path: &str) -> FsResult<FatFile> {
        let (dir, name) = self.split_path(path)?;
        let (entry, _) = self.find_in_dir(dir, &name)?;
        if entry.is_dir() {
            return Err(FsError::IsDir);
        }
        Ok(FatFile {
            first_cluster: entry.first_cluster,
            size: entry.size,
        })
    }

    /// Stat a path: directory probe first, then file.
    pub fn stat_path(&mut self, path: &str) -> FsResult<RawDirEntry> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            return Ok(RawDirEntry {
                name: String::new(),
                attr: ATTR_DIRECTORY,
                first_cluster: 0,
                size: 0,
            });
        }
        let (dir, name) = self.split_path(path)?;
        let (entry, _) = self.find_in_dir(dir, &name)?;
        Ok(entry)
    }

    /// Read from a file by absolute position. Returns bytes read, 0 at or
    /// past EOF.
    pub fn read_file(&mut self, file: &FatFile, pos: u32, buf: &mut [u8]) -> FsResult<usize> {
        if pos >= file.size {
            return Ok(0);
        }
        let want = buf.len().min((file.size - pos) as usize);
        let cluster_bytes = self.cluster_bytes() as u32;

        // Walk to the cluster containing `pos`.
        let mut cluster = file.first_cluster;
        let mut skip = pos / cluster_bytes;
        while skip > 0 {
            cluster = self.fat_entry(cluster)?;
            if !(2..0xFFF0).contains(&cluster) {
                return Err(FsError::Io);
            }
            skip -= 1;
        }

        let mut done = 0usize;
        let mut offset = (pos % cluster_bytes) as usize;
        while done < want {
            let lba = self.cluster_lba(cluster);
            let sector_in_cluster = offset / SECTOR_SIZE;
            let byte_in_sector = offset % SECTOR_SIZE;
            let mut sector = [0u8; SECTOR_SIZE];
            self.device
                .read_sector(lba + sector_in_cluster as u32, &mut sector)?;
            let n = (SECTOR_SIZE - byte_in_sector).min(want - done);
            buf[done..done + n].copy_from_slice(&sector[byte_in_sector..byte_in_sector + n]);
            done += n;
            offset += n;
            if offset >= cluster_bytes as usize {
                offset = 0;
                cluster = self.fat_entry(cluster)?;
                if done < want && !(2..0xFFF0).contains(&cluster) {
                    return Err(FsError::Io);
                }
            }
        }
        Ok(done)
    }

    /// Whole-file write: replace the cluster chain with `data`. Creates
    /// the entry when absent. Returns the byte count written.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> FsResult<usize> {
        let (dir, name) = self.split_path(path)?;

        let slot = match self.find_in_dir(dir, &name) {
            Ok((old, slot)) => {
                if old.is_dir() {
                    return Err(FsError::IsDir);
                }
                if old.first_cluster >= 2 {
                    self.free_chain(old.first_cluster)?;
                }
                slot
            }
            Err(FsError::NoEnt) => self.free_slot(dir)?,
            Err(e) => return Err(e),
        };

        // Build the new chain and fill it.
        let cluster_bytes = self.cluster_bytes();
        let clusters_needed = data.len().div_ceil(cluster_bytes);
        let mut first_cluster = 0u16;
        let mut prev = 0u16;
        for chunk_index in 0..clusters_needed {
            let cluster = self.alloc_cluster()?;
            if prev != 0 {
                self.set_fat_entry(prev, cluster)?;
            } else {
                first_cluster = cluster;
            }
            prev = cluster;

            let chunk = &data[chunk_index * cluster_bytes..];
            let lba = self.cluster_lba(cluster);
            for s in 0..self.sectors_per_cluster as usize {
                let mut sector = [0u8; SECTOR_SIZE];
                let start = s * SECTOR_SIZE;
                if start < chunk.len() {
                    let n = (chunk.len() - start).min(SECTOR_SIZE).min(
                        data.len() - chunk_index * cluster_bytes - start,
                    );
                    sector[..n].copy_from_slice(&chunk[start..start + n]);
                }
                self.device.write_sector(lba + s as u32, &sector)?;
            }
        }

        let mut entry = [0u8; DIR_ENTRY_SIZE];
        entry[0..11].copy_from_slice(&name);
        entry[11] = 0x20; // archive
        entry[26..28].copy_from_slice(&first_cluster.to_le_bytes());
        entry[28..32].copy_from_slice(&(data.len() as u32).to_le_bytes());
        self.write_slot(slot, &entry)?;
        Ok(data.len())
    }

    /// Delete a file or an (empty, by the caller's responsibility)
    /// directory: free the chain and tombstone the entry.
    pub fn delete(&mut self, path: &str) -> FsResult<()> {
        let (dir, name) = self.split_path(path)?;
        let (entry, slot) = self.find_in_dir(dir, &name)?;
        if entry.first_cluster >= 2 {
            self.free_chain(entry.first_cluster)?;
        }
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw[0] = ENTRY_DELETED;
        self.write_slot(slot, &raw)
    }

    /// Create an empty subdirectory of the root with `.` and `..` entries.
    pub fn make_dir(&mut self, path: &str) -> FsResult<()> {
        let trimmed = path.trim_matches('/');
        if trimmed.contains('/') {
            return Err(FsError::NotDir);
        }
        let name = to_83(trimmed)?;
        if self.find_in_dir(DirRef::Root, &name).is_ok() {
            return Err(FsError::Inval);
        }
        let slot = self.free_slot(DirRef::Root)?;
        let cluster = self.alloc_cluster()?;

        // Zero the directory cluster, then seed "." and "..".
        let lba = self.cluster_lba(cluster);
        let zero = [0u8; SECTOR_SIZE];
        for s in 0..self.sectors_per_cluster {
            self.device.write_sector(lba + s, &zero)?;
        }
        let mut sector = [0u8; SECTOR_SIZE];
        let mut dot = [0u8; DIR_ENTRY_SIZE];
        dot[0..11].copy_from_slice(b".          ");
        dot[11] = ATTR_DIRECTORY;
        dot[26..28].copy_from_slice(&cluster.to_le_bytes());
        sector[0..DIR_ENTRY_SIZE].copy_from_slice(&dot);
        let mut dotdot = [0u8; DIR_ENTRY_SIZE];
        dotdot[0..11].copy_from_slice(b"..         ");
        dotdot[11] = ATTR_DIRECTORY;
        sector[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(&dotdot);
        self.device.write_sector(lba, &sector)?;

        let mut entry = [0u8; DIR_ENTRY_SIZE];
        entry[0..11].copy_from_slice(&name);
        entry[11] = ATTR_DIRECTORY;
        entry[26..28].copy_from_slice(&cluster.to_le_bytes());
        self.write_slot(slot, &entry)
    }

    /// Enumerate a directory (`""` for root). Skips the volume label and
    /// the `.` self-entry.
    pub fn list_dir(&mut self, path: &str) -> FsResult<Vec<RawDirEntry>> {
        let trimmed = path.trim_matches('/');
        let dir = if trimmed.is_empty() || trimmed == "." {
            DirRef::Root
        } else {
            let name = to_83(trimmed)?;
            let (entry, _) = self.find_in_dir(DirRef::Root, &name)?;
            if !entry.is_dir() {
                return Err(FsError::NotDir);
            }
            DirRef::Cluster(entry.first_cluster)
        };

        let mut entries = Vec::new();
        'sectors: for sector in self.dir_sectors(dir)? {
            let mut buf = [0u8; SECTOR_SIZE];
            self.device.read_sector(sector, &mut buf)?;
            for offset in (0..SECTOR_SIZE).step_by(DIR_ENTRY_SIZE) {
                let raw = &buf[offset..offset + DIR_ENTRY_SIZE];
                if raw[0] == ENTRY_FREE {
                    break 'sectors;
                }
                if raw[0] == ENTRY_DELETED || raw[11] & ATTR_VOLUME_ID != 0 {
                    continue;
                }
                let entry = parse_entry(raw);
                if entry.name == "." {
                    continue;
                }
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// True when the path names an existing file or directory.
    pub fn exists(&mut self, path: &str) -> bool {
        self.stat_path(path).is_ok()
    }
}

/// Convert a name to the on-disk 8.3 form, uppercased and space-padded.
fn to_83(name: &str) -> FsResult<[u8; 11]> {
    if name.is_empty() || name == "." || name == ".." {
        let mut out = [b' '; 11];
        if !name.is_empty() {
            out[..name.len()].copy_from_slice(name.as_bytes());
        }
        return Ok(out);
    }
    let mut out = [b' '; 11];
    let (stem, ext) = match name.rsplit_once('.') {
        Some((s, e)) => (s, e),
        None => (name, ""),
    };
    if stem.is_empty() || stem.len() > 8 || ext.len() > 3 {
        return Err(FsError::Inval);
    }
    for (i, b) in stem.bytes().enumerate() {
        out[i] = b.to_ascii_uppercase();
    }
    for (i, b) in ext.bytes().enumerate() {
        out[8 + i] = b.to_ascii_uppercase();
    }
    Ok(out)
}

/// Render an on-disk 8.3 name back to `NAME.EXT` form.
fn from_83(raw: &[u8]) -> String {
    let stem = core::str::from_utf8(&raw[0..8]).unwrap_or("").trim_end();
    let ext = core::str::from_utf8(&raw[8..11]).unwrap_or("").trim_end();
    if ext.is_empty() {
        String::from(stem)
    } else {
        alloc::format!("{}.{}", stem, ext)
    }
}

fn parse_entry(raw: &[u8]) -> RawDirEntry {
    RawDirEntry {
        name: from_83(&raw[0..11]),
        attr: raw[11],
        first_cluster: u16::from_le_bytes([raw[26], raw[27]]),
        size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::fs::blockdev::RamDisk;

    fn volume() -> Fat16Volume<RamDisk> {
        Fat16Volume::format(RamDisk::new(2048)).expect("format")
    }

    #[test]
    fn test_name_conversion() {
        assert_eq!(to_83("readme.txt").expect("valid"), *b"README  TXT");
        assert_eq!(to_83("a").expect("valid"), *b"A          ");
        assert_eq!(to_83("longlong.c").expect("valid"), *b"LONGLONGC  ");
        assert!(to_83("waytoolongname.txt").is_err());
        assert_eq!(from_83(b"README  TXT"), "README.TXT");
        assert_eq!(from_83(b"A          "), "A");
    }

    #[test]
    fn test_write_then_read_back() {
        let mut vol = volume();
        let data = b"the quick brown fox";
        vol.write_file("t.txt", data).expect("write");

        let file = vol.open_file("t.txt").expect("open");
        assert_eq!(file.size as usize, data.len());
        let mut buf = [0u8; 64];
        let n = vol.read_file(&file, 0, &mut buf).expect("read");
        assert_eq!(&buf[..n], data);
    }

    #[test]
    fn test_positional_read() {
        let mut vol = volume();
        vol.write_file("p.bin", b"0123456789").expect("write");
        let file = vol.open_file("p.bin").expect("open");
        let mut buf = [0u8; 4];
        assert_eq!(vol.read_file(&file, 6, &mut buf).expect("read"), 4);
        assert_eq!(&buf, b"6789");
        assert_eq!(vol.read_file(&file, 10, &mut buf).expect("read"), 0);
    }

    #[test]
    fn test_multi_cluster_file() {
        let mut vol = volume();
        // 3 clusters (4 sectors each) plus a tail.
        let data: Vec<u8> = (0..7000u32).map(|i| (i % 251) as u8).collect();
        vol.write_file("big.bin", &data).expect("write");

        let file = vol.open_file("big.bin").expect("open");
        let mut back = vec![0u8; data.len()];
        let n = vol.read_file(&file, 0, &mut back).expect("read");
        assert_eq!(n, data.len());
        assert_eq!(back, data);
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let mut vol = volume();
        vol.write_file("f.txt", b"first version, rather long").expect("write");
        vol.write_file("f.txt", b"second").expect("rewrite");
        let file = vol.open_file("f.txt").expect("open");
        assert_eq!(file.size, 6);
        let mut buf = [0u8; 16];
        let n = vol.read_file(&file, 0, &mut buf).expect("read");
        assert_eq!(&buf[..n], b"second");
    }

    #[test]
    fn test_delete_frees_and_hides() {
        let mut vol = volume();
        vol.write_file("d.txt", b"data").expect("write");
        vol.delete("d.txt").expect("delete");
        assert_eq!(vol.open_file("d.txt").unwrap_err(), FsError::NoEnt);
        assert!(!vol.exists("d.txt"));
    }

    #[test]
    fn test_subdirectory_roundtrip() {
        let mut vol = volume();
        vol.make_dir("docs").expect("mkdir");
        vol.write_file("docs/note.txt", b"inside").expect("write");

        let file = vol.open_file("docs/note.txt").expect("open");
        let mut buf = [0u8; 16];
        let n = vol.read_file(&file, 0, &mut buf).expect("read");
        assert_eq!(&buf[..n], b"inside");

        let listing = vol.list_dir("docs").expect("list");
        let names: Vec<&str> = listing.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&".."));
        assert!(names.contains(&"NOTE.TXT"));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut vol = volume();
        vol.write_file("MiXeD.TxT", b"x").expect("write");
        assert!(vol.exists("mixed.txt"));
        assert!(vol.exists("MIXED.TXT"));
    }

    #[test]
    fn test_root_listing_order_of_creation() {
        let mut vol = volume();
        vol.write_file("b.txt", b"2").expect("write");
        vol.write_file("a.txt", b"1").expect("write");
        let names: Vec<String> = vol
            .list_dir("")
            .expect("list")
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["B.TXT", "A.TXT"]);
    }

    #[test]
    fn test_two_levels_rejected() {
        let mut vol = volume();
        vol.make_dir("a").expect("mkdir");
        assert_eq!(
            vol.write_file("a/b/c.txt", b"nope").unwrap_err(),
            FsError::NotDir
        );
    }
}
