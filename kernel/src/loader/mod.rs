//! User program loader.
//!
//! User programs are 32-bit little-endian i386 ELF executables linked at
//! the conventional user base. The loader validates the header, gathers
//! the PT_LOAD segments, places the image in the fixed user window with
//! BSS zero-filled, and starts a fresh process at `_start` with a pointer
//! to the kernel syscall table as its single argument.

use alloc::vec::Vec;

use crate::error::LoaderError;
use crate::process::ProcessId;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;
const PT_LOAD: u32 = 1;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

/// One loadable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub vaddr: usize,
    pub offset: usize,
    pub filesz: usize,
    pub memsz: usize,
}

/// Parsed image: entry point plus its loadable segments.
#[derive(Debug, Clone)]
pub struct ElfImage {
    pub entry: usize,
    pub segments: Vec<Segment>,
    /// Lowest PT_LOAD virtual address.
    pub min_vaddr: usize,
    /// One past the highest PT_LOAD end address.
    pub max_vaddr: usize,
}

impl ElfImage {
    pub fn image_size(&self) -> usize {
        self.max_vaddr - self.min_vaddr
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Validate the ELF header and collect PT_LOAD segments.
pub fn parse(bytes: &[u8]) -> Result<ElfImage, LoaderError> {
    if bytes.len() < EHDR_SIZE || bytes[0..4] != ELF_MAGIC {
        return Err(LoaderError::BadElf);
    }
    if bytes[4] != ELFCLASS32 || bytes[5] != ELFDATA2LSB {
        return Err(LoaderError::UnsupportedArch);
    }
    if read_u16(bytes, 16) != ET_EXEC {
        return Err(LoaderError::BadElf);
    }
    if read_u16(bytes, 18) != EM_386 {
        return Err(LoaderError::UnsupportedArch);
    }

    let entry = read_u32(bytes, 24) as usize;
    let phoff = read_u32(bytes, 28) as usize;
    let phentsize = read_u16(bytes, 42) as usize;
    let phnum = read_u16(bytes, 44) as usize;
    if phentsize < PHDR_SIZE || phnum == 0 {
        return Err(LoaderError::BadElf);
    }
    if phoff
        .checked_add(phnum * phentsize)
        .is_none_or(|end| end > bytes.len())
    {
        return Err(LoaderError::BadElf);
    }

    let mut segments = Vec::new();
    let mut min_vaddr = usize::MAX;
    let mut max_vaddr = 0usize;
    for i in 0..phnum {
        let ph = phoff + i * phentsize;
        if read_u32(bytes, ph) != PT_LOAD {
            continue;
        }
        let segment = Segment {
            offset: read_u32(bytes, ph + 4) as usize,
            vaddr: read_u32(bytes, ph + 8) as usize,
            filesz: read_u32(bytes, ph + 16) as usize,
            memsz: read_u32(bytes, ph + 20) as usize,
        };
        if segment.filesz > segment.memsz {
            return Err(LoaderError::BadElf);
        }
        if segment
            .offset
            .checked_add(segment.filesz)
            .is_none_or(|end| end > bytes.len())
        {
            return Err(LoaderError::BadElf);
        }
        min_vaddr = min_vaddr.min(segment.vaddr);
        max_vaddr = max_vaddr.max(segment.vaddr + segment.memsz);
        segments.push(segment);
    }
    if segments.is_empty() {
        return Err(LoaderError::BadElf);
    }

    Ok(ElfImage {
        entry,
        segments,
        min_vaddr,
        max_vaddr,
    })
}

/// Copy the image's segments into `window`, which models the memory at
/// `window_base`. Gaps and BSS are zero-filled. Returns the relocated
/// entry address.
pub fn place(image: &ElfImage, bytes: &[u8], window: &mut [u8], window_base: usize)
    -> Result<usize, LoaderError>
{
    let size = image.image_size();
    if size == 0 || size > window.len() {
        return Err(LoaderError::PlacementFailed);
    }
    // Images linked at the conventional base land exactly there; anything
    // else is shifted so its lowest segment starts at the window base.
    let shift = window_base.wrapping_sub(image.min_vaddr);

    window[..size].fill(0);
    for segment in image.segments.iter() {
        let dest = segment.vaddr.wrapping_add(shift) - window_base;
        window[dest..dest + segment.filesz]
            .copy_from_slice(&bytes[segment.offset..segment.offset + segment.filesz]);
        // memsz beyond filesz stays zero: that is the BSS.
    }

    let entry = image.entry.wrapping_add(shift);
    if entry < window_base || entry >= window_base + size {
        return Err(LoaderError::BadElf);
    }
    Ok(entry)
}

/// Load a user program into the fixed user window and start it as a new
/// process. `_start(table)` receives the syscall table pointer; returning
/// from it exits the process.
#[cfg(target_os = "none")]
pub fn spawn(bytes: &[u8], name: &str) -> Result<ProcessId, crate::error::KernelError> {
    use crate::config::{DEFAULT_STACK, USER_LOAD_BASE, USER_LOAD_WINDOW};

    let image = parse(bytes)?;
    if image.image_size() > USER_LOAD_WINDOW {
        return Err(LoaderError::PlacementFailed.into());
    }
    // SAFETY: the user load window is reserved in the frame allocator at
    // boot and identity-mapped; no kernel data lives there.
    let window = unsafe {
        core::slice::from_raw_parts_mut(USER_LOAD_BASE as *mut u8, USER_LOAD_WINDOW)
    };
    let entry = place(&image, bytes, window, USER_LOAD_BASE)?;

    let table = crate::syscall::table_ptr();
    let pid = crate::sched::create_with_arg(entry, name, DEFAULT_STACK, table as usize)?;
    log::info!(target: "loader", "loaded {} ({} bytes) as pid {}", name, image.image_size(), pid);
    Ok(pid)
}

/// Host builds have no identity-mapped user window; loading is exercised
/// through [`parse`] and [`place`] directly.
#[cfg(not(target_os = "none"))]
pub fn spawn(_bytes: &[u8], _name: &str) -> Result<ProcessId, crate::error::KernelError> {
    Err(LoaderError::PlacementFailed.into())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    /// Build a minimal ELF32 i386 executable: one text segment at `base`
    /// carrying `code`, optionally a data+bss segment after it.
    fn synthetic_elf(base: u32, code: &[u8], bss: u32) -> Vec<u8> {
        let phnum: u16 = if bss > 0 { 2 } else { 1 };
        let headers = EHDR_SIZE + phnum as usize * PHDR_SIZE;
        let code_off = headers;
        let data_off = code_off + code.len();

        let mut out = alloc::vec![0u8; data_off + 4];
        out[0..4].copy_from_slice(&ELF_MAGIC);
        out[4] = ELFCLASS32;
        out[5] = ELFDATA2LSB;
        out[6] = 1; // EV_CURRENT
        out[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        out[18..20].copy_from_slice(&EM_386.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[24..28].copy_from_slice(&base.to_le_bytes()); // entry = segment start
        out[28..32].copy_from_slice(&(EHDR_SIZE as u32).to_le_bytes()); // phoff
        out[40..42].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes()); // ehsize
        out[42..44].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        out[44..46].copy_from_slice(&phnum.to_le_bytes());

        fn write_phdr(out: &mut [u8], ph: usize, offset: u32, vaddr: u32, filesz: u32, memsz: u32) {
            out[ph..ph + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
            out[ph + 4..ph + 8].copy_from_slice(&offset.to_le_bytes());
            out[ph + 8..ph + 12].copy_from_slice(&vaddr.to_le_bytes());
            out[ph + 12..ph + 16].copy_from_slice(&vaddr.to_le_bytes());
            out[ph + 16..ph + 20].copy_from_slice(&filesz.to_le_bytes());
            out[ph + 20..ph + 24].copy_from_slice(&memsz.to_le_bytes());
            out[ph + 24..ph + 28].copy_from_slice(&5u32.to_le_bytes()); // R+X
            out[ph + 28..ph + 32].copy_from_slice(&0x1000u32.to_le_bytes());
        }
        let ph = EHDR_SIZE;
        write_phdr(&mut out, ph, code_off as u32, base, code.len() as u32, code.len() as u32);
        if bss > 0 {
            let data_vaddr = base + 0x1000;
            write_phdr(&mut out, ph + PHDR_SIZE, data_off as u32, data_vaddr, 4, 4 + bss);
        }

        out[code_off..code_off + code.len()].copy_from_slice(code);
        out[data_off..data_off + 4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        out
    }

    const BASE: u32 = crate::config::USER_LOAD_BASE as u32;

    #[test]
    fn test_parse_valid_image() {
        let elf = synthetic_elf(BASE, &[0xC3; 16], 0);
        let image = parse(&elf).expect("valid image parses");
        assert_eq!(image.entry, BASE as usize);
        assert_eq!(image.segments.len(), 1);
        assert_eq!(image.min_vaddr, BASE as usize);
        assert_eq!(image.image_size(), 16);
    }

    #[test]
    fn test_reject_bad_magic() {
        let mut elf = synthetic_elf(BASE, &[0xC3], 0);
        elf[0] = 0x7E;
        assert_eq!(parse(&elf).unwrap_err(), LoaderError::BadElf);
    }

    #[test]
    fn test_reject_wrong_class_and_machine() {
        let mut elf = synthetic_elf(BASE, &[0xC3], 0);
        elf[4] = 2; // ELFCLASS64
        assert_eq!(parse(&elf).unwrap_err(), LoaderError::UnsupportedArch);

        let mut elf = synthetic_elf(BASE, &[0xC3], 0);
        elf[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        assert_eq!(parse(&elf).unwrap_err(), LoaderError::UnsupportedArch);
    }

    #[test]
    fn test_reject_relocatable_object() {
        let mut elf = synthetic_elf(BASE, &[0xC3], 0);
        elf[16..18].copy_from_slice(&1u16.to_le_bytes()); // ET_REL
        assert_eq!(parse(&elf).unwrap_err(), LoaderError::BadElf);
    }

    #[test]
    fn test_reject_truncated_segment() {
        let mut elf = synthetic_elf(BASE, &[0xC3; 16], 0);
        let len = elf.len();
        elf.truncate(len - 8);
        assert_eq!(parse(&elf).unwrap_err(), LoaderError::BadElf);
    }

    #[test]
    fn test_place_copies_and_zero_fills_bss() {
        let code = [0x90u8, 0x90, 0xC3, 0x00];
        let elf = synthetic_elf(BASE, &code, 64);
        let image = parse(&elf).expect("parse");

        let mut window = alloc::vec![0xFFu8; 0x2000];
        let entry =
            place(&image, &elf, &mut window, BASE as usize).expect("fits the window");
        assert_eq!(entry, BASE as usize);
        assert_eq!(&window[0..4], &code);
        // Data word then zeroed BSS.
        assert_eq!(&window[0x1000..0x1004], &0xDEAD_BEEFu32.to_le_bytes());
        assert!(window[0x1004..0x1004 + 64].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_place_shifts_off_base_image() {
        // Linked at an arbitrary low address: shifted to the window base.
        let elf = synthetic_elf(0x1000, &[0xC3; 8], 0);
        let image = parse(&elf).expect("parse");
        let mut window = alloc::vec![0u8; 0x100];
        let entry = place(&image, &elf, &mut window, BASE as usize).expect("placed");
        assert_eq!(entry, BASE as usize);
        assert_eq!(window[0], 0xC3);
    }

    #[test]
    fn test_place_rejects_oversized_image() {
        let elf = synthetic_elf(BASE, &[0xC3; 64], 0);
        let image = parse(&elf).expect("parse");
        let mut window = alloc::vec![0u8; 16];
        assert_eq!(
            place(&image, &elf, &mut window, BASE as usize).unwrap_err(),
            LoaderError::PlacementFailed
        );
    }
}
