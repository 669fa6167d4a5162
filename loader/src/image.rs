// SPDX-License-Identifier: MPL-2.0

//! Kernel ELF images.
//!
//! A [`KernelImage`] is validated when it is opened, so that a file which can
//! never be booted is rejected before anything of the previous load is
//! released. [`KernelImage::resolve`] then computes where the image must live
//! and [`KernelImage::load_segments`] copies it into a reserved window.

use core::mem::size_of;

use align_ext::AlignExt;
use mips_relocator::Paddr;
use xmas_elf::{
    header,
    program::{self, ProgramHeader},
    ElfFile,
};

use crate::{arch::vtop, fs::FileSource, prelude::*};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

const PHDR32_SIZE: u16 = 32;
const PHDR64_SIZE: u16 = 56;

/// The word size of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    Bits32,
    Bits64,
}

impl Bitness {
    fn phdr_size(self) -> u16 {
        match self {
            Bitness::Bits32 => PHDR32_SIZE,
            Bitness::Bits64 => PHDR64_SIZE,
        }
    }

    fn phdr_align(self) -> u64 {
        match self {
            Bitness::Bits32 => 4,
            Bitness::Bits64 => 8,
        }
    }
}

/// Where and how large a kernel image is once placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryImageInfo {
    pub bitness: Bitness,
    /// The physical address the image is reserved at.
    pub base: Paddr,
    /// The lowest load address as written in the program headers.
    pub link_base: u64,
    /// The span of all loadable segments, rounded up to 8 bytes.
    pub footprint: usize,
    /// The entry point, exactly as the header states it.
    pub entry: u64,
}

/// A validated kernel image held in loader memory.
pub struct KernelImage {
    // ELF structures are read in place, so the bytes are kept 8-byte aligned.
    storage: Vec<u64>,
    len: usize,
    bitness: Bitness,
}

impl KernelImage {
    /// Reads the file at `path` and checks that it is a bootable image.
    pub fn open(files: &mut dyn FileSource, path: &str) -> Result<Self> {
        let Some(bytes) = files.read(path) else {
            return_errno_with_msg!(Errno::NotFound, "the kernel file does not exist");
        };
        let image = Self::from_bytes(bytes)?;
        debug!(
            "opened {}: {:?}, {:#x} bytes",
            path, image.bitness, image.len
        );
        Ok(image)
    }

    /// Copies and validates an in-memory image.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ELF_MAGIC.len() || bytes[..ELF_MAGIC.len()] != ELF_MAGIC {
            return_errno_with_msg!(Errno::BadImageFormat, "no ELF magic");
        }
        let bitness = match bytes.get(EI_CLASS) {
            Some(&ELFCLASS32) => Bitness::Bits32,
            Some(&ELFCLASS64) => Bitness::Bits64,
            _ => return_errno_with_msg!(Errno::UnknownImageType, "invalid ELF class"),
        };
        let native = if cfg!(target_endian = "little") {
            ELFDATA2LSB
        } else {
            ELFDATA2MSB
        };
        if bytes.get(EI_DATA) != Some(&native) {
            return_errno_with_msg!(Errno::BadImageFormat, "foreign byte order");
        }

        let mut storage = vec![0u64; bytes.len().div_ceil(size_of::<u64>())];
        // SAFETY: The storage is at least `bytes.len()` bytes long and any
        // byte pattern is a valid `u64`.
        let dst = unsafe {
            core::slice::from_raw_parts_mut(storage.as_mut_ptr().cast::<u8>(), bytes.len())
        };
        dst.copy_from_slice(bytes);

        let image = Self {
            storage,
            len: bytes.len(),
            bitness,
        };
        image.validate()?;
        Ok(image)
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: The storage holds `self.len` initialized bytes.
        unsafe { core::slice::from_raw_parts(self.storage.as_ptr().cast::<u8>(), self.len) }
    }

    fn elf(&self) -> Result<ElfFile<'_>> {
        ElfFile::new(self.bytes())
            .map_err(|_| Error::with_msg(Errno::BadImageFormat, "malformed ELF header"))
    }

    fn validate(&self) -> Result<()> {
        let elf = self.elf()?;
        let pt2 = &elf.header.pt2;

        if pt2.type_().as_type() != header::Type::Executable {
            return_errno_with_msg!(Errno::BadImageFormat, "the image is not of the right type");
        }
        if pt2.machine().as_machine() != header::Machine::Mips {
            return_errno_with_msg!(Errno::BadImageFormat, "the image is not for MIPS");
        }

        let count = pt2.ph_count();
        if count == 0 {
            return Ok(());
        }
        if pt2.ph_entry_size() != self.bitness.phdr_size() {
            return_errno_with_msg!(Errno::BadImageFormat, "unexpected program header size");
        }
        let offset = pt2.ph_offset();
        let table_end = (count as u64)
            .checked_mul(pt2.ph_entry_size() as u64)
            .and_then(|size| size.checked_add(offset));
        let in_file = table_end.is_some_and(|end| end <= self.len as u64);
        if !in_file || offset % self.bitness.phdr_align() != 0 {
            return_errno_with_msg!(Errno::BadImageFormat, "program headers out of the file");
        }
        Ok(())
    }

    pub fn bitness(&self) -> Bitness {
        self.bitness
    }

    pub fn is_bitness_32(&self) -> bool {
        self.bitness == Bitness::Bits32
    }

    /// The size of the file in bytes.
    pub fn file_size(&self) -> usize {
        self.len
    }

    fn load_headers<'a>(&self, elf: &ElfFile<'a>) -> Result<Vec<ProgramHeader<'a>>> {
        let mut headers = Vec::new();
        for index in 0..elf.header.pt2.ph_count() {
            let ph = elf
                .program_header(index)
                .map_err(|_| Error::with_msg(Errno::BadImageFormat, "bad program header"))?;
            if ph.get_type() == Ok(program::Type::Load) {
                headers.push(ph);
            }
        }
        Ok(headers)
    }

    /// Computes the placement of the image.
    pub fn resolve(&self) -> Result<BinaryImageInfo> {
        let elf = self.elf()?;
        let headers = self.load_headers(&elf)?;
        if headers.is_empty() {
            return_errno_with_msg!(Errno::BadImageFormat, "no loadable segments");
        }

        let mut low = u64::MAX;
        let mut high = 0u64;
        for ph in headers.iter() {
            let start = ph.physical_addr();
            let Some(end) = start.checked_add(ph.mem_size()) else {
                return_errno_with_msg!(Errno::BadImageFormat, "segment wraps around");
            };
            low = low.min(start);
            high = high.max(end);
        }

        let span = high - low;
        if span == 0 {
            return_errno_with_msg!(Errno::BadImageFormat, "the image occupies no memory");
        }
        if span > isize::MAX as u64 {
            return_errno_with_msg!(Errno::BadImageFormat, "the image is too large");
        }
        let footprint = (span as usize).align_up(8);

        let info = BinaryImageInfo {
            bitness: self.bitness,
            base: vtop(low),
            link_base: low,
            footprint,
            entry: elf.header.pt2.entry_point(),
        };
        debug!(
            "image links at {:#x}, base {:#x}, footprint {:#x}, entry {:#x}",
            info.link_base, info.base, info.footprint, info.entry
        );
        Ok(info)
    }

    /// Copies every loadable segment into `window`, which stands for the
    /// memory starting at `link_base`.
    pub fn load_segments(&self, window: &mut [u8], link_base: u64) -> Result<()> {
        let elf = self.elf()?;
        let bytes = self.bytes();

        for ph in self.load_headers(&elf)? {
            let file_size = ph.file_size();
            let mem_size = ph.mem_size();
            if file_size > mem_size {
                return_errno_with_msg!(Errno::SegmentLoadFailure, "segment file size exceeds memory size");
            }

            let src = usize::try_from(ph.offset())
                .ok()
                .zip(usize::try_from(file_size).ok())
                .and_then(|(start, len)| Some(start..start.checked_add(len)?))
                .filter(|range| range.end <= bytes.len());
            let Some(src) = src else {
                return_errno_with_msg!(Errno::SegmentLoadFailure, "segment data out of the file");
            };

            let dst = ph
                .physical_addr()
                .checked_sub(link_base)
                .and_then(|start| usize::try_from(start).ok())
                .zip(usize::try_from(mem_size).ok())
                .and_then(|(start, len)| Some(start..start.checked_add(len)?))
                .filter(|range| range.end <= window.len());
            let Some(dst) = dst else {
                return_errno_with_msg!(Errno::SegmentLoadFailure, "segment out of the reserved window");
            };

            let (data, bss) = window[dst].split_at_mut(src.len());
            data.copy_from_slice(&bytes[src]);
            bss.fill(0);
            debug!(
                "loaded segment at {:#x}: {:#x} bytes from file, {:#x} in memory",
                ph.physical_addr(),
                file_size,
                mem_size
            );
        }
        Ok(())
    }
}
