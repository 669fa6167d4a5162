// SPDX-License-Identifier: MPL-2.0

//! The argument block handed to the kernel.
//!
//! The kernel receives `argc` in `a0` and the address of the block in `a1`. The block is laid out as follows:
//!
//! ```text
//! +---------------------------+ base
//! | argv[0] .. argv[argc - 1] |  32-bit pointers into the string table
//! | rd_start slot, rd_size slot|  zero until an initrd is loaded
//! | terminator                |  always zero
//! +---------------------------+
//! | "a0\0" padded to 4        |
//! | each argument, padded     |
//! | rd_start placeholder (28) |
//! | rd_size placeholder (28)  |
//! +---------------------------+ aligned to 8
//! ```
//!
//! The kernel dereferences every pointer directly, so each one is the KSEG0
//! alias of its physical location in 32-bit form. The whole block therefore
//! lies in the first 512 MiB of physical memory.

use core::{
    fmt::{self, Write},
    mem::size_of,
};

use align_ext::AlignExt;
use mips_relocator::{Chunk, Paddr};

use crate::{
    arch::{ptov, KSEG0_SIZE},
    prelude::*,
};

/// The width of a pointer slot.
const SLOT_SIZE: usize = size_of::<u32>();

/// Strings are padded to this boundary.
const STRING_ALIGN: usize = 4;

/// The alignment of the whole block length.
const BLOCK_ALIGN: usize = 8;

/// Room for `rd_start=0x` followed by 16 hex digits and a NUL.
pub const RD_START_CAPACITY: usize = "rd_start=0x".len() + 16 + 1;

/// Room for `rd_size=0x` followed by 16 hex digits and a NUL, padded.
pub const RD_SIZE_CAPACITY: usize = ("rd_size=0x".len() + 16 + 1).next_multiple_of(STRING_ALIGN);

/// The number of pointer slots reserved for the initrd.
const NR_INITRD_SLOTS: usize = 2;

fn padded_len(s: &str) -> usize {
    (s.len() + 1).align_up(STRING_ALIGN)
}

/// Returns the length of the block for the given arguments.
///
/// `args[0]` is the kernel path. It is not copied; `first_arg` takes its
/// place.
pub fn block_size(first_arg: &str, args: &[&str]) -> usize {
    let nr_slots = args.len() + NR_INITRD_SLOTS + 1;
    let strings: usize = padded_len(first_arg)
        + args.iter().skip(1).map(|arg| padded_len(arg)).sum::<usize>()
        + RD_START_CAPACITY
        + RD_SIZE_CAPACITY;
    (nr_slots * SLOT_SIZE + strings).align_up(BLOCK_ALIGN)
}

/// A pointer slot and its string whose contents are written later.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingSlot {
    index: usize,
    offset: usize,
    capacity: usize,
}

impl PendingSlot {
    /// The offset of the string within the block.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The number of bytes reserved for the string, NUL included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Renders the string and points the slot at it.
    ///
    /// Like `snprintf`, output beyond the capacity is dropped and the string
    /// is always NUL-terminated.
    fn fill(self, buf: &mut [u8], vbase: u32, args: fmt::Arguments) {
        let dst = &mut buf[self.offset..self.offset + self.capacity];
        let mut writer = SliceWriter::new(dst);
        // The writer truncates instead of failing.
        let _ = writer.write_fmt(args);
        writer.terminate();

        write_slot(buf, self.index, vbase + self.offset as u32);
    }
}

/// The two placeholders for the initrd location.
#[derive(Debug, PartialEq, Eq)]
struct InitrdSlots {
    start: PendingSlot,
    size: PendingSlot,
}

/// A `fmt::Write` over a byte slice that keeps the last byte for a NUL.
struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn terminate(self) {
        if let Some(byte) = self.buf.get_mut(self.pos) {
            *byte = 0;
        }
    }
}

impl Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len().saturating_sub(1).saturating_sub(self.pos);
        let len = s.len().min(room);
        self.buf[self.pos..self.pos + len].copy_from_slice(&s.as_bytes()[..len]);
        self.pos += len;
        Ok(())
    }
}

fn write_slot(buf: &mut [u8], index: usize, value: u32) {
    let at = index * SLOT_SIZE;
    buf[at..at + SLOT_SIZE].copy_from_slice(&value.to_ne_bytes());
}

/// The argument block of the current load.
#[derive(Debug)]
pub struct ArgumentBlock {
    chunk: Chunk,
    vbase: u32,
    argc: u32,
    initrd_slots: Option<InitrdSlots>,
}

impl ArgumentBlock {
    /// Lays out the block in `buf`, the staging buffer of `chunk`.
    pub fn build(chunk: Chunk, buf: &mut [u8], first_arg: &str, args: &[&str]) -> Result<Self> {
        if args.is_empty() {
            return_errno_with_msg!(Errno::BadArgument, "the kernel path is missing");
        }
        let size = block_size(first_arg, args);
        if buf.len() != size || chunk.size() != size {
            return_errno_with_msg!(Errno::AddressReservationFailure, "the chunk does not fit the block");
        }
        let base = chunk.target();
        let vbase = match ptov(base) {
            Some(vbase) if chunk.end() <= KSEG0_SIZE => vbase,
            _ => return_errno_with_msg!(
                Errno::AddressReservationFailure,
                "the block is not reachable through KSEG0"
            ),
        };

        let argc = args.len();
        let strings = core::iter::once(first_arg).chain(args.iter().skip(1).copied());
        let mut offset = (argc + NR_INITRD_SLOTS + 1) * SLOT_SIZE;
        buf[..offset].fill(0);
        for (index, s) in strings.enumerate() {
            let len = padded_len(s);
            let dst = &mut buf[offset..offset + len];
            dst[..s.len()].copy_from_slice(s.as_bytes());
            dst[s.len()..].fill(0);
            write_slot(buf, index, vbase + offset as u32);
            offset += len;
        }

        let start = PendingSlot {
            index: argc,
            offset,
            capacity: RD_START_CAPACITY,
        };
        offset += RD_START_CAPACITY;
        let size_slot = PendingSlot {
            index: argc + 1,
            offset,
            capacity: RD_SIZE_CAPACITY,
        };
        buf[start.offset..].fill(0);

        debug!(
            "argument block at {:#x} ({:#x}), {:#x} bytes, argc {}",
            base, vbase, size, argc
        );
        Ok(Self {
            chunk,
            vbase,
            argc: argc as u32,
            initrd_slots: Some(InitrdSlots {
                start,
                size: size_slot,
            }),
        })
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// The physical address of the block.
    pub fn base(&self) -> Paddr {
        self.chunk.target()
    }

    /// The address the kernel sees the block at.
    pub fn vaddr(&self) -> u32 {
        self.vbase
    }

    pub fn size(&self) -> usize {
        self.chunk.size()
    }

    pub fn argc(&self) -> u32 {
        self.argc
    }

    /// Whether the initrd slots have been filled.
    pub fn has_initrd(&self) -> bool {
        self.initrd_slots.is_none()
    }

    /// Returns the pending `rd_start` and `rd_size` slots, if still unfilled.
    pub fn pending_slots(&self) -> Option<(&PendingSlot, &PendingSlot)> {
        self.initrd_slots.as_ref().map(|slots| (&slots.start, &slots.size))
    }

    /// Writes the initrd location into the placeholders and counts them.
    ///
    /// `buf` is the staging buffer of the block's chunk and `start` the
    /// physical address of the initrd, which must have a KSEG0 alias.
    pub fn attach_initrd(&mut self, buf: &mut [u8], start: Paddr, size: usize) -> Result<()> {
        if buf.len() != self.chunk.size() {
            return_errno_with_msg!(Errno::AddressReservationFailure, "not the block's buffer");
        }
        let Some(vstart) = ptov(start) else {
            return_errno_with_msg!(
                Errno::AddressReservationFailure,
                "the initrd is not reachable through KSEG0"
            );
        };
        let Some(slots) = self.initrd_slots.take() else {
            return_errno_with_msg!(Errno::SequencingError, "an initrd is already attached");
        };
        let vbase = self.vbase;
        slots
            .start
            .fill(buf, vbase, format_args!("rd_start={:#x}", vstart));
        slots.size.fill(buf, vbase, format_args!("rd_size={:#x}", size));
        self.argc += NR_INITRD_SLOTS as u32;
        debug!("initrd attached, argc {}", self.argc);
        Ok(())
    }
}
