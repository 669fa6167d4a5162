// SPDX-License-Identifier: MPL-2.0

//! Placing the initrd and announcing it to the kernel.

mod assembly;

use mips_relocator::{Chunk, Paddr, Preference, RangeRequest, Relocator};

pub use self::assembly::{ConcatAssembler, ConcatContext, InitrdAssembler};
use crate::{args::ArgumentBlock, config::LoaderConfig, fs::FileSource, prelude::*};

/// The initrd of the current load.
#[derive(Debug)]
pub struct InitrdPlacement {
    size: usize,
    chunk: Chunk,
}

impl InitrdPlacement {
    /// The physical address of the initrd.
    pub fn start(&self) -> Paddr {
        self.chunk.target()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }
}

/// Assembles the initrd from `paths`, reserves memory for it below the
/// address limit and records its location in `block`.
///
/// The assembler context is closed on every path. On failure `block` is left
/// as it was.
pub fn place_initrd<R: Relocator, A: InitrdAssembler>(
    relocator: &mut R,
    assembler: &mut A,
    files: &mut dyn FileSource,
    paths: &[&str],
    config: &LoaderConfig,
    block: &mut ArgumentBlock,
) -> Result<InitrdPlacement> {
    let mut ctx = assembler.open(files, paths)?;
    let placed = reserve_and_copy(relocator, assembler, &mut ctx, files, paths, config);
    assembler.close(ctx);
    let placement = placed?;

    let buf = relocator
        .chunk_mut(block.chunk())
        .map_err(|_| Error::with_msg(Errno::SequencingError, "the argument block is gone"))?;
    block.attach_initrd(buf, placement.start(), placement.size())?;
    Ok(placement)
}

fn reserve_and_copy<R: Relocator, A: InitrdAssembler>(
    relocator: &mut R,
    assembler: &mut A,
    ctx: &mut A::Context,
    files: &mut dyn FileSource,
    paths: &[&str],
    config: &LoaderConfig,
) -> Result<InitrdPlacement> {
    let size = assembler.total_size(ctx);
    let Some(max_addr) = config.highest_start(size) else {
        return_errno_with_msg!(
            Errno::AddressReservationFailure,
            "the initrd does not fit below the address limit"
        );
    };

    let request = RangeRequest {
        min_addr: 0,
        max_addr,
        size,
        align: config.initrd_align,
        preference: Preference::High,
    };
    let chunk = relocator.alloc_chunk_align(&request).map_err(|err| {
        warn!("cannot reserve {:#x} bytes for the initrd: {}", size, err);
        Error::with_msg(Errno::AddressReservationFailure, "no room for the initrd")
    })?;

    let dest = relocator
        .chunk_mut(&chunk)
        .map_err(|_| Error::with_msg(Errno::AddressReservationFailure, "the initrd chunk is gone"))?;
    assembler.copy_into(ctx, files, paths, dest)?;

    debug!("initrd at {:#x}, {:#x} bytes", chunk.target(), size);
    Ok(InitrdPlacement { size, chunk })
}
