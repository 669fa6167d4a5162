// SPDX-License-Identifier: MPL-2.0

use mips_relocator::{Chunk, Relocator};

use crate::{
    image::{BinaryImageInfo, KernelImage},
    prelude::*,
};

/// The kernel of the current load.
#[derive(Debug)]
pub struct KernelPlacement {
    info: BinaryImageInfo,
    chunk: Chunk,
}

impl KernelPlacement {
    pub fn info(&self) -> &BinaryImageInfo {
        &self.info
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// The entry point as written in the image.
    pub fn entry(&self) -> u64 {
        self.info.entry
    }
}

/// Reserves the exact range the image links at and loads its segments there.
pub fn place_kernel<R: Relocator>(relocator: &mut R, image: &KernelImage) -> Result<KernelPlacement> {
    let info = image.resolve()?;

    let chunk = relocator
        .alloc_chunk_addr(info.base, info.footprint)
        .map_err(|err| {
            warn!(
                "cannot reserve {:#x}..{:#x} for the kernel: {}",
                info.base,
                info.base.saturating_add(info.footprint as u64),
                err
            );
            Error::with_msg(Errno::AddressReservationFailure, "the kernel range is unavailable")
        })?;

    let window = relocator
        .chunk_mut(&chunk)
        .map_err(|_| Error::with_msg(Errno::SegmentLoadFailure, "the kernel chunk is gone"))?;
    image.load_segments(window, info.link_base)?;

    Ok(KernelPlacement { info, chunk })
}
