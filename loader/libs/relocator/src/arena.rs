// SPDX-License-Identifier: MPL-2.0

use alloc::{vec, vec::Vec};
use core::convert::Infallible;

use align_ext::AlignExt;
use log::{debug, warn};

use crate::{
    arch,
    region::{free_regions, MemoryRegion, MemoryRegionType},
    Chunk, Paddr, Preference, RangeRequest, RegisterState, RelocError, Relocator,
};

/// A chunk waiting to be copied to its target.
struct StagedChunk {
    target: Paddr,
    data: Vec<u8>,
}

/// A relocator over a fixed map of physical memory.
///
/// Chunk contents are staged in heap buffers owned by the arena and copied
/// to their targets by [`Relocator::boot`]. The memory map must describe the
/// loader's own image and heap as [`MemoryRegionType::Loader`] (or leave them
/// out of the usable regions), otherwise a chunk may be placed on top of the
/// staging buffers themselves.
pub struct PhysArena {
    regions: Vec<MemoryRegion>,
    chunks: Vec<StagedChunk>,
    generation: u64,
}

impl PhysArena {
    /// Creates an arena over the given memory map.
    pub fn new(regions: impl IntoIterator<Item = MemoryRegion>) -> Self {
        Self {
            regions: regions.into_iter().collect(),
            chunks: Vec::new(),
            generation: 0,
        }
    }

    /// Returns the memory map.
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// The total size of all live chunks in bytes.
    pub fn reserved_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }

    /// Iterates over the live chunks as `(target, size)` pairs.
    pub fn reservations(&self) -> impl Iterator<Item = (Paddr, usize)> + '_ {
        self.chunks.iter().map(|c| (c.target, c.data.len()))
    }

    fn taken(&self) -> Vec<MemoryRegion> {
        self.chunks
            .iter()
            .map(|c| MemoryRegion::usable(c.target, c.data.len() as u64))
            .collect()
    }

    fn push(&mut self, target: Paddr, size: usize) -> Chunk {
        let index = self.chunks.len();
        self.chunks.push(StagedChunk {
            target,
            data: vec![0; size],
        });
        debug!(
            "reserved chunk #{} at {:#x}..{:#x}",
            index,
            target,
            target + size as Paddr
        );
        Chunk::new(target, size, index, self.generation)
    }

    fn staged(&self, chunk: &Chunk) -> Result<&StagedChunk, RelocError> {
        if chunk.generation() != self.generation {
            return Err(RelocError::StaleChunk);
        }
        self.chunks.get(chunk.index()).ok_or(RelocError::StaleChunk)
    }

    fn staged_mut(&mut self, chunk: &Chunk) -> Result<&mut StagedChunk, RelocError> {
        if chunk.generation() != self.generation {
            return Err(RelocError::StaleChunk);
        }
        self.chunks
            .get_mut(chunk.index())
            .ok_or(RelocError::StaleChunk)
    }
}

/// Returns the start of the placement of `request` inside `free`, if any.
fn candidate_in(free: &MemoryRegion, request: &RangeRequest) -> Option<Paddr> {
    let size = request.size as u64;
    let align = request.align as u64;

    let lowest = free.base().max(request.min_addr);
    let lowest = if align > 1 {
        lowest.checked_add(align - 1)? & !(align - 1)
    } else {
        lowest
    };
    let highest = free.end().checked_sub(size)?.min(request.max_addr);
    let highest = if align > 1 {
        highest.align_down(align)
    } else {
        highest
    };

    if lowest > highest {
        return None;
    }
    match request.preference {
        Preference::High => Some(highest),
        Preference::Low | Preference::NoPreference => Some(lowest),
    }
}

impl Relocator for PhysArena {
    fn alloc_chunk_addr(&mut self, target: Paddr, size: usize) -> Result<Chunk, RelocError> {
        if size == 0 {
            return Err(RelocError::InvalidArgs);
        }
        let len = size as u64;
        if target.checked_add(len).is_none() {
            return Err(RelocError::OutOfRange);
        }

        let free = free_regions(&self.regions, &self.taken());
        if free.iter().any(|r| r.contains(target, len)) {
            return Ok(self.push(target, size));
        }

        let in_usable = self
            .regions
            .iter()
            .any(|r| r.typ() == MemoryRegionType::Usable && r.contains(target, len));
        if in_usable {
            warn!("{:#x}..{:#x} is already in use", target, target + len);
            Err(RelocError::Overlap)
        } else {
            warn!("{:#x}..{:#x} is not usable memory", target, target + len);
            Err(RelocError::OutOfRange)
        }
    }

    fn alloc_chunk_align(&mut self, request: &RangeRequest) -> Result<Chunk, RelocError> {
        if request.size == 0
            || !request.align.is_power_of_two()
            || request.min_addr > request.max_addr
        {
            return Err(RelocError::InvalidArgs);
        }

        let free = free_regions(&self.regions, &self.taken());
        let found = match request.preference {
            Preference::High => free.iter().rev().find_map(|r| candidate_in(r, request)),
            Preference::Low | Preference::NoPreference => {
                free.iter().find_map(|r| candidate_in(r, request))
            }
        };

        match found {
            Some(target) => Ok(self.push(target, request.size)),
            None => {
                warn!(
                    "no room for {:#x} bytes aligned to {:#x} in {:#x}..={:#x}",
                    request.size, request.align, request.min_addr, request.max_addr
                );
                Err(RelocError::OutOfRange)
            }
        }
    }

    fn chunk(&self, chunk: &Chunk) -> Result<&[u8], RelocError> {
        self.staged(chunk).map(|c| c.data.as_slice())
    }

    fn chunk_mut(&mut self, chunk: &Chunk) -> Result<&mut [u8], RelocError> {
        self.staged_mut(chunk).map(|c| c.data.as_mut_slice())
    }

    fn unload(&mut self) {
        if !self.chunks.is_empty() {
            debug!("releasing {} chunks", self.chunks.len());
        }
        self.chunks.clear();
        self.generation += 1;
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn boot(&mut self, state: &RegisterState) -> Result<Infallible, RelocError> {
        if !arch::can_transfer() {
            return Err(RelocError::Unsupported);
        }

        for chunk in self.chunks.iter() {
            // SAFETY: The target range was carved out of usable memory that
            // neither firmware nor the loader occupies, and no two chunks
            // overlap.
            unsafe { arch::copy_to_phys(chunk.target, &chunk.data) };
            // SAFETY: The chunk was just copied to usable memory.
            unsafe { arch::sync_icache(chunk.target, chunk.data.len()) };
        }

        // SAFETY: Every payload is in place. The state is handed over as is.
        unsafe { arch::transfer(state) }
    }
}
