// SPDX-License-Identifier: MPL-2.0

//! Physical memory placement for boot-time payloads.
//!
//! A boot loader never writes its payloads straight into their final
//! physical location: the destination may still be in use by the loader
//! itself or by firmware. Instead, each payload is described as a [`Chunk`]
//! whose contents are staged in loader-owned memory, and all chunks are
//! copied into place at once right before control is transferred.
//!
//! The [`Relocator`] trait is the interface the loader consumes. [`PhysArena`]
//! is the implementation shipped with this crate.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "mips64", feature(asm_experimental_arch))]

extern crate alloc;

mod arch;
mod arena;
mod region;

use core::{convert::Infallible, fmt};

pub use self::{
    arena::PhysArena,
    region::{MemoryRegion, MemoryRegionType},
};

/// A physical address.
pub type Paddr = u64;

/// The number of general purpose registers of a MIPS64 processor.
pub const NR_GPRS: usize = 32;

/// A reserved range of physical memory.
///
/// The handle is only meaningful for the relocator that handed it out, and
/// only until that relocator is unloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    target: Paddr,
    size: usize,
    index: usize,
    generation: u64,
}

impl Chunk {
    pub(crate) const fn new(target: Paddr, size: usize, index: usize, generation: u64) -> Self {
        Self {
            target,
            size,
            index,
            generation,
        }
    }

    /// The physical address where the chunk will live at boot time.
    pub fn target(&self) -> Paddr {
        self.target
    }

    /// The length of the chunk in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The physical address right past the end of the chunk.
    pub fn end(&self) -> Paddr {
        self.target + self.size as Paddr
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

/// Where a ranged allocation should be placed when several candidates fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    NoPreference,
    Low,
    High,
}

/// A request for a chunk anywhere inside a physical address window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    /// The lowest allowed start address.
    pub min_addr: Paddr,
    /// The highest allowed start address.
    pub max_addr: Paddr,
    /// The size of the chunk in bytes.
    pub size: usize,
    /// The alignment of the start address. Must be a power of two.
    pub align: usize,
    pub preference: Preference,
}

/// The processor state installed right before jumping to a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterState {
    /// General purpose registers, indexed by register number.
    pub gpr: [u64; NR_GPRS],
    /// The register holding the jump target.
    pub jumpreg: usize,
}

impl RegisterState {
    /// Creates a zeroed register state.
    pub const fn new() -> Self {
        Self {
            gpr: [0; NR_GPRS],
            jumpreg: 0,
        }
    }

    /// Returns the jump target, or zero if `jumpreg` names no register.
    pub fn entry(&self) -> u64 {
        self.gpr.get(self.jumpreg).copied().unwrap_or(0)
    }
}

impl Default for RegisterState {
    fn default() -> Self {
        Self::new()
    }
}

/// The error type returned by relocators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocError {
    /// Zero size, a bad alignment or an inverted window.
    InvalidArgs,
    /// The request does not fit in any usable memory.
    OutOfRange,
    /// The requested range is usable memory but already taken.
    Overlap,
    /// The chunk was handed out before the last unload.
    StaleChunk,
    /// Control transfer is not possible on this machine.
    Unsupported,
}

impl fmt::Display for RelocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            RelocError::InvalidArgs => "invalid allocation request",
            RelocError::OutOfRange => "no usable memory satisfies the request",
            RelocError::Overlap => "the range is already in use",
            RelocError::StaleChunk => "the chunk has been released",
            RelocError::Unsupported => "cannot transfer control on this machine",
        };
        f.write_str(msg)
    }
}

/// A physical memory arena that places payloads and then jumps into them.
///
/// Fixed-address and ranged allocations are separate operations: the former
/// either gets exactly the requested range or fails, while the latter
/// searches a window.
pub trait Relocator {
    /// Reserves exactly `[target, target + size)`.
    fn alloc_chunk_addr(&mut self, target: Paddr, size: usize) -> Result<Chunk, RelocError>;

    /// Reserves `request.size` bytes somewhere in the requested window.
    fn alloc_chunk_align(&mut self, request: &RangeRequest) -> Result<Chunk, RelocError>;

    /// Returns the staging buffer of a chunk.
    fn chunk(&self, chunk: &Chunk) -> Result<&[u8], RelocError>;

    /// Returns the staging buffer of a chunk for writing.
    fn chunk_mut(&mut self, chunk: &Chunk) -> Result<&mut [u8], RelocError>;

    /// Releases every chunk. Outstanding handles become stale.
    fn unload(&mut self);

    /// The number of live chunks.
    fn chunk_count(&self) -> usize;

    /// Copies every chunk into place and jumps with the given state.
    ///
    /// This only returns on failure.
    fn boot(&mut self, state: &RegisterState) -> Result<Infallible, RelocError>;
}
