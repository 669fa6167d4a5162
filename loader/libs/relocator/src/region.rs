// SPDX-License-Identifier: MPL-2.0

//! Physical memory regions known to the arena.

use alloc::vec::Vec;

use crate::Paddr;

/// The type of a physical memory region.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum MemoryRegionType {
    /// Maybe points to an unplugged DIMM module. It's bad anyway.
    BadMemory = 0,
    /// Reserved by firmware, do not use.
    Reserved = 1,
    /// Occupied by the loader's own image, stack or heap.
    ///
    /// Payloads must never be placed here since the loader is still running
    /// from it when the payloads are copied into place.
    Loader = 2,
    /// Free for payloads.
    Usable = 3,
}

/// A physical memory region.
///
/// Regions of different types may overlap. Non-usable regions always win.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct MemoryRegion {
    base: Paddr,
    len: u64,
    typ: MemoryRegionType,
}

impl MemoryRegion {
    /// Constructs a memory region.
    pub const fn new(base: Paddr, len: u64, typ: MemoryRegionType) -> Self {
        MemoryRegion { base, len, typ }
    }

    /// Constructs a usable memory region.
    pub const fn usable(base: Paddr, len: u64) -> Self {
        Self::new(base, len, MemoryRegionType::Usable)
    }

    /// The physical address of the base of the region.
    pub fn base(&self) -> Paddr {
        self.base
    }

    /// The length in bytes of the region.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Checks whether the region is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The physical address right past the end of the region.
    ///
    /// Saturates so that a region reaching the top of the address space
    /// does not wrap.
    pub fn end(&self) -> Paddr {
        self.base.saturating_add(self.len)
    }

    /// The type of the region.
    pub fn typ(&self) -> MemoryRegionType {
        self.typ
    }

    /// Checks whether `[base, base + len)` lies entirely inside the region.
    pub fn contains(&self, base: Paddr, len: u64) -> bool {
        base >= self.base && base.checked_add(len).is_some_and(|end| end <= self.end())
    }

    /// Removes range `t` from self, resulting in 0, 1 or 2 truncated ranges.
    pub fn truncate(&self, t: &MemoryRegion) -> [Option<MemoryRegion>; 2] {
        let (start, end) = (self.base, self.end());
        let (t_start, t_end) = (t.base, t.end());

        if t_end <= start || t_start >= end {
            return [Some(*self), None];
        }

        let left = (t_start > start).then(|| MemoryRegion {
            base: start,
            len: t_start - start,
            typ: self.typ,
        });
        let right = (t_end < end).then(|| MemoryRegion {
            base: t_end,
            len: end - t_end,
            typ: self.typ,
        });
        [left, right]
    }
}

/// Truncates the usable regions by every other region and by `taken`.
///
/// The result is sorted by base address and does not overlap.
pub(crate) fn free_regions(regions: &[MemoryRegion], taken: &[MemoryRegion]) -> Vec<MemoryRegion> {
    let mut free: Vec<MemoryRegion> = regions
        .iter()
        .filter(|r| r.typ == MemoryRegionType::Usable && !r.is_empty())
        .copied()
        .collect();

    let unusable = regions
        .iter()
        .filter(|r| r.typ != MemoryRegionType::Usable)
        .chain(taken.iter());

    for hole in unusable {
        free = free
            .iter()
            .flat_map(|r| r.truncate(hole))
            .flatten()
            .filter(|r| !r.is_empty())
            .collect();
    }

    // Usable regions reported twice must not yield the same range twice.
    free.sort();
    let mut merged: Vec<MemoryRegion> = Vec::with_capacity(free.len());
    for r in free {
        match merged.last_mut() {
            Some(last) if r.base <= last.end() => {
                let end = last.end().max(r.end());
                last.len = end - last.base;
            }
            _ => merged.push(r),
        }
    }
    merged
}
