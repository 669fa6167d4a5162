// SPDX-License-Identifier: MPL-2.0

use core::{arch::asm, convert::Infallible};

use super::cache_lines;
use crate::{Paddr, RegisterState, RelocError};

/// The base of the cached, unmapped XKPHYS window (CCA 3).
const XKPHYS_CACHED: u64 = 0x9800_0000_0000_0000;

/// The register the jump goes through (at).
const JUMP_REG: usize = 1;

/// Copies `data` to the physical address `target`.
///
/// # Safety
///
/// The caller must ensure that nothing live resides in the target range.
pub(crate) unsafe fn copy_to_phys(target: Paddr, data: &[u8]) {
    let dst = (XKPHYS_CACHED | target) as *mut u8;
    // SAFETY: XKPHYS maps all physical memory without translation. The
    // caller guarantees the destination is free.
    unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
}

/// Writes back the D-cache and invalidates the I-cache over `len` bytes at
/// the physical address `target`, so that instructions copied there are
/// fetched as written.
///
/// # Safety
///
/// The range must be backed by memory.
pub(crate) unsafe fn sync_icache(target: Paddr, len: usize) {
    let step: u64;
    // SAFETY: SYNCI_Step is always readable in kernel mode.
    unsafe { asm!("rdhwr {0}, $1", out(reg) step, options(nomem, nostack, preserves_flags)) };

    for line in cache_lines(XKPHYS_CACHED | target, len, step) {
        // SAFETY: XKPHYS maps the line and the caller guarantees it is
        // backed by memory.
        unsafe { asm!("synci 0({0})", in(reg) line, options(nostack, preserves_flags)) };
    }
}

/// Installs the argument registers and jumps to the entry.
///
/// # Safety
///
/// The payload must be in place and made visible to instruction fetch.
/// Nothing of the loader survives this call.
pub(crate) unsafe fn transfer(state: &RegisterState) -> Result<Infallible, RelocError> {
    if state.jumpreg != JUMP_REG {
        return Err(RelocError::Unsupported);
    }

    // `at` cannot be an asm operand, so the entry is moved into it last.
    // `sync` completes the `synci`s and `jr.hb` clears the instruction hazard.
    //
    // SAFETY: The caller guarantees the payload is in place.
    unsafe {
        asm!(
            ".set push",
            ".set noat",
            "move $1, {entry}",
            "sync",
            "jr.hb $1",
            "nop",
            ".set pop",
            entry = in(reg) state.gpr[JUMP_REG],
            in("$4") state.gpr[4],
            in("$5") state.gpr[5],
            in("$6") state.gpr[6],
            in("$7") state.gpr[7],
            options(noreturn),
        )
    }
}
