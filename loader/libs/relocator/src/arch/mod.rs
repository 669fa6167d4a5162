// SPDX-License-Identifier: MPL-2.0

//! Architecture-specific copy-in and control transfer.

use core::{iter::StepBy, ops::Range};

cfg_if::cfg_if! {
    if #[cfg(target_arch = "mips64")] {
        mod mips64;

        pub(crate) use self::mips64::{copy_to_phys, sync_icache, transfer};

        pub(crate) const fn can_transfer() -> bool {
            true
        }
    } else {
        use core::convert::Infallible;

        use crate::{Paddr, RegisterState, RelocError};

        // Hosted builds (tools, tests) can place payloads but never jump.

        pub(crate) const fn can_transfer() -> bool {
            false
        }

        pub(crate) unsafe fn copy_to_phys(_target: Paddr, _data: &[u8]) {
            unreachable!("copy-in is only performed on MIPS64");
        }

        pub(crate) unsafe fn sync_icache(_target: Paddr, _len: usize) {
            unreachable!("cache maintenance is only performed on MIPS64");
        }

        pub(crate) unsafe fn transfer(_state: &RegisterState) -> Result<Infallible, RelocError> {
            Err(RelocError::Unsupported)
        }
    }
}

/// Returns the address of every cache line that `len` bytes at `addr` touch,
/// given a line size of `step` bytes.
///
/// A zero step means the caches need no maintenance and yields nothing.
#[cfg_attr(all(not(target_arch = "mips64"), not(test)), expect(dead_code))]
pub(crate) fn cache_lines(addr: u64, len: usize, step: u64) -> StepBy<Range<u64>> {
    if step == 0 || len == 0 {
        return (0..0).step_by(1);
    }
    let start = addr & !(step - 1);
    let end = addr.saturating_add(len as u64);
    (start..end).step_by(step as usize)
}
