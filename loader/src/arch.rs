// SPDX-License-Identifier: MPL-2.0

//! MIPS64 address and register conventions used at kernel entry.

use mips_relocator::Paddr;

/// The mask that strips the KSEG0/KSEG1 segment bits.
const COMPAT_SEGMENT_MASK: u64 = 0x1fff_ffff;

/// The base of KSEG0, the cached direct-mapped kernel segment.
const KSEG0: u64 = 0x8000_0000;

/// The amount of physical memory reachable through KSEG0.
pub const KSEG0_SIZE: u64 = COMPAT_SEGMENT_MASK + 1;

/// `at`: the register the loader jumps through.
pub const REG_AT: usize = 1;
/// `a0`: the argument count.
pub const REG_A0: usize = 4;
/// `a1`: the KSEG0 address of the argument block.
pub const REG_A1: usize = 5;
/// `a2`: the environment pointer, unused.
pub const REG_A2: usize = 6;
/// `a3`: unused.
pub const REG_A3: usize = 7;

/// Translates a load address found in a kernel image to a physical address.
///
/// KSEG0 and KSEG1 addresses, in their 32-bit form or sign-extended to 64
/// bits, are direct-mapped windows onto the low 512 MiB of physical memory.
/// Any other address is taken to be physical already.
pub fn vtop(addr: u64) -> Paddr {
    const KSSEG: u64 = 0xc000_0000;
    const SIGN_EXT: u64 = 0xffff_ffff_0000_0000;

    let low = addr & 0xffff_ffff;
    let high = addr & SIGN_EXT;
    let in_compat = (KSEG0..KSSEG).contains(&low) && (high == 0 || high == SIGN_EXT);
    if in_compat {
        addr & COMPAT_SEGMENT_MASK
    } else {
        addr
    }
}

/// Translates a physical address to the KSEG0 address the kernel uses to
/// reach it.
///
/// The result is in its 32-bit form, the way argument slots and `rd_start=`
/// carry it. Addresses beyond the KSEG0 window have no such alias.
pub fn ptov(paddr: Paddr) -> Option<u32> {
    (paddr < KSEG0_SIZE).then(|| (KSEG0 | paddr) as u32)
}

/// Sign-extends a 32-bit compatibility address to a 64-bit register value.
pub fn sign_extend(addr: u32) -> u64 {
    addr as i32 as i64 as u64
}
