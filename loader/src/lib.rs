// SPDX-License-Identifier: MPL-2.0

//! A loader that boots Linux on 64-bit MIPS machines.
//!
//! The loader runs before any operating system exists. It places an ELF
//! kernel at the physical address it links at, builds the argument block the
//! kernel reads its command line from, optionally places an initrd and
//! advertises it through `rd_start=`/`rd_size=` arguments, and finally jumps
//! to the kernel with `a0 = argc` and `a1 = argv`.
//!
//! All physical memory comes from a [`Relocator`]. Payloads are staged and
//! only copied to their final location when [`LinuxLoader::boot`] transfers
//! control.
//!
//! ```ignore
//! let config = LoaderConfig::from_args(cmdline);
//! logger::init_with_config(console, &config);
//! let arena = PhysArena::new(memory_map);
//! let mut loader = LinuxLoader::new(arena, files, config);
//! command::dispatch(&mut loader, "linux /boot/vmlinux console=ttyS0")?;
//! command::dispatch(&mut loader, "initrd /boot/initrd.img")?;
//! command::dispatch(&mut loader, "boot")?;
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod args;
pub mod command;
pub mod config;
pub mod error;
pub mod fs;
pub mod image;
pub mod initrd;
pub mod kernel;
pub mod lifecycle;
pub mod logger;
pub mod prelude;

pub use mips_relocator::{
    MemoryRegion, MemoryRegionType, PhysArena, RegisterState, Relocator,
};

pub use self::{
    args::ArgumentBlock,
    command::{dispatch, Command},
    config::LoaderConfig,
    error::{Errno, Error},
    fs::{FileSource, MemoryFs},
    image::{BinaryImageInfo, Bitness, KernelImage},
    initrd::{ConcatAssembler, InitrdAssembler, InitrdPlacement},
    kernel::KernelPlacement,
    lifecycle::{LinuxLoader, LoaderState},
};
