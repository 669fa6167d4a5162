// SPDX-License-Identifier: MPL-2.0

use std::{cell::Cell, rc::Rc};

use mips_linux_loader::{
    arch::REG_A0,
    initrd::{ConcatAssembler, ConcatContext},
    prelude::Result,
    Errno, Error, FileSource, InitrdAssembler, LinuxLoader, LoaderConfig, LoaderState, MemoryFs,
    MemoryRegion, MemoryRegionType, PhysArena, Relocator,
};

use crate::util::*;

fn loaded() -> LinuxLoader<PhysArena, MemoryFs> {
    let mut loader = loader();
    loader
        .load_kernel(&[KERNEL64_PATH, "console=ttyS0"])
        .unwrap();
    loader
}

#[test]
fn initrd_is_announced_through_arguments() {
    let mut loader = loaded();
    loader.load_initrd(&[INITRD_PATH]).unwrap();

    assert_eq!(loader.state(), LoaderState::InitrdLoaded);
    assert_eq!(loader.argc(), Some(4));

    let initrd = loader.initrd().unwrap();
    assert_eq!(initrd.size(), INITRD_SIZE);
    assert_eq!(initrd.start() % 0x1_0000, 0);
    // Placed as high as possible, right below the argument block.
    let block = loader.argument_block().unwrap();
    assert_eq!(initrd.start(), 0x0faf_0000);
    assert!(initrd.start() + INITRD_SIZE as u64 <= block.base());

    // The kernel is told the KSEG0 alias of the initrd.
    assert_eq!(
        argv(&loader),
        ["a0", "console=ttyS0", "rd_start=0x8faf0000", "rd_size=0x500000"]
    );
    // The terminator follows the new arguments.
    assert_eq!(slot(loader.argument_bytes().unwrap(), 4), 0);

    let copied = loader.relocator().chunk(initrd.chunk()).unwrap();
    assert_eq!(copied, pattern(INITRD_SIZE, 3).as_slice());

    let state = loader.register_state().unwrap();
    assert_eq!(state.gpr[REG_A0], 4);
}

#[test]
fn initrd_requires_kernel() {
    let mut loader = loader();
    let err = loader.load_initrd(&[INITRD_PATH]).unwrap_err();
    assert_eq!(err.errno(), Errno::SequencingError);
    assert_eq!(loader.state(), LoaderState::Unloaded);
    assert_eq!(loader.relocator().chunk_count(), 0);

    let err = loader.load_initrd(&[]).unwrap_err();
    assert_eq!(err.errno(), Errno::BadArgument);
}

#[test]
fn second_initrd_is_rejected() {
    let mut loader = loaded();
    loader.load_initrd(&[INITRD_PATH]).unwrap();
    let first = argv(&loader);

    loader.files_mut().insert("/other.img", pattern(0x100, 9));
    let err = loader.load_initrd(&["/other.img"]).unwrap_err();
    assert_eq!(err.errno(), Errno::SequencingError);
    assert_eq!(loader.state(), LoaderState::InitrdLoaded);
    assert_eq!(argv(&loader), first);
    assert_eq!(loader.relocator().chunk_count(), 3);
}

#[test]
fn missing_initrd_keeps_kernel_load() {
    let mut loader = loaded();
    let err = loader
        .load_initrd(&[INITRD_PATH, "/boot/missing.img"])
        .unwrap_err();
    assert_eq!(err.errno(), Errno::AssemblyFailure);
    assert_eq!(loader.state(), LoaderState::KernelLoaded);
    assert_eq!(loader.argc(), Some(2));
    assert_eq!(slot(loader.argument_bytes().unwrap(), 2), 0);
    assert_eq!(loader.relocator().chunk_count(), 2);

    // A later attempt may still succeed.
    loader.load_initrd(&[INITRD_PATH]).unwrap();
    assert_eq!(loader.argc(), Some(4));
}

#[test]
fn oversized_initrd_keeps_kernel_load() {
    let arena = PhysArena::new([
        MemoryRegion::usable(0, 4 * MIB),
        MemoryRegion::new(0, MIB, MemoryRegionType::Reserved),
    ]);
    let mut fs = files();
    fs.insert("/big.img", pattern(3 * MIB as usize, 4));
    let mut loader = LinuxLoader::new(arena, fs, LoaderConfig::default());
    loader.load_kernel(&[KERNEL64_PATH]).unwrap();

    let err = loader.load_initrd(&["/big.img"]).unwrap_err();
    assert_eq!(err.errno(), Errno::AddressReservationFailure);
    assert_eq!(loader.state(), LoaderState::KernelLoaded);
    assert_eq!(loader.argc(), Some(1));
    assert_eq!(loader.relocator().chunk_count(), 2);
}

#[test]
fn initrd_above_address_limit_is_refused() {
    let config = LoaderConfig::from_args("loader.addr_limit=0x3fffff");
    let mut loader = LinuxLoader::new(arena(), files(), config);
    loader.load_kernel(&[KERNEL64_PATH]).unwrap();

    // 5 MiB can never end below 4 MiB.
    let err = loader.load_initrd(&[INITRD_PATH]).unwrap_err();
    assert_eq!(err.errno(), Errno::AddressReservationFailure);
    assert_eq!(loader.state(), LoaderState::KernelLoaded);
}

#[test]
fn initrd_files_are_concatenated() {
    let mut loader = loaded();
    loader.files_mut().insert("/part1", pattern(5, 10));
    loader.files_mut().insert("/part2", pattern(6, 20));
    loader.load_initrd(&["/part1", "/part2"]).unwrap();

    let initrd = loader.initrd().unwrap();
    assert_eq!(initrd.size(), 8 + 6);
    let copied = loader.relocator().chunk(initrd.chunk()).unwrap();
    assert_eq!(&copied[..5], pattern(5, 10).as_slice());
    assert_eq!(&copied[5..8], &[0u8; 3]);
    assert_eq!(&copied[8..], pattern(6, 20).as_slice());
    assert_eq!(argv(&loader)[3], "rd_size=0xe");
}

#[test]
fn unload_forgets_initrd() {
    let mut loader = loaded();
    loader.load_initrd(&[INITRD_PATH]).unwrap();
    loader.reset();
    assert_eq!(loader.state(), LoaderState::Unloaded);
    assert_eq!(loader.relocator().chunk_count(), 0);
    assert_eq!(
        loader.load_initrd(&[INITRD_PATH]).unwrap_err().errno(),
        Errno::SequencingError
    );

    // A new kernel load accepts an initrd again.
    loader.load_kernel(&[KERNEL32_PATH]).unwrap();
    loader.load_initrd(&[INITRD_PATH]).unwrap();
    assert_eq!(loader.state(), LoaderState::InitrdLoaded);
    assert_eq!(loader.argc(), Some(3));
}

/// Lays out the image like `ConcatAssembler` but cannot read it back.
struct UnreadableAssembler {
    closed: Rc<Cell<usize>>,
}

impl InitrdAssembler for UnreadableAssembler {
    type Context = ConcatContext;

    fn open(&mut self, files: &mut dyn FileSource, paths: &[&str]) -> Result<ConcatContext> {
        ConcatAssembler.open(files, paths)
    }

    fn total_size(&self, ctx: &ConcatContext) -> usize {
        ConcatAssembler.total_size(ctx)
    }

    fn copy_into(
        &mut self,
        _ctx: &mut ConcatContext,
        _files: &mut dyn FileSource,
        _paths: &[&str],
        _dest: &mut [u8],
    ) -> Result<()> {
        Err(Error::with_msg(Errno::AssemblyFailure, "read error"))
    }

    fn close(&mut self, _ctx: ConcatContext) {
        self.closed.set(self.closed.get() + 1);
    }
}

#[test]
fn failed_copy_keeps_kernel_load() {
    let closed = Rc::new(Cell::new(0));
    let assembler = UnreadableAssembler {
        closed: closed.clone(),
    };
    let mut loader =
        LinuxLoader::with_assembler(arena(), files(), assembler, LoaderConfig::default());
    loader.load_kernel(&[KERNEL64_PATH]).unwrap();
    let before = loader.argument_bytes().unwrap().to_vec();

    let err = loader.load_initrd(&[INITRD_PATH]).unwrap_err();
    assert_eq!(err.errno(), Errno::AssemblyFailure);
    assert_eq!(closed.get(), 1);
    assert_eq!(loader.state(), LoaderState::KernelLoaded);
    assert!(loader.initrd().is_none());
    assert_eq!(loader.argc(), Some(1));
    assert_eq!(loader.argument_bytes().unwrap(), before.as_slice());
    assert!(loader.argument_block().unwrap().pending_slots().is_some());
}

#[test]
fn unbounded_address_limit_stays_in_kseg0() {
    let arena = PhysArena::new([
        MemoryRegion::usable(0, 1024 * MIB),
        MemoryRegion::new(0, MIB, MemoryRegionType::Reserved),
    ]);
    let config = LoaderConfig {
        addr_limit: u64::MAX,
        ..LoaderConfig::default()
    };
    let mut loader = LinuxLoader::new(arena, files(), config);
    loader.load_kernel(&[KERNEL64_PATH]).unwrap();
    loader.load_initrd(&[INITRD_PATH]).unwrap();

    let block = loader.argument_block().unwrap();
    assert!(block.base() + block.size() as u64 <= 512 * MIB);
    let initrd = loader.initrd().unwrap();
    assert_eq!(initrd.start(), 0x1faf_0000);
    assert_eq!(argv(&loader)[1], "rd_start=0x9faf0000");
}
