// SPDX-License-Identifier: MPL-2.0

use mips_linux_loader::{
    arch::{REG_A0, REG_A1, REG_AT},
    dispatch, Bitness, Errno, LinuxLoader, LoaderConfig, LoaderState, MemoryFs, Relocator,
};

use crate::util::*;

#[test]
fn kernel64_sets_up_arguments_and_registers() {
    let mut loader = loader();
    loader
        .load_kernel(&[KERNEL64_PATH, "console=ttyS0"])
        .unwrap();

    assert_eq!(loader.state(), LoaderState::KernelLoaded);
    assert_eq!(loader.argc(), Some(2));
    assert_eq!(argv(&loader), ["a0", "console=ttyS0"]);

    let block = loader.argument_block().unwrap();
    assert_eq!(block.size() % 8, 0);
    assert!(block.base() + block.size() as u64 <= MEM_TOP);
    assert_eq!(block.vaddr() as u64, 0x8000_0000 | block.base());
    // The initrd slots and the terminator stay empty.
    let bytes = loader.argument_bytes().unwrap();
    assert_eq!(slot(bytes, 2), 0);
    assert_eq!(slot(bytes, 3), 0);
    assert_eq!(slot(bytes, 4), 0);

    let state = loader.register_state().unwrap();
    assert_eq!(state.jumpreg, REG_AT);
    assert_eq!(state.entry(), ENTRY64);
    assert_eq!(state.gpr[REG_A0], 2);
    // The kernel dereferences argv through sign-extended KSEG0.
    assert_eq!(state.gpr[REG_A1], 0xffff_ffff_8000_0000 | block.base());
    for (reg, value) in state.gpr.iter().enumerate() {
        if ![REG_AT, REG_A0, REG_A1].contains(&reg) {
            assert_eq!(*value, 0, "register {reg}");
        }
    }
}

#[test]
fn argv_pointers_are_kseg0_addresses() {
    let mut loader = loader();
    loader
        .load_kernel(&[KERNEL64_PATH, "console=ttyS0"])
        .unwrap();
    loader.load_initrd(&[INITRD_PATH]).unwrap();

    let block = loader.argument_block().unwrap();
    let bytes = loader.argument_bytes().unwrap();
    let end = 0x8000_0000 | (block.base() + block.size() as u64);
    for i in 0..4 {
        let ptr = slot(bytes, i) as u64;
        assert!((0x8000_0000 | block.base()..end).contains(&ptr), "argv[{i}] = {ptr:#x}");
    }
    assert!(loader.register_state().unwrap().gpr[REG_A1] >= 0xffff_ffff_8000_0000);
}

#[test]
fn kernel64_segments_land_at_their_offsets() {
    let mut loader = loader();
    loader.load_kernel(&[KERNEL64_PATH]).unwrap();

    let kernel = loader.kernel().unwrap();
    let info = kernel.info();
    assert_eq!(info.bitness, Bitness::Bits64);
    assert_eq!(info.base, 0x10_0000);
    assert_eq!(info.link_base, 0xffff_ffff_8010_0000);
    assert_eq!(info.footprint, 0x6000);
    assert_eq!(kernel.chunk().target(), 0x10_0000);

    let window = loader.relocator().chunk(kernel.chunk()).unwrap();
    assert_eq!(&window[..0x1000], text().as_slice());
    assert!(window[0x1000..0x4000].iter().all(|&b| b == 0));
    assert_eq!(&window[0x4000..0x4800], data().as_slice());
    assert!(window[0x4800..0x6000].iter().all(|&b| b == 0));
}

#[test]
fn kernel32_entry_is_passed_through() {
    let mut loader = loader();
    loader.load_kernel(&[KERNEL32_PATH, "quiet"]).unwrap();

    let info = *loader.kernel().unwrap().info();
    assert_eq!(info.bitness, Bitness::Bits32);
    assert_eq!(info.base, 0x10_0000);
    assert_eq!(info.footprint, 0x1800);

    let state = loader.register_state().unwrap();
    assert_eq!(state.gpr[REG_AT], ENTRY32);
    assert_eq!(state.gpr[REG_A0], 2);
    assert_eq!(argv(&loader), ["a0", "quiet"]);
}

#[test]
fn invalid_image_keeps_previous_load() {
    let mut loader = loader();
    loader.load_kernel(&[KERNEL64_PATH]).unwrap();
    let before = loader.relocator().chunk_count();

    let fs = loader.files_mut();
    let shared_object = ElfBuilder::elf64(ENTRY64)
        .object_type(3)
        .segment(0x20_0000, b"x", 8)
        .build();
    let x86_64 = ElfBuilder::elf64(ENTRY64)
        .machine(62)
        .segment(0x20_0000, b"x", 8)
        .build();
    fs.insert("/dyn", shared_object);
    fs.insert("/x86", x86_64);
    fs.insert("/garbage", b"#!/bin/sh\n".to_vec());
    let mut class3 = kernel64();
    class3[4] = 3;
    fs.insert("/class3", class3);

    for (path, errno) in [
        ("/dyn", Errno::BadImageFormat),
        ("/x86", Errno::BadImageFormat),
        ("/garbage", Errno::BadImageFormat),
        ("/class3", Errno::UnknownImageType),
        ("/nope", Errno::NotFound),
    ] {
        let err = loader.load_kernel(&[path]).unwrap_err();
        assert_eq!(err.errno(), errno, "{path}");
        assert_eq!(loader.state(), LoaderState::KernelLoaded);
        assert_eq!(loader.relocator().chunk_count(), before);
    }
}

#[test]
fn unplaceable_kernel_releases_previous_load() {
    let mut loader = loader();
    loader.load_kernel(&[KERNEL64_PATH]).unwrap();

    // Linked above the end of memory.
    let high = ElfBuilder::elf64(0x4000_0000)
        .segment(0x4000_0000, &text(), 0x1000)
        .build();
    // Linked on top of firmware memory.
    let low = ElfBuilder::elf32(0x8000_0000)
        .segment(0x8000_0000, &text(), 0x1000)
        .build();
    loader.files_mut().insert("/high", high);
    loader.files_mut().insert("/low", low);

    for path in ["/high", "/low"] {
        let err = loader.load_kernel(&[path]).unwrap_err();
        assert_eq!(err.errno(), Errno::AddressReservationFailure);
        assert_eq!(loader.state(), LoaderState::Unloaded);
        assert_eq!(loader.relocator().chunk_count(), 0);
    }
}

#[test]
fn bad_segments_are_rejected() {
    let mut loader = loader();

    // The file holds more bytes than the segment occupies in memory.
    let oversized = ElfBuilder::elf64(ENTRY64)
        .segment(0xffff_ffff_8020_0000, &text(), 0x800)
        .build();
    loader.files_mut().insert("/oversized", oversized);
    let err = loader.load_kernel(&["/oversized"]).unwrap_err();
    assert_eq!(err.errno(), Errno::SegmentLoadFailure);
    assert_eq!(loader.state(), LoaderState::Unloaded);
    // The kernel reservation stays until the next load.
    assert_eq!(loader.relocator().chunk_count(), 1);

    let notes_only = ElfBuilder::elf64(ENTRY64).note(b"Linux\0\0\0").build();
    loader.files_mut().insert("/notes", notes_only);
    let err = loader.load_kernel(&["/notes"]).unwrap_err();
    assert_eq!(err.errno(), Errno::BadImageFormat);
    assert_eq!(loader.relocator().chunk_count(), 0);

    let empty = ElfBuilder::elf64(ENTRY64)
        .segment(0xffff_ffff_8020_0000, &[], 0)
        .build();
    loader.files_mut().insert("/empty", empty);
    let err = loader.load_kernel(&["/empty"]).unwrap_err();
    assert_eq!(err.errno(), Errno::BadImageFormat);
}

#[test]
fn reload_releases_previous_reservations() {
    let mut loader = loader();
    loader
        .load_kernel(&[KERNEL64_PATH, "console=ttyS0"])
        .unwrap();
    loader.load_initrd(&[INITRD_PATH]).unwrap();
    assert_eq!(loader.relocator().chunk_count(), 3);

    loader.load_kernel(&[KERNEL32_PATH]).unwrap();
    assert_eq!(loader.state(), LoaderState::KernelLoaded);
    assert_eq!(loader.relocator().chunk_count(), 2);
    let expected = 0x1800 + loader.argument_block().unwrap().size();
    assert_eq!(loader.relocator().reserved_bytes(), expected);
    assert_eq!(argv(&loader), ["a0"]);
}

#[test]
fn unload_is_idempotent() {
    let mut loader = loader();
    loader.load_kernel(&[KERNEL64_PATH]).unwrap();

    loader.reset();
    assert_eq!(loader.state(), LoaderState::Unloaded);
    assert_eq!(loader.relocator().chunk_count(), 0);
    loader.reset();
    assert_eq!(loader.state(), LoaderState::Unloaded);
    assert_eq!(loader.relocator().chunk_count(), 0);
    assert_eq!(
        loader.register_state().unwrap_err().errno(),
        Errno::SequencingError
    );
}

#[test]
fn finish_returns_empty_arena() {
    let mut loader = loader();
    loader.load_kernel(&[KERNEL64_PATH]).unwrap();
    let (arena, mut files) = loader.finish();
    assert_eq!(arena.chunk_count(), 0);
    assert_eq!(arena.reserved_bytes(), 0);
    assert!(files.remove(KERNEL64_PATH).is_some());
}

#[cfg(not(target_arch = "mips64"))]
#[test]
fn boot_off_target_fails_without_side_effects() {
    let mut loader = loader();
    loader.load_kernel(&[KERNEL64_PATH]).unwrap();
    let err = loader.boot().unwrap_err();
    assert_eq!(err.errno(), Errno::TransferFailure);
    assert_eq!(loader.state(), LoaderState::KernelLoaded);
    assert_eq!(loader.relocator().chunk_count(), 2);
}

#[test]
fn config_moves_argument_block() {
    let mut config =
        LoaderConfig::from_args("loader.addr_limit=0x3fffff loader.first_arg=vmlinux");
    config.apply("args_align", "0x1000").unwrap();
    let mut loader = LinuxLoader::new(arena(), files(), config);
    loader.load_kernel(&[KERNEL64_PATH, "ro"]).unwrap();

    let block = loader.argument_block().unwrap();
    assert_eq!(block.base() % 0x1000, 0);
    assert_eq!(block.vaddr() % 0x1000, 0);
    assert!(block.base() + block.size() as u64 <= 0x40_0000);
    assert_eq!(argv(&loader), ["vmlinux", "ro"]);
}

#[test]
fn dispatch_runs_a_session() {
    let mut loader = LinuxLoader::new(arena(), files(), LoaderConfig::default());
    for line in [
        "set loader.log_level=info",
        "",
        r#"linux /boot/vmlinux console=ttyS0 "init=/bin/sh -x""#,
        "initrd /boot/initrd.img",
    ] {
        dispatch(&mut loader, line).unwrap();
    }
    assert_eq!(loader.state(), LoaderState::InitrdLoaded);
    assert_eq!(loader.argc(), Some(5));
    assert_eq!(argv(&loader)[..3], ["a0", "console=ttyS0", "init=/bin/sh -x"]);

    dispatch(&mut loader, "unload").unwrap();
    assert_eq!(loader.state(), LoaderState::Unloaded);
}

#[test]
fn empty_file_source_reports_missing_kernel() {
    let mut loader = LinuxLoader::new(arena(), MemoryFs::new(), LoaderConfig::default());
    assert_eq!(
        loader.load_kernel(&[KERNEL64_PATH]).unwrap_err().errno(),
        Errno::NotFound
    );
    assert_eq!(
        loader.load_kernel(&[]).unwrap_err().errno(),
        Errno::BadArgument
    );
}

#[test]
fn rejected_commands_are_logged() {
    use std::{
        fmt,
        sync::{Arc, Mutex},
    };

    struct SharedSink(Arc<Mutex<String>>);

    impl fmt::Write for SharedSink {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0.lock().unwrap().push_str(s);
            Ok(())
        }
    }

    let out = Arc::new(Mutex::new(String::new()));
    let sink = Box::leak(Box::new(SharedSink(out.clone())));
    let config = LoaderConfig::from_args("console=ttyS0 loader.log_level=warn");
    mips_linux_loader::logger::init_with_config(sink, &config);

    let mut loader = LinuxLoader::new(arena(), MemoryFs::new(), config);
    assert!(dispatch(&mut loader, "linux /boot/missing").is_err());
    assert!(out
        .lock()
        .unwrap()
        .contains("WARN : linux: NotFound: the kernel file does not exist\n"));
}
