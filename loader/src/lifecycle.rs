// SPDX-License-Identifier: MPL-2.0

//! The loader context and the order in which commands may run.

use core::convert::Infallible;

use mips_relocator::{Preference, RangeRequest, RegisterState, Relocator};

use crate::{
    arch::{sign_extend, REG_A0, REG_A1, REG_AT},
    args::{block_size, ArgumentBlock},
    config::LoaderConfig,
    fs::FileSource,
    image::KernelImage,
    initrd::{place_initrd, ConcatAssembler, InitrdAssembler, InitrdPlacement},
    kernel::{place_kernel, KernelPlacement},
    prelude::*,
};

/// Where the loader is in a boot attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Unloaded,
    KernelLoaded,
    InitrdLoaded,
}

/// Everything reserved by one successful kernel load.
#[derive(Debug)]
struct Load {
    kernel: KernelPlacement,
    args: ArgumentBlock,
    initrd: Option<InitrdPlacement>,
}

/// The loader context.
///
/// The context owns the relocator every reservation is made from, the file
/// source images are read from and the initrd assembler. A kernel must be
/// loaded before an initrd, at most one initrd may follow, and loading a new
/// kernel releases everything the previous one reserved.
pub struct LinuxLoader<R: Relocator, S: FileSource, A: InitrdAssembler = ConcatAssembler> {
    relocator: R,
    files: S,
    assembler: A,
    config: LoaderConfig,
    load: Option<Load>,
}

impl<R: Relocator, S: FileSource> LinuxLoader<R, S> {
    /// Creates a loader that concatenates initrd files.
    pub fn new(relocator: R, files: S, config: LoaderConfig) -> Self {
        Self::with_assembler(relocator, files, ConcatAssembler, config)
    }
}

impl<R: Relocator, S: FileSource, A: InitrdAssembler> LinuxLoader<R, S, A> {
    pub fn with_assembler(relocator: R, files: S, assembler: A, config: LoaderConfig) -> Self {
        Self {
            relocator,
            files,
            assembler,
            config,
            load: None,
        }
    }

    pub fn state(&self) -> LoaderState {
        match &self.load {
            None => LoaderState::Unloaded,
            Some(load) if load.initrd.is_some() => LoaderState::InitrdLoaded,
            Some(_) => LoaderState::KernelLoaded,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Returns the configuration for changes. They apply to the next load.
    pub fn config_mut(&mut self) -> &mut LoaderConfig {
        &mut self.config
    }

    pub fn relocator(&self) -> &R {
        &self.relocator
    }

    pub fn files_mut(&mut self) -> &mut S {
        &mut self.files
    }

    pub fn kernel(&self) -> Option<&KernelPlacement> {
        self.load.as_ref().map(|load| &load.kernel)
    }

    pub fn argument_block(&self) -> Option<&ArgumentBlock> {
        self.load.as_ref().map(|load| &load.args)
    }

    /// Returns the staged bytes of the argument block.
    pub fn argument_bytes(&self) -> Option<&[u8]> {
        let block = self.argument_block()?;
        self.relocator.chunk(block.chunk()).ok()
    }

    pub fn initrd(&self) -> Option<&InitrdPlacement> {
        self.load.as_ref().and_then(|load| load.initrd.as_ref())
    }

    pub fn argc(&self) -> Option<u32> {
        self.argument_block().map(ArgumentBlock::argc)
    }

    /// Loads a kernel. `args[0]` is the path of the kernel file and the
    /// remaining elements are its command line.
    ///
    /// The image is validated before the previous load is released. Once it
    /// has been released, a failure leaves whatever was reserved so far in
    /// place until the next load or reset.
    pub fn load_kernel(&mut self, args: &[&str]) -> Result<()> {
        let Some(path) = args.first() else {
            return_errno_with_msg!(Errno::BadArgument, "filename expected");
        };
        let image = KernelImage::open(&mut self.files, path)?;

        self.reset();

        let kernel = place_kernel(&mut self.relocator, &image)?;
        let args = self.build_arguments(args)?;
        info!(
            "loaded kernel {} at {:#x}, entry {:#x}, argc {}",
            path,
            kernel.info().base,
            kernel.entry(),
            args.argc()
        );
        self.load = Some(Load {
            kernel,
            args,
            initrd: None,
        });
        Ok(())
    }

    fn build_arguments(&mut self, args: &[&str]) -> Result<ArgumentBlock> {
        let size = block_size(&self.config.first_arg, args);
        let Some(max_addr) = self.config.highest_start(size) else {
            return_errno_with_msg!(
                Errno::AddressReservationFailure,
                "the arguments do not fit below the address limit"
            );
        };
        let request = RangeRequest {
            min_addr: 0,
            max_addr,
            size,
            align: self.config.args_align,
            preference: Preference::High,
        };
        let chunk = self.relocator.alloc_chunk_align(&request).map_err(|err| {
            warn!("cannot reserve {:#x} bytes for the arguments: {}", size, err);
            Error::with_msg(Errno::AddressReservationFailure, "no room for the arguments")
        })?;
        let buf = self.relocator.chunk_mut(&chunk).map_err(|_| {
            Error::with_msg(Errno::AddressReservationFailure, "the argument chunk is gone")
        })?;
        ArgumentBlock::build(chunk, buf, &self.config.first_arg, args)
    }

    /// Loads the initrd, concatenated from `paths`.
    pub fn load_initrd(&mut self, paths: &[&str]) -> Result<()> {
        if paths.is_empty() {
            return_errno_with_msg!(Errno::BadArgument, "filename expected");
        }
        let Some(load) = self.load.as_mut() else {
            return_errno_with_msg!(Errno::SequencingError, "you need to load the kernel first");
        };
        if load.initrd.is_some() {
            return_errno_with_msg!(Errno::SequencingError, "only one initrd command can be issued");
        }

        let placement = place_initrd(
            &mut self.relocator,
            &mut self.assembler,
            &mut self.files,
            paths,
            &self.config,
            &mut load.args,
        )?;
        info!(
            "loaded initrd at {:#x}, {:#x} bytes",
            placement.start(),
            placement.size()
        );
        load.initrd = Some(placement);
        Ok(())
    }

    /// Computes the processor state the kernel is entered with.
    pub fn register_state(&self) -> Result<RegisterState> {
        let Some(load) = self.load.as_ref() else {
            return_errno_with_msg!(Errno::SequencingError, "you need to load the kernel first");
        };
        let mut state = RegisterState::new();
        state.gpr[REG_AT] = load.kernel.entry();
        state.jumpreg = REG_AT;
        state.gpr[REG_A0] = load.args.argc() as u64;
        state.gpr[REG_A1] = sign_extend(load.args.vaddr());
        Ok(state)
    }

    /// Copies every payload into place and enters the kernel.
    ///
    /// This only returns if control cannot be transferred.
    pub fn boot(&mut self) -> Result<Infallible> {
        let state = self.register_state()?;
        info!(
            "booting: entry {:#x}, argc {}, argv {:#x}",
            state.entry(),
            state.gpr[REG_A0],
            state.gpr[REG_A1]
        );
        self.relocator.boot(&state).map_err(|err| {
            warn!("cannot transfer control: {}", err);
            Error::with_msg(Errno::TransferFailure, "the relocator refused to boot")
        })
    }

    /// Releases every reservation and forgets the current load.
    ///
    /// Resetting an unloaded loader does nothing.
    pub fn reset(&mut self) {
        if self.load.take().is_some() {
            debug!("releasing the previous load");
        }
        self.relocator.unload();
    }

    /// Releases every reservation and hands back the relocator and the file
    /// source.
    pub fn finish(mut self) -> (R, S) {
        self.reset();
        (self.relocator, self.files)
    }
}
