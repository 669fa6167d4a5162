// SPDX-License-Identifier: MPL-2.0

//! Assembling one initrd image out of several files.

use align_ext::AlignExt;

use crate::{fs::FileSource, prelude::*};

/// Builds an initrd image from a list of files.
///
/// The assembler is driven in four steps: `open` checks the sources and
/// fixes the layout, `total_size` reports how much memory to reserve,
/// `copy_into` writes the image and `close` releases the context. `close` is
/// called whether or not the other steps succeed.
pub trait InitrdAssembler {
    type Context;

    fn open(&mut self, files: &mut dyn FileSource, paths: &[&str]) -> Result<Self::Context>;

    fn total_size(&self, ctx: &Self::Context) -> usize;

    /// Writes the assembled image to the front of `dest`.
    fn copy_into(
        &mut self,
        ctx: &mut Self::Context,
        files: &mut dyn FileSource,
        paths: &[&str],
        dest: &mut [u8],
    ) -> Result<()>;

    fn close(&mut self, ctx: Self::Context);
}

/// Each file in a concatenated image starts at this boundary.
const FILE_ALIGN: usize = 4;

/// An assembler that concatenates files, each starting on a 4-byte boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcatAssembler;

/// Where each file goes in a concatenated image.
#[derive(Debug)]
pub struct ConcatContext {
    entries: Vec<ConcatEntry>,
    total: usize,
}

#[derive(Debug)]
struct ConcatEntry {
    offset: usize,
    size: usize,
}

impl InitrdAssembler for ConcatAssembler {
    type Context = ConcatContext;

    fn open(&mut self, files: &mut dyn FileSource, paths: &[&str]) -> Result<ConcatContext> {
        if paths.is_empty() {
            return_errno_with_msg!(Errno::BadArgument, "no initrd given");
        }

        let mut entries = Vec::with_capacity(paths.len());
        let mut total = 0usize;
        for path in paths {
            let Some(size) = files.size(path) else {
                warn!("initrd file {} does not exist", path);
                return_errno_with_msg!(Errno::AssemblyFailure, "an initrd file does not exist");
            };
            let offset = total
                .checked_add(FILE_ALIGN - 1)
                .map(|end| end.align_down(FILE_ALIGN))
                .ok_or(Error::with_msg(Errno::AssemblyFailure, "the initrd is too large"))?;
            total = offset
                .checked_add(size)
                .ok_or(Error::with_msg(Errno::AssemblyFailure, "the initrd is too large"))?;
            entries.push(ConcatEntry { offset, size });
        }

        if total == 0 {
            return_errno_with_msg!(Errno::AssemblyFailure, "the initrd is empty");
        }
        Ok(ConcatContext { entries, total })
    }

    fn total_size(&self, ctx: &ConcatContext) -> usize {
        ctx.total
    }

    fn copy_into(
        &mut self,
        ctx: &mut ConcatContext,
        files: &mut dyn FileSource,
        paths: &[&str],
        dest: &mut [u8],
    ) -> Result<()> {
        if paths.len() != ctx.entries.len() || dest.len() < ctx.total {
            return_errno_with_msg!(Errno::AssemblyFailure, "the context does not match the request");
        }

        let mut written = 0;
        for (path, entry) in paths.iter().zip(ctx.entries.iter()) {
            let data = match files.read(path) {
                Some(data) if data.len() == entry.size => data,
                _ => return_errno_with_msg!(Errno::AssemblyFailure, "an initrd file changed"),
            };
            dest[written..entry.offset].fill(0);
            dest[entry.offset..entry.offset + entry.size].copy_from_slice(data);
            written = entry.offset + entry.size;
        }
        Ok(())
    }

    fn close(&mut self, ctx: ConcatContext) {
        debug!(
            "closing initrd context: {} files, {:#x} bytes",
            ctx.entries.len(),
            ctx.total
        );
    }
}
