// SPDX-License-Identifier: MPL-2.0

//! Loader tunables.
//!
//! There is no configuration file. Values are applied from module arguments
//! of the form `loader.<key>=<value>`, the way kernel command-line module
//! arguments are written, e.g. `loader.log_level=debug loader.addr_limit=0x7fffffff`.

use log::LevelFilter;
use mips_relocator::Paddr;

use crate::{arch::KSEG0_SIZE, prelude::*};

/// The module name that prefixes every configuration key.
pub const MODULE: &str = "loader";

/// The highest physical address the kernel can reach through KSEG0.
pub const MAX_ADDR_LIMIT: Paddr = KSEG0_SIZE - 1;

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// The synthetic token stored as the kernel's first argument.
    pub first_arg: String,
    /// The alignment of the argument block.
    pub args_align: usize,
    /// The alignment of the initrd.
    pub initrd_align: usize,
    /// The highest physical address the argument block and initrd may reach.
    ///
    /// Values above [`MAX_ADDR_LIMIT`] are treated as [`MAX_ADDR_LIMIT`].
    pub addr_limit: Paddr,
    pub log_level: LevelFilter,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            first_arg: "a0".to_string(),
            args_align: 8,
            initrd_align: 0x10000,
            addr_limit: MAX_ADDR_LIMIT,
            log_level: LevelFilter::Warn,
        }
    }
}

impl LoaderConfig {
    /// Builds a configuration from the `loader.*` arguments of a command line.
    ///
    /// Arguments of other modules are ignored. Invalid values are reported
    /// and leave the default in place.
    pub fn from_args(cmdline: &str) -> Self {
        let mut config = Self::default();
        for arg in cmdline.split_whitespace() {
            let Some((entry, value)) = arg.split_once('=') else {
                continue;
            };
            let Some((module, key)) = entry.split_once('.') else {
                continue;
            };
            if module != MODULE {
                continue;
            }
            if let Err(err) = config.apply(key, value) {
                warn!("ignoring {}: {}", arg, err);
            }
        }
        config
    }

    /// Sets one tunable.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "first_arg" => {
                if value.is_empty() || value.contains('\0') {
                    return_errno_with_msg!(Errno::BadArgument, "first_arg must be a non-empty string");
                }
                self.first_arg = value.to_string();
            }
            "args_align" => {
                let align = parse_align(value)?;
                if align < 8 {
                    return_errno_with_msg!(Errno::BadArgument, "args_align must be at least 8");
                }
                self.args_align = align;
            }
            "initrd_align" => {
                let align = parse_align(value)?;
                if align < 8 {
                    return_errno_with_msg!(Errno::BadArgument, "initrd_align must be at least 8");
                }
                self.initrd_align = align;
            }
            "addr_limit" => {
                let limit = parse_number(value)?;
                if limit > MAX_ADDR_LIMIT {
                    return_errno_with_msg!(
                        Errno::BadArgument,
                        "addr_limit must lie within the KSEG0 window"
                    );
                }
                self.addr_limit = limit;
            }
            "log_level" => self.log_level = parse_log_level(value),
            _ => return_errno_with_msg!(Errno::BadArgument, "unknown configuration key"),
        }
        Ok(())
    }

    /// Returns the highest start address of a `size`-byte range that ends at
    /// or below the address limit.
    pub fn highest_start(&self, size: usize) -> Option<Paddr> {
        let end = self.addr_limit.min(MAX_ADDR_LIMIT) + 1;
        end.checked_sub(size as Paddr)
    }
}

fn parse_number(value: &str) -> Result<u64> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| Error::with_msg(Errno::BadArgument, "not a number"))
}

fn parse_align(value: &str) -> Result<usize> {
    let align = usize::try_from(parse_number(value)?)
        .map_err(|_| Error::with_msg(Errno::BadArgument, "alignment is too large"))?;
    if !align.is_power_of_two() {
        return_errno_with_msg!(Errno::BadArgument, "alignment must be a power of two");
    }
    Ok(align)
}

/// Parses a log level. Anything unrecognized turns logging off.
pub fn parse_log_level(value: &str) -> LevelFilter {
    match value {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        // Otherwise, OFF
        _ => LevelFilter::Off,
    }
}
