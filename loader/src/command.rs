// SPDX-License-Identifier: MPL-2.0

//! The command front end.
//!
//! One line holds one command followed by its arguments, separated by
//! whitespace. Double quotes group words into one argument and are removed:
//!
//! ```text
//! linux /boot/vmlinux console=ttyS0 "init=/bin/sh -x"
//! initrd /boot/initrd.img
//! set loader.log_level=debug
//! boot
//! ```

use mips_relocator::Relocator;

use crate::{
    config::{parse_log_level, MODULE},
    fs::FileSource,
    initrd::InitrdAssembler,
    lifecycle::LinuxLoader,
    logger,
    prelude::*,
};

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `linux <path> [args...]`
    Linux(Vec<String>),
    /// `initrd <path>...`
    Initrd(Vec<String>),
    Boot,
    Unload,
    /// `set loader.<key>=<value>`
    Set { key: String, value: String },
}

// Splits the line by whitespace but preserves the ones protected by double
// quotes (`"`).
fn split_arg(input: &str) -> impl Iterator<Item = &str> {
    let mut inside_quotes = false;

    input
        .split(move |c: char| {
            if c == '"' {
                inside_quotes = !inside_quotes;
            }

            !inside_quotes && c.is_whitespace()
        })
        .filter(|arg| !arg.is_empty())
}

impl Command {
    /// Parses one line. An empty line is `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = split_arg(line).map(|word| word.replace('"', ""));
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<String> = words.collect();

        let command = match name.as_str() {
            "linux" => Command::Linux(args),
            "initrd" => Command::Initrd(args),
            "boot" | "unload" if !args.is_empty() => {
                return_errno_with_msg!(Errno::BadArgument, "the command takes no arguments")
            }
            "boot" => Command::Boot,
            "unload" => Command::Unload,
            "set" => {
                let [arg] = args.as_slice() else {
                    return_errno_with_msg!(Errno::BadArgument, "expected loader.<key>=<value>");
                };
                Self::parse_set(arg)?
            }
            _ => return_errno_with_msg!(Errno::BadArgument, "unknown command"),
        };
        Ok(Some(command))
    }

    fn parse_set(arg: &str) -> Result<Self> {
        let parsed = arg
            .split_once('=')
            .and_then(|(entry, value)| Some((entry.split_once('.')?, value)));
        match parsed {
            Some(((module, key), value)) if module == MODULE && !key.is_empty() => {
                Ok(Command::Set {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            }
            _ => return_errno_with_msg!(Errno::BadArgument, "expected loader.<key>=<value>"),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Command::Linux(_) => "linux",
            Command::Initrd(_) => "initrd",
            Command::Boot => "boot",
            Command::Unload => "unload",
            Command::Set { .. } => "set",
        }
    }
}

/// Parses `line` and runs it against `loader`.
///
/// A successful `boot` does not return.
pub fn dispatch<R, S, A>(loader: &mut LinuxLoader<R, S, A>, line: &str) -> Result<()>
where
    R: Relocator,
    S: FileSource,
    A: InitrdAssembler,
{
    let command = match Command::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return Ok(()),
        Err(err) => {
            warn!("{}: {}", line.trim(), err);
            return Err(err);
        }
    };

    let result = run(loader, &command);
    if let Err(err) = &result {
        warn!("{}: {}", command.name(), err);
    }
    result
}

fn run<R, S, A>(loader: &mut LinuxLoader<R, S, A>, command: &Command) -> Result<()>
where
    R: Relocator,
    S: FileSource,
    A: InitrdAssembler,
{
    match command {
        Command::Linux(args) => {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            loader.load_kernel(&args)
        }
        Command::Initrd(paths) => {
            let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
            loader.load_initrd(&paths)
        }
        Command::Boot => {
            let never = loader.boot()?;
            match never {}
        }
        Command::Unload => {
            loader.reset();
            Ok(())
        }
        Command::Set { key, value } => {
            loader.config_mut().apply(key, value)?;
            if key == "log_level" {
                logger::set_level(parse_log_level(value));
            }
            Ok(())
        }
    }
}
