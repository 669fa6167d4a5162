// SPDX-License-Identifier: MPL-2.0

//! The prelude.

pub type Result<T> = core::result::Result<T, crate::error::Error>;

pub(crate) use alloc::{
    string::{String, ToString},
    vec,
    vec::Vec,
};

pub(crate) use log::{debug, info, warn};

pub(crate) use crate::{
    error::{Errno, Error},
    return_errno, return_errno_with_msg,
};
