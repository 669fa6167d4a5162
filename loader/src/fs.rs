// SPDX-License-Identifier: MPL-2.0

//! Where kernel and initrd files come from.

use alloc::collections::BTreeMap;

use crate::prelude::*;

/// A read-only source of files.
pub trait FileSource {
    /// Returns the whole contents of the file at `path`.
    fn read(&mut self, path: &str) -> Option<&[u8]>;

    /// Returns the length of the file at `path`.
    fn size(&mut self, path: &str) -> Option<usize> {
        self.read(path).map(|bytes| bytes.len())
    }
}

/// An in-memory table of files, for hosts that preload their images.
#[derive(Debug, Default, Clone)]
pub struct MemoryFs {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file.
    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }

    /// Removes a file, returning its contents.
    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        self.files.remove(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileSource for MemoryFs {
    fn read(&mut self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(|bytes| bytes.as_slice())
    }

    fn size(&mut self, path: &str) -> Option<usize> {
        self.files.get(path).map(|bytes| bytes.len())
    }
}
