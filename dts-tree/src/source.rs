//! Pluggable access to source files.
//!
//! The tokenizer only ever sees a [`FileOpener`], so the same front-end works
//! over the local filesystem, a git branch (provided by the CLI crate), or an
//! in-memory set of sources.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::error::{DtsError, Result};

/// A capability to read named source files.
pub trait FileOpener {
    /// Returns the full contents of `path`.
    fn open(&self, path: &str) -> Result<String>;

    /// Cheap existence probe, used to pick between include candidates.
    fn exists(&self, path: &str) -> bool;
}

/// Opens files straight from the local filesystem.
pub struct LocalFiles;

impl FileOpener for LocalFiles {
    fn open(&self, path: &str) -> Result<String> {
        fs::read_to_string(path).map_err(|source| DtsError::Io {
            path: path.to_string(),
            source,
        })
    }

    fn exists(&self, path: &str) -> bool {
        Path::new(path).is_file()
    }
}

/// An in-memory source set, mainly for tests and embedded callers.
#[derive(Debug, Default)]
pub struct MemoryFiles {
    files: HashMap<String, String>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        self.files.insert(path.into(), contents.into());
    }
}

impl FileOpener for MemoryFiles {
    fn open(&self, path: &str) -> Result<String> {
        self.files.get(path).cloned().ok_or_else(|| DtsError::Io {
            path: path.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}
