//! Where bundle bytes come from.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use crate::bundle::BUNDLE_EXTENSION;
use crate::cursor::Storage;
use crate::error::{Error, Result};

/// Opens bundles by their index path (no extension) and takes modified
/// streams back.
pub trait BundleProvider {
    type Stream: Storage;

    fn open(&mut self, bundle_path: &str) -> Result<Self::Stream>;

    /// Persists a stream previously returned by `open` and written to.
    fn commit(&mut self, bundle_path: &str, stream: Self::Stream) -> Result<()>;
}

/// Bundles stored as `<base>/<path>.bundle.bin` on disk.
#[derive(Debug, Clone)]
pub struct DirectoryBundles {
    base:      PathBuf,
    read_only: bool,
}

impl DirectoryBundles {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into(), read_only: false }
    }

    pub fn read_only(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into(), read_only: true }
    }

    pub fn path_for(&self, bundle_path: &str) -> PathBuf {
        self.base.join(format!("{}{}", bundle_path, BUNDLE_EXTENSION))
    }
}

impl BundleProvider for DirectoryBundles {
    type Stream = File;

    fn open(&mut self, bundle_path: &str) -> Result<File> {
        let path = self.path_for(bundle_path);
        OpenOptions::new()
            .read(true)
            .write(!self.read_only)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::not_found(path.display().to_string()),
                _ => Error::Io(e),
            })
    }

    fn commit(&mut self, bundle_path: &str, mut stream: File) -> Result<()> {
        if self.read_only {
            return Err(Error::ArgumentInvalid(format!("{} is opened read-only", bundle_path)));
        }
        stream.flush()?;
        stream.sync_data()?;
        Ok(())
    }
}
