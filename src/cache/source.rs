//! Sized byte sources handed to `store`

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// A readable payload together with its declared length
///
/// Engines read from the source only when they actually need the bytes, so
/// a store for a key that already exists never consumes it.
pub struct EntrySource<'a> {
    reader: Box<dyn Read + 'a>,
    size: u64,
}

impl<'a> EntrySource<'a> {
    /// Wrap any reader that will produce exactly `size` bytes
    pub fn new(reader: impl Read + 'a, size: u64) -> Self {
        Self {
            reader: Box::new(reader),
            size,
        }
    }

    /// Source backed by an in-memory slice
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self::new(bytes, bytes.len() as u64)
    }

    /// Declared length in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl EntrySource<'static> {
    /// Source backed by a file on disk, sized from its metadata
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self::new(file, size))
    }
}

impl Read for EntrySource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for EntrySource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntrySource").field("size", &self.size).finish()
    }
}
