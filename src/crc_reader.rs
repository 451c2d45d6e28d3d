//! Helper module to compute a CRC32 checksum
//!
//! Borrowed from zip-rs:
//! <https://github.com/mvdnes/zip-rs/commit/b3c836d9c32efa120cdd5366280f940d3c3b985c>

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

use crate::result::ZipError;

/// Reader that validates the CRC32 when it reaches the EOF.
///
/// The mismatch surfaces as an [`io::Error`] wrapping
/// [`ZipError::ChecksumMismatch`], which names the offending entry
/// and both checksums.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    provided_checksum: u32,
    filename: String,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R, provided_checksum: u32, filename: String) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            provided_checksum,
            filename,
        }
    }

    /// Returns true if the final checksum matches the one provided by `new()`
    fn check_matches(&self) -> bool {
        self.provided_checksum == self.hasher.clone().finalize()
    }

    fn mismatch(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            ZipError::ChecksumMismatch {
                filename: self.filename.clone(),
                expected: self.provided_checksum,
                actual: self.hasher.clone().finalize(),
            },
        )
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = match self.inner.read(buf) {
            Ok(0) if !buf.is_empty() && !self.check_matches() => return Err(self.mismatch()),
            Ok(n) => n,
            Err(e) => return Err(e),
        };
        self.hasher.update(&buf[0..count]);
        Ok(count)
    }
}
