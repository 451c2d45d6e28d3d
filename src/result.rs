//! Error types and the related `Result<T>`

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// An expected four-byte signature wasn't where it should be.
    #[error("Expected {expected} signature, found 0x{found:08x}")]
    BadSignature {
        /// Human-readable name of the record we were looking for
        expected: &'static str,
        found: u32,
    },

    /// The archive ended before a complete record could be read.
    #[error("Truncated Zip archive: {0}")]
    Truncated(&'static str),

    /// The ZIP archive contained invalid data per the spec.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// Decoding a UTF-8 name or comment failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// An entry was stored with a compression method other than
    /// STORED (0) or DEFLATE (8).
    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// An entry's decompressed data didn't match its stored CRC-32.
    #[error("CRC-32 mismatch for {filename}: expected 0x{expected:08x}, got 0x{actual:08x}")]
    ChecksumMismatch {
        filename: String,
        expected: u32,
        actual: u32,
    },

    /// The writer was handed a filename it already has an entry for.
    #[error("Duplicate entry filename: {0}")]
    DuplicateEntryFilename(String),

    /// The archive's counts or offsets exceed what we can index.
    ///
    /// This covers both 32-bit address spaces and archives whose central
    /// directory claims more than `i32::MAX` entries or sits past
    /// `i64::MAX` bytes.
    #[error("Zip archive too large to index: {0}")]
    ArchiveTooLarge(&'static str),

    /// An operation was attempted on a closed or poisoned reader/writer.
    #[error("Illegal state: {0}")]
    IllegalState(&'static str),
}
