//! Types shared by the readers and the writer.
//!
//! [`EntryMetadata`] is the one record everybody trades in:
//! the streaming reader fills it from local file headers,
//! the indexed reader from the central directory,
//! and the writer builds one per added entry so it can emit
//! the central directory at close.

use std::sync::OnceLock;

use chrono::NaiveDateTime;

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    Stored,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflated,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

impl CompressionMethod {
    pub(crate) fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            v => CompressionMethod::Unsupported(v),
        }
    }

    /// The wire value. Only `Stored` and `Deflated` are ever written.
    pub(crate) fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

/// Metadata for a file or directory in the archive
///
/// Entries read from an archive's central directory carry everything below;
/// entries parsed from local file headers lack a comment and — when
/// general-purpose bit 3 deferred them to a trailing data descriptor —
/// may report zero or `0xFFFFFFFF` sizes and a zero CRC.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    /// "Version made by": upper byte is the originating OS,
    /// lower byte the PKZIP version. Zero for local-header entries.
    pub version_made_by: u16,

    /// Minimum PKZIP version needed to extract (20, or 45 for Zip64)
    pub version_needed: u16,

    /// General-purpose bit flags.
    /// Bit 3 defers sizes/CRC to a data descriptor,
    /// bit 11 marks the filename and comment as UTF-8.
    pub flags: u16,

    /// Compression algorithm used to store the file
    pub method: CompressionMethod,

    /// The date and time the file was last modified,
    /// at MS-DOS's two-second resolution
    pub last_modified: NaiveDateTime,

    /// The CRC-32 of the decompressed file
    pub crc32: u32,

    /// Compressed size of the file in bytes
    pub compressed_size: u64,

    /// Uncompressed size of the file in bytes
    pub uncompressed_size: u64,

    /// The provided name of the file.
    /// A trailing forward slash designates a directory.
    pub filename: String,

    /// The entry's extra field, verbatim:
    /// a series of `{id: u16, len: u16, data: [u8; len]}` records
    pub extra: Vec<u8>,

    /// The entry's comment (central directory only)
    pub comment: Vec<u8>,

    /// The offset of the entry's local header from the start of the archive
    pub header_offset: u64,

    /// Offset of the entry's data, resolved from the local header
    /// on first use. The local header's name and extra lengths can differ
    /// from the central directory's, so this can't be computed up front.
    pub(crate) data_offset: OnceLock<u64>,
}

impl EntryMetadata {
    /// Returns true if the given entry is a directory
    pub fn is_dir(&self) -> bool {
        self.filename.ends_with('/')
    }

    /// Returns true if the given entry is a file
    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// True if the entry's sizes and CRC were deferred to a data descriptor
    /// trailing the file data (general-purpose bit 3).
    pub fn uses_data_descriptor(&self) -> bool {
        self.flags & (1 << 3) != 0
    }

    pub(crate) fn is_encrypted(&self) -> bool {
        // Bit 0: If set, indicates that the file is encrypted
        self.flags & 1 != 0
    }
}
