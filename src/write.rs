//! Tools for writing a ZIP archive.
//!
//! [`ZipWriter`] emits entries, in the order you add them, to any byte
//! sink — no seeking required, so a socket or a pipe works as well as a
//! file. Entry data streams through a DEFLATE encoder as you write it;
//! nothing is buffered to temporary storage.
//!
//! ```no_run
//! # use std::io::Write;
//! # use bigzip::*;
//! let mut writer = ZipWriter::create("foo.zip")?;
//! writer.add_dir("hello")?;
//! writer.add("hello/hi.txt", b"Hello, world!\n")?;
//!
//! // Bigger files can be streamed in:
//! writer.start_entry("hello/war-and-peace.txt")?;
//! for chapter in &["Chapter 1...", "Chapter 2..."] {
//!     writer.write_all(chapter.as_bytes())?;
//! }
//! writer.finish()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Archives that outgrow the classic format — entries over 4 GiB, more
//! than 65 534 of them, or a central directory past the 4 GiB line — get
//! Zip64 records exactly where needed: the overflowed fields hold
//! `0xFFFFFFFF`/`0xFFFF` markers and the real values ride along in Zip64
//! extra fields and the Zip64 end-of-central-directory record.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::Path;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use crc32fast::Hasher;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::*;

use crate::metadata::{CompressionMethod, EntryMetadata};
use crate::result::*;
use crate::spec;

/// Optional per-entry knobs for [`ZipWriter::start_entry_with`]
/// and friends.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    /// Modification time; defaults to the current local time.
    pub last_modified: Option<NaiveDateTime>,

    /// An extra field to attach to the entry, emitted verbatim.
    /// (A Zip64 record is appended after it if the entry needs one.)
    pub extra: Vec<u8>,

    /// A comment for the entry, stored in the central directory.
    pub comment: Vec<u8>,
}

/// A sink that knows how many bytes have passed through it,
/// since local header offsets have to be recorded as we go
/// and `W` can't be asked to seek or tell.
struct CountingWriter<W: Write> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// The writer's hold on its sink. DEFLATE entries temporarily wrap it
/// in an encoder; an I/O failure forfeits it for good.
enum Sink<W: Write> {
    Raw(CountingWriter<W>),
    Deflating(DeflateEncoder<CountingWriter<W>>),
    Poisoned,
}

/// Bookkeeping for the entry currently accepting data
struct OpenEntry {
    hasher: Hasher,
    bytes_written: u64,
    data_start: u64,
    /// `Some(declared uncompressed size)` for STORED entries,
    /// `None` for DEFLATE
    stored_size: Option<u64>,
}

/// Writes a ZIP archive, entry by entry, to a byte sink
pub struct ZipWriter<W: Write> {
    sink: Sink<W>,
    /// One record per completed or in-progress entry, in archive order;
    /// becomes the central directory at the end.
    entries: Vec<EntryMetadata>,
    names: HashSet<String>,
    current: Option<OpenEntry>,
    comment: Vec<u8>,
    compression: Compression,
}

impl ZipWriter<BufWriter<File>> {
    /// Creates an archive at the given path.
    ///
    /// The file is owned by the writer; [`finish`](Self::finish) flushes
    /// it, and dropping the returned handle closes it.
    pub fn create<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> ZipWriter<W> {
    /// Writes an archive to the given sink with the default
    /// compression level.
    pub fn new(sink: W) -> Self {
        Self::with_compression(sink, Compression::default())
    }

    /// Writes an archive to the given sink,
    /// DEFLATE-ing entries at the given level.
    pub fn with_compression(sink: W, compression: Compression) -> Self {
        Self {
            sink: Sink::Raw(CountingWriter::new(sink)),
            entries: Vec::new(),
            names: HashSet::new(),
            current: None,
            comment: Vec::new(),
            compression,
        }
    }

    /// Sets the archive-level comment,
    /// written to the End of Central Directory Record.
    pub fn set_comment(&mut self, comment: impl Into<Vec<u8>>) {
        self.comment = comment.into();
    }

    /// Starts a DEFLATE entry; its data comes from subsequent
    /// [`Write`] calls on the writer.
    ///
    /// The entry is closed by the next `start_*`/`add*` call or by
    /// [`finish`](Self::finish); its CRC-32 and sizes are computed as data
    /// streams through and emitted in a trailing data descriptor.
    pub fn start_entry(&mut self, filename: &str) -> ZipResult<()> {
        self.start_entry_with(filename, EntryOptions::default())
    }

    /// [`start_entry`](Self::start_entry), with options.
    pub fn start_entry_with(&mut self, filename: &str, options: EntryOptions) -> ZipResult<()> {
        let result = self.begin_entry(filename.to_owned(), options, None);
        self.guard(result)
    }

    /// Starts a STORED (uncompressed) entry.
    ///
    /// The caller must supply the CRC-32 and exact size up front —
    /// that's what lets the entry skip the data descriptor. Exactly
    /// `size` bytes must then be written.
    pub fn start_stored_entry(&mut self, filename: &str, crc32: u32, size: u64) -> ZipResult<()> {
        self.start_stored_entry_with(filename, crc32, size, EntryOptions::default())
    }

    /// [`start_stored_entry`](Self::start_stored_entry), with options.
    pub fn start_stored_entry_with(
        &mut self,
        filename: &str,
        crc32: u32,
        size: u64,
        options: EntryOptions,
    ) -> ZipResult<()> {
        let result = self.begin_entry(filename.to_owned(), options, Some((crc32, size)));
        self.guard(result)
    }

    /// Adds a whole file at once, DEFLATE-compressed.
    pub fn add(&mut self, filename: &str, contents: &[u8]) -> ZipResult<()> {
        self.start_entry(filename)?;
        let result = self.write_all(contents).map_err(ZipError::from);
        self.guard(result)
    }

    /// Adds a directory entry.
    ///
    /// The name is canonicalized to end in exactly one `/`,
    /// and the entry is an empty STORED one.
    pub fn add_dir(&mut self, name: &str) -> ZipResult<()> {
        let canonical = format!("{}/", name.trim_end_matches('/'));
        let result = self
            .begin_entry(canonical, EntryOptions::default(), Some((0, 0)))
            .and_then(|()| self.finish_current_entry());
        self.guard(result)
    }

    /// Closes the last entry, writes the central directory and the
    /// archive's end records, flushes, and returns the sink.
    ///
    /// Zip64 end-of-central-directory records are emitted only when the
    /// archive actually overflows the classic fields.
    pub fn finish(mut self) -> ZipResult<W> {
        self.finish_current_entry()?;

        let sink = match &mut self.sink {
            Sink::Raw(sink) => sink,
            Sink::Deflating(_) => unreachable!("no entry is open"),
            Sink::Poisoned => {
                return Err(ZipError::IllegalState(
                    "an earlier failure poisoned this writer",
                ))
            }
        };

        let central_directory_offset = sink.count;
        for metadata in &self.entries {
            // 0xFFFFFFFF in a base field forwards it to the Zip64 extra,
            // which holds exactly the overflowed fields.
            let mut extra_field = metadata.extra.clone();
            let zip64 = spec::build_zip64_extra(
                overflowed(metadata.uncompressed_size),
                overflowed(metadata.compressed_size),
                overflowed(metadata.header_offset),
            );
            extra_field.extend_from_slice(&zip64);
            let version = if zip64.is_empty() {
                spec::VERSION
            } else {
                spec::ZIP64_VERSION_NEEDED
            };

            let (time, date) = spec::to_msdos(metadata.last_modified);
            let cde = spec::CentralDirectoryEntry {
                source_version: version,
                minimum_extract_version: version,
                flags: metadata.flags,
                compression_method: metadata.method.to_u16(),
                last_modified_time: time,
                last_modified_date: date,
                crc32: metadata.crc32,
                compressed_size: base32(metadata.compressed_size),
                uncompressed_size: base32(metadata.uncompressed_size),
                disk_number: 0,
                internal_file_attributes: 0,
                external_file_attributes: 0,
                header_offset: base32(metadata.header_offset),
                filename: metadata.filename.as_bytes(),
                extra_field: &extra_field,
                file_comment: &metadata.comment,
            };
            cde.write_to(sink)?;
        }
        let central_directory_size = sink.count - central_directory_offset;

        let entry_count = self.entries.len() as u64;
        let needs_zip64 = entry_count >= spec::SENTINEL16 as u64
            || central_directory_size >= spec::SENTINEL32 as u64
            || central_directory_offset >= spec::SENTINEL32 as u64;
        if needs_zip64 {
            debug!(
                "{} entries, central directory {} bytes at {}: writing Zip64 EOCDR",
                entry_count, central_directory_size, central_directory_offset
            );
            let zip64_eocdr_offset = sink.count;
            spec::Zip64EndOfCentralDirectory {
                source_version: spec::ZIP64_VERSION_NEEDED,
                minimum_extract_version: spec::ZIP64_VERSION_NEEDED,
                disk_number: 0,
                disk_with_central_directory: 0,
                entries_on_this_disk: entry_count,
                entries: entry_count,
                central_directory_size,
                central_directory_offset,
            }
            .write_to(sink)?;
            spec::Zip64EndOfCentralDirectoryLocator {
                disk_with_zip64_eocdr: 0,
                zip64_eocdr_offset,
                disks: 1,
            }
            .write_to(sink)?;
        }

        let entries16 = if entry_count >= spec::SENTINEL16 as u64 {
            spec::SENTINEL16
        } else {
            entry_count as u16
        };
        spec::EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_this_disk: entries16,
            entries: entries16,
            central_directory_size: base32(central_directory_size),
            central_directory_offset: base32(central_directory_offset),
            file_comment: &self.comment,
        }
        .write_to(sink)?;
        sink.flush()?;

        match mem::replace(&mut self.sink, Sink::Poisoned) {
            Sink::Raw(sink) => Ok(sink.inner),
            _ => unreachable!(),
        }
    }

    /// Poisons the writer on any failure except a rejected duplicate name,
    /// which must leave it untouched.
    fn guard<T>(&mut self, result: ZipResult<T>) -> ZipResult<T> {
        if let Err(e) = &result {
            if !matches!(e, ZipError::DuplicateEntryFilename(_)) {
                self.sink = Sink::Poisoned;
            }
        }
        result
    }

    fn begin_entry(
        &mut self,
        filename: String,
        options: EntryOptions,
        stored: Option<(u32, u64)>,
    ) -> ZipResult<()> {
        // Before any bytes hit the sink, so a rejected add is harmless:
        if self.names.contains(&filename) {
            return Err(ZipError::DuplicateEntryFilename(filename));
        }
        if filename.len() > u16::MAX as usize || options.extra.len() > u16::MAX as usize {
            return Err(ZipError::IllegalState(
                "filename or extra field too long for a ZIP header",
            ));
        }

        self.finish_current_entry()?;

        let last_modified = options
            .last_modified
            .unwrap_or_else(|| chrono::Local::now().naive_local());
        let (time, date) = spec::to_msdos(last_modified);

        let (method, flags) = match stored {
            // Sizes and CRC aren't known yet; bit 3 promises a descriptor.
            None => (
                CompressionMethod::Deflated,
                spec::FLAG_UTF8 | spec::FLAG_DATA_DESCRIPTOR,
            ),
            Some(_) => (CompressionMethod::Stored, spec::FLAG_UTF8),
        };
        let (crc32, size) = stored.unwrap_or((0, 0));

        // A STORED file of 4 GiB or more needs its real sizes in a local
        // Zip64 extra, with sentinels in the 32-bit fields.
        let mut local_extra = options.extra.clone();
        let huge_stored = size >= spec::SENTINEL32 as u64;
        if huge_stored {
            local_extra.extend_from_slice(&spec::build_zip64_extra(Some(size), Some(size), None));
        }
        let inline32 = if huge_stored {
            spec::SENTINEL32
        } else {
            size as u32
        };

        let sink = match &mut self.sink {
            Sink::Raw(sink) => sink,
            Sink::Deflating(_) => unreachable!("the previous entry was just closed"),
            Sink::Poisoned => {
                return Err(ZipError::IllegalState(
                    "an earlier failure poisoned this writer",
                ))
            }
        };
        let header_offset = sink.count;
        let version_needed = if huge_stored {
            spec::ZIP64_VERSION_NEEDED
        } else {
            spec::VERSION
        };

        let local = spec::LocalHeaderFixed {
            minimum_extract_version: version_needed,
            flags,
            compression_method: method.to_u16(),
            last_modified_time: time,
            last_modified_date: date,
            crc32,
            compressed_size: inline32,
            uncompressed_size: inline32,
            filename_length: filename.len() as u16,
            extra_field_length: local_extra.len() as u16,
        };
        local.write_to(sink, filename.as_bytes(), &local_extra)?;
        let data_start = sink.count;
        trace!("{} local header at {}", filename, header_offset);

        self.entries.push(EntryMetadata {
            version_made_by: version_needed,
            version_needed,
            flags,
            method,
            last_modified,
            crc32,
            compressed_size: size,
            uncompressed_size: size,
            filename: filename.clone(),
            extra: options.extra,
            comment: options.comment,
            header_offset,
            data_offset: OnceLock::new(),
        });
        self.names.insert(filename);

        if stored.is_none() {
            let counting = match mem::replace(&mut self.sink, Sink::Poisoned) {
                Sink::Raw(counting) => counting,
                _ => unreachable!(),
            };
            self.sink = Sink::Deflating(DeflateEncoder::new(counting, self.compression));
        }
        self.current = Some(OpenEntry {
            hasher: Hasher::new(),
            bytes_written: 0,
            data_start,
            stored_size: stored.map(|(_, size)| size),
        });
        Ok(())
    }

    /// Finalizes the in-progress entry, if any: flushes the encoder,
    /// writes the data descriptor, and records the final CRC and sizes
    /// for the central directory.
    fn finish_current_entry(&mut self) -> ZipResult<()> {
        let open = match self.current.take() {
            Some(open) => open,
            None => return Ok(()),
        };
        let metadata = self
            .entries
            .last_mut()
            .expect("an open entry implies a recorded one");

        match open.stored_size {
            None => {
                let counting = match mem::replace(&mut self.sink, Sink::Poisoned) {
                    Sink::Deflating(encoder) => encoder.finish()?,
                    Sink::Poisoned => {
                        return Err(ZipError::IllegalState(
                            "an earlier failure poisoned this writer",
                        ))
                    }
                    Sink::Raw(_) => unreachable!("an open DEFLATE entry implies an encoder"),
                };
                let compressed_size = counting.count - open.data_start;
                let uncompressed_size = open.bytes_written;
                let crc32 = open.hasher.finalize();
                self.sink = Sink::Raw(counting);
                let sink = match &mut self.sink {
                    Sink::Raw(sink) => sink,
                    _ => unreachable!(),
                };

                // The promised data descriptor: 32-bit sizes whenever they
                // fit (broadest compatibility), 64-bit otherwise.
                sink.write_all(&spec::DATA_DESCRIPTOR_MAGIC)?;
                sink.write_all(&crc32.to_le_bytes())?;
                if compressed_size >= spec::SENTINEL32 as u64
                    || uncompressed_size >= spec::SENTINEL32 as u64
                {
                    sink.write_all(&compressed_size.to_le_bytes())?;
                    sink.write_all(&uncompressed_size.to_le_bytes())?;
                } else {
                    sink.write_all(&(compressed_size as u32).to_le_bytes())?;
                    sink.write_all(&(uncompressed_size as u32).to_le_bytes())?;
                }

                trace!(
                    "{}: {} -> {} bytes, CRC 0x{:08x}",
                    metadata.filename,
                    uncompressed_size,
                    compressed_size,
                    crc32
                );
                metadata.crc32 = crc32;
                metadata.compressed_size = compressed_size;
                metadata.uncompressed_size = uncompressed_size;
            }
            Some(declared) => {
                // STORED bytes went straight through; just check the claim.
                if open.bytes_written != declared {
                    return Err(ZipError::IllegalState(
                        "a stored entry received a different number of bytes than declared",
                    ));
                }
            }
        }
        Ok(())
    }
}

impl<W: Write> Write for ZipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let open = match &mut self.current {
            Some(open) => open,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    ZipError::IllegalState("no entry is open for writing"),
                ))
            }
        };
        let result = match &mut self.sink {
            Sink::Raw(sink) => sink.write(buf),
            Sink::Deflating(encoder) => encoder.write(buf),
            Sink::Poisoned => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    ZipError::IllegalState("an earlier failure poisoned this writer"),
                ))
            }
        };
        match result {
            Ok(written) => {
                open.hasher.update(&buf[..written]);
                open.bytes_written += written as u64;
                Ok(written)
            }
            Err(e) => {
                self.sink = Sink::Poisoned;
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            Sink::Raw(sink) => sink.flush(),
            Sink::Deflating(encoder) => encoder.flush(),
            Sink::Poisoned => Ok(()),
        }
    }
}

/// The 32-bit rendition of a possibly-64-bit value:
/// itself if it fits, the overflow sentinel otherwise.
fn base32(value: u64) -> u32 {
    if value >= spec::SENTINEL32 as u64 {
        spec::SENTINEL32
    } else {
        value as u32
    }
}

/// `Some(value)` iff it doesn't fit a 32-bit base field
fn overflowed(value: u64) -> Option<u64> {
    (value >= spec::SENTINEL32 as u64).then_some(value)
}
