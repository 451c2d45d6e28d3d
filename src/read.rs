//! Tools for random-access reads of a ZIP archive.
//!
//! To start reading an archive, create a [`ZipArchive`] from a file
//! or from any byte source with positional reads (see [`ReadAt`]).
//! The archive indexes the central directory at the back of the file,
//! so any entry can be opened in any order — or several at once,
//! since each [`ZipArchive::read`] gets an independent cursor.
//!
//! For sources that can't seek (sockets, pipes, process output),
//! use [`ZipStreamReader`] instead.
//!
//! [`ZipStreamReader`]: ../stream/struct.ZipStreamReader.html

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use flate2::read::DeflateDecoder;
use log::*;

use crate::arch;
use crate::crc_reader::Crc32Reader;
use crate::metadata::{CompressionMethod, EntryMetadata};
use crate::result::*;
use crate::spec;

/// A byte source supporting positional reads.
///
/// Positional reads don't move any cursor, so several readers can pull
/// from the same source at once. This is the only capability
/// [`ZipArchive`] needs: a whole archive can be served from a file,
/// a memory map, or a plain byte slice.
pub trait ReadAt {
    /// The total length of the source, in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Fills `buf` from the bytes starting at `offset`,
    /// failing with `UnexpectedEof` if the source is too short.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl ReadAt for [u8] {
    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start: usize = offset
            .try_into()
            .map_err(|_| io::ErrorKind::UnexpectedEof)?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.len())
            .ok_or(io::ErrorKind::UnexpectedEof)?;
        buf.copy_from_slice(&self[start..end]);
        Ok(())
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn size(&self) -> io::Result<u64> {
        (**self).size()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

impl ReadAt for Vec<u8> {
    fn size(&self) -> io::Result<u64> {
        self.as_slice().size()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.as_slice().read_exact_at(offset, buf)
    }
}

#[cfg(unix)]
impl ReadAt for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ReadAt for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            match self.seek_read(buf, offset) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// A ZIP archive indexed by its central directory
pub struct ZipArchive<R: ReadAt> {
    source: R,
    /// Entries in central-directory order
    entries: Vec<EntryMetadata>,
    /// Filename -> index into `entries`. First wins on (unexpected) duplicates.
    by_name: HashMap<String, usize>,
    comment: Vec<u8>,
}

/// The fixed End of Central Directory Record plus its maximum comment:
/// the EOCDR signature can't be farther than this from the end of the file.
const EOCDR_SEARCH_CAP: u64 = spec::EndOfCentralDirectory::FIXED_SIZE as u64 + u16::MAX as u64;

impl ZipArchive<File> {
    /// Opens the archive at the given path.
    ///
    /// The file is owned by the archive and closed when it's dropped.
    pub fn open<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: ReadAt> ZipArchive<R> {
    /// Reads a ZIP archive from the given byte source.
    ///
    /// Smaller files can be read into a buffer:
    ///
    /// ```no_run
    /// # use std::fs;
    /// # use bigzip::*;
    /// let bytes = fs::read("foo.zip")?;
    /// let archive = ZipArchive::new(&bytes[..])?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    ///
    /// For larger ones, memory map!
    ///
    /// ```no_run
    /// # use std::fs::File;
    /// # use memmap2::Mmap;
    /// # use bigzip::*;
    /// let zip_file = File::open("foo.zip")?;
    /// let mapping = unsafe { Mmap::map(&zip_file)? };
    /// let archive = ZipArchive::new(&mapping[..])?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(source: R) -> ZipResult<Self> {
        let source_size = source.size()?;

        // The EOCDR should be right at the back, so try a small window
        // before falling back to the full 64 KiB + change.
        let mut found = None;
        for window_size in [1024, EOCDR_SEARCH_CAP] {
            let window_size = window_size.min(source_size);
            let window_start = source_size - window_size;
            let mut window = vec![0u8; arch::usize(window_size)?];
            source.read_exact_at(window_start, &mut window)?;
            if let Some(posit) = spec::find_eocdr(&window) {
                found = Some((window_start + posit as u64, window, posit));
                break;
            }
            if window_size == source_size {
                break;
            }
        }
        let (eocdr_posit, window, posit_in_window) = found.ok_or(ZipError::InvalidArchive(
            "Couldn't find End Of Central Directory Record",
        ))?;
        let eocdr = spec::EndOfCentralDirectory::parse(&window[posit_in_window..])?;
        trace!("{:?}", eocdr);

        if eocdr.disk_number != 0 || eocdr.disk_with_central_directory != 0 {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: disk {}, central directory on disk {}",
                eocdr.disk_number, eocdr.disk_with_central_directory
            )));
        }

        let mut entry_count = eocdr.entries as u64;
        let mut central_directory_size = eocdr.central_directory_size as u64;
        let mut central_directory_offset = eocdr.central_directory_offset as u64;

        if eocdr.needs_zip64() {
            // The Zip64 EOCDR locator sits immediately before the EOCDR
            // and points at the Zip64 EOCDR.
            let locator_posit = eocdr_posit
                .checked_sub(spec::Zip64EndOfCentralDirectoryLocator::size_in_file() as u64)
                .ok_or(ZipError::InvalidArchive(
                    "Zip64 sentinels with no room for a Zip64 EOCDR locator",
                ))?;
            let mut locator_buf = [0u8; 20];
            source.read_exact_at(locator_posit, &mut locator_buf)?;
            let locator = spec::Zip64EndOfCentralDirectoryLocator::parse(&locator_buf).ok_or(
                ZipError::BadSignature {
                    expected: "Zip64 End Of Central Directory Locator",
                    found: u32::from_le_bytes(locator_buf[..4].try_into().unwrap()),
                },
            )?;
            trace!("{:?}", locator);

            if locator.disk_with_zip64_eocdr != 0 || locator.disks > 1 {
                return Err(ZipError::UnsupportedArchive(format!(
                    "No support for multi-disk archives: Zip64 EOCDR locator reports {} disks",
                    locator.disks
                )));
            }

            let mut zip64_eocdr_buf = [0u8; spec::Zip64EndOfCentralDirectory::FIXED_SIZE];
            source.read_exact_at(locator.zip64_eocdr_offset, &mut zip64_eocdr_buf)?;
            let zip64_eocdr = spec::Zip64EndOfCentralDirectory::parse(&zip64_eocdr_buf)?;
            trace!("{:?}", zip64_eocdr);
            // (Any extensible data sector between the fixed fields and the
            // locator is skipped — we never read it.)

            // The Zip64 EOCDR overrides only the fields that overflowed.
            if eocdr.entries == spec::SENTINEL16 {
                entry_count = zip64_eocdr.entries;
            }
            if eocdr.central_directory_size == spec::SENTINEL32 {
                central_directory_size = zip64_eocdr.central_directory_size;
            }
            if eocdr.central_directory_offset == spec::SENTINEL32 {
                central_directory_offset = zip64_eocdr.central_directory_offset;
            }
        }

        if entry_count > i32::MAX as u64 {
            return Err(ZipError::ArchiveTooLarge(
                "more entries than we can index (> i32::MAX)",
            ));
        }
        if central_directory_offset > i64::MAX as u64 || central_directory_size > i64::MAX as u64 {
            return Err(ZipError::ArchiveTooLarge(
                "central directory lies past 2^63 bytes",
            ));
        }

        trace!(
            "{} entries at offset {}",
            entry_count,
            central_directory_offset
        );

        let mut central_directory = vec![0u8; arch::usize(central_directory_size)?];
        source.read_exact_at(central_directory_offset, &mut central_directory)?;
        let mut central_directory = &central_directory[..];

        // A central directory entry is at least 46 bytes,
        // so don't let a lying entry count reserve the moon.
        let mut entries =
            Vec::with_capacity(arch::usize(entry_count.min(central_directory_size / 46))?);
        let mut by_name = HashMap::with_capacity(entries.capacity());

        for index in 0..entry_count {
            let dir_entry = spec::CentralDirectoryEntry::parse_and_consume(&mut central_directory)?;
            trace!("{:?}", dir_entry);

            let metadata = EntryMetadata::from_cde(&dir_entry)?;
            debug!("{:?}", metadata);
            by_name
                .entry(metadata.filename.clone())
                .or_insert(index as usize);
            entries.push(metadata);
        }

        Ok(Self {
            source,
            entries,
            by_name,
            comment: eocdr.file_comment.to_vec(),
        })
    }

    /// Returns the entries in central-directory order.
    ///
    /// No effort is made to deduplicate or otherwise validate their names.
    pub fn entries(&self) -> &[EntryMetadata] {
        &self.entries
    }

    /// Looks an entry up by its filename.
    ///
    /// If the archive (unexpectedly) holds several entries with the same
    /// name, the first one wins.
    pub fn by_name(&self, filename: &str) -> Option<&EntryMetadata> {
        self.by_name.get(filename).map(|&i| &self.entries[i])
    }

    /// The archive-level comment, from the End of Central Directory Record
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Consumes the archive, handing back its byte source.
    pub fn into_inner(self) -> R {
        self.source
    }

    /// Reads the given file from the ZIP archive.
    ///
    /// Since each file in a ZIP archive is compressed independently and
    /// read with an independent cursor, multiple files can be read in
    /// parallel. The returned reader verifies the entry's CRC-32 when it
    /// reaches the end of the data.
    pub fn read(&self, metadata: &EntryMetadata) -> ZipResult<Box<dyn Read + Send + '_>>
    where
        R: Sync,
    {
        if metadata.is_encrypted() {
            return Err(ZipError::UnsupportedArchive(format!(
                "Can't read encrypted file {}",
                metadata.filename
            )));
        }

        let data_offset = self.data_offset(metadata)?;
        debug!("Reading {} at data offset {}", metadata.filename, data_offset);
        let section = SectionReader {
            source: &self.source,
            offset: data_offset,
            remaining: metadata.compressed_size,
        };
        make_reader(
            metadata.method,
            metadata.crc32,
            metadata.filename.clone(),
            section,
        )
    }

    /// Where the entry's file data starts.
    ///
    /// The local header's name and extra field can differ in length from
    /// the central directory's copies, so this takes one read of the local
    /// header. The result is cached on the entry; concurrent racers just
    /// compute the same value twice.
    fn data_offset(&self, metadata: &EntryMetadata) -> ZipResult<u64> {
        if let Some(offset) = metadata.data_offset.get() {
            return Ok(*offset);
        }

        let mut header = [0u8; 4 + spec::LocalHeaderFixed::SIZE];
        self.source.read_exact_at(metadata.header_offset, &mut header)?;
        if header[..4] != spec::LOCAL_FILE_HEADER_MAGIC {
            return Err(ZipError::BadSignature {
                expected: "local file header",
                found: u32::from_le_bytes(header[..4].try_into().unwrap()),
            });
        }
        let local = spec::LocalHeaderFixed::parse(&header[4..])?;
        trace!("{:?}", local);

        #[cfg(feature = "check-local-metadata")]
        {
            // Sizes and CRC can legitimately differ (they're deferred to the
            // data descriptor when general-purpose bit 3 is set), but the
            // name and method should agree with the central directory.
            let mut name = vec![0u8; local.filename_length as usize];
            self.source
                .read_exact_at(metadata.header_offset + 30, &mut name)?;
            let name = spec::decode_text(&name, local.flags)?;
            if name != metadata.filename
                || CompressionMethod::from_u16(local.compression_method) != metadata.method
            {
                return Err(ZipError::InvalidArchive(
                    "Central directory entry doesn't match local file header",
                ));
            }
        }

        let offset = metadata.header_offset
            + (4 + spec::LocalHeaderFixed::SIZE) as u64
            + local.filename_length as u64
            + local.extra_field_length as u64;
        let _ = metadata.data_offset.set(offset);
        Ok(offset)
    }
}

/// A positional-read cursor over an entry's compressed bytes
struct SectionReader<'a, R: ReadAt> {
    source: &'a R,
    offset: u64,
    remaining: u64,
}

impl<R: ReadAt> Read for SectionReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (buf.len() as u64).min(self.remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.source.read_exact_at(self.offset, &mut buf[..n])?;
        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Returns a boxed read trait for a compressed file,
/// given its compression method and expected CRC.
fn make_reader<'a, R: Read + Send + 'a>(
    compression_method: CompressionMethod,
    crc32: u32,
    filename: String,
    reader: R,
) -> ZipResult<Box<dyn Read + Send + 'a>> {
    match compression_method {
        CompressionMethod::Stored => Ok(Box::new(Crc32Reader::new(reader, crc32, filename))),
        CompressionMethod::Deflated => {
            let deflate_reader = DeflateDecoder::new(reader);
            Ok(Box::new(Crc32Reader::new(deflate_reader, crc32, filename)))
        }
        CompressionMethod::Unsupported(method) => Err(ZipError::UnsupportedCompression(method)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_at_slices() {
        let bytes: &[u8] = b"0123456789";
        assert_eq!(bytes.size().unwrap(), 10);

        let mut buf = [0u8; 4];
        bytes.read_exact_at(3, &mut buf).unwrap();
        assert_eq!(&buf, b"3456");

        // Off the end
        assert!(bytes.read_exact_at(8, &mut buf).is_err());
        assert!(bytes.read_exact_at(u64::MAX, &mut buf).is_err());
    }

    #[test]
    fn section_reader_stays_in_bounds() {
        let bytes: &[u8] = b"0123456789";
        let mut section = SectionReader {
            source: &bytes,
            offset: 2,
            remaining: 5,
        };
        let mut out = String::new();
        section.read_to_string(&mut out).unwrap();
        assert_eq!(out, "23456");
    }
}
