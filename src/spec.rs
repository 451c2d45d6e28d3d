//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`], [`stream`], and [`write`] modules.
//! (This pattern, like several others, was inspired by the Zip crate.)
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [_Zip Files: History, Explanation and Implementation_]
//! is also a fantastic resource and a great read.
//!
//! [`read`]: ../read/index.html
//! [`stream`]: ../stream/index.html
//! [`write`]: ../write/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [_Zip Files: History, Explanation and Implementation_]: https://www.hanshq.net/zip.html

use std::borrow::Cow;
use std::convert::TryInto;
use std::io::{self, Write};
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use codepage_437::*;
use log::*;
use memchr::memmem;

use crate::metadata::{CompressionMethod, EntryMetadata};
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
pub const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
pub const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];
/// Data descriptor magic number (optional on the wire, but we always write it)
pub const DATA_DESCRIPTOR_MAGIC: [u8; 4] = [b'P', b'K', 7, 8];

/// "Version needed to extract" for archives with no Zip64 features
pub const VERSION: u16 = 20;
/// "Version needed to extract" once Zip64 records are in play
pub const ZIP64_VERSION_NEEDED: u16 = 45;

/// Header ID of the Zip64 extended information extra field
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// General-purpose bit 3: sizes and CRC-32 follow the file data
/// in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General-purpose bit 11: the filename and comment are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// The 0xFFFF stand-in that forwards a 16-bit field to the Zip64 records
pub const SENTINEL16: u16 = 0xFFFF;
/// The 0xFFFFFFFF stand-in that forwards a 32-bit field to the Zip64 records
pub const SENTINEL32: u32 = 0xFFFFFFFF;

// Straight from the Rust docs:

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
pub fn read_u64(input: &mut &[u8]) -> u64 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u64>());
    *input = rest;
    u64::from_le_bytes(int_bytes.try_into().expect("less than eight bytes for u64"))
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
pub fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
pub fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// Splits `length` bytes off the front of `input`,
/// or reports which record came up short.
fn take<'a>(input: &mut &'a [u8], length: usize, what: &'static str) -> ZipResult<&'a [u8]> {
    if input.len() < length {
        return Err(ZipError::Truncated(what));
    }
    let (taken, rest) = input.split_at(length);
    *input = rest;
    Ok(taken)
}

/// Decodes a filename or comment per general-purpose bit 11:
/// UTF-8 when set, CP437 otherwise.
pub fn decode_text(raw: &[u8], flags: u16) -> ZipResult<String> {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    if flags & FLAG_UTF8 != 0 {
        Ok(std::str::from_utf8(raw)
            .map_err(ZipError::Encoding)?
            .to_owned())
    } else {
        let str_cow: Cow<str> = Cow::borrow_from_cp437(raw, &CP437_CONTROL);
        Ok(str_cow.into_owned())
    }
}

/// Unpacks an MS-DOS timestamp (2-second resolution).
///
/// Nonsense dates — a month of zero, hour 25 — fall back to the DOS epoch,
/// 1980-01-01 00:00:00, rather than failing the whole entry.
pub fn parse_msdos(time: u16, date: u16) -> NaiveDateTime {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)
        .and_then(|d| d.and_hms_opt(hours, minutes, seconds))
        .unwrap_or_else(dos_epoch)
}

/// Packs a timestamp into MS-DOS `(time, date)` words.
///
/// Seconds round down to even; years outside DOS's [1980, 2107] range
/// collapse to the epoch.
pub fn to_msdos(when: NaiveDateTime) -> (u16, u16) {
    use chrono::Datelike;

    let when = if (1980..=2107).contains(&when.year()) {
        when
    } else {
        dos_epoch()
    };

    let time = ((when.hour() << 11) | (when.minute() << 5) | (when.second() / 2)) as u16;
    let date = ((((when.year() - 1980) as u32) << 9) | (when.month() << 5) | when.day()) as u16;
    (time, date)
}

pub fn dos_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1980, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug)]
pub struct EndOfCentralDirectory<'a> {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: &'a [u8],
}

impl<'a> EndOfCentralDirectory<'a> {
    /// The record without its variable-length comment
    pub const FIXED_SIZE: usize = 22;

    pub fn parse(mut eocdr: &'a [u8]) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        if eocdr.len() < Self::FIXED_SIZE {
            return Err(ZipError::Truncated("End Of Central Directory Record"));
        }

        // Assert the magic instead of checking for it
        // because the search should have found it.
        assert_eq!(eocdr[..4], EOCDR_MAGIC);
        eocdr = &eocdr[4..];
        let disk_number = read_u16(&mut eocdr);
        let disk_with_central_directory = read_u16(&mut eocdr);
        let entries_on_this_disk = read_u16(&mut eocdr);
        let entries = read_u16(&mut eocdr);
        let central_directory_size = read_u32(&mut eocdr);
        let central_directory_offset = read_u32(&mut eocdr);
        let comment_length = read_u16(&mut eocdr);
        let file_comment = take(
            &mut eocdr,
            comment_length as usize,
            "End Of Central Directory comment",
        )?;

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment,
        })
    }

    /// True if any field carries an overflow sentinel,
    /// i.e. the real value lives in the Zip64 EOCDR.
    pub fn needs_zip64(&self) -> bool {
        self.entries_on_this_disk == SENTINEL16
            || self.entries == SENTINEL16
            || self.central_directory_size == SENTINEL32
            || self.central_directory_offset == SENTINEL32
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&EOCDR_MAGIC)?;
        w.write_all(&self.disk_number.to_le_bytes())?;
        w.write_all(&self.disk_with_central_directory.to_le_bytes())?;
        w.write_all(&self.entries_on_this_disk.to_le_bytes())?;
        w.write_all(&self.entries.to_le_bytes())?;
        w.write_all(&self.central_directory_size.to_le_bytes())?;
        w.write_all(&self.central_directory_offset.to_le_bytes())?;
        w.write_all(&(self.file_comment.len() as u16).to_le_bytes())?;
        w.write_all(self.file_comment)
    }
}

/// Searches backward through `window` for the End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable size means we can't jump to a known offset.
pub fn find_eocdr(window: &[u8]) -> Option<usize> {
    memmem::rfind(window, &EOCDR_MAGIC)
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_zip64_eocdr: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub fn parse(mut mapping: &[u8]) -> Option<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        if mapping.len() < Self::size_in_file() || mapping[..4] != ZIP64_EOCDR_LOCATOR_MAGIC {
            return None;
        }
        mapping = &mapping[4..];
        let disk_with_zip64_eocdr = read_u32(&mut mapping);
        let zip64_eocdr_offset = read_u64(&mut mapping);
        let disks = read_u32(&mut mapping);

        Some(Self {
            disk_with_zip64_eocdr,
            zip64_eocdr_offset,
            disks,
        })
    }

    pub fn size_in_file() -> usize {
        20
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&ZIP64_EOCDR_LOCATOR_MAGIC)?;
        w.write_all(&self.disk_with_zip64_eocdr.to_le_bytes())?;
        w.write_all(&self.zip64_eocdr_offset.to_le_bytes())?;
        w.write_all(&self.disks.to_le_bytes())
    }
}

/// Data from the Zip64 end of central directory record
///
/// Carries 64-bit versions of the EOCDR's counts and offsets for archives
/// that outgrew the originals.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    /// Signature, record size, and the fixed fields.
    /// Anything past this is an extensible data sector, which we skip.
    pub const FIXED_SIZE: usize = 56;

    pub fn parse(mut eocdr: &[u8]) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        if eocdr.len() < Self::FIXED_SIZE {
            return Err(ZipError::Truncated("Zip64 End Of Central Directory Record"));
        }
        if eocdr[..4] != ZIP64_EOCDR_MAGIC {
            return Err(ZipError::BadSignature {
                expected: "Zip64 End Of Central Directory Record",
                found: u32::from_le_bytes(eocdr[..4].try_into().unwrap()),
            });
        }
        eocdr = &eocdr[4..];
        let eocdr_size = read_u64(&mut eocdr);
        let source_version = read_u16(&mut eocdr);
        let minimum_extract_version = read_u16(&mut eocdr);
        let disk_number = read_u32(&mut eocdr);
        let disk_with_central_directory = read_u32(&mut eocdr);
        let entries_on_this_disk = read_u64(&mut eocdr);
        let entries = read_u64(&mut eocdr);
        let central_directory_size = read_u64(&mut eocdr);
        let central_directory_offset = read_u64(&mut eocdr);

        // 4.3.14.1 The value stored into the "size of zip64 end of central
        // directory record" SHOULD be the size of the remaining
        // record and SHOULD NOT include the leading 12 bytes.
        //
        // Size = SizeOfFixedFields + SizeOfVariableData - 12.
        if (eocdr_size as usize).saturating_add(12) < Self::FIXED_SIZE {
            return Err(ZipError::InvalidArchive(
                "Invalid size in Zip64 End Of Central Directory Record",
            ));
        }

        Ok(Self {
            source_version,
            minimum_extract_version,
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&ZIP64_EOCDR_MAGIC)?;
        // We write no extensible data, so the remaining size is fixed.
        w.write_all(&((Self::FIXED_SIZE - 12) as u64).to_le_bytes())?;
        w.write_all(&self.source_version.to_le_bytes())?;
        w.write_all(&self.minimum_extract_version.to_le_bytes())?;
        w.write_all(&self.disk_number.to_le_bytes())?;
        w.write_all(&self.disk_with_central_directory.to_le_bytes())?;
        w.write_all(&self.entries_on_this_disk.to_le_bytes())?;
        w.write_all(&self.entries.to_le_bytes())?;
        w.write_all(&self.central_directory_size.to_le_bytes())?;
        w.write_all(&self.central_directory_offset.to_le_bytes())
    }
}

/// Data from a central directory entry
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub filename: &'a [u8],
    pub extra_field: &'a [u8],
    pub file_comment: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    pub fn parse_and_consume(entry: &mut &'a [u8]) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        // [central directory header 1]
        // .
        // .
        // .
        // [central directory header n]
        // [digital signature]
        //
        // File header:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        if entry.len() < 46 {
            return Err(ZipError::Truncated("central directory entry"));
        }
        if entry[..4] != CENTRAL_DIRECTORY_MAGIC {
            return Err(ZipError::BadSignature {
                expected: "central directory entry",
                found: u32::from_le_bytes(entry[..4].try_into().unwrap()),
            });
        }
        *entry = &entry[4..];
        let source_version = read_u16(entry);
        let minimum_extract_version = read_u16(entry);
        let flags = read_u16(entry);
        let compression_method = read_u16(entry);
        let last_modified_time = read_u16(entry);
        let last_modified_date = read_u16(entry);
        let crc32 = read_u32(entry);
        let compressed_size = read_u32(entry);
        let uncompressed_size = read_u32(entry);
        let filename_length = read_u16(entry) as usize;
        let extra_field_length = read_u16(entry) as usize;
        let file_comment_length = read_u16(entry) as usize;
        let disk_number = read_u16(entry);
        let internal_file_attributes = read_u16(entry);
        let external_file_attributes = read_u32(entry);
        let header_offset = read_u32(entry);
        let filename = take(entry, filename_length, "central directory filename")?;
        let extra_field = take(entry, extra_field_length, "central directory extra field")?;
        let file_comment = take(entry, file_comment_length, "central directory comment")?;

        Ok(Self {
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            internal_file_attributes,
            external_file_attributes,
            header_offset,
            filename,
            extra_field,
            file_comment,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&CENTRAL_DIRECTORY_MAGIC)?;
        w.write_all(&self.source_version.to_le_bytes())?;
        w.write_all(&self.minimum_extract_version.to_le_bytes())?;
        w.write_all(&self.flags.to_le_bytes())?;
        w.write_all(&self.compression_method.to_le_bytes())?;
        w.write_all(&self.last_modified_time.to_le_bytes())?;
        w.write_all(&self.last_modified_date.to_le_bytes())?;
        w.write_all(&self.crc32.to_le_bytes())?;
        w.write_all(&self.compressed_size.to_le_bytes())?;
        w.write_all(&self.uncompressed_size.to_le_bytes())?;
        w.write_all(&(self.filename.len() as u16).to_le_bytes())?;
        w.write_all(&(self.extra_field.len() as u16).to_le_bytes())?;
        w.write_all(&(self.file_comment.len() as u16).to_le_bytes())?;
        w.write_all(&self.disk_number.to_le_bytes())?;
        w.write_all(&self.internal_file_attributes.to_le_bytes())?;
        w.write_all(&self.external_file_attributes.to_le_bytes())?;
        w.write_all(&self.header_offset.to_le_bytes())?;
        w.write_all(self.filename)?;
        w.write_all(self.extra_field)?;
        w.write_all(self.file_comment)
    }
}

/// The fixed portion of a local file header,
/// i.e. the 26 bytes between the signature and the filename.
///
/// Each file's actual contents are preceded by one of these.
/// Both readers parse them: the streaming reader because local headers are
/// all it will ever see, and the indexed reader to find where the file data
/// starts (the local name and extra lengths can differ from the central
/// directory's copy, so the offset can't be computed from the latter).
#[derive(Debug)]
pub struct LocalHeaderFixed {
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub filename_length: u16,
    pub extra_field_length: u16,
}

impl LocalHeaderFixed {
    /// The fields following the signature
    pub const SIZE: usize = 26;

    /// Parses the 26 bytes following an already-consumed local file
    /// header signature.
    pub fn parse(mut header: &[u8]) -> ZipResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        if header.len() < Self::SIZE {
            return Err(ZipError::Truncated("local file header"));
        }
        let minimum_extract_version = read_u16(&mut header);
        let flags = read_u16(&mut header);
        let compression_method = read_u16(&mut header);
        let last_modified_time = read_u16(&mut header);
        let last_modified_date = read_u16(&mut header);
        let crc32 = read_u32(&mut header);
        let compressed_size = read_u32(&mut header);
        let uncompressed_size = read_u32(&mut header);
        let filename_length = read_u16(&mut header);
        let extra_field_length = read_u16(&mut header);

        Ok(Self {
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            filename_length,
            extra_field_length,
        })
    }

    /// Writes the full local header: signature, fixed fields, name, extra.
    ///
    /// The given `filename` and `extra` lengths win over whatever
    /// `filename_length`/`extra_field_length` say.
    pub fn write_to<W: Write>(&self, w: &mut W, filename: &[u8], extra: &[u8]) -> io::Result<()> {
        w.write_all(&LOCAL_FILE_HEADER_MAGIC)?;
        w.write_all(&self.minimum_extract_version.to_le_bytes())?;
        w.write_all(&self.flags.to_le_bytes())?;
        w.write_all(&self.compression_method.to_le_bytes())?;
        w.write_all(&self.last_modified_time.to_le_bytes())?;
        w.write_all(&self.last_modified_date.to_le_bytes())?;
        w.write_all(&self.crc32.to_le_bytes())?;
        w.write_all(&self.compressed_size.to_le_bytes())?;
        w.write_all(&self.uncompressed_size.to_le_bytes())?;
        w.write_all(&(filename.len() as u16).to_le_bytes())?;
        w.write_all(&(extra.len() as u16).to_le_bytes())?;
        w.write_all(filename)?;
        w.write_all(extra)
    }
}

/// Which base fields held an overflow sentinel
/// and should be filled from the Zip64 extra field.
///
/// The extra's payload holds, in fixed order, only the fields whose base
/// values were sentinels, so the local and central parsers must tell the
/// shared scan which ones to expect.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zip64Sentinels {
    pub uncompressed_size: bool,
    pub compressed_size: bool,
    pub header_offset: bool,
    pub disk_number: bool,
}

/// 64-bit overrides pulled out of a Zip64 extended information field
#[derive(Debug, Default)]
pub struct Zip64Extra {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub header_offset: Option<u64>,
    pub disk_number: Option<u32>,
}

/// Scans an extra field for Zip64 extended information.
///
/// The scan is bounded: it stops when fewer than four bytes remain or when
/// a record claims more data than the blob holds.
pub fn parse_zip64_extra(mut extra_field: &[u8], needed: Zip64Sentinels) -> Zip64Extra {
    // 4.5.1 In order to allow different programs and different types
    // of information to be stored in the 'extra' field in .ZIP
    // files, the following structure MUST be used for all
    // programs storing data in this field:
    //
    //     header1+data1 + header2+data2 . . .
    //
    // Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    let mut overrides = Zip64Extra::default();

    while extra_field.len() >= 4 {
        let kind = read_u16(&mut extra_field);
        let field_len = read_u16(&mut extra_field) as usize;
        if field_len > extra_field.len() {
            warn!(
                "extra field record 0x{:04x} claims {} bytes, only {} remain",
                kind,
                field_len,
                extra_field.len()
            );
            break;
        }

        if kind != ZIP64_EXTRA_ID {
            extra_field = &extra_field[field_len..];
            continue;
        }

        if !(needed.uncompressed_size
            || needed.compressed_size
            || needed.header_offset
            || needed.disk_number)
        {
            // Non-conforming, but harmless: the base fields are authoritative.
            warn!("Zip64 extra field present without any overflowed base field");
            return overrides;
        }

        let mut payload = &extra_field[..field_len];
        if needed.uncompressed_size && payload.len() >= 8 {
            overrides.uncompressed_size = Some(read_u64(&mut payload));
        }
        if needed.compressed_size && payload.len() >= 8 {
            overrides.compressed_size = Some(read_u64(&mut payload));
        }
        if needed.header_offset && payload.len() >= 8 {
            overrides.header_offset = Some(read_u64(&mut payload));
        }
        if needed.disk_number && payload.len() >= 4 {
            overrides.disk_number = Some(read_u32(&mut payload));
        }
        return overrides;
    }
    overrides
}

/// Builds a Zip64 extended information record holding exactly the given
/// fields, in the mandated order. Returns an empty Vec if nothing overflowed.
pub fn build_zip64_extra(
    uncompressed_size: Option<u64>,
    compressed_size: Option<u64>,
    header_offset: Option<u64>,
) -> Vec<u8> {
    let mut payload = Vec::new();
    if let Some(size) = uncompressed_size {
        payload.extend_from_slice(&size.to_le_bytes());
    }
    if let Some(size) = compressed_size {
        payload.extend_from_slice(&size.to_le_bytes());
    }
    if let Some(offset) = header_offset {
        payload.extend_from_slice(&offset.to_le_bytes());
    }
    if payload.is_empty() {
        return payload;
    }

    let mut extra = Vec::with_capacity(4 + payload.len());
    extra.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
    extra.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    extra.extend_from_slice(&payload);
    extra
}

impl EntryMetadata {
    /// Extracts `EntryMetadata` from a central directory entry
    pub(crate) fn from_cde(cde: &CentralDirectoryEntry<'_>) -> ZipResult<Self> {
        let filename = decode_text(cde.filename, cde.flags)?;

        let needed = Zip64Sentinels {
            uncompressed_size: cde.uncompressed_size == SENTINEL32,
            compressed_size: cde.compressed_size == SENTINEL32,
            header_offset: cde.header_offset == SENTINEL32,
            disk_number: cde.disk_number == SENTINEL16,
        };
        let zip64 = parse_zip64_extra(cde.extra_field, needed);

        let disk_number = zip64.disk_number.unwrap_or(cde.disk_number as u32);
        if disk_number != 0 {
            return Err(ZipError::UnsupportedArchive(format!(
                "No support for multi-disk archives: file {} claims to start on disk {}",
                filename, disk_number,
            )));
        }

        Ok(Self {
            version_made_by: cde.source_version,
            version_needed: cde.minimum_extract_version,
            flags: cde.flags,
            method: CompressionMethod::from_u16(cde.compression_method),
            last_modified: parse_msdos(cde.last_modified_time, cde.last_modified_date),
            crc32: cde.crc32,
            compressed_size: zip64.compressed_size.unwrap_or(cde.compressed_size as u64),
            uncompressed_size: zip64
                .uncompressed_size
                .unwrap_or(cde.uncompressed_size as u64),
            filename,
            extra: cde.extra_field.to_vec(),
            comment: cde.file_comment.to_vec(),
            header_offset: zip64.header_offset.unwrap_or(cde.header_offset as u64),
            data_offset: OnceLock::new(),
        })
    }

    /// Extracts `EntryMetadata` from a local file header.
    ///
    /// The local header doesn't know its own offset in the archive
    /// and never carries a comment. When general-purpose bit 3 is set,
    /// sizes and CRC arrive later in the data descriptor and the values
    /// here are placeholders.
    pub(crate) fn from_local_header(
        local: &LocalHeaderFixed,
        filename_raw: &[u8],
        extra_field: &[u8],
    ) -> ZipResult<Self> {
        let filename = decode_text(filename_raw, local.flags)?;

        let needed = Zip64Sentinels {
            uncompressed_size: local.uncompressed_size == SENTINEL32,
            compressed_size: local.compressed_size == SENTINEL32,
            ..Zip64Sentinels::default()
        };
        let zip64 = parse_zip64_extra(extra_field, needed);

        Ok(Self {
            version_made_by: 0,
            version_needed: local.minimum_extract_version,
            flags: local.flags,
            method: CompressionMethod::from_u16(local.compression_method),
            last_modified: parse_msdos(local.last_modified_time, local.last_modified_date),
            crc32: local.crc32,
            compressed_size: zip64.compressed_size.unwrap_or(local.compressed_size as u64),
            uncompressed_size: zip64
                .uncompressed_size
                .unwrap_or(local.uncompressed_size as u64),
            filename,
            extra: extra_field.to_vec(),
            comment: Vec::new(),
            header_offset: 0,
            data_offset: OnceLock::new(),
        })
    }
}
