//! Tools for reading a ZIP archive front to back, without seeking.
//!
//! [`ZipStreamReader`] walks the local file headers as they arrive from any
//! [`Read`] source — a socket, a pipe, `stdin` — and yields each entry's
//! data as it goes. Entries come out in archive order, and only the current
//! entry is readable; asking for the next one drains and checks the
//! previous one first.
//!
//! This works because each entry's data is preceded by a copy of its
//! metadata. The price of never seeking: entries written with
//! general-purpose bit 3 only reveal their sizes and CRC in a *data
//! descriptor* after the data, and the ZIP spec gives that record no
//! marker distinguishing its 32-bit form from its 64-bit (Zip64) form.
//! We disambiguate by peeking ahead for the next record's signature, which
//! can in principle be fooled by payload bytes that happen to form a
//! signature at the critical offset. Archives from this crate's writer are
//! always read back correctly.
//!
//! If your source supports positional reads, prefer [`ZipArchive`]:
//! it reads the authoritative central directory instead.
//!
//! [`ZipArchive`]: ../read/struct.ZipArchive.html

use std::convert::TryInto;
use std::fs::File;
use std::io::{self, Read};
use std::mem;
use std::path::Path;

use crc32fast::Hasher;
use flate2::bufread::DeflateDecoder;
use log::*;

use crate::metadata::{CompressionMethod, EntryMetadata};
use crate::result::*;
use crate::spec;

/// How far [`Lookahead::peek`] can see: a 64-bit data descriptor's sizes
/// (16 bytes) plus the following record's signature (4 bytes).
const PEEK: usize = 20;

/// A buffered reader with a bounded look-ahead.
///
/// [`BufReader`](std::io::BufReader) can't promise its buffer holds any
/// particular number of bytes, and the data-descriptor heuristic needs a
/// guaranteed 20-byte peek, so we roll our own.
struct Lookahead<R> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    cap: usize,
}

impl<R: Read> Lookahead<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0u8; 8 * 1024].into_boxed_slice(),
            pos: 0,
            cap: 0,
        }
    }

    /// Returns the next `n` bytes without consuming them,
    /// or fewer if the source ends first.
    fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        debug_assert!(n <= self.buf.len());
        if self.cap - self.pos < n {
            self.buf.copy_within(self.pos..self.cap, 0);
            self.cap -= self.pos;
            self.pos = 0;
            while self.cap < n {
                let read = self.inner.read(&mut self.buf[self.cap..])?;
                if read == 0 {
                    break;
                }
                self.cap += read;
            }
        }
        Ok(&self.buf[self.pos..self.cap.min(self.pos + n)])
    }

    fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for Lookahead<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.cap {
            // Big reads can skip the buffer entirely.
            if out.len() >= self.buf.len() {
                return self.inner.read(out);
            }
            self.cap = self.inner.read(&mut self.buf)?;
            self.pos = 0;
            if self.cap == 0 {
                return Ok(0);
            }
        }
        let n = out.len().min(self.cap - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl<R: Read> io::BufRead for Lookahead<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos == self.cap {
            self.cap = self.inner.read(&mut self.buf)?;
            self.pos = 0;
        }
        Ok(&self.buf[self.pos..self.cap])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.cap);
    }
}

fn read_u32_from<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    r.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64_from<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    r.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

/// The decoding pipeline for the current entry's data
enum Body<R: Read> {
    /// STORED: a sized window of the stream
    Stored(io::Take<Lookahead<R>>),
    /// DEFLATE with a known compressed size
    Deflated(DeflateDecoder<io::Take<Lookahead<R>>>),
    /// DEFLATE bounded only by its own end-of-stream marker
    /// (bit 3 deferred the sizes to the data descriptor)
    DeflatedToEnd(DeflateDecoder<Lookahead<R>>),
    /// An unsupported method: we can skip the sized payload, but any
    /// attempt to read it fails.
    Raw(io::Take<Lookahead<R>>),
}

impl<R: Read> Read for Body<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Body::Stored(t) => t.read(buf),
            Body::Deflated(d) => d.read(buf),
            Body::DeflatedToEnd(d) => d.read(buf),
            // Nothing we could decode; callers check the method first.
            Body::Raw(_) => Ok(0),
        }
    }
}

struct InFlight<R: Read> {
    body: Body<R>,
    hasher: Hasher,
    metadata: EntryMetadata,
}

/// A STORED entry that flagged a data descriptor we haven't seen yet.
///
/// With the payload length known up front there was no reason for the
/// writer to emit one, but if one follows anyway, the next-entry loop
/// consumes it and checks the CRC it carries.
struct PendingStored {
    filename: String,
    computed_crc: u32,
}

enum ReaderState<R: Read> {
    Idle(Lookahead<R>),
    Reading(InFlight<R>),
    End(Lookahead<R>),
    Poisoned,
}

/// A data descriptor, trailing the data of an entry
/// whose sizes weren't known when its local header was written
#[derive(Debug)]
struct DataDescriptor {
    crc32: u32,
    #[allow(dead_code)]
    compressed_size: u64,
    #[allow(dead_code)]
    uncompressed_size: u64,
}

/// Reads a ZIP archive in order from a non-seeking byte source
pub struct ZipStreamReader<R: Read> {
    state: ReaderState<R>,
    pending_stored: Option<PendingStored>,
}

impl ZipStreamReader<File> {
    /// Opens the archive at the given path for streaming.
    ///
    /// The file is owned by the reader and closed when it's dropped.
    pub fn open<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<R: Read> ZipStreamReader<R> {
    /// Streams a ZIP archive from the given byte source.
    pub fn new(source: R) -> Self {
        Self {
            state: ReaderState::Idle(Lookahead::new(source)),
            pending_stored: None,
        }
    }

    /// Advances to the next entry, returning `None` once the entries run
    /// out (i.e., the central directory begins).
    ///
    /// Any unread data of the previous entry is drained first, its
    /// trailing data descriptor (if any) consumed, and its CRC-32
    /// verified — so a corrupt entry fails here even if nobody read it.
    pub fn next_entry(&mut self) -> ZipResult<Option<StreamEntry<'_, R>>> {
        // Take the source back, closing out the previous entry.
        // Any error leaves the reader poisoned.
        let mut src = match mem::replace(&mut self.state, ReaderState::Poisoned) {
            ReaderState::Idle(src) => src,
            ReaderState::Reading(inflight) => {
                Self::finish_entry(inflight, &mut self.pending_stored)?
            }
            ReaderState::End(src) => {
                self.state = ReaderState::End(src);
                return Ok(None);
            }
            ReaderState::Poisoned => {
                return Err(ZipError::IllegalState(
                    "stream reader failed; no more entries can be read",
                ))
            }
        };

        loop {
            let peeked = src.peek(4)?;
            if peeked.is_empty() {
                // A source that ends cleanly at a record boundary —
                // no central directory, but all entries were intact.
                trace!("source ended after the last entry");
                self.state = ReaderState::End(src);
                return Ok(None);
            }
            if peeked.len() < 4 {
                return Err(ZipError::Truncated("record signature"));
            }
            let signature: [u8; 4] = peeked[..4].try_into().unwrap();

            if signature == spec::LOCAL_FILE_HEADER_MAGIC {
                self.pending_stored = None;
                let mut fixed = [0u8; 4 + spec::LocalHeaderFixed::SIZE];
                src.read_exact(&mut fixed)?;
                let local = spec::LocalHeaderFixed::parse(&fixed[4..])?;
                trace!("{:?}", local);

                let mut filename_raw = vec![0u8; local.filename_length as usize];
                src.read_exact(&mut filename_raw)?;
                let mut extra_field = vec![0u8; local.extra_field_length as usize];
                src.read_exact(&mut extra_field)?;

                let metadata =
                    EntryMetadata::from_local_header(&local, &filename_raw, &extra_field)?;
                debug!("{:?}", metadata);
                if metadata.is_encrypted() {
                    return Err(ZipError::UnsupportedArchive(format!(
                        "Can't read encrypted file {}",
                        metadata.filename
                    )));
                }

                let body = match metadata.method {
                    CompressionMethod::Stored => Body::Stored(src.take(metadata.compressed_size)),
                    CompressionMethod::Deflated => {
                        if metadata.compressed_size == 0 && metadata.uses_data_descriptor() {
                            // Size unknown: the DEFLATE stream marks its own end.
                            Body::DeflatedToEnd(DeflateDecoder::new(src))
                        } else {
                            Body::Deflated(DeflateDecoder::new(
                                src.take(metadata.compressed_size),
                            ))
                        }
                    }
                    CompressionMethod::Unsupported(_) => {
                        Body::Raw(src.take(metadata.compressed_size))
                    }
                };
                self.state = ReaderState::Reading(InFlight {
                    body,
                    hasher: Hasher::new(),
                    metadata,
                });
                return Ok(Some(StreamEntry { reader: self }));
            } else if signature == spec::DATA_DESCRIPTOR_MAGIC {
                // A descriptor after a STORED entry: there was no DEFLATE
                // end-of-stream to read it after, so it shows up here.
                let pending = match self.pending_stored.take() {
                    Some(pending) => pending,
                    None => {
                        return Err(ZipError::InvalidArchive(
                            "data descriptor with no entry to describe",
                        ))
                    }
                };
                let descriptor = read_data_descriptor(&mut src)?;
                trace!("descriptor after stored entry: {:?}", descriptor);
                if descriptor.crc32 != pending.computed_crc {
                    return Err(ZipError::ChecksumMismatch {
                        filename: pending.filename,
                        expected: descriptor.crc32,
                        actual: pending.computed_crc,
                    });
                }
                continue;
            } else {
                trace!(
                    "signature {:02x?} isn't a local file header; end of entries",
                    signature
                );
                self.pending_stored = None;
                self.state = ReaderState::End(src);
                return Ok(None);
            }
        }
    }

    /// Drains an entry's remaining data, consumes its data descriptor,
    /// verifies its CRC-32, and hands the source back.
    fn finish_entry(
        mut inflight: InFlight<R>,
        pending_stored: &mut Option<PendingStored>,
    ) -> ZipResult<Lookahead<R>> {
        // Decode whatever the caller didn't read; the CRC covers it all.
        let mut scratch = [0u8; 8 * 1024];
        loop {
            let n = inflight.body.read(&mut scratch)?;
            if n == 0 {
                break;
            }
            inflight.hasher.update(&scratch[..n]);
        }

        let mut src = match inflight.body {
            Body::Stored(t) => {
                if t.limit() > 0 {
                    return Err(ZipError::Truncated("stored entry data"));
                }
                t.into_inner()
            }
            Body::Deflated(d) => {
                let mut t = d.into_inner();
                // Skip any slack between the DEFLATE end-of-stream
                // and the declared compressed size.
                io::copy(&mut t, &mut io::sink())?;
                if t.limit() > 0 {
                    return Err(ZipError::Truncated("deflated entry data"));
                }
                t.into_inner()
            }
            Body::DeflatedToEnd(d) => d.into_inner(),
            Body::Raw(mut t) => {
                io::copy(&mut t, &mut io::sink())?;
                if t.limit() > 0 {
                    return Err(ZipError::Truncated("entry data"));
                }
                let src = t.into_inner();
                // We couldn't decode it, so there's no CRC to check.
                return Ok(src);
            }
        };

        let computed_crc = inflight.hasher.finalize();
        let metadata = inflight.metadata;

        let expected_crc = if metadata.uses_data_descriptor() {
            match metadata.method {
                CompressionMethod::Deflated => {
                    let descriptor = read_data_descriptor(&mut src)?;
                    trace!("{:?}", descriptor);
                    descriptor.crc32
                }
                _ => {
                    // STORED with bit 3: the descriptor — if the writer even
                    // emitted one — follows, but so might the next local
                    // header. Let the next-entry loop sort it out.
                    *pending_stored = Some(PendingStored {
                        filename: metadata.filename,
                        computed_crc,
                    });
                    return Ok(src);
                }
            }
        } else {
            metadata.crc32
        };

        if computed_crc != expected_crc {
            return Err(ZipError::ChecksumMismatch {
                filename: metadata.filename,
                expected: expected_crc,
                actual: computed_crc,
            });
        }
        Ok(src)
    }

    /// Closes out the current entry (draining and CRC-checking it)
    /// and returns the underlying byte source.
    ///
    /// Any look-ahead the reader buffered is discarded, so the source's
    /// position is only meaningful if you stopped at a record boundary.
    pub fn into_inner(mut self) -> ZipResult<R> {
        match mem::replace(&mut self.state, ReaderState::Poisoned) {
            ReaderState::Idle(src) | ReaderState::End(src) => Ok(src.into_inner()),
            ReaderState::Reading(inflight) => {
                let src = Self::finish_entry(inflight, &mut self.pending_stored)?;
                Ok(src.into_inner())
            }
            ReaderState::Poisoned => Err(ZipError::IllegalState(
                "stream reader failed; the source is in an unknown state",
            )),
        }
    }
}

/// Reads a data descriptor, including its optional signature.
///
/// 4.3.9.3: "Although not originally assigned a signature, the value
/// 0x08074b50 has commonly been adopted as a signature value for the data
/// descriptor record." — so the first word may be the signature or the
/// CRC itself.
///
/// Nothing distinguishes 32-bit sizes from 64-bit ones, either; we peek
/// ahead and see which interpretation puts a known signature right after
/// the descriptor, defaulting to 32-bit.
fn read_data_descriptor<R: Read>(src: &mut Lookahead<R>) -> ZipResult<DataDescriptor> {
    let first = read_u32_from(src)?;
    let crc32 = if first.to_le_bytes() == spec::DATA_DESCRIPTOR_MAGIC {
        read_u32_from(src)?
    } else {
        first
    };

    let peeked = src.peek(PEEK)?;
    let sizes_are_64bit = !signature_at(peeked, 8) && signature_at(peeked, 16);

    let (compressed_size, uncompressed_size) = if sizes_are_64bit {
        (read_u64_from(src)?, read_u64_from(src)?)
    } else {
        (read_u32_from(src)? as u64, read_u32_from(src)? as u64)
    };

    Ok(DataDescriptor {
        crc32,
        compressed_size,
        uncompressed_size,
    })
}

/// Is there a known record signature at `offset` into the peeked bytes?
fn signature_at(peeked: &[u8], offset: usize) -> bool {
    match peeked.get(offset..offset + 4) {
        Some(window) => [
            spec::LOCAL_FILE_HEADER_MAGIC,
            spec::CENTRAL_DIRECTORY_MAGIC,
            spec::EOCDR_MAGIC,
            spec::DATA_DESCRIPTOR_MAGIC,
        ]
        .iter()
        .any(|magic| window == magic.as_slice()),
        None => false,
    }
}

/// The current entry of a [`ZipStreamReader`]
///
/// Read the file's contents out of it with [`Read`];
/// it decompresses as it goes. The entry is only valid until the next
/// [`ZipStreamReader::next_entry`] call — the borrow checker sees to that.
pub struct StreamEntry<'a, R: Read> {
    reader: &'a mut ZipStreamReader<R>,
}

impl<R: Read> StreamEntry<'_, R> {
    /// The entry's metadata, as the local file header declared it.
    ///
    /// If the entry defers to a data descriptor
    /// (see [`EntryMetadata::uses_data_descriptor`]),
    /// the sizes and CRC here are placeholders;
    /// the real ones are checked when the entry is closed.
    pub fn metadata(&self) -> &EntryMetadata {
        match &self.reader.state {
            ReaderState::Reading(inflight) => &inflight.metadata,
            _ => unreachable!("a StreamEntry exists only while its reader is reading"),
        }
    }
}

impl<R: Read> Read for StreamEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inflight = match &mut self.reader.state {
            ReaderState::Reading(inflight) => inflight,
            _ => unreachable!("a StreamEntry exists only while its reader is reading"),
        };
        if let CompressionMethod::Unsupported(method) = inflight.metadata.method {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                ZipError::UnsupportedCompression(method),
            ));
        }
        let n = inflight.body.read(buf)?;
        inflight.hasher.update(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn peek_does_not_consume() {
        let mut lookahead = Lookahead::new(&b"abcdefghij"[..]);
        assert_eq!(lookahead.peek(4).unwrap(), b"abcd");
        assert_eq!(lookahead.peek(6).unwrap(), b"abcdef");

        let mut out = [0u8; 3];
        lookahead.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"abc");
        assert_eq!(lookahead.peek(4).unwrap(), b"defg");
    }

    #[test]
    fn peek_past_the_end_comes_up_short() {
        let mut lookahead = Lookahead::new(&b"abc"[..]);
        assert_eq!(lookahead.peek(PEEK).unwrap(), b"abc");
    }

    #[test]
    fn descriptor_sizes_disambiguate() {
        // 32-bit descriptor followed by a local file header signature
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&spec::DATA_DESCRIPTOR_MAGIC);
        bytes.extend_from_slice(&0xAABBCCDDu32.to_le_bytes()); // crc
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(&spec::LOCAL_FILE_HEADER_MAGIC);

        let mut lookahead = Lookahead::new(&bytes[..]);
        let descriptor = read_data_descriptor(&mut lookahead).unwrap();
        assert_eq!(descriptor.crc32, 0xAABBCCDD);
        assert_eq!(descriptor.compressed_size, 5);
        assert_eq!(descriptor.uncompressed_size, 5);

        // 64-bit descriptor (no signature this time)
        // followed by the end of central directory
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x11223344u32.to_le_bytes()); // crc
        bytes.extend_from_slice(&0x1_0000_0000u64.to_le_bytes());
        bytes.extend_from_slice(&0x2_0000_0000u64.to_le_bytes());
        bytes.extend_from_slice(&spec::EOCDR_MAGIC);

        let mut lookahead = Lookahead::new(&bytes[..]);
        let descriptor = read_data_descriptor(&mut lookahead).unwrap();
        assert_eq!(descriptor.crc32, 0x11223344);
        assert_eq!(descriptor.compressed_size, 0x1_0000_0000);
        assert_eq!(descriptor.uncompressed_size, 0x2_0000_0000);
    }
}
