//! bigzip reads and writes ZIP archives of any size with a simple API,
//! including archives that need the Zip64 extensions —
//! files over 4 GiB, or more entries than a u16 can count.
//!
//! Reading works two ways. Given a file (or anything else that supports
//! positional reads), [`ZipArchive`] indexes the central directory and
//! serves entries in any order, several at a time:
//!
//! ```no_run
//! # use std::io;
//! # use bigzip::*;
//! let archive = ZipArchive::open("foo.zip")?;
//! for entry in archive.entries() {
//!     println!("{}: {} bytes", entry.filename, entry.uncompressed_size);
//! }
//!
//! // Or go straight to the file you want:
//! if let Some(metadata) = archive.by_name("some/specific/file") {
//!     let mut reader = archive.read(metadata)?;
//!     let mut save_to = std::fs::File::create("extracted")?;
//!     io::copy(&mut reader, &mut save_to)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Readers are `Send`, so entries can be decompressed in parallel —
//! here with Rayon:
//!
//! ```no_run
//! # use std::io;
//! # use rayon::prelude::*;
//! # use bigzip::*;
//! # let archive = ZipArchive::open("foo.zip")?;
//! archive
//!     .entries()
//!     .iter()
//!     .filter(|entry| entry.is_file())
//!     .par_bridge()
//!     .try_for_each(|entry| {
//!         let mut reader = archive.read(entry)?;
//!         io::copy(&mut reader, &mut io::sink())?;
//!         Ok::<(), anyhow::Error>(())
//!     })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! When the source can't seek — a socket, a pipe — [`ZipStreamReader`]
//! walks the archive front to back instead:
//!
//! ```no_run
//! # use std::io::Read;
//! # use bigzip::*;
//! # let socket = std::io::empty();
//! let mut reader = ZipStreamReader::new(socket);
//! while let Some(mut entry) = reader.next_entry()? {
//!     let mut contents = Vec::new();
//!     entry.read_to_end(&mut contents)?;
//!     println!("{}: {} bytes", entry.metadata().filename, contents.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! And [`ZipWriter`] produces archives, compressing as it goes:
//!
//! ```no_run
//! # use bigzip::*;
//! let mut writer = ZipWriter::create("out.zip")?;
//! writer.add("hello.txt", b"Hello, world!\n")?;
//! writer.finish()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Zip is an interesting archive format: unlike compressed tarballs often
//! seen in Linux land (`*.tar.gz`, `*.tar.zst`, ...), each file in a Zip
//! archive is compressed independently, with a central directory telling
//! us where to find each file. This allows us to extract multiple files
//! simultaneously so long as we can read from multiple places at once.
//!
//! The format's 32-bit fields cap classic archives at 4 GiB and 65 535
//! entries. Past those lines, Zip64 records take over: overflowed fields
//! hold all-ones markers and the real 64-bit values ride in "extra field"
//! records and an extended end-of-central-directory record. Both readers
//! understand those transparently, and the writer emits them exactly when
//! an archive needs them.

pub mod metadata;
pub mod read;
pub mod result;
pub mod stream;
pub mod write;

pub use metadata::{CompressionMethod, EntryMetadata};
pub use read::ZipArchive;
pub use result::{ZipError, ZipResult};
pub use stream::ZipStreamReader;
pub use write::ZipWriter;

mod arch;
mod crc_reader;
mod spec;
