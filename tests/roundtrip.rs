use std::io::{self, Read, Write};

use anyhow::{Context, Result};
use log::*;
use memmap2::Mmap;
use rayon::prelude::*;

use bigzip::write::EntryOptions;
use bigzip::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Finds `needle` as a contiguous sub-slice of `haystack`.
fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn two_files_both_readers() -> Result<()> {
    init_logging();

    let mut writer = ZipWriter::new(Vec::new());
    writer.add("foo.txt", b"contents of foo")?;
    writer.add("bar.txt", b"contents of bar")?;
    let bytes = writer.finish()?;

    // Indexed:
    let archive = ZipArchive::new(&bytes[..]).context("couldn't index the archive")?;
    assert_eq!(archive.entries().len(), 2);
    assert_eq!(archive.entries()[0].filename, "foo.txt");
    assert_eq!(archive.entries()[1].filename, "bar.txt");
    assert_eq!(archive.entries()[0].uncompressed_size, 15);
    assert!(archive.by_name("baz.txt").is_none());

    for (name, expected) in [("foo.txt", "contents of foo"), ("bar.txt", "contents of bar")] {
        let metadata = archive.by_name(name).expect("entry should be in the map");
        let mut contents = String::new();
        archive.read(metadata)?.read_to_string(&mut contents)?;
        assert_eq!(contents, expected);
    }

    // Streaming, in archive order:
    let mut reader = ZipStreamReader::new(&bytes[..]);
    for expected in ["contents of foo", "contents of bar"] {
        let mut entry = reader.next_entry()?.expect("should have another entry");
        let mut contents = String::new();
        entry.read_to_string(&mut contents)?;
        assert_eq!(contents, expected);
    }
    assert!(reader.next_entry()?.is_none());
    Ok(())
}

#[test]
fn a_hundred_files() -> Result<()> {
    init_logging();

    let mut writer = ZipWriter::new(Vec::new());
    for i in 0..100 {
        writer.add(&format!("foo{i}.txt"), format!("some contents {i}").as_bytes())?;
    }
    let bytes = writer.finish()?;

    let archive = ZipArchive::new(&bytes[..])?;
    assert_eq!(archive.entries().len(), 100);
    for (i, entry) in archive.entries().iter().enumerate() {
        assert_eq!(entry.filename, format!("foo{i}.txt"));
        let mut contents = String::new();
        archive.read(entry)?.read_to_string(&mut contents)?;
        assert_eq!(contents, format!("some contents {i}"));
    }
    Ok(())
}

#[test]
fn stored_round_trip() -> Result<()> {
    init_logging();

    let contents: &[u8] = b"stored, not stirred";
    let mut writer = ZipWriter::new(Vec::new());
    writer.start_stored_entry("neat.txt", crc32fast::hash(contents), contents.len() as u64)?;
    writer.write_all(contents)?;
    let bytes = writer.finish()?;

    let archive = ZipArchive::new(&bytes[..])?;
    let metadata = archive.by_name("neat.txt").unwrap();
    assert_eq!(metadata.method, CompressionMethod::Stored);
    assert_eq!(metadata.compressed_size, contents.len() as u64);
    let mut read_back = Vec::new();
    archive.read(metadata)?.read_to_end(&mut read_back)?;
    assert_eq!(read_back, contents);

    // STORED entries carry no data descriptor,
    // so the streaming reader gets real sizes up front.
    let mut reader = ZipStreamReader::new(&bytes[..]);
    let mut entry = reader.next_entry()?.expect("should have an entry");
    assert_eq!(entry.metadata().uncompressed_size, contents.len() as u64);
    let mut read_back = Vec::new();
    entry.read_to_end(&mut read_back)?;
    assert_eq!(read_back, contents);
    Ok(())
}

#[test]
fn directories_and_comments() -> Result<()> {
    init_logging();

    let mut writer = ZipWriter::new(Vec::new());
    writer.add_dir("hello")?;
    writer.add("hello/hi.txt", b"hi")?;
    writer.set_comment("made by a test");
    let bytes = writer.finish()?;

    let archive = ZipArchive::new(&bytes[..])?;
    assert_eq!(archive.comment(), b"made by a test");
    let dir = archive.by_name("hello/").expect("dir should be present");
    assert!(dir.is_dir());
    assert_eq!(dir.uncompressed_size, 0);
    let file = archive.by_name("hello/hi.txt").unwrap();
    assert!(file.is_file());
    Ok(())
}

#[test]
fn extras_and_entry_comments_come_back() -> Result<()> {
    init_logging();

    // A (made-up but well-formed) extra field record
    let mut extra = Vec::new();
    extra.extend_from_slice(&0x7775u16.to_le_bytes());
    extra.extend_from_slice(&4u16.to_le_bytes());
    extra.extend_from_slice(&[1, 2, 3, 4]);

    let mut writer = ZipWriter::new(Vec::new());
    writer.start_entry_with(
        "decorated.txt",
        EntryOptions {
            extra: extra.clone(),
            comment: b"a fine file".to_vec(),
            ..EntryOptions::default()
        },
    )?;
    writer.write_all(b"some contents")?;
    let bytes = writer.finish()?;

    let archive = ZipArchive::new(&bytes[..])?;
    let metadata = archive.by_name("decorated.txt").unwrap();
    assert!(contains_subslice(&metadata.extra, &extra));
    assert_eq!(metadata.comment, b"a fine file");
    Ok(())
}

#[test]
fn corruption_is_caught() -> Result<()> {
    init_logging();

    let contents: &[u8] = b"precious bits";
    let mut writer = ZipWriter::new(Vec::new());
    writer.start_stored_entry("foo.txt", crc32fast::hash(contents), contents.len() as u64)?;
    writer.write_all(contents)?;
    let mut bytes = writer.finish()?;

    // Flip a payload byte. The local header is 30 bytes + "foo.txt".
    let data_offset = 30 + "foo.txt".len();
    bytes[data_offset + 2] ^= 0x20;

    // The indexed reader notices at the end of the read...
    let archive = ZipArchive::new(&bytes[..])?;
    let metadata = archive.by_name("foo.txt").unwrap();
    let err = io::copy(&mut archive.read(metadata)?, &mut io::sink())
        .expect_err("corrupt data should fail the read");
    let zip_err = err
        .get_ref()
        .and_then(|e| e.downcast_ref::<ZipError>())
        .expect("should wrap a ZipError");
    info!("indexed reader reported: {zip_err}");
    assert!(matches!(
        zip_err,
        ZipError::ChecksumMismatch { filename, .. } if filename == "foo.txt"
    ));

    // ...and the streaming reader when the entry is closed,
    // even if nobody read it.
    let mut reader = ZipStreamReader::new(&bytes[..]);
    let first = reader.next_entry()?;
    assert!(first.is_some());
    drop(first);
    match reader.next_entry() {
        Err(ZipError::ChecksumMismatch { filename, .. }) => assert_eq!(filename, "foo.txt"),
        wut => panic!("expected a checksum mismatch, got {:?}", wut.err()),
    }
    Ok(())
}

#[test]
fn reopen_by_path() -> Result<()> {
    init_logging();

    let tempdir = tempfile::tempdir()?;
    let path = tempdir.path().join("reopen.zip");

    let mut writer = ZipWriter::create(&path)?;
    writer.add("foo.txt", b"contents of foo")?;
    drop(writer.finish()?); // Close the sink's file handle.

    let archive = ZipArchive::open(&path)?;
    let metadata = archive.by_name("foo.txt").expect("entry should survive");
    let mut contents = String::new();
    archive.read(metadata)?.read_to_string(&mut contents)?;
    assert_eq!(contents, "contents of foo");
    Ok(())
}

#[test]
fn duplicate_filename_is_rejected() -> Result<()> {
    init_logging();

    let mut writer = ZipWriter::new(Vec::new());
    writer.add("foo.txt", b"contents of foo")?;
    match writer.add("foo.txt", b"again?") {
        Err(ZipError::DuplicateEntryFilename(name)) => assert_eq!(name, "foo.txt"),
        wut => panic!("expected a duplicate-name error, got {:?}", wut.err()),
    }
    writer.finish()?;
    Ok(())
}

#[test]
fn parallel_reads_from_a_mapping() -> Result<()> {
    init_logging();

    let tempdir = tempfile::tempdir()?;
    let path = tempdir.path().join("parallel.zip");
    let mut writer = ZipWriter::create(&path)?;
    for i in 0..64 {
        writer.add(&format!("file{i}"), format!("contents {i}").repeat(50).as_bytes())?;
    }
    drop(writer.finish()?);

    let zip_file = std::fs::File::open(&path)?;
    let mapping = unsafe { Mmap::map(&zip_file).context("Couldn't mmap zip file")? };
    let archive = ZipArchive::new(&mapping[..])?;

    // Each read gets an independent cursor, so Rayon can rip through them.
    // (Each reader checks its file's CRC32 as it crosses the end.)
    archive
        .entries()
        .iter()
        .par_bridge()
        .try_for_each(|entry| {
            let mut sink = io::sink();
            io::copy(&mut archive.read(entry)?, &mut sink)?;
            Ok::<(), anyhow::Error>(())
        })?;
    Ok(())
}

#[test]
fn skipped_entries_are_still_verified() -> Result<()> {
    init_logging();

    let mut writer = ZipWriter::new(Vec::new());
    writer.add("a", b"first")?;
    writer.add("b", b"second")?;
    writer.add("c", b"third")?;
    let bytes = writer.finish()?;

    // Never read a byte; next_entry still drains and checks each one.
    let mut reader = ZipStreamReader::new(&bytes[..]);
    let mut names = Vec::new();
    while let Some(entry) = reader.next_entry()? {
        names.push(entry.metadata().filename.clone());
    }
    assert_eq!(names, ["a", "b", "c"]);
    Ok(())
}
