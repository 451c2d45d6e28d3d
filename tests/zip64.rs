//! Tests against hand-crafted archives: Zip64 structures the writer only
//! emits for multi-gigabyte inputs, and wire-format corners
//! (data descriptors in both widths, descriptors after STORED entries)
//! that other tools produce.

use std::io::Read;

use anyhow::Result;
use log::*;

use bigzip::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A local file header with all-ones sizes and a Zip64 extra field:
/// the sizes should come from the extra.
#[test]
fn zip64_extra_overrides_local_sizes() -> Result<()> {
    init_logging();

    let data = b"Hello";
    let crc = crc32fast::hash(data);

    let mut bytes = Vec::new();
    // Local file header
    bytes.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]);
    bytes.extend_from_slice(&45u16.to_le_bytes()); // version needed
    bytes.extend_from_slice(&0u16.to_le_bytes()); // flags
    bytes.extend_from_slice(&0u16.to_le_bytes()); // method: stored
    bytes.extend_from_slice(&[0, 0, 0, 0]); // mod time/date
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes.extend_from_slice(&0xFFFFFFFFu32.to_le_bytes()); // compressed: see extra
    bytes.extend_from_slice(&0xFFFFFFFFu32.to_le_bytes()); // uncompressed: see extra
    bytes.extend_from_slice(&5u16.to_le_bytes()); // name len
    bytes.extend_from_slice(&20u16.to_le_bytes()); // extra len
    bytes.extend_from_slice(b"a.txt");
    // Zip64 extra: header ID 0x0001, 16 bytes: uncompressed, compressed
    bytes.extend_from_slice(&0x0001u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(&(data.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&(data.len() as u64).to_le_bytes());
    // The file data itself
    bytes.extend_from_slice(data);

    let mut reader = ZipStreamReader::new(&bytes[..]);
    let mut entry = reader.next_entry()?.expect("should find the entry");
    assert_eq!(entry.metadata().uncompressed_size, 5);
    assert_eq!(entry.metadata().compressed_size, 5);

    let mut contents = String::new();
    entry.read_to_string(&mut contents)?;
    assert_eq!(contents, "Hello");

    // The source just ends here; the reader should call that the end
    // (and still CRC-check the entry above).
    assert!(reader.next_entry()?.is_none());
    Ok(())
}

/// A full Zip64 archive: every EOCDR field is a sentinel, and the real
/// values live in the Zip64 EOCDR, found through its locator.
#[test]
fn zip64_eocdr_promotion() -> Result<()> {
    init_logging();

    let data = b"Hello";
    let crc = crc32fast::hash(data);
    let mut bytes = Vec::new();

    // Local file header for a.txt at offset 0, real sizes inline
    bytes.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]);
    bytes.extend_from_slice(&20u16.to_le_bytes()); // version needed
    bytes.extend_from_slice(&0u16.to_le_bytes()); // flags
    bytes.extend_from_slice(&0u16.to_le_bytes()); // method: stored
    bytes.extend_from_slice(&[0, 0, 0, 0]); // mod time/date
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&5u16.to_le_bytes()); // name len
    bytes.extend_from_slice(&0u16.to_le_bytes()); // extra len
    bytes.extend_from_slice(b"a.txt");
    bytes.extend_from_slice(data);

    // Central directory, with sentinels forwarding to a Zip64 extra
    let cd_start = bytes.len() as u64;
    assert_eq!(cd_start, 40);
    bytes.extend_from_slice(&[0x50, 0x4b, 0x01, 0x02]);
    bytes.extend_from_slice(&45u16.to_le_bytes()); // version made by
    bytes.extend_from_slice(&45u16.to_le_bytes()); // version needed
    bytes.extend_from_slice(&0u16.to_le_bytes()); // flags
    bytes.extend_from_slice(&0u16.to_le_bytes()); // method
    bytes.extend_from_slice(&[0, 0, 0, 0]); // mod time/date
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes.extend_from_slice(&0xFFFFFFFFu32.to_le_bytes()); // compressed
    bytes.extend_from_slice(&0xFFFFFFFFu32.to_le_bytes()); // uncompressed
    bytes.extend_from_slice(&5u16.to_le_bytes()); // name len
    bytes.extend_from_slice(&28u16.to_le_bytes()); // extra len
    bytes.extend_from_slice(&0u16.to_le_bytes()); // comment len
    bytes.extend_from_slice(&0u16.to_le_bytes()); // disk start
    bytes.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
    bytes.extend_from_slice(&0u32.to_le_bytes()); // external attrs
    bytes.extend_from_slice(&0xFFFFFFFFu32.to_le_bytes()); // header offset
    bytes.extend_from_slice(b"a.txt");
    // Zip64 extra: uncompressed, compressed, header offset
    bytes.extend_from_slice(&0x0001u16.to_le_bytes());
    bytes.extend_from_slice(&24u16.to_le_bytes());
    bytes.extend_from_slice(&(data.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&(data.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&0u64.to_le_bytes());
    let cd_size = bytes.len() as u64 - cd_start;

    // Zip64 EOCDR
    let zip64_eocdr_offset = bytes.len() as u64;
    bytes.extend_from_slice(&[0x50, 0x4b, 0x06, 0x06]);
    bytes.extend_from_slice(&44u64.to_le_bytes()); // size of the rest
    bytes.extend_from_slice(&45u16.to_le_bytes()); // version made by
    bytes.extend_from_slice(&45u16.to_le_bytes()); // version needed
    bytes.extend_from_slice(&0u32.to_le_bytes()); // this disk
    bytes.extend_from_slice(&0u32.to_le_bytes()); // central directory disk
    bytes.extend_from_slice(&1u64.to_le_bytes()); // entries on this disk
    bytes.extend_from_slice(&1u64.to_le_bytes()); // entries
    bytes.extend_from_slice(&cd_size.to_le_bytes());
    bytes.extend_from_slice(&cd_start.to_le_bytes());

    // Zip64 EOCDR locator
    bytes.extend_from_slice(&[0x50, 0x4b, 0x06, 0x07]);
    bytes.extend_from_slice(&0u32.to_le_bytes()); // disk with the Zip64 EOCDR
    bytes.extend_from_slice(&zip64_eocdr_offset.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes()); // total disks

    // Classic EOCDR, all sentinels
    bytes.extend_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
    bytes.extend_from_slice(&0u16.to_le_bytes()); // disk
    bytes.extend_from_slice(&0u16.to_le_bytes()); // central directory disk
    bytes.extend_from_slice(&0xFFFFu16.to_le_bytes()); // entries on disk
    bytes.extend_from_slice(&0xFFFFu16.to_le_bytes()); // entries
    bytes.extend_from_slice(&0xFFFFFFFFu32.to_le_bytes()); // cd size
    bytes.extend_from_slice(&0xFFFFFFFFu32.to_le_bytes()); // cd offset
    bytes.extend_from_slice(&0u16.to_le_bytes()); // comment len

    let archive = ZipArchive::new(&bytes[..])?;
    assert_eq!(archive.entries().len(), 1);
    let metadata = &archive.entries()[0];
    info!("{:?}", metadata);
    assert_eq!(metadata.filename, "a.txt");
    assert_eq!(metadata.uncompressed_size, 5);
    assert_eq!(metadata.compressed_size, 5);
    assert_eq!(metadata.header_offset, 0);

    let mut contents = String::new();
    archive.read(metadata)?.read_to_string(&mut contents)?;
    assert_eq!(contents, "Hello");
    Ok(())
}

/// A Zip64 data descriptor (64-bit sizes, no tag to say so) after a
/// DEFLATE stream of unknown size: the reader has to tell the layouts
/// apart by looking for the next record's signature.
#[test]
fn zip64_data_descriptor_disambiguation() -> Result<()> {
    use std::io::Write;

    init_logging();

    let data = b"Hello darkness my old friend";
    let crc = crc32fast::hash(data);
    let mut deflated = Vec::new();
    let mut encoder =
        flate2::write::DeflateEncoder::new(&mut deflated, flate2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()?;

    let mut bytes = Vec::new();
    // Local header: bit 3, no sizes
    bytes.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]);
    bytes.extend_from_slice(&45u16.to_le_bytes()); // version needed
    bytes.extend_from_slice(&(1u16 << 3).to_le_bytes()); // flags: data descriptor
    bytes.extend_from_slice(&8u16.to_le_bytes()); // method: deflate
    bytes.extend_from_slice(&[0, 0, 0, 0]); // mod time/date
    bytes.extend_from_slice(&0u32.to_le_bytes()); // crc: in the descriptor
    bytes.extend_from_slice(&0u32.to_le_bytes()); // compressed: ditto
    bytes.extend_from_slice(&0u32.to_le_bytes()); // uncompressed: ditto
    bytes.extend_from_slice(&5u16.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(b"s.txt");
    bytes.extend_from_slice(&deflated);
    // Data descriptor, Zip64 flavor
    bytes.extend_from_slice(&[0x50, 0x4b, 0x07, 0x08]);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes.extend_from_slice(&(deflated.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&(data.len() as u64).to_le_bytes());
    // An empty central directory and EOCDR, so the look-ahead has a
    // signature to find (and the reader a place to stop)
    bytes.extend_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
    bytes.extend_from_slice(&[0; 16]);
    bytes.extend_from_slice(&0u16.to_le_bytes());

    let mut reader = ZipStreamReader::new(&bytes[..]);
    let mut entry = reader.next_entry()?.expect("should find the entry");
    let mut contents = Vec::new();
    entry.read_to_end(&mut contents)?;
    assert_eq!(contents, data);
    // If the descriptor were misread as 32-bit, the reader would now be
    // 8 bytes short of the EOCDR and fail to see the end of the entries.
    assert!(reader.next_entry()?.is_none());
    Ok(())
}

/// Some tools set bit 3 on STORED entries and follow them with a
/// descriptor even though the sizes were right there in the header.
#[test]
fn descriptor_after_stored_entry() -> Result<()> {
    init_logging();

    let data = b"abcde";
    let crc = crc32fast::hash(data);
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]);
    bytes.extend_from_slice(&20u16.to_le_bytes());
    bytes.extend_from_slice(&(1u16 << 3).to_le_bytes()); // flags: data descriptor
    bytes.extend_from_slice(&0u16.to_le_bytes()); // method: stored
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&0u32.to_le_bytes()); // crc: in the descriptor
    bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(b"x");
    bytes.extend_from_slice(data);
    // The stray descriptor, 32-bit
    bytes.extend_from_slice(&[0x50, 0x4b, 0x07, 0x08]);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
    // EOCDR
    bytes.extend_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
    bytes.extend_from_slice(&[0; 16]);
    bytes.extend_from_slice(&0u16.to_le_bytes());

    let mut reader = ZipStreamReader::new(&bytes[..]);
    let mut entry = reader.next_entry()?.expect("should find the entry");
    let mut contents = Vec::new();
    entry.read_to_end(&mut contents)?;
    assert_eq!(contents, data);
    // Skipping the descriptor (and checking the CRC it carries)
    // happens on the way to the next record:
    assert!(reader.next_entry()?.is_none());
    Ok(())
}

/// Writing more entries than the classic EOCDR can count promotes the
/// archive to Zip64, and the indexed reader follows the promotion.
#[test]
fn writer_promotes_large_archives() -> Result<()> {
    init_logging();

    const COUNT: usize = 0x10001; // one more than the sentinel allows

    let mut writer = ZipWriter::new(Vec::new());
    for i in 0..COUNT {
        // Empty STORED entries keep this fast: no payload, no descriptor.
        writer.start_stored_entry(&format!("e{i}"), 0, 0)?;
    }
    let bytes = writer.finish()?;

    let archive = ZipArchive::new(&bytes[..])?;
    assert_eq!(archive.entries().len(), COUNT);
    assert_eq!(archive.entries()[COUNT - 1].filename, format!("e{}", COUNT - 1));
    assert!(archive.by_name("e65536").is_some());
    Ok(())
}
