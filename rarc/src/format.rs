//! FARC on disk layout
//!
//! Everything is little endian.
//!
//! | Section       | Description |
//! | ------------- | ----------- |
//! | Header        | Fixed 12 bytes, see [`ArchiveHeader`] |
//! | Entry records | One per entry, in archive order, see [`EntryRecord`] |
//! | Payloads      | Compressed entry bytes, in the same order as the records |
//!
//! ## Header
//!
//! | Type    | Name        | Description |
//! | ------: | ----------- | ----------- |
//! | [u8; 4] | magic       | `FARC` |
//! | u16     | version     | Currently always 1 |
//! | u32     | entry count | Number of entry records that follow |
//! | u16     | flags       | See below |
//!
//! Flag bits:
//!
//! | Bit | Name           | Description |
//! | --: | -------------- | ----------- |
//! | 0   | payload digest | Every record carries a digest of its payload |
//!
//! Other bits are reserved, written as 0 and ignored on read.
//!
//! ## Entry record
//!
//! | Type     | Name           | Description |
//! | -------: | -------------- | ----------- |
//! | u16      | path length    | Length of the path in bytes |
//! | [u8; N]  | path           | UTF-8, `/` separated, relative |
//! | u64      | original size  | Size of the uncompressed content |
//! | u64      | compressed size| Size of the payload |
//! | [u8; 32] | checksum       | BLAKE3 of the uncompressed content |
//! | [u8; 32] | payload digest | BLAKE3 of the payload as stored, only with the payload digest flag |
//! | u8       | method         | See [`crate::codec::Method`] |
//! | u64      | payload offset | Absolute offset of the payload in the file |

use std::io::{ErrorKind, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use rcore::hash::{Digest, DIGEST_LEN};

use crate::codec::Method;
use crate::error::FormatError;

pub const MAGIC: [u8; 4] = *b"FARC";
pub const VERSION: u16 = 1;
pub const HEADER_LEN: u64 = 4 + 2 + 4 + 2;

/// Records carry a digest of the stored payload.
///
/// The content checksum alone can't see payload bytes the decoder ignores,
/// like deflate padding or zstd frame header fields.
pub const FLAG_PAYLOAD_DIGEST: u16 = 0x0001;

// path_len + orig_size + comp_size + checksum + payload digest + method + payload_offset
const RECORD_FIXED_LEN: u64 = 2 + 8 + 8 + DIGEST_LEN as u64 + DIGEST_LEN as u64 + 1 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub version: u16,
    pub entry_count: u32,
    pub flags: u16,
}

impl ArchiveHeader {
    pub fn new(entry_count: u32) -> Self {
        ArchiveHeader {
            version: VERSION,
            entry_count,
            flags: FLAG_PAYLOAD_DIGEST,
        }
    }

    pub fn has_payload_digest(&self) -> bool {
        self.flags & FLAG_PAYLOAD_DIGEST != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub path: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub checksum: Digest,
    /// Present iff the archive has [`FLAG_PAYLOAD_DIGEST`] set
    pub payload_digest: Option<Digest>,
    pub method: Method,
    pub payload_offset: u64,
}

/// Encoded size of a record holding `path`, as written by this version.
pub fn record_len(path: &str) -> u64 {
    RECORD_FIXED_LEN + path.len() as u64
}

/// Offset of the first payload for an archive holding `paths`.
pub fn table_end<'a, I: IntoIterator<Item = &'a str>>(paths: I) -> u64 {
    HEADER_LEN + paths.into_iter().map(record_len).sum::<u64>()
}

fn truncated(what: &'static str) -> impl Fn(std::io::Error) -> FormatError {
    move |e| match e.kind() {
        ErrorKind::UnexpectedEof => FormatError::Truncated(what),
        _ => FormatError::IO(e),
    }
}

pub fn write_header<W: Write + ?Sized>(out: &mut W, header: &ArchiveHeader) -> Result<(), FormatError> {
    out.write_all(&MAGIC)?;
    out.write_u16::<LittleEndian>(header.version)?;
    out.write_u32::<LittleEndian>(header.entry_count)?;
    out.write_u16::<LittleEndian>(header.flags)?;
    Ok(())
}

pub fn read_header<R: Read + ?Sized>(input: &mut R) -> Result<ArchiveHeader, FormatError> {
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic).map_err(truncated("header"))?;
    if magic != MAGIC {
        return Err(FormatError::BadMagic(magic));
    }

    let version = input.read_u16::<LittleEndian>().map_err(truncated("header"))?;
    if version != VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let entry_count = input.read_u32::<LittleEndian>().map_err(truncated("header"))?;
    let flags = input.read_u16::<LittleEndian>().map_err(truncated("header"))?;
    debug!("header: version {} entries {} flags {:#06x}", version, entry_count, flags);

    Ok(ArchiveHeader {
        version,
        entry_count,
        flags,
    })
}

pub fn write_entry_record<W: Write + ?Sized>(out: &mut W, record: &EntryRecord) -> Result<(), FormatError> {
    let path = record.path.as_bytes();
    let path_len = u16::try_from(path.len()).map_err(|_| FormatError::PathTooLong(path.len()))?;

    out.write_u16::<LittleEndian>(path_len)?;
    out.write_all(path)?;
    out.write_u64::<LittleEndian>(record.original_size)?;
    out.write_u64::<LittleEndian>(record.compressed_size)?;
    out.write_all(record.checksum.as_bytes())?;
    if let Some(digest) = &record.payload_digest {
        out.write_all(digest.as_bytes())?;
    }
    out.write_u8(record.method.id())?;
    out.write_u64::<LittleEndian>(record.payload_offset)?;
    Ok(())
}

/// Reads one record, `flags` being the archive header's.
pub fn read_entry_record<R: Read + ?Sized>(input: &mut R, flags: u16) -> Result<EntryRecord, FormatError> {
    let path_len = input.read_u16::<LittleEndian>().map_err(truncated("entry record"))?;
    let path = {
        let mut buf = vec![0u8; path_len as usize];
        input.read_exact(&mut buf).map_err(truncated("entry path"))?;
        String::from_utf8(buf).map_err(|_| FormatError::InvalidPath)?
    };

    let original_size = input.read_u64::<LittleEndian>().map_err(truncated("entry record"))?;
    let compressed_size = input.read_u64::<LittleEndian>().map_err(truncated("entry record"))?;
    let checksum = read_digest(input)?;
    let payload_digest = match flags & FLAG_PAYLOAD_DIGEST {
        0 => None,
        _ => Some(read_digest(input)?),
    };
    let method = Method::from_id(input.read_u8().map_err(truncated("entry record"))?)?;
    let payload_offset = input.read_u64::<LittleEndian>().map_err(truncated("entry record"))?;

    debug!("record: {} ({} -> {} bytes, {})", path, original_size, compressed_size, method);
    Ok(EntryRecord {
        path,
        original_size,
        compressed_size,
        checksum,
        payload_digest,
        method,
        payload_offset,
    })
}

fn read_digest<R: Read + ?Sized>(input: &mut R) -> Result<Digest, FormatError> {
    let mut buf = [0u8; DIGEST_LEN];
    input.read_exact(&mut buf).map_err(truncated("entry record"))?;
    Ok(Digest::from(buf))
}

#[cfg(test)]
mod test_format {
    use super::*;
    use std::io::Cursor;

    fn record(path: &str) -> EntryRecord {
        EntryRecord {
            path: path.to_string(),
            original_size: 5,
            compressed_size: 3,
            checksum: rcore::hash::compute(b"hello"),
            payload_digest: Some(rcore::hash::compute(b"hel")),
            method: Method::Deflate,
            payload_offset: 1234,
        }
    }

    #[test]
    fn header_layout() {
        let mut data = Vec::new();
        write_header(&mut data, &ArchiveHeader::new(2)).unwrap();

        assert_eq!(data.len() as u64, HEADER_LEN);
        assert_eq!(data, vec![b'F', b'A', b'R', b'C', 1, 0, 2, 0, 0, 0, 1, 0]);
        assert_eq!(read_header(&mut Cursor::new(data)).unwrap(), ArchiveHeader::new(2));
    }

    #[test]
    fn header_bad_magic() {
        let data = b"PK\x03\x04\x01\x00\x00\x00\x00\x00\x00\x00".to_vec();
        assert!(matches!(
            read_header(&mut Cursor::new(data)),
            Err(FormatError::BadMagic(m)) if &m == b"PK\x03\x04"
        ));
    }

    #[test]
    fn header_unsupported_version() {
        let mut data = Vec::new();
        write_header(
            &mut data,
            &ArchiveHeader {
                version: 99,
                entry_count: 0,
                flags: 0,
            },
        )
        .unwrap();

        assert!(matches!(
            read_header(&mut Cursor::new(data)),
            Err(FormatError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn header_truncated() {
        assert!(matches!(
            read_header(&mut Cursor::new(b"FARC\x01".to_vec())),
            Err(FormatError::Truncated("header"))
        ));
        assert!(matches!(
            read_header(&mut Cursor::new(Vec::new())),
            Err(FormatError::Truncated("header"))
        ));
    }

    #[test]
    fn unknown_header_flags_are_kept() {
        let mut data = Vec::new();
        write_header(
            &mut data,
            &ArchiveHeader {
                version: VERSION,
                entry_count: 1,
                flags: 0xbeef,
            },
        )
        .unwrap();

        let header = read_header(&mut Cursor::new(data)).unwrap();
        assert_eq!(header.entry_count, 1);
        assert_eq!(header.flags, 0xbeef);
    }

    #[test]
    fn record_layout() {
        let rec = record("dir/ünï.txt");
        let mut data = Vec::new();
        write_entry_record(&mut data, &rec).unwrap();

        assert_eq!(data.len() as u64, record_len(&rec.path));
        assert_eq!(&data[..2], &(rec.path.len() as u16).to_le_bytes());
        assert_eq!(data[data.len() - 9], Method::Deflate.id());
        assert_eq!(&data[data.len() - 8..], &1234u64.to_le_bytes());

        assert_eq!(read_entry_record(&mut Cursor::new(data), FLAG_PAYLOAD_DIGEST).unwrap(), rec);
    }

    #[test]
    fn record_without_payload_digest() {
        let rec = EntryRecord {
            payload_digest: None,
            ..record("old.txt")
        };
        let mut data = Vec::new();
        write_entry_record(&mut data, &rec).unwrap();

        assert_eq!(data.len() as u64, record_len(&rec.path) - DIGEST_LEN as u64);
        assert_eq!(read_entry_record(&mut Cursor::new(data), 0).unwrap(), rec);
    }

    #[test]
    fn record_truncated() {
        let mut data = Vec::new();
        write_entry_record(&mut data, &record("a.txt")).unwrap();
        data.truncate(data.len() - 3);

        assert!(matches!(
            read_entry_record(&mut Cursor::new(data), FLAG_PAYLOAD_DIGEST),
            Err(FormatError::Truncated("entry record"))
        ));
    }

    #[test]
    fn record_bad_utf8_and_method() {
        let mut data = Vec::new();
        write_entry_record(&mut data, &record("ab")).unwrap();

        let mut bad_path = data.clone();
        bad_path[2] = 0xff;
        assert!(matches!(
            read_entry_record(&mut Cursor::new(bad_path), FLAG_PAYLOAD_DIGEST),
            Err(FormatError::InvalidPath)
        ));

        let method_at = data.len() - 9;
        data[method_at] = 42;
        assert!(matches!(
            read_entry_record(&mut Cursor::new(data), FLAG_PAYLOAD_DIGEST),
            Err(FormatError::UnknownMethod(42))
        ));
    }

    #[test]
    fn path_too_long() {
        let rec = record(&"a".repeat(u16::MAX as usize + 1));
        assert!(matches!(
            write_entry_record(&mut Vec::new(), &rec),
            Err(FormatError::PathTooLong(65536))
        ));
    }

    #[test]
    fn table_end_offsets() {
        assert_eq!(table_end(Vec::<&str>::new()), HEADER_LEN);
        assert_eq!(table_end(["x.txt", "y.bin"]), HEADER_LEN + 2 * RECORD_FIXED_LEN + 10);
    }
}
