use std::fs::{self, File};
use std::io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use rcore::hash::{self, Digest};
use rcore::path::entry_to_path;

use crate::codec::Method;
use crate::error::{Corruption, ExtractError, FormatError, ReadError};
use crate::format::{self, ArchiveHeader, EntryRecord};
use crate::options::{ExtractOptions, UnsafePathPolicy};

// Don't trust the header's entry count for the up front allocation
const MAX_RECORD_PREALLOC: usize = 4096;

/// Public view of one entry, metadata only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub path: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub method: Method,
    /// BLAKE3 of the uncompressed content
    pub checksum: Digest,
    pub payload_offset: u64,
}

impl From<&EntryRecord> for EntryInfo {
    fn from(record: &EntryRecord) -> Self {
        EntryInfo {
            path: record.path.clone(),
            original_size: record.original_size,
            compressed_size: record.compressed_size,
            method: record.method,
            checksum: record.checksum,
            payload_offset: record.payload_offset,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub extracted: Vec<PathBuf>,
    /// Entries passed over under [`UnsafePathPolicy::Skip`]
    pub skipped: Vec<String>,
    pub bytes: u64,
}

#[derive(Debug)]
pub enum EntryStatus {
    Ok,
    Corrupt(Corruption),
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub entries: Vec<(String, EntryStatus)>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.entries.iter().all(|(_, s)| matches!(s, EntryStatus::Ok))
    }

    pub fn corrupt(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, s)| matches!(s, EntryStatus::Corrupt(_)))
            .map(|(p, _)| p.as_str())
    }
}

/// Read only view of an archive.
///
/// Opening parses the header and every record and checks the records
/// against the stream length; payloads are only touched on extraction or
/// verification.
pub struct ArchiveReader<R: Read + Seek> {
    inner: R,
    header: ArchiveHeader,
    records: Vec<EntryRecord>,
}

impl<R: Read + Seek> ArchiveReader<R> {
    pub fn open(mut inner: R) -> Result<Self, ReadError> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;

        let header = format::read_header(&mut inner)?;
        let mut records = Vec::with_capacity((header.entry_count as usize).min(MAX_RECORD_PREALLOC));
        for _ in 0..header.entry_count {
            records.push(format::read_entry_record(&mut inner, header.flags)?);
        }
        let table_end = inner.stream_position()?;

        // Payloads start right after the table, anything else means the
        // entry count disagrees with the records present
        if let Some(first_payload) = records.iter().map(|r| r.payload_offset).min() {
            if first_payload != table_end {
                return Err(FormatError::EntryCountMismatch {
                    table_end,
                    first_payload,
                }
                .into());
            }
        }

        for record in &records {
            match record.payload_offset.checked_add(record.compressed_size) {
                Some(end) if end <= len => (),
                _ => return Err(ReadError::TruncatedPayload(record.path.clone())),
            }
        }

        Ok(ArchiveReader {
            inner,
            header,
            records,
        })
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    pub fn entries(&self) -> impl Iterator<Item = EntryInfo> + '_ {
        self.records.iter().map(EntryInfo::from)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decompresses and checksums entry `index`.
    pub fn read_entry(&mut self, index: usize) -> Result<Vec<u8>, ReadError> {
        let record = self.records.get(index).ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidInput, format!("no entry {index}"))
        })?;
        materialize(&mut self.inner, record)
    }

    pub fn verify(&mut self) -> Result<VerifyReport, ReadError> {
        let mut report = VerifyReport::default();

        for record in &self.records {
            let status = match materialize(&mut self.inner, record) {
                Ok(_) => EntryStatus::Ok,
                Err(ReadError::CorruptEntry { cause, .. }) => {
                    warn!("corrupt entry {}: {}", record.path, cause);
                    EntryStatus::Corrupt(cause)
                }
                Err(e) => return Err(e),
            };
            report.entries.push((record.path.clone(), status));
        }
        Ok(report)
    }

    /// Extracts every entry below `dest`, stopping at the first failure.
    pub fn extract_to(&mut self, dest: &Path, options: &ExtractOptions) -> Result<ExtractSummary, ExtractError> {
        fs::create_dir_all(dest).map_err(ReadError::from)?;
        let dest = dest.canonicalize().map_err(ReadError::from)?;

        let mut summary = ExtractSummary::default();
        for record in &self.records {
            match extract_entry(&mut self.inner, record, &dest, options) {
                Ok((path, bytes)) => {
                    summary.extracted.push(path);
                    summary.bytes += bytes;
                }
                Err(ReadError::UnsafePath(path)) if options.unsafe_paths == UnsafePathPolicy::Skip => {
                    warn!("skipping unsafe entry path: {}", path);
                    summary.skipped.push(path);
                }
                Err(source) => {
                    return Err(ExtractError {
                        extracted: summary.extracted,
                        source,
                    })
                }
            }
        }
        Ok(summary)
    }
}

fn materialize<R: Read + Seek>(inner: &mut R, record: &EntryRecord) -> Result<Vec<u8>, ReadError> {
    inner.seek(SeekFrom::Start(record.payload_offset))?;

    let mut payload = vec![0u8; record.compressed_size as usize];
    inner.read_exact(&mut payload).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => ReadError::TruncatedPayload(record.path.clone()),
        _ => ReadError::IO(e),
    })?;

    let corrupt = |cause: Corruption| ReadError::CorruptEntry {
        path: record.path.clone(),
        cause,
    };

    // Checked before decoding, also catches bytes the decoder would skip over
    if let Some(digest) = &record.payload_digest {
        if hash::compute(&payload) != *digest {
            return Err(corrupt(Corruption::Payload));
        }
    }

    let raw = record
        .method
        .codec()
        .decompress(&payload, record.original_size)
        .map_err(|e| corrupt(e.into()))?;

    if hash::compute(&raw) != record.checksum {
        return Err(corrupt(Corruption::Checksum));
    }
    Ok(raw)
}

// Refuses any existing symlink along the entry's path, so nothing below can
// be redirected outside of `dest`
fn check_no_symlinks(dest: &Path, entry: &str) -> Result<(), ReadError> {
    let mut cur = dest.to_path_buf();
    for comp in entry.split('/') {
        cur.push(comp);
        match fs::symlink_metadata(&cur) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(ReadError::UnsafePath(entry.to_string()))
            }
            Ok(_) => (),
            Err(e) if e.kind() == ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn extract_entry<R: Read + Seek>(
    inner: &mut R,
    record: &EntryRecord,
    dest: &Path,
    options: &ExtractOptions,
) -> Result<(PathBuf, u64), ReadError> {
    let target = entry_to_path(dest, &record.path).map_err(|e| {
        debug!("rejecting {}: {}", record.path, e);
        ReadError::UnsafePath(record.path.clone())
    })?;
    check_no_symlinks(dest, &record.path)?;

    if !options.overwrite && target.exists() {
        return Err(ReadError::AlreadyExists(target));
    }

    let raw = materialize(inner, record)?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&target, &raw)?;
    debug!("extracted {} ({} bytes)", target.display(), raw.len());

    Ok((target, raw.len() as u64))
}

fn open_file(archive_path: &Path) -> Result<ArchiveReader<BufReader<File>>, ReadError> {
    ArchiveReader::open(BufReader::new(File::open(archive_path)?))
}

/// Lists the entries of an archive without reading any payload.
pub fn list(archive_path: &Path) -> Result<Vec<EntryInfo>, ReadError> {
    let reader = open_file(archive_path)?;
    Ok(reader.entries().collect())
}

pub fn extract(archive_path: &Path, dest: &Path, options: &ExtractOptions) -> Result<ExtractSummary, ExtractError> {
    let mut reader = open_file(archive_path)?;
    let summary = reader.extract_to(dest, options)?;

    info!(
        "extracted {} entries ({} bytes) from {}, {} skipped",
        summary.extracted.len(),
        summary.bytes,
        archive_path.display(),
        summary.skipped.len()
    );
    Ok(summary)
}

pub fn verify(archive_path: &Path) -> Result<VerifyReport, ReadError> {
    let mut reader = open_file(archive_path)?;
    reader.verify()
}

#[cfg(test)]
mod test_reader {
    use super::*;
    use crate::codec::Compression;
    use crate::format::{write_entry_record, write_header};
    use crate::writer::{write_buffered, PreparedEntry};
    use std::io::Cursor;

    fn archive(files: Vec<(&str, Vec<u8>)>, compression: Compression) -> Vec<u8> {
        let entries: Vec<PreparedEntry> = files
            .iter()
            .map(|(p, raw)| PreparedEntry::new(p.to_string(), raw, compression, None).unwrap())
            .collect();
        let mut out = Vec::new();
        write_buffered(&mut out, &entries).unwrap();
        out
    }

    #[test]
    fn open_and_read() {
        let data = archive(vec![("x.txt", b"hello".to_vec()), ("y.bin", vec![0x00, 0xff])], Compression::Auto);
        let mut reader = ArchiveReader::open(Cursor::new(data)).unwrap();

        assert_eq!(reader.len(), 2);
        assert_eq!(reader.header().entry_count, 2);
        let sizes: Vec<u64> = reader.entries().map(|e| e.original_size).collect();
        assert_eq!(sizes, vec![5, 2]);

        assert_eq!(reader.read_entry(0).unwrap(), b"hello");
        assert_eq!(reader.read_entry(1).unwrap(), vec![0x00, 0xff]);
        assert!(reader.read_entry(2).is_err());
    }

    #[test]
    fn deflate_corruption_is_corrupt_entry() {
        let text = b"Hello World!!!!!".repeat(64);
        let mut data = archive(vec![("a", text)], Compression::Deflate);
        let offset = ArchiveReader::open(Cursor::new(data.clone()))
            .unwrap()
            .entries()
            .next()
            .unwrap()
            .payload_offset;
        data[offset as usize + 3] ^= 0x55;

        let mut reader = ArchiveReader::open(Cursor::new(data)).unwrap();
        assert!(matches!(reader.read_entry(0), Err(ReadError::CorruptEntry { .. })));
    }

    #[test]
    fn truncated_payload() {
        let mut data = archive(vec![("a", b"0123456789".to_vec())], Compression::Store);
        data.truncate(data.len() - 1);

        assert!(matches!(
            ArchiveReader::open(Cursor::new(data)),
            Err(ReadError::TruncatedPayload(p)) if p == "a"
        ));
    }

    #[test]
    fn entry_count_too_small() {
        let mut data = archive(vec![("a", b"1".to_vec()), ("b", b"2".to_vec())], Compression::Store);
        // Claim a single entry, the second record now sits where payloads should start
        data[6] = 1;

        assert!(matches!(
            ArchiveReader::open(Cursor::new(data)),
            Err(ReadError::Format(FormatError::EntryCountMismatch { .. }))
        ));
    }

    #[test]
    fn entry_count_too_large() {
        let mut data = archive(vec![("a", b"1".to_vec())], Compression::Store);
        data[6] = 200;

        assert!(matches!(
            ArchiveReader::open(Cursor::new(data)),
            Err(ReadError::Format(_))
        ));
    }

    #[test]
    fn payload_offset_overflow() {
        let mut data = Vec::new();
        write_header(&mut data, &ArchiveHeader::new(1)).unwrap();
        let offset = format::table_end(["a"]);
        write_entry_record(
            &mut data,
            &EntryRecord {
                path: "a".to_string(),
                original_size: 1,
                compressed_size: u64::MAX,
                checksum: hash::compute(b"1"),
                payload_digest: Some(hash::compute(b"1")),
                method: Method::Store,
                payload_offset: offset,
            },
        )
        .unwrap();

        assert!(matches!(
            ArchiveReader::open(Cursor::new(data)),
            Err(ReadError::TruncatedPayload(_))
        ));
    }

    #[test]
    fn verify_reports_each_entry() {
        let mut data = archive(
            vec![("a", b"aaaa".to_vec()), ("b", b"bbbb".to_vec()), ("c", b"cccc".to_vec())],
            Compression::Store,
        );
        let offset = ArchiveReader::open(Cursor::new(data.clone()))
            .unwrap()
            .entries()
            .nth(1)
            .unwrap()
            .payload_offset;
        data[offset as usize] = b'x';

        let report = ArchiveReader::open(Cursor::new(data)).unwrap().verify().unwrap();
        assert!(!report.is_ok());
        assert_eq!(report.corrupt().collect::<Vec<_>>(), vec!["b"]);
        assert!(matches!(report.entries[1].1, EntryStatus::Corrupt(Corruption::Payload)));
    }

    fn binary_blob(len: u32) -> Vec<u8> {
        (0..len).map(|x| (x.wrapping_mul(2654435761) >> 13) as u8).collect()
    }

    // Every value of every payload byte, including bits the decoders ignore
    #[test]
    fn any_payload_byte_change_is_detected() {
        let text = b"Hello World!!!!!".repeat(64);
        let inputs = [
            (Compression::Deflate, text.clone()),
            (Compression::Deflate, binary_blob(1024)),
            (Compression::Zstd, text.clone()),
            (Compression::Zstd, binary_blob(1024)),
            (Compression::Store, b"stored as is".to_vec()),
        ];

        for (compression, raw) in inputs {
            let mut data = archive(vec![("a", raw)], compression);
            let record = ArchiveReader::open(Cursor::new(data.clone())).unwrap().records.remove(0);
            let start = record.payload_offset as usize;
            let end = start + record.compressed_size as usize;

            for at in start..end {
                for mask in 1..=255u8 {
                    data[at] ^= mask;
                    let res = materialize(&mut Cursor::new(&data), &record);
                    assert!(
                        matches!(res, Err(ReadError::CorruptEntry { .. })),
                        "{:?} byte {} ^ {:#04x} went unnoticed",
                        compression,
                        at - start,
                        mask
                    );
                    data[at] ^= mask;
                }
            }
            assert!(materialize(&mut Cursor::new(&data), &record).is_ok());
        }
    }

    // Archives written without the payload digest flag still verify content
    #[test]
    fn content_checksum_without_payload_digest() {
        let raw = b"0123456789";
        let mut data = Vec::new();
        write_header(
            &mut data,
            &ArchiveHeader {
                version: format::VERSION,
                entry_count: 1,
                flags: 0,
            },
        )
        .unwrap();
        let record = EntryRecord {
            path: "a".to_string(),
            original_size: raw.len() as u64,
            compressed_size: raw.len() as u64,
            checksum: hash::compute(raw),
            payload_digest: None,
            method: Method::Store,
            payload_offset: format::table_end(["a"]) - rcore::hash::DIGEST_LEN as u64,
        };
        write_entry_record(&mut data, &record).unwrap();
        data.extend_from_slice(raw);

        let mut reader = ArchiveReader::open(Cursor::new(data.clone())).unwrap();
        assert!(!reader.header().has_payload_digest());
        assert_eq!(reader.read_entry(0).unwrap(), raw);

        let last = data.len() - 1;
        data[last] ^= 0x01;
        let mut reader = ArchiveReader::open(Cursor::new(data)).unwrap();
        assert!(matches!(
            reader.read_entry(0),
            Err(ReadError::CorruptEntry {
                cause: Corruption::Checksum,
                ..
            })
        ));
    }
}
