use std::collections::HashSet;
use std::fs;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use log::{debug, info};
use rayon::prelude::*;

use rcore::hash::{self, Digest};
use rcore::path::relative_entry_path;

use crate::codec::{Compression, Method};
use crate::error::{FormatError, WriteError};
use crate::format::{self, ArchiveHeader, EntryRecord, HEADER_LEN};
use crate::options::CreateOptions;

/// A source file resolved to the entry path it will be stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub entry: String,
    pub path: PathBuf,
}

/// An entry that has been compressed and hashed but not written yet.
#[derive(Debug, Clone)]
pub struct PreparedEntry {
    pub path: String,
    pub original_size: u64,
    pub checksum: Digest,
    pub method: Method,
    pub payload: Vec<u8>,
    pub payload_digest: Digest,
}

impl PreparedEntry {
    pub fn new(
        path: String,
        raw: &[u8],
        compression: Compression,
        level: Option<u32>,
    ) -> io::Result<Self> {
        // Checksum over the raw bytes so verification doesn't depend on the codec
        let checksum = hash::compute(raw);
        let (method, payload) = compression.apply(level, raw)?;
        let payload_digest = match method {
            Method::Store => checksum,
            _ => hash::compute(&payload),
        };

        Ok(PreparedEntry {
            path,
            original_size: raw.len() as u64,
            checksum,
            method,
            payload,
            payload_digest,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateSummary {
    pub entries: Vec<String>,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
}

impl CreateSummary {
    fn add(&mut self, entry: &PreparedEntry) {
        self.entries.push(entry.path.clone());
        self.original_bytes += entry.original_size;
        self.compressed_bytes += entry.payload.len() as u64;
    }
}

/// Streams payloads into a seekable output and fills in the header and
/// record table once every entry is known.
///
/// The output must be empty and positioned at 0. Entries have to be appended
/// in the same order as the paths given to [`ArchiveBuilder::new`].
pub struct ArchiveBuilder<W: Write + Seek> {
    inner: W,
    paths: Vec<String>,
    records: Vec<EntryRecord>,
    offset: u64,
}

impl<W: Write + Seek> ArchiveBuilder<W> {
    pub fn new(mut inner: W, paths: Vec<String>) -> Result<Self, FormatError> {
        u32::try_from(paths.len()).map_err(|_| FormatError::TooManyEntries(paths.len()))?;
        if let Some(long) = paths.iter().find(|p| p.len() > u16::MAX as usize) {
            return Err(FormatError::PathTooLong(long.len()));
        }

        let table_end = format::table_end(paths.iter().map(String::as_str));

        // Placeholder header + zeroed table, rewritten by finish()
        format::write_header(&mut inner, &ArchiveHeader::new(0))?;
        io::copy(&mut io::repeat(0).take(table_end - HEADER_LEN), &mut inner)?;

        Ok(ArchiveBuilder {
            inner,
            records: Vec::with_capacity(paths.len()),
            paths,
            offset: table_end,
        })
    }

    pub fn append(&mut self, entry: PreparedEntry) -> Result<(), FormatError> {
        if self.paths.get(self.records.len()) != Some(&entry.path) {
            return Err(FormatError::OutOfOrder(entry.path));
        }

        self.inner.write_all(&entry.payload)?;
        debug!(
            "persisted {} at {} ({} -> {} bytes, {})",
            entry.path,
            self.offset,
            entry.original_size,
            entry.payload.len(),
            entry.method
        );

        let compressed_size = entry.payload.len() as u64;
        self.records.push(EntryRecord {
            path: entry.path,
            original_size: entry.original_size,
            compressed_size,
            checksum: entry.checksum,
            payload_digest: Some(entry.payload_digest),
            method: entry.method,
            payload_offset: self.offset,
        });
        self.offset += compressed_size;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W, FormatError> {
        if self.records.len() != self.paths.len() {
            return Err(FormatError::MissingEntries {
                appended: self.records.len(),
                expected: self.paths.len(),
            });
        }

        self.inner.seek(SeekFrom::Start(0))?;
        format::write_header(&mut self.inner, &ArchiveHeader::new(self.records.len() as u32))?;
        for record in &self.records {
            format::write_entry_record(&mut self.inner, record)?;
        }
        self.inner.flush()?;

        Ok(self.inner)
    }
}

/// Writes a whole archive in one pass, for outputs that can't seek.
pub fn write_buffered<W: Write>(out: &mut W, entries: &[PreparedEntry]) -> Result<u64, FormatError> {
    let count = u32::try_from(entries.len()).map_err(|_| FormatError::TooManyEntries(entries.len()))?;
    let mut offset = format::table_end(entries.iter().map(|e| e.path.as_str()));

    format::write_header(out, &ArchiveHeader::new(count))?;
    for entry in entries {
        format::write_entry_record(
            out,
            &EntryRecord {
                path: entry.path.clone(),
                original_size: entry.original_size,
                compressed_size: entry.payload.len() as u64,
                checksum: entry.checksum,
                payload_digest: Some(entry.payload_digest),
                method: entry.method,
                payload_offset: offset,
            },
        )?;
        offset += entry.payload.len() as u64;
    }
    for entry in entries {
        out.write_all(&entry.payload)?;
    }
    out.flush()?;

    Ok(offset)
}

fn unreadable(path: &Path) -> impl FnOnce(io::Error) -> WriteError + '_ {
    move |source| WriteError::SourceUnreadable {
        path: path.to_path_buf(),
        source,
    }
}

/// Resolves `sources` in the order given into entry paths relative to `root`.
///
/// Directories are walked recursively in file name order. Symlinks found
/// while walking are skipped. `exclude` is never archived, it is used to keep
/// an archive from swallowing itself.
pub fn resolve_sources<P: AsRef<Path>>(
    sources: &[P],
    root: &Path,
    exclude: Option<&Path>,
) -> Result<Vec<Source>, WriteError> {
    let root = root.canonicalize().map_err(unreadable(root))?;
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let mut push = |path: PathBuf| -> Result<(), WriteError> {
        if exclude == Some(path.as_path()) {
            debug!("skipping the archive itself: {}", path.display());
            return Ok(());
        }
        let entry = relative_entry_path(&root, &path)?;
        if !seen.insert(entry.clone()) {
            return Err(WriteError::DuplicateEntry(entry));
        }
        out.push(Source { entry, path });
        Ok(())
    };

    for source in sources {
        let source = source.as_ref();
        let joined = if source.is_absolute() {
            source.to_path_buf()
        } else {
            root.join(source)
        };
        let canon = joined.canonicalize().map_err(unreadable(source))?;
        let meta = fs::metadata(&canon).map_err(unreadable(source))?;

        if !meta.is_dir() {
            push(canon)?;
            continue;
        }

        let walker = WalkBuilder::new(&canon)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            let entry = entry.map_err(|e| {
                let msg = e.to_string();
                let io = e.into_io_error().unwrap_or_else(|| io::Error::other(msg));
                WriteError::SourceUnreadable {
                    path: canon.clone(),
                    source: io,
                }
            })?;

            match entry.file_type() {
                Some(ft) if ft.is_file() => push(entry.into_path())?,
                Some(ft) if ft.is_dir() => (),
                _ => debug!("skipping non regular file: {}", entry.path().display()),
            }
        }
    }

    Ok(out)
}

fn load(source: &Source, options: &CreateOptions) -> Result<PreparedEntry, WriteError> {
    let raw = fs::read(&source.path).map_err(unreadable(&source.path))?;
    Ok(PreparedEntry::new(
        source.entry.clone(),
        &raw,
        options.compression,
        options.level,
    )?)
}

fn load_all(sources: &[Source], options: &CreateOptions) -> Result<Vec<PreparedEntry>, WriteError> {
    if options.parallel {
        // collect() keeps source order, so commit order is unaffected
        sources.par_iter().map(|s| load(s, options)).collect()
    } else {
        sources.iter().map(|s| load(s, options)).collect()
    }
}

fn working_root(options: &CreateOptions) -> Result<PathBuf, WriteError> {
    match &options.root {
        Some(root) => Ok(root.clone()),
        None => Ok(std::env::current_dir()?),
    }
}

/// Creates the archive at `archive_path` from `sources`.
///
/// The archive is assembled in a temporary file next to `archive_path` and
/// renamed into place only once complete: on any error nothing is left at
/// `archive_path`.
pub fn create<P: AsRef<Path>>(
    archive_path: &Path,
    sources: &[P],
    options: &CreateOptions,
) -> Result<CreateSummary, WriteError> {
    if sources.is_empty() {
        return Err(WriteError::NoInput);
    }

    let root = working_root(options)?;
    let exclude = archive_path.canonicalize().ok();
    let resolved = resolve_sources(sources, &root, exclude.as_deref())?;
    if resolved.is_empty() {
        return Err(WriteError::NoInput);
    }

    let dir = match archive_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new();
    tmp.prefix(".farc-").suffix(".tmp");
    // Same mode as any newly created file, the umask still applies
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.permissions(fs::Permissions::from_mode(0o666));
    }
    let mut temp = tmp.tempfile_in(dir)?;
    debug!("assembling {} in {}", archive_path.display(), temp.path().display());

    let mut summary = CreateSummary::default();
    {
        let out = BufWriter::new(temp.as_file_mut());
        let mut builder = ArchiveBuilder::new(out, resolved.iter().map(|s| s.entry.clone()).collect())?;

        if options.parallel {
            for entry in load_all(&resolved, options)? {
                summary.add(&entry);
                builder.append(entry)?;
            }
        } else {
            for source in &resolved {
                let entry = load(source, options)?;
                summary.add(&entry);
                builder.append(entry)?;
            }
        }

        builder.finish()?.into_inner().map_err(|e| e.into_error())?;
    }
    temp.as_file().sync_all()?;

    temp.persist(archive_path).map_err(|e| WriteError::IO(e.error))?;
    info!(
        "created {}: {} entries, {} -> {} bytes",
        archive_path.display(),
        summary.entries.len(),
        summary.original_bytes,
        summary.compressed_bytes
    );

    Ok(summary)
}

/// Creates an archive on a sink that can't seek, buffering every entry first.
pub fn create_to_writer<W: Write, P: AsRef<Path>>(
    out: &mut W,
    sources: &[P],
    options: &CreateOptions,
) -> Result<CreateSummary, WriteError> {
    if sources.is_empty() {
        return Err(WriteError::NoInput);
    }

    let root = working_root(options)?;
    let resolved = resolve_sources(sources, &root, None)?;
    if resolved.is_empty() {
        return Err(WriteError::NoInput);
    }

    let entries = load_all(&resolved, options)?;
    let mut summary = CreateSummary::default();
    for entry in &entries {
        summary.add(entry);
    }

    write_buffered(out, &entries)?;
    info!(
        "wrote {} entries, {} -> {} bytes",
        summary.entries.len(),
        summary.original_bytes,
        summary.compressed_bytes
    );

    Ok(summary)
}
