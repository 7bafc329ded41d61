use std::path::PathBuf;

use thiserror::Error;

use rcore::path::PathError;

use crate::codec::Method;

/// Errors from parsing or emitting the archive layout itself.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("not a farc archive (magic {0:02x?})")]
    BadMagic([u8; 4]),
    #[error("unsupported archive version {0}")]
    UnsupportedVersion(u16),
    #[error("archive truncated while reading {0}")]
    Truncated(&'static str),
    #[error("entry path is not valid utf-8")]
    InvalidPath,
    #[error("entry path too long ({0} bytes)")]
    PathTooLong(usize),
    #[error("too many entries ({0})")]
    TooManyEntries(usize),
    #[error("unknown compression method {0}")]
    UnknownMethod(u8),
    #[error("record table ends at {table_end} but first payload is at {first_payload}")]
    EntryCountMismatch { table_end: u64, first_payload: u64 },
    #[error("entry {0} appended out of order")]
    OutOfOrder(String),
    #[error("only {appended} of {expected} entries appended")]
    MissingEntries { appended: usize, expected: usize },
}

/// Codec level failures, independent of which entry is being decoded.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed {method} stream")]
    Malformed {
        method: Method,
        #[source]
        source: std::io::Error,
    },
    #[error("decoded size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("no input files")]
    NoInput,
    #[error("cannot read source {}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsafe source path: {0}")]
    UnsafePath(#[from] PathError),
    #[error("duplicate entry path: {0}")]
    DuplicateEntry(String),
}

/// Why an entry failed to materialize.
#[derive(Error, Debug)]
pub enum Corruption {
    #[error("checksum mismatch")]
    Checksum,
    #[error("payload digest mismatch")]
    Payload,
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Error, Debug)]
pub enum ReadError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("corrupt entry {path}")]
    CorruptEntry {
        path: String,
        #[source]
        cause: Corruption,
    },
    #[error("unsafe entry path: {0}")]
    UnsafePath(String),
    #[error("payload of {0} extends past end of archive")]
    TruncatedPayload(String),
    #[error("refusing to overwrite existing file {}", .0.display())]
    AlreadyExists(PathBuf),
}

/// A failed extraction, with everything that was written before it stopped.
#[derive(Error, Debug)]
#[error("{source} ({} entries extracted before failure)", .extracted.len())]
pub struct ExtractError {
    pub extracted: Vec<PathBuf>,
    #[source]
    pub source: ReadError,
}

impl ExtractError {
    pub fn kind(&self) -> &ReadError {
        &self.source
    }
}

impl From<ReadError> for ExtractError {
    fn from(source: ReadError) -> Self {
        ExtractError {
            extracted: Vec::new(),
            source,
        }
    }
}
