//! FARC archive engine
//!
//! A FARC archive is a single file holding a fixed header, one record per
//! entry and the entry payloads, see [`format`] for the layout. Entries are
//! compressed individually (see [`codec`]) and carry a BLAKE3 digest of their
//! uncompressed content which is checked on every read.
//!
//! The high level operations are [`create`], [`list`], [`extract`] and
//! [`verify`]; [`ArchiveBuilder`] and [`ArchiveReader`] expose the same
//! machinery over arbitrary streams.

pub mod codec;
pub mod error;
pub mod format;
pub mod options;
pub mod reader;
pub mod writer;


pub use codec::{Compression, Method};
pub use error::{Corruption, DecodeError, ExtractError, FormatError, ReadError, WriteError};
pub use options::{CreateOptions, ExtractOptions, UnsafePathPolicy};
pub use reader::{extract, list, verify, ArchiveReader, EntryInfo, EntryStatus, ExtractSummary, VerifyReport};
pub use writer::{create, create_to_writer, ArchiveBuilder, CreateSummary, PreparedEntry};
