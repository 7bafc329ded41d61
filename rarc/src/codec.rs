//! Compression codecs, keyed by the method id persisted in each entry record.
//!
//! New codecs get a new id; ids are never reused so old archives keep
//! decoding.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use serde::Deserialize;

use crate::error::{DecodeError, FormatError};

pub const DEFAULT_DEFLATE_LEVEL: u32 = 6;
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

// Cap on up front allocation when trusting a size out of an entry record
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Method {
    Store = 0,
    Deflate = 1,
    Zstd = 2,
}

impl Method {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Result<Method, FormatError> {
        match id {
            0 => Ok(Method::Store),
            1 => Ok(Method::Deflate),
            2 => Ok(Method::Zstd),
            other => Err(FormatError::UnknownMethod(other)),
        }
    }

    /// Codec able to decode payloads written with this method.
    pub fn codec(self) -> Box<dyn Codec + Send + Sync> {
        match self {
            Method::Store => Box::new(Store),
            Method::Deflate => Box::new(Deflate::default()),
            Method::Zstd => Box::new(Zstd::default()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Store => write!(f, "store"),
            Method::Deflate => write!(f, "deflate"),
            Method::Zstd => write!(f, "zstd"),
        }
    }
}

pub trait Codec {
    fn method(&self) -> Method;

    fn compress(&self, raw: &[u8]) -> std::io::Result<Vec<u8>>;

    /// Decodes `payload`, which must expand to exactly `expected` bytes.
    fn decompress(&self, payload: &[u8], expected: u64) -> Result<Vec<u8>, DecodeError>;
}

pub struct Store;

impl Codec for Store {
    fn method(&self) -> Method {
        Method::Store
    }

    fn compress(&self, raw: &[u8]) -> std::io::Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress(&self, payload: &[u8], expected: u64) -> Result<Vec<u8>, DecodeError> {
        if payload.len() as u64 != expected {
            return Err(DecodeError::SizeMismatch {
                expected,
                actual: payload.len() as u64,
            });
        }
        Ok(payload.to_vec())
    }
}

pub struct Deflate {
    level: u32,
}

impl Deflate {
    pub fn new(level: u32) -> Self {
        Deflate {
            level: level.min(9),
        }
    }
}

impl Default for Deflate {
    fn default() -> Self {
        Deflate::new(DEFAULT_DEFLATE_LEVEL)
    }
}

impl Codec for Deflate {
    fn method(&self) -> Method {
        Method::Deflate
    }

    fn compress(&self, raw: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        encoder.write_all(raw)?;
        encoder.finish()
    }

    fn decompress(&self, payload: &[u8], expected: u64) -> Result<Vec<u8>, DecodeError> {
        bounded_decode(Method::Deflate, DeflateDecoder::new(payload), expected)
    }
}

pub struct Zstd {
    level: i32,
}

impl Zstd {
    pub fn new(level: i32) -> Self {
        Zstd {
            level: level.clamp(1, 22),
        }
    }
}

impl Default for Zstd {
    fn default() -> Self {
        Zstd::new(DEFAULT_ZSTD_LEVEL)
    }
}

impl Codec for Zstd {
    fn method(&self) -> Method {
        Method::Zstd
    }

    fn compress(&self, raw: &[u8]) -> std::io::Result<Vec<u8>> {
        zstd::stream::encode_all(raw, self.level)
    }

    fn decompress(&self, payload: &[u8], expected: u64) -> Result<Vec<u8>, DecodeError> {
        let decoder = zstd::stream::read::Decoder::new(payload).map_err(|source| {
            DecodeError::Malformed {
                method: Method::Zstd,
                source,
            }
        })?;
        bounded_decode(Method::Zstd, decoder, expected)
    }
}

// Reads at most expected + 1 bytes so an oversized stream is caught without
// decoding all of it
fn bounded_decode<R: Read>(method: Method, decoder: R, expected: u64) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(expected.min(MAX_PREALLOC) as usize);
    decoder
        .take(expected.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|source| DecodeError::Malformed { method, source })?;

    if out.len() as u64 != expected {
        return Err(DecodeError::SizeMismatch {
            expected,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}

/// Codec selection when creating an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Deflate, falling back to store when it doesn't shrink the entry
    #[default]
    Auto,
    Store,
    Deflate,
    Zstd,
}

impl Compression {
    /// Compresses `raw`, returning the method actually used and its payload.
    pub fn apply(self, level: Option<u32>, raw: &[u8]) -> std::io::Result<(Method, Vec<u8>)> {
        let codec: Box<dyn Codec> = match self {
            Compression::Store => Box::new(Store),
            Compression::Auto | Compression::Deflate => {
                Box::new(Deflate::new(level.unwrap_or(DEFAULT_DEFLATE_LEVEL)))
            }
            Compression::Zstd => Box::new(Zstd::new(
                level.map_or(DEFAULT_ZSTD_LEVEL, |l| l.min(22) as i32),
            )),
        };

        let payload = codec.compress(raw)?;
        if self == Compression::Auto && payload.len() >= raw.len() {
            return Ok((Method::Store, raw.to_vec()));
        }
        Ok((codec.method(), payload))
    }
}
