use std::fmt;
use std::io::{copy, Read};

use thiserror::Error;

/// Width in bytes of an entry digest.
pub const DIGEST_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    #[error("digest must be {DIGEST_LEN} bytes, got {0}")]
    Length(usize),
}

// Wrap the blake3 hash so the archive format doesn't leak the hash engine
#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

/// Digest over raw bytes, deterministic and side effect free.
pub fn compute(data: &[u8]) -> Digest {
    Digest(*blake3::hash(data).as_bytes())
}

pub fn hash_reader<R: Read>(data: &mut R) -> Result<Digest, std::io::Error> {
    let mut hash = blake3::Hasher::new();
    copy(data, &mut hash)?;
    Ok(Digest(*hash.finalize().as_bytes()))
}

impl Digest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(digest: &str) -> Result<Digest, DigestError> {
        let bytes = hex::decode(digest)?;
        let len = bytes.len();
        let bytes: [u8; DIGEST_LEN] = bytes.try_into().map_err(|_| DigestError::Length(len))?;
        Ok(Digest(bytes))
    }
}

impl From<[u8; DIGEST_LEN]> for Digest {
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Digest(bytes)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod test_digest {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn deterministic() {
        assert_eq!(compute(b"hello"), compute(b"hello"));
        assert_ne!(compute(b"hello"), compute(b"hellp"));
    }

    #[test]
    fn empty_input() {
        // Well known blake3 digest of the empty string
        assert_eq!(
            compute(b"").to_hex(),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn reader_matches_slice() {
        let data: Vec<u8> = (0..10_000u32).map(|x| (x % 251) as u8).collect();
        let mut cur = Cursor::new(data.clone());

        assert_eq!(hash_reader(&mut cur).unwrap(), compute(&data));
    }

    #[test]
    fn hex_round_trip() {
        let digest = compute(b"\x00\xff");
        assert_eq!(Digest::from_hex(&digest.to_hex()).unwrap(), digest);
    }

    #[test]
    fn hex_wrong_length() {
        assert!(matches!(Digest::from_hex("abcd"), Err(DigestError::Length(2))));
        assert!(matches!(Digest::from_hex("zz"), Err(DigestError::Hex(_))));
    }
}
