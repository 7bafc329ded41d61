use std::path::PathBuf;

use serde::Deserialize;

use crate::codec::Compression;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreateOptions {
    pub compression: Compression,
    /// Codec specific level, the codec default when unset
    pub level: Option<u32>,
    /// Entry paths are stored relative to this, defaults to the current directory
    pub root: Option<PathBuf>,
    /// Compress entries on the rayon pool, archive order is unaffected
    pub parallel: bool,
}

/// What to do with an entry whose path would land outside the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsafePathPolicy {
    #[default]
    Reject,
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractOptions {
    pub unsafe_paths: UnsafePathPolicy,
    pub overwrite: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            unsafe_paths: UnsafePathPolicy::Reject,
            overwrite: true,
        }
    }
}
