//! Entry path rules shared by the archive writer and reader.
//!
//! Entry paths are stored relative, UTF-8 and `/` separated. A path is only
//! accepted if every component is a plain name: no `..`, no `.`, no empty
//! components, no root or drive prefix, and no `:` anywhere since windows
//! reads `C:x` as a drive relative path. The same check runs when an archive
//! is created and again before anything is written on extraction.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PathError {
    #[error("empty entry path")]
    Empty,
    #[error("absolute entry path: {0}")]
    Absolute(String),
    #[error("parent directory traversal in entry path: {0}")]
    Traversal(String),
    #[error("invalid component in entry path: {0}")]
    InvalidComponent(String),
    #[error("path is outside the root directory: {}", .0.display())]
    Outside(PathBuf),
    #[error("path is not valid utf-8: {}", .0.display())]
    NotUtf8(PathBuf),
}

pub fn validate_entry_path(entry: &str) -> Result<(), PathError> {
    if entry.is_empty() {
        return Err(PathError::Empty);
    }
    if entry.starts_with('/') || entry.starts_with('\\') || has_drive_prefix(entry) {
        return Err(PathError::Absolute(entry.to_string()));
    }
    // Backslash would be a separator on windows, refuse it everywhere
    if entry.contains('\\') || entry.contains('\0') {
        return Err(PathError::InvalidComponent(entry.to_string()));
    }

    for comp in entry.split('/') {
        match comp {
            ".." => return Err(PathError::Traversal(entry.to_string())),
            "" | "." => return Err(PathError::InvalidComponent(entry.to_string())),
            c if c.contains(':') => return Err(PathError::InvalidComponent(entry.to_string())),
            _ => (),
        }
    }
    Ok(())
}

fn has_drive_prefix(entry: &str) -> bool {
    let bytes = entry.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Converts `file` into an entry path relative to `root`.
///
/// Both paths are expected to be canonical already; this is purely lexical.
pub fn relative_entry_path(root: &Path, file: &Path) -> Result<String, PathError> {
    let rel = file
        .strip_prefix(root)
        .map_err(|_| PathError::Outside(file.to_path_buf()))?;

    let mut out = String::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(name) => {
                let name = name
                    .to_str()
                    .ok_or_else(|| PathError::NotUtf8(file.to_path_buf()))?;
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(name);
            }
            Component::CurDir => (),
            Component::ParentDir => {
                return Err(PathError::Traversal(file.to_string_lossy().into_owned()))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Absolute(file.to_string_lossy().into_owned()))
            }
        }
    }

    validate_entry_path(&out)?;
    Ok(out)
}

/// Joins a validated entry path onto `base` using the platform separator.
pub fn entry_to_path(base: &Path, entry: &str) -> Result<PathBuf, PathError> {
    validate_entry_path(entry)?;

    let mut out = base.to_path_buf();
    for comp in entry.split('/') {
        out.push(comp);
    }
    Ok(out)
}
