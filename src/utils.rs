//! Utility functions

use crate::error::{PmpError, PmpIoError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use url::Url;
use walkdir::WalkDir;

/// File extensions recognised as protobuf sources.
pub const PROTO_EXTENSIONS: &[&str] = &["proto"];

/// File extensions recognised as archive inputs.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "jar"];

/// Canonicalize the path, platform-agnostic.
///
/// On windows this will ensure the path only consists of `/` separators.
pub fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf, PmpIoError> {
    let path = path.as_ref();
    let res = dunce::canonicalize(path);
    #[cfg(windows)]
    let res = res.map(|p| {
        use path_slash::PathBufExt;
        PathBuf::from(p.to_slash_lossy().as_ref())
    });
    res.map_err(|err| PmpIoError::new(err, path))
}

/// Canonicalizes the path where possible and returns it unchanged otherwise.
///
/// This takes care of symbolic-linked directories: on OS X `/var` is a
/// symlink to `/private/var`, so two spellings of the same file would
/// otherwise survive deduplication.
pub fn canonicalized(path: impl Into<PathBuf>) -> PathBuf {
    let path = path.into();
    canonicalize(&path).unwrap_or(path)
}

/// Strips `root` from `source` and returns the relative path.
pub fn strip_prefix<'a>(source: &'a Path, root: &Path) -> &'a Path {
    source.strip_prefix(root).unwrap_or(source)
}

/// Returns an iterator that yields all regular files under `root`, or `root`
/// itself if it is a file.
///
/// This also follows symlinks.
pub fn files_iter(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().into())
}

/// Returns `true` if the file name carries one of `extensions`,
/// case-insensitively.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or_default()
}

/// Renders the canonical `file:` URI for a path, used as the stable map key
/// in the incremental cache.
pub fn file_uri(path: &Path) -> String {
    match Url::from_file_path(canonicalized(path)) {
        Ok(url) => url.to_string(),
        // relative path that cannot become a file URL; keep it verbatim so
        // the cache key is still deterministic
        Err(()) => format!("file:{}", path.display()),
    }
}

/// Reads the json file and deserializes it into the provided type.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|err| PmpError::io(err, path))?;
    serde_json::from_slice(&bytes).map_err(Into::into)
}

/// Serializes the provided value to JSON and writes it to a file.
pub fn write_json_file<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    create_parent_dir_all(path)?;
    let file = fs::File::create(path).map_err(|err| PmpError::io(err, path))?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush().map_err(|e| PmpError::io(e, path))
}

/// Creates the parent directory of the `file` and all its ancestors if it
/// does not exist.
///
/// See [`fs::create_dir_all()`].
pub fn create_parent_dir_all(file: &Path) -> Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).map_err(|err| PmpError::io(err, parent))?;
    }
    Ok(())
}

/// Creates a new named tempdir.
#[cfg(test)]
pub(crate) fn tempdir(name: &str) -> Result<tempfile::TempDir, PmpIoError> {
    tempfile::Builder::new().prefix(name).tempdir().map_err(|err| PmpIoError::new(err, name))
}
