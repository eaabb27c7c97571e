//! File classification: splits a path into name parts and decides what kind
//! of media it is.
//!
//! A file is one of:
//! - `Ignored`: sidecar junk (`Thumbs.db`, `.tmp`, `.tx`...), excluded from every check
//! - `Image`: a still frame, candidate for sequence grouping
//! - `Video`: a movie file, always its own entity
//! - `Other`: anything else; its presence disqualifies a pure sequence folder
//!
//! Ignored rules win over extension sets, then images, then videos.

use crate::config::ScanSettings;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Ignored,
    Image,
    Video,
    Other,
}

/// A directory entry with its parsed name and classification.
#[derive(Debug, Clone)]
pub struct File {
    /// Full path
    pub fpn: PathBuf,
    /// File name with extension (e.g. "a.1001.exr")
    pub name: String,
    /// Name without the last extension (e.g. "a.1001")
    pub stem: String,
    /// Lower-case extension with leading dot, or empty
    pub ext: String,
    pub kind: FileKind,
}

impl File {
    /// Parse and classify `path` against the scan rules.
    pub fn new<P: Into<PathBuf>>(path: P, settings: &ScanSettings) -> Self {
        let fpn = path.into();
        let name = fpn.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let (stem, ext) = split_name(&name);
        let kind = classify(&name, &ext, settings);
        Self { fpn, name, stem, ext, kind }
    }

    #[must_use]
    pub fn is_hidden(&self) -> bool {
        is_hidden(&self.name)
    }
}

impl std::fmt::Display for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "File(\"{}\", {:?})", self.fpn.display(), self.kind)
    }
}

/// Split a file name into (stem, lower-case extension with dot).
///
/// A leading dot is part of the name, not an extension: `.DS_Store` has no
/// extension.
pub fn split_name(name: &str) -> (String, String) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (name[..pos].to_string(), name[pos..].to_lowercase()),
        _ => (name.to_string(), String::new()),
    }
}

fn classify(name: &str, ext: &str, settings: &ScanSettings) -> FileKind {
    if settings.ignored_extensions.contains(ext) || settings.ignored_filenames.contains(&name.to_lowercase()) {
        FileKind::Ignored
    } else if settings.image_extensions.contains(ext) {
        FileKind::Image
    } else if settings.video_extensions.contains(ext) {
        FileKind::Video
    } else {
        FileKind::Other
    }
}

/// Dot-files count as hidden.
#[must_use]
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Sum of file sizes; `None` when nothing could be measured.
pub fn total_size(files: &[PathBuf]) -> Option<u64> {
    let sizes: Vec<u64> = files
        .par_iter()
        .filter_map(|f| std::fs::metadata(f).ok())
        .map(|m| m.len())
        .collect();
    (!sizes.is_empty()).then(|| sizes.iter().sum())
}

/// Modification time, if the file can be stat'ed.
pub fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Newest modification time across `files`.
pub fn newest_mtime(files: &[PathBuf]) -> Option<SystemTime> {
    files.iter().filter_map(|f| mtime(f)).max()
}

/// Seconds since the epoch, fractional.
#[must_use]
pub fn epoch_secs(t: SystemTime) -> f64 {
    t.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests;
