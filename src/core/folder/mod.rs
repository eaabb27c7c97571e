//! Pure sequence folder classification.
//!
//! A directory is a pure sequence folder when, ignoring hidden and ignorable
//! entries, it has no subdirectories, no videos, no unclassified files and at
//! least `min_sequence_length` images. Such a folder is cataloged as one
//! entity instead of being scanned file by file.

use super::file::{is_hidden, File, FileKind};
use crate::config::ScanSettings;
use log::debug;
use std::path::{Path, PathBuf};

/// Entries of one directory, bucketed by kind.
#[derive(Debug, Clone, Default)]
pub struct FolderContents {
    pub subdirs: Vec<PathBuf>,
    pub images: Vec<PathBuf>,
    pub videos: Vec<PathBuf>,
    pub other: Vec<PathBuf>,
    pub ignored: Vec<PathBuf>,
}

impl FolderContents {
    /// Read `dir` non-recursively. Hidden entries are dropped unless the
    /// settings show them. Every list comes back sorted.
    pub fn read(dir: &Path, settings: &ScanSettings) -> std::io::Result<Self> {
        let mut contents = Self::default();
        for entry in std::fs::read_dir(dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !settings.show_hidden && is_hidden(&name) {
                continue;
            }
            // follow symlinks like a plain stat would
            let Ok(meta) = std::fs::metadata(&path) else {
                continue;
            };
            if meta.is_dir() {
                contents.subdirs.push(path);
                continue;
            }
            if !meta.is_file() {
                continue;
            }
            match File::new(path, settings) {
                File { kind: FileKind::Image, fpn, .. } => contents.images.push(fpn),
                File { kind: FileKind::Video, fpn, .. } => contents.videos.push(fpn),
                File { kind: FileKind::Other, fpn, .. } => contents.other.push(fpn),
                File { kind: FileKind::Ignored, fpn, .. } => contents.ignored.push(fpn),
            }
        }
        for list in [
            &mut contents.subdirs,
            &mut contents.images,
            &mut contents.videos,
            &mut contents.other,
            &mut contents.ignored,
        ] {
            list.sort();
        }
        Ok(contents)
    }

    #[must_use]
    pub fn is_pure_sequence(&self, min_len: usize) -> bool {
        self.subdirs.is_empty() && self.videos.is_empty() && self.other.is_empty() && self.images.len() >= min_len.max(1)
    }
}

/// Images of `dir` when it is a pure sequence folder, else `None`.
///
/// Always `None` when folder detection is disabled or `dir` is unreadable.
pub fn sequence_folder_images(dir: &Path, settings: &ScanSettings) -> Option<Vec<PathBuf>> {
    if !settings.folder_sequences {
        return None;
    }
    let contents = match FolderContents::read(dir, settings) {
        Ok(c) => c,
        Err(e) => {
            debug!("Cannot classify {}: {}", dir.display(), e);
            return None;
        }
    };
    if contents.is_pure_sequence(settings.min_sequence_length) {
        debug!("{} is a sequence folder ({} images)", dir.display(), contents.images.len());
        Some(contents.images)
    } else {
        None
    }
}

/// Whether `dir` qualifies as a pure sequence folder.
pub fn is_sequence_folder(dir: &Path, settings: &ScanSettings) -> bool {
    sequence_folder_images(dir, settings).is_some()
}
