//! Media entities: the unit the catalog indexes, probes and thumbnails.

use super::file::{split_name, total_size};
use super::seq::{Seq, SequenceDetector};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Video,
    /// Numbered files matched by a naming pattern
    Sequence,
    /// A whole directory of frames
    FolderSequence,
    Image,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Video => "video",
            EntityKind::Sequence => "sequence",
            EntityKind::FolderSequence => "folder_sequence",
            EntityKind::Image => "image",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(EntityKind::Video),
            "sequence" => Some(EntityKind::Sequence),
            "folder_sequence" => Some(EntityKind::FolderSequence),
            "image" => Some(EntityKind::Image),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a thumbnail gets made for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    /// Single file with more than one frame (or unknown frame count)
    Video,
    /// Several files
    Sequence,
    /// Single file, single frame
    Still,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaEntity {
    /// Video file, sequence folder, or `<dir>/<sequence name>`
    pub path: PathBuf,
    pub name: String,
    pub kind: EntityKind,
    /// Constituent files, in frame order for sequences
    pub files: Vec<PathBuf>,
    pub frame_range: Option<(i64, i64)>,
    /// Total bytes, `None` when unknown
    pub file_size: Option<u64>,
    pub frame_count: Option<usize>,
}

impl MediaEntity {
    pub fn video(path: &Path) -> Self {
        let name = file_name(path);
        let (stem, _) = split_name(&name);
        let files = vec![path.to_path_buf()];
        Self {
            path: path.to_path_buf(),
            name: stem,
            kind: EntityKind::Video,
            file_size: total_size(&files),
            files,
            frame_range: None,
            frame_count: None,
        }
    }

    pub fn image(path: &Path) -> Self {
        let files = vec![path.to_path_buf()];
        Self {
            path: path.to_path_buf(),
            name: file_name(path),
            kind: EntityKind::Image,
            file_size: total_size(&files),
            files,
            frame_range: Some((1, 1)),
            frame_count: Some(1),
        }
    }

    pub fn from_seq(seq: &Seq) -> Self {
        Self {
            path: seq.path(),
            name: seq.name.clone(),
            kind: EntityKind::Sequence,
            file_size: total_size(&seq.files),
            files: seq.files.clone(),
            frame_range: Some(seq.frame_range()),
            frame_count: Some(seq.len()),
        }
    }

    /// A pure sequence folder. The frame range comes from the largest
    /// pattern-detected sequence inside, else `1..=n`.
    pub fn folder(dir: &Path, mut images: Vec<PathBuf>, detector: &SequenceDetector) -> Self {
        images.sort();
        let count = images.len();
        let frame_range = detector
            .detect(&images)
            .iter()
            .max_by_key(|s| s.len())
            .map(Seq::frame_range)
            .unwrap_or((1, count as i64));
        Self {
            path: dir.to_path_buf(),
            name: file_name(dir),
            kind: EntityKind::FolderSequence,
            file_size: total_size(&images),
            files: images,
            frame_range: Some(frame_range),
            frame_count: Some(count),
        }
    }

    /// Placeholder for a folder whose contents could not be read.
    pub fn folder_fallback(dir: &Path) -> Self {
        Self {
            path: dir.to_path_buf(),
            name: file_name(dir),
            kind: EntityKind::FolderSequence,
            files: Vec::new(),
            frame_range: Some((1, 1)),
            file_size: None,
            frame_count: Some(0),
        }
    }

    #[must_use]
    pub fn render_kind(&self) -> RenderKind {
        match (self.files.len(), self.frame_count) {
            (1, Some(1)) => RenderKind::Still,
            (n, _) if n > 1 => RenderKind::Sequence,
            _ => RenderKind::Video,
        }
    }

    /// Files to stat and probe; the entity path itself when the list is empty.
    #[must_use]
    pub fn sources(&self) -> Vec<PathBuf> {
        if self.files.is_empty() {
            vec![self.path.clone()]
        } else {
            self.files.clone()
        }
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

impl std::fmt::Display for MediaEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.frame_range {
            Some((a, b)) if self.files.len() > 1 => {
                write!(f, "{}(\"{}\", {} files, {}-{})", self.kind, self.path.display(), self.files.len(), a, b)
            }
            _ => write!(f, "{}(\"{}\")", self.kind, self.path.display()),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
