//! Entity discovery: turns a directory into [`MediaEntity`] records.
//!
//! Single directory D:
//! 1. D itself is a pure sequence folder: one folder entity, done.
//! 2. Every immediate subdirectory that is a pure sequence folder becomes a
//!    folder entity (not descended into).
//! 3. Files in D: each video is an entity. Images become individual entities
//!    when any video sits next to them; otherwise they go through the
//!    [`SequenceDetector`] and leftovers become individual entities.
//!
//! Recursive scans run in two phases:
//! 1. **Phase 1**: discover all subdirectories with jwalk and classify them
//!    in parallel with rayon, dropping pure sequence folders
//! 2. **Phase 2**: scan root and every remaining directory as in the single
//!    directory case, in path order
//!
//! Scanning runs on the caller's thread and returns when done.

use super::entity::MediaEntity;
use super::folder::{is_sequence_folder, FolderContents};
use super::seq::SequenceDetector;
use crate::config::ScanSettings;
use jwalk::WalkDir;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Result of a scan operation
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub entities: Vec<MediaEntity>,
    /// Scan duration in milliseconds
    pub elapsed_ms: f64,
    /// Directories that could not be scanned
    pub errors: Vec<String>,
}

impl std::fmt::Display for ScanResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ScanResult(entities={}, errors={}, elapsed={:.2}ms)",
            self.entities.len(),
            self.errors.len(),
            self.elapsed_ms
        )
    }
}

/// Scan directory for all subdirectories
///
/// Returns unique sorted list of folder paths, root included.
pub fn scan_dirs<P: AsRef<Path>>(root: P, recursive: bool, show_hidden: bool) -> Vec<PathBuf> {
    let root = root.as_ref();
    debug!("Scanning folders in: {}", root.display());
    let walker = WalkDir::new(root).skip_hidden(!show_hidden);
    let walker = if recursive { walker } else { walker.max_depth(1) };
    let mut folders = Vec::new();
    for entry in walker {
        match entry {
            Ok(e) if e.file_type().is_dir() => {
                let path = e.path();
                if path != root {
                    folders.push(path.to_path_buf());
                }
            }
            Ok(_) => {} // Not a directory
            Err(e) => warn!("Skipping inaccessible path: {}", e),
        }
    }
    // Always include root itself
    folders.push(root.to_path_buf());
    folders.sort();
    folders.dedup();
    debug!("Found {} folders", folders.len());
    folders
}

#[derive(Debug, Clone)]
pub struct Discovery {
    settings: ScanSettings,
    detector: SequenceDetector,
}

impl Discovery {
    pub fn new(settings: ScanSettings) -> Self {
        let detector = SequenceDetector::new(&settings);
        Self { settings, detector }
    }

    #[must_use]
    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    #[must_use]
    pub fn detector(&self) -> &SequenceDetector {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut SequenceDetector {
        &mut self.detector
    }

    /// Scan `dir` and return its entities.
    pub fn scan(&self, dir: &Path, recursive: bool) -> Vec<MediaEntity> {
        self.scan_with_progress(dir, recursive, &mut |_, _| {}).entities
    }

    /// Scan `dir`, reporting `(processed, total)` as it goes: files for a
    /// single directory, directories for a recursive scan.
    pub fn scan_with_progress(
        &self,
        dir: &Path,
        recursive: bool,
        progress: &mut dyn FnMut(usize, usize),
    ) -> ScanResult {
        let start = Instant::now();
        let mut result = ScanResult::default();

        if !dir.is_dir() {
            warn!("Not a directory: {}", dir.display());
            result.errors.push(format!("{}: not a directory", dir.display()));
            return result;
        }

        if recursive {
            self.scan_recursive(dir, progress, &mut result);
        } else {
            match self.scan_single(dir, Some(progress)) {
                Ok(entities) => result.entities = entities,
                Err(e) => {
                    warn!("Error scanning {}: {}", dir.display(), e);
                    result.errors.push(format!("{}: {}", dir.display(), e));
                }
            }
        }

        result.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!("Found {} entities in {} ({:.1}ms)", result.entities.len(), dir.display(), result.elapsed_ms);
        result
    }

    fn scan_recursive(&self, root: &Path, progress: &mut dyn FnMut(usize, usize), result: &mut ScanResult) {
        // Phase 1: discover folders and drop pure sequence folders
        let folders = scan_dirs(root, true, self.settings.show_hidden);
        let captured: HashSet<&PathBuf> = folders
            .par_iter()
            .filter(|d| d.as_path() != root && is_sequence_folder(d, &self.settings))
            .collect();
        let to_scan: Vec<&PathBuf> = folders.iter().filter(|d| !captured.contains(d)).collect();
        info!(
            "Phase 1 complete: {} folders, {} sequence folders",
            folders.len(),
            captured.len()
        );

        // Phase 2: scan what is left
        let total = to_scan.len();
        for (i, folder) in to_scan.into_iter().enumerate() {
            match self.scan_single(folder, None) {
                Ok(entities) => result.entities.extend(entities),
                Err(e) => {
                    warn!("Error scanning {}: {}", folder.display(), e);
                    result.errors.push(format!("{}: {}", folder.display(), e));
                }
            }
            progress(i + 1, total);
        }
    }

    fn scan_single(
        &self,
        dir: &Path,
        mut progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> std::io::Result<Vec<MediaEntity>> {
        if self.settings.folder_sequences && is_sequence_folder(dir, &self.settings) {
            debug!("{} is itself a sequence folder", dir.display());
            return Ok(vec![self.folder_entity(dir)]);
        }

        let contents = FolderContents::read(dir, &self.settings)?;
        let mut entities = Vec::new();

        if self.settings.folder_sequences {
            let folders: Vec<MediaEntity> = contents
                .subdirs
                .par_iter()
                .filter(|d| is_sequence_folder(d, &self.settings))
                .map(|d| self.folder_entity(d))
                .collect();
            entities.extend(folders);
        }

        let total = contents.videos.len() + contents.images.len();
        let mut processed = 0;
        let mut tick = |processed: usize| {
            if let Some(p) = progress.as_mut() {
                p(processed, total);
            }
        };

        for video in &contents.videos {
            entities.push(MediaEntity::video(video));
            processed += 1;
            tick(processed);
        }

        if contents.images.is_empty() {
            return Ok(entities);
        }

        if !contents.videos.is_empty() {
            debug!("Videos present in {}, {} images stay individual", dir.display(), contents.images.len());
            for image in &contents.images {
                entities.push(MediaEntity::image(image));
                processed += 1;
                tick(processed);
            }
            return Ok(entities);
        }

        let seqs = self.detector.detect(&contents.images);
        let mut grouped: HashSet<&Path> = HashSet::new();
        for seq in &seqs {
            entities.push(MediaEntity::from_seq(seq));
            grouped.extend(seq.files.iter().map(PathBuf::as_path));
            processed += seq.len();
            tick(processed);
        }
        for image in contents.images.iter().filter(|i| !grouped.contains(i.as_path())) {
            entities.push(MediaEntity::image(image));
            processed += 1;
            tick(processed);
        }
        Ok(entities)
    }

    /// Entity for a directory already known to be a pure sequence folder.
    fn folder_entity(&self, dir: &Path) -> MediaEntity {
        match FolderContents::read(dir, &self.settings) {
            Ok(contents) => MediaEntity::folder(dir, contents.images, &self.detector),
            Err(e) => {
                warn!("Could not read sequence folder {}: {}", dir.display(), e);
                MediaEntity::folder_fallback(dir)
            }
        }
    }
}
