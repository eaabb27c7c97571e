//! Sequence detection: groups numbered image files into sequences.
//!
//! Algorithm:
//! 1. Match each file name against an ordered list of naming patterns.
//!    Each pattern captures (base, frame token, extension); the first
//!    pattern that matches and yields a numeric frame wins.
//! 2. Group matches by (base, extension, padding width, pattern).
//! 3. Sort each group by frame number. A group becomes a [`Seq`] only if it
//!    has at least `min_len` files and no gap between consecutive frames is
//!    larger than `max_gap` (gap = next - prev - 1). Otherwise the whole
//!    group is rejected and its files stay individual images.
//!
//! Patterns are case-insensitive and anchored at the start of the name.

use crate::config::ScanSettings;
use crate::error::{Error, Result};
use log::{debug, warn};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Built-in naming patterns, tried before any custom ones.
pub const DEFAULT_PATTERNS: [&str; 3] = [
    r"(.+)\.(\d{4,})\.(exr|png|jpg|jpeg|tiff|tif|dpx|tga|bmp)$",
    r"(.+)_(\d{4,})\.(exr|png|jpg|jpeg|tiff|tif|dpx|tga|bmp)$",
    r"(.+)\.v\d+\.(\d{4,})\.(exr|png|jpg|jpeg|tiff|tif|dpx|tga|bmp)$",
];

/// Maximum gap size to expand into missed frames list (OOM protection)
const MAX_MISSED_GAP: i64 = 100_000;

/// Sequence of numbered files
#[derive(Debug, Clone, Serialize)]
pub struct Seq {
    /// Display name, e.g. `a.####.exr`
    pub name: String,
    /// Captured base name, e.g. `a`
    pub base: String,
    /// Captured extension as written in the file names
    pub ext: String,
    /// Directory holding the files
    pub dir: PathBuf,
    /// Files ordered by frame number
    pub files: Vec<PathBuf>,
    /// Frame numbers actually present
    pub indices: Vec<i64>,
    /// Missing frame numbers
    pub missed: Vec<i64>,
    /// First frame
    pub start: i64,
    /// Last frame
    pub end: i64,
    /// Width of the frame token
    pub padding: usize,
    /// Source of the pattern that matched
    pub pattern: String,
}

impl Seq {
    /// Get sequence length (number of files)
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[must_use]
    pub fn frame_range(&self) -> (i64, i64) {
        (self.start, self.end)
    }

    /// Canonical path: the directory joined with the display name.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

impl std::fmt::Display for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.missed.is_empty() {
            write!(f, "Seq(\"{}\", range: {}-{})", self.path().display(), self.start, self.end)
        } else {
            write!(
                f,
                "Seq(\"{}\", range: {}-{}, missed: {})",
                self.path().display(),
                self.start,
                self.end,
                self.missed.len()
            )
        }
    }
}

#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    fn compile(source: &str) -> Result<Self> {
        let regex = RegexBuilder::new(&format!("^(?:{})", source)).case_insensitive(true).build()?;
        // group 0 plus base, frame, extension
        if regex.captures_len() < 4 {
            return Err(Error::Validation(format!(
                "pattern '{}' needs three capture groups (base, frame, extension)",
                source
            )));
        }
        Ok(Self { source: source.to_string(), regex })
    }

    /// (base, frame token, extension) when `name` matches.
    fn split<'a>(&self, name: &'a str) -> Option<(&'a str, &'a str, &'a str)> {
        let caps = self.regex.captures(name)?;
        Some((caps.get(1)?.as_str(), caps.get(2)?.as_str(), caps.get(3)?.as_str()))
    }
}

/// Result of trying one pattern against one file name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternMatch {
    pub name: String,
    pub base: Option<String>,
    pub frame: Option<i64>,
    pub ext: Option<String>,
}

impl PatternMatch {
    #[must_use]
    pub fn matched(&self) -> bool {
        self.frame.is_some()
    }
}

/// One file's place in a candidate group.
struct Member {
    path: PathBuf,
    frame: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    dir: PathBuf,
    base: String,
    ext: String,
    padding: usize,
    pattern: usize,
}

#[derive(Debug, Clone)]
pub struct SequenceDetector {
    patterns: Vec<Pattern>,
    builtin: usize,
    extensions: BTreeSet<String>,
    min_len: usize,
    max_gap: i64,
}

impl SequenceDetector {
    /// Built-in patterns followed by the configured custom ones.
    /// Custom patterns that fail to compile are logged and skipped.
    pub fn new(settings: &ScanSettings) -> Self {
        let mut detector = Self {
            patterns: DEFAULT_PATTERNS.iter().filter_map(|p| Pattern::compile(p).ok()).collect(),
            builtin: 0,
            extensions: settings.image_extensions.clone(),
            min_len: settings.min_sequence_length,
            max_gap: settings.max_gap_frames,
        };
        detector.builtin = detector.patterns.len();
        for source in &settings.custom_patterns {
            if let Err(e) = detector.add_pattern(source) {
                warn!("Skipping custom sequence pattern '{}': {}", source, e);
            }
        }
        detector
    }

    /// Append a custom pattern. Duplicates are ignored.
    pub fn add_pattern(&mut self, source: &str) -> Result<()> {
        if self.patterns.iter().any(|p| p.source == source) {
            return Ok(());
        }
        self.patterns.push(Pattern::compile(source)?);
        debug!("Added sequence pattern {}", source);
        Ok(())
    }

    /// Remove a custom pattern. Built-in patterns cannot be removed.
    pub fn remove_pattern(&mut self, source: &str) -> bool {
        match self.patterns.iter().skip(self.builtin).position(|p| p.source == source) {
            Some(pos) => {
                self.patterns.remove(self.builtin + pos);
                true
            }
            None => false,
        }
    }

    /// Pattern sources in match order.
    pub fn patterns(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.source.as_str()).collect()
    }

    #[must_use]
    pub fn min_len(&self) -> usize {
        self.min_len
    }

    /// Check a pattern against sample names without installing it.
    pub fn test_pattern(source: &str, names: &[&str]) -> Result<Vec<PatternMatch>> {
        let pattern = Pattern::compile(source)?;
        Ok(names
            .iter()
            .map(|name| match pattern.split(name) {
                Some((base, frame, ext)) => PatternMatch {
                    name: name.to_string(),
                    base: Some(base.to_string()),
                    frame: frame.parse().ok(),
                    ext: Some(ext.to_string()),
                },
                None => PatternMatch { name: name.to_string(), base: None, frame: None, ext: None },
            })
            .collect())
    }

    /// Group `files` into sequences. Files that end up in no sequence are
    /// simply absent from the result.
    pub fn detect(&self, files: &[PathBuf]) -> Vec<Seq> {
        let mut groups: BTreeMap<GroupKey, Vec<Member>> = BTreeMap::new();
        let mut unmatched = 0usize;

        for path in files {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
                continue;
            };
            let ext = crate::core::file::split_name(&name).1;
            if !self.extensions.contains(&ext) {
                continue;
            }
            match self.match_name(&name) {
                Some((pattern, base, token, ext)) => {
                    let Ok(frame) = token.parse::<i64>() else { continue };
                    let key = GroupKey {
                        dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
                        base: base.to_string(),
                        ext: ext.to_string(),
                        padding: token.len(),
                        pattern,
                    };
                    groups.entry(key).or_default().push(Member { path: path.clone(), frame });
                }
                None => unmatched += 1,
            }
        }
        if unmatched > 0 {
            debug!("{} files did not match any sequence pattern", unmatched);
        }

        groups.into_iter().filter_map(|(key, members)| self.build(key, members)).collect()
    }

    /// First pattern whose frame token parses wins.
    fn match_name<'a>(&self, name: &'a str) -> Option<(usize, &'a str, &'a str, &'a str)> {
        self.patterns.iter().enumerate().find_map(|(idx, pattern)| {
            let (base, token, ext) = pattern.split(name)?;
            token.parse::<i64>().ok()?;
            Some((idx, base, token, ext))
        })
    }

    fn build(&self, key: GroupKey, mut members: Vec<Member>) -> Option<Seq> {
        if members.len() < self.min_len {
            return None;
        }
        members.sort_by_key(|m| m.frame);
        let indices: Vec<i64> = members.iter().map(|m| m.frame).collect();
        let (start, end) = (*indices.first()?, *indices.last()?);

        let gap = max_gap(&indices);
        if gap > self.max_gap {
            debug!(
                "Rejecting {}.{} group: gap of {} frames exceeds {}",
                key.base, key.ext, gap, self.max_gap
            );
            return None;
        }

        Some(Seq {
            name: format!("{}.{}.{}", key.base, "#".repeat(key.padding), key.ext),
            missed: missed_frames(&indices),
            files: members.into_iter().map(|m| m.path).collect(),
            pattern: self.patterns[key.pattern].source.clone(),
            base: key.base,
            ext: key.ext,
            dir: key.dir,
            indices,
            start,
            end,
            padding: key.padding,
        })
    }
}

/// Largest number of missing frames between two consecutive present frames.
#[must_use]
pub fn max_gap(sorted: &[i64]) -> i64 {
    sorted.windows(2).map(|w| w[1].saturating_sub(w[0]).saturating_sub(1)).max().unwrap_or(0)
}

fn missed_frames(sorted: &[i64]) -> Vec<i64> {
    let mut missed = Vec::new();
    for w in sorted.windows(2) {
        let gap = w[1].saturating_sub(w[0]);
        // don't enumerate absurd gaps
        if gap > 1 && gap <= MAX_MISSED_GAP {
            missed.extend((w[0] + 1)..w[1]);
        }
    }
    missed
}

#[cfg(test)]
mod tests;
