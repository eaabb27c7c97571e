//! Typed snapshots of the configuration, built once per subsystem.
//!
//! A snapshot never changes after construction; reloading builds a new one.

use super::Config;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Lower-case an extension and make sure it has a leading dot.
pub fn normalize_ext(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

fn ext_set(config: &Config, key: &str) -> BTreeSet<String> {
    config
        .get_or::<Vec<String>>(key, Vec::new())
        .iter()
        .filter(|e| !e.trim().is_empty())
        .map(|e| normalize_ext(e))
        .collect()
}

/// File classification and sequence grouping rules.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub video_extensions: BTreeSet<String>,
    pub image_extensions: BTreeSet<String>,
    pub ignored_extensions: BTreeSet<String>,
    /// Compared lower-case.
    pub ignored_filenames: BTreeSet<String>,
    pub show_hidden: bool,
    pub folder_sequences: bool,
    pub min_sequence_length: usize,
    pub max_gap_frames: i64,
    pub custom_patterns: Vec<String>,
}

impl ScanSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            video_extensions: ext_set(config, "thumbnails.supported_formats"),
            image_extensions: ext_set(config, "sequence_detection.supported_extensions"),
            ignored_extensions: ext_set(config, "sequence_detection.folder_sequence_detection.ignored_extensions"),
            ignored_filenames: config
                .get_or::<Vec<String>>("sequence_detection.folder_sequence_detection.ignored_filenames", Vec::new())
                .iter()
                .map(|n| n.to_lowercase())
                .collect(),
            show_hidden: config.get_or("ui.show_hidden_files", false),
            folder_sequences: config.get_or("sequence_detection.folder_sequence_detection.enabled", true),
            min_sequence_length: config.get_or("sequence_detection.min_sequence_length", 2usize).max(1),
            max_gap_frames: config.get_or("sequence_detection.max_gap_frames", 10i64),
            custom_patterns: config.get_or("sequence_detection.custom_patterns", Vec::new()),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from_config(&Config::builtin())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimatedSettings {
    pub enabled: bool,
    pub frame_count: usize,
    pub fps: u32,
    pub max_size_kb: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailSettings {
    /// Output height in pixels, clamped to 32..=1024.
    pub resolution: u32,
    pub max_cache_bytes: u64,
    /// Check the cache budget after this many completions.
    pub eviction_interval: usize,
    pub workers: usize,
    /// Fraction of the video duration used for the static frame.
    pub time_offset: f64,
    pub animated: AnimatedSettings,
}

impl ThumbnailSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            resolution: config.get_or("thumbnails.default_resolution", 128u32).clamp(32, 1024),
            max_cache_bytes: config.get_or("thumbnails.max_cache_size_mb", 1024u64) * 1024 * 1024,
            eviction_interval: config.get_or("thumbnails.eviction_check_interval", 10usize).max(1),
            workers: config.get_or("performance.max_concurrent_thumbnails", 4usize).max(1),
            time_offset: config.get_or("ffmpeg.thumbnail_time_offset", 0.1f64),
            animated: AnimatedSettings {
                enabled: config.get_or("thumbnails.animated.enabled", true),
                frame_count: config.get_or("thumbnails.animated.frame_count", 25usize).max(1),
                fps: config.get_or("thumbnails.animated.fps", 10u32).max(1),
                max_size_kb: config.get_or("thumbnails.animated.max_size_kb", 500u64),
            },
        }
    }
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self::from_config(&Config::builtin())
    }
}

/// External tool locations.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub timeout: Duration,
}

impl ToolSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg: config.get_or("ffmpeg.executable_path", PathBuf::from("ffmpeg")),
            ffprobe: config.get_or("ffmpeg.ffprobe_path", PathBuf::from("ffprobe")),
            timeout: Duration::from_secs(config.get_or("ffmpeg.timeout", 30u64)),
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self::from_config(&Config::builtin())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub session_timeout: Duration,
    pub max_sessions: usize,
    pub max_tag_sessions: usize,
    pub retry_attempts: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub backup_enabled: bool,
    pub backup_interval: Duration,
    pub max_backups: usize,
}

impl StoreSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            session_timeout: Duration::from_secs(config.get_or("database.session_timeout_secs", 5u64)),
            max_sessions: config.get_or("database.max_sessions", 1usize).max(1),
            max_tag_sessions: config.get_or("database.max_tag_sessions", 8usize).max(1),
            retry_attempts: config.get_or("database.retry.max_attempts", 5u32).max(1),
            retry_base: Duration::from_millis(config.get_or("database.retry.base_delay_ms", 100u64)),
            retry_cap: Duration::from_millis(config.get_or("database.retry.max_delay_ms", 2000u64)),
            backup_enabled: config.get_or("database.backup_enabled", true),
            backup_interval: Duration::from_secs(config.get_or("database.backup_interval_hours", 24u64) * 3600),
            max_backups: config.get_or("database.max_backups", 7usize),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from_config(&Config::builtin())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSettings {
    pub auto_extract: bool,
    pub workers: usize,
}

impl MetadataSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_extract: config.get_or("metadata.auto_extract", true),
            workers: config.get_or("performance.max_concurrent_metadata", 4usize).max(1),
        }
    }
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self::from_config(&Config::builtin())
    }
}
