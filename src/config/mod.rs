//! Layered JSON configuration.
//!
//! Four layers are merged in order, later ones winning:
//! built-in defaults, the general file, the project file, the user file.
//! Objects merge key by key; any other value replaces what was below it.
//!
//! Lookups use dot paths: `config.get("thumbnails.animated.fps")`.
//! The merged tree is immutable until [`Config::reload`] re-reads the files.
//!
//! Typed snapshots for each subsystem live in [`settings`].

pub mod settings;

pub use settings::{
    AnimatedSettings, MetadataSettings, ScanSettings, StoreSettings, ThumbnailSettings, ToolSettings,
};

use crate::error::{Error, Result};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

/// Files backing the non-default layers. Missing files are empty layers.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub general: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub user: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    paths: ConfigPaths,
    general: Value,
    project: Value,
    user: Value,
    merged: Value,
}

impl Config {
    /// Load all layers from disk.
    pub fn load(paths: ConfigPaths) -> Result<Self> {
        let general = read_layer(paths.general.as_deref())?;
        let project = read_layer(paths.project.as_deref())?;
        let user = read_layer(paths.user.as_deref())?;
        let config = Self::assemble(paths, general, project, user);
        info!("Configuration loaded");
        Ok(config)
    }

    /// Build a configuration from in-memory layers (no backing files).
    pub fn from_layers(general: Value, project: Value, user: Value) -> Self {
        Self::assemble(ConfigPaths::default(), general, project, user)
    }

    /// Defaults only.
    pub fn builtin() -> Self {
        Self::from_layers(Value::Null, Value::Null, Value::Null)
    }

    fn assemble(paths: ConfigPaths, general: Value, project: Value, user: Value) -> Self {
        let mut merged = defaults();
        for layer in [&general, &project, &user] {
            deep_merge(&mut merged, layer);
        }
        Self { paths, general, project, user, merged }
    }

    /// Re-read every file-backed layer. In-memory layers are kept.
    pub fn reload(&mut self) -> Result<()> {
        if let Some(p) = &self.paths.general {
            self.general = read_layer(Some(p))?;
        }
        if let Some(p) = &self.paths.project {
            self.project = read_layer(Some(p))?;
        }
        if let Some(p) = &self.paths.user {
            self.user = read_layer(Some(p))?;
        }
        let mut merged = defaults();
        for layer in [&self.general, &self.project, &self.user] {
            deep_merge(&mut merged, layer);
        }
        self.merged = merged;
        info!("Configuration reloaded");
        Ok(())
    }

    /// Look up a dot path in the merged tree.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        lookup(&self.merged, key)
    }

    /// Look up and deserialize; `None` when absent or of the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Config key {} has unexpected type: {}", key, e);
                None
            }
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_as(key).unwrap_or(default)
    }

    /// Override a value in the user layer and re-merge.
    pub fn set(&mut self, key: &str, value: Value) {
        insert_path(&mut self.user, key, value.clone());
        insert_path(&mut self.merged, key, value);
    }

    /// User layer only (before merging). Roots for user context live here.
    #[must_use]
    pub fn user_layer(&self) -> &Value {
        &self.user
    }

    /// Project layer only (before merging).
    #[must_use]
    pub fn project_layer(&self) -> &Value {
        &self.project
    }

    #[must_use]
    pub fn merged(&self) -> &Value {
        &self.merged
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |p: &Option<PathBuf>| p.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "-".into());
        write!(
            f,
            "Config(general={}, project={}, user={})",
            show(&self.paths.general),
            show(&self.paths.project),
            show(&self.paths.user)
        )
    }
}

fn read_layer(path: Option<&Path>) -> Result<Value> {
    let Some(path) = path else {
        return Ok(Value::Null);
    };
    if !path.exists() {
        debug!("Config file {} not found, using empty layer", path.display());
        return Ok(Value::Null);
    }
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Recursively merge `overlay` into `base`. Null overlays are ignored.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(b), Value::Object(o)) => {
            for (k, v) in o {
                match b.get_mut(k) {
                    Some(existing) if existing.is_object() && v.is_object() => deep_merge(existing, v),
                    Some(existing) => *existing = v.clone(),
                    None => {
                        b.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (b, o) => *b = o.clone(),
    }
}

/// Dot-path lookup in any JSON tree.
pub fn lookup<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(root, |node, part| node.as_object()?.get(part))
}

fn insert_path(root: &mut Value, key: &str, value: Value) {
    let parts: Vec<&str> = key.split('.').collect();
    let Some((last, parents)) = parts.split_last() else {
        return;
    };
    let mut node = root;
    for part in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(part.to_string()).or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.to_string(), value);
    }
}

/// Base directory for default stores and caches.
fn default_base_dir() -> PathBuf {
    dirs_next::data_local_dir().unwrap_or_else(std::env::temp_dir).join("stockshot")
}

/// Built-in defaults. User and project locations are empty, meaning
/// those contexts share the general store and cache until configured.
#[must_use]
pub fn defaults() -> Value {
    let base = default_base_dir();
    let gen = base.join("main");
    let gen_db = gen.join("database").to_string_lossy().into_owned();
    let gen_thumbs = gen.join("thumbnail").to_string_lossy().into_owned();
    json!({
        "paths": {
            "gen_db_directory": gen_db,
            "gen_thumbnail_directory": gen_thumbs,
            "user_db_path": "",
            "user_thumbnail_path": "",
            "project_db_path": "",
            "project_thumbnail_path": "",
        },
        "thumbnails": {
            "default_resolution": 128,
            "max_cache_size_mb": 1024,
            "eviction_check_interval": 10,
            "supported_formats": [".mp4", ".mov", ".avi", ".mkv", ".m4v", ".wmv", ".flv", ".webm"],
            "animated": {
                "enabled": true,
                "frame_count": 25,
                "fps": 10,
                "max_size_kb": 500,
            },
        },
        "ffmpeg": {
            "executable_path": "ffmpeg",
            "ffprobe_path": "ffprobe",
            "timeout": 30,
            "thumbnail_time_offset": 0.1,
        },
        "database": {
            "backup_enabled": true,
            "backup_interval_hours": 24,
            "max_backups": 7,
            "session_timeout_secs": 5,
            "max_sessions": 1,
            "max_tag_sessions": 8,
            "retry": {
                "max_attempts": 5,
                "base_delay_ms": 100,
                "max_delay_ms": 2000,
            },
        },
        "ui": {
            "show_hidden_files": false,
        },
        "sequence_detection": {
            "custom_patterns": [],
            "min_sequence_length": 2,
            "max_gap_frames": 10,
            "supported_extensions": [".exr", ".png", ".jpg", ".jpeg", ".tiff", ".tif", ".dpx", ".tga", ".bmp"],
            "folder_sequence_detection": {
                "enabled": true,
                "ignored_extensions": [".tx", ".thumbs", ".thumb", ".tmp", ".bak", ".log", ".txt", ".nfo", ".db", ".ds_store"],
                "ignored_filenames": ["Thumbs.db", ".DS_Store", "desktop.ini", ".directory"],
            },
        },
        "metadata": {
            "auto_extract": true,
        },
        "performance": {
            "max_concurrent_thumbnails": 4,
            "max_concurrent_metadata": 4,
        },
        "directory_tree": {
            "configured_paths": [],
        },
        "logging": {
            "level": "info",
        },
    })
}

#[cfg(test)]
mod tests;
