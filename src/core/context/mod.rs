//! Path context routing: general, user or project.
//!
//! A path belongs to the user context when it sits under one of the user
//! roots, else to the project context when under a project root, else to
//! general. Containment is decided on resolved paths component by component,
//! so `/proj/shots2` is not under `/proj/shots`.
//!
//! Each context owns a store directory and a thumbnail cache directory.
//! Contexts without their own locations fall back to the general ones.

use crate::config::{self, Config};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// File name of the store inside each context's store directory.
pub const STORE_FILE: &str = "stockshot.db";

/// Key listing the context roots inside the user and project layers.
const ROOTS_KEY: &str = "directory_tree.configured_paths";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    General,
    User,
    Project,
}

impl Context {
    pub const ALL: [Context; 3] = [Context::General, Context::User, Context::Project];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Context::General => "general",
            Context::User => "user",
            Context::Project => "project",
        }
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Context {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "general" => Ok(Context::General),
            "user" => Ok(Context::User),
            "project" => Ok(Context::Project),
            other => Err(format!("unknown context '{}'", other)),
        }
    }
}

/// Where a path routes to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextInfo {
    pub context: Context,
    pub store_file: PathBuf,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Default)]
struct Layout {
    user_roots: Vec<PathBuf>,
    project_roots: Vec<PathBuf>,
    store_dirs: HashMap<Context, PathBuf>,
    cache_dirs: HashMap<Context, PathBuf>,
}

impl Layout {
    fn from_config(config: &Config) -> Self {
        let mut store_dirs = HashMap::new();
        let mut cache_dirs = HashMap::new();
        for (ctx, store_key, cache_key) in [
            (Context::General, "paths.gen_db_directory", "paths.gen_thumbnail_directory"),
            (Context::User, "paths.user_db_path", "paths.user_thumbnail_path"),
            (Context::Project, "paths.project_db_path", "paths.project_thumbnail_path"),
        ] {
            if let Some(dir) = configured_dir(config, store_key) {
                store_dirs.insert(ctx, dir);
            }
            if let Some(dir) = configured_dir(config, cache_key) {
                cache_dirs.insert(ctx, dir);
            }
        }
        Self {
            user_roots: resolve_roots(config.user_layer(), "user"),
            project_roots: resolve_roots(config.project_layer(), "project"),
            store_dirs,
            cache_dirs,
        }
    }
}

fn configured_dir(config: &Config, key: &str) -> Option<PathBuf> {
    let raw: String = config.get_as(key)?;
    let raw = raw.trim();
    (!raw.is_empty()).then(|| PathBuf::from(raw))
}

fn resolve_roots(layer: &serde_json::Value, label: &str) -> Vec<PathBuf> {
    let Some(list) = config::lookup(layer, ROOTS_KEY).and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|v| v.as_str())
        .filter_map(|raw| match resolve_path(Path::new(raw)) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Ignoring {} root {}: {}", label, raw, e);
                None
            }
        })
        .collect()
}

/// Maps paths to contexts and contexts to locations. Cheap to share.
#[derive(Debug)]
pub struct ContextRouter {
    layout: RwLock<Layout>,
    cache: Mutex<HashMap<String, Context>>,
}

impl ContextRouter {
    pub fn new(config: &Config) -> Self {
        let layout = Layout::from_config(config);
        info!(
            "Context roots: {} user, {} project",
            layout.user_roots.len(),
            layout.project_roots.len()
        );
        Self { layout: RwLock::new(layout), cache: Mutex::new(HashMap::new()) }
    }

    /// Re-read roots and locations, dropping every memoized resolution.
    pub fn reload(&self, config: &Config) {
        let layout = Layout::from_config(config);
        *self.layout.write().unwrap_or_else(|e| e.into_inner()) = layout;
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
        info!("Context routing reloaded");
    }

    /// Context for `path`, memoized per raw path string.
    pub fn get_context(&self, path: impl AsRef<Path>) -> Context {
        let path = path.as_ref();
        let key = path.to_string_lossy().into_owned();
        if let Some(ctx) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return *ctx;
        }
        let ctx = self.classify(path);
        debug!("{} -> {} context", key, ctx);
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).insert(key, ctx);
        ctx
    }

    fn classify(&self, path: &Path) -> Context {
        let resolved = match resolve_path(path) {
            Ok(p) => p,
            Err(e) => {
                warn!("Cannot resolve {}: {}, using general context", path.display(), e);
                return Context::General;
            }
        };
        let layout = self.layout.read().unwrap_or_else(|e| e.into_inner());
        if layout.user_roots.iter().any(|root| resolved.starts_with(root)) {
            Context::User
        } else if layout.project_roots.iter().any(|root| resolved.starts_with(root)) {
            Context::Project
        } else {
            Context::General
        }
    }

    /// Whether `ctx` has its own store directory.
    #[must_use]
    pub fn has_own_store(&self, ctx: Context) -> bool {
        self.layout.read().unwrap_or_else(|e| e.into_inner()).store_dirs.contains_key(&ctx)
    }

    /// Store directory for `ctx`, falling back to general.
    pub fn get_store_location(&self, ctx: Context) -> PathBuf {
        let layout = self.layout.read().unwrap_or_else(|e| e.into_inner());
        layout
            .store_dirs
            .get(&ctx)
            .or_else(|| layout.store_dirs.get(&Context::General))
            .cloned()
            .unwrap_or_else(|| std::env::temp_dir().join("stockshot"))
    }

    /// Thumbnail cache directory for `ctx`, falling back to general.
    pub fn get_cache_location(&self, ctx: Context) -> PathBuf {
        let layout = self.layout.read().unwrap_or_else(|e| e.into_inner());
        layout
            .cache_dirs
            .get(&ctx)
            .or_else(|| layout.cache_dirs.get(&Context::General))
            .cloned()
            .unwrap_or_else(|| std::env::temp_dir().join("stockshot").join("thumbnail"))
    }

    /// Full path of the store file for `ctx`.
    pub fn store_file(&self, ctx: Context) -> PathBuf {
        self.get_store_location(ctx).join(STORE_FILE)
    }

    pub fn context_info(&self, path: impl AsRef<Path>) -> ContextInfo {
        let context = self.get_context(path);
        ContextInfo { context, store_file: self.store_file(context), cache_dir: self.get_cache_location(context) }
    }

    pub fn user_roots(&self) -> Vec<PathBuf> {
        self.layout.read().unwrap_or_else(|e| e.into_inner()).user_roots.clone()
    }

    pub fn project_roots(&self) -> Vec<PathBuf> {
        self.layout.read().unwrap_or_else(|e| e.into_inner()).project_roots.clone()
    }
}

/// Absolute, symlink-free form of `path`.
///
/// Paths that do not exist keep their missing tail: the longest existing
/// ancestor is canonicalized and the rest is appended after lexical
/// normalization.
pub fn resolve_path(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() { path.to_path_buf() } else { std::env::current_dir()?.join(path) };
    let normal = normalize_lexically(&absolute);
    if let Ok(p) = normal.canonicalize() {
        return Ok(p);
    }
    let mut tail = Vec::new();
    let mut cursor = normal.as_path();
    while let Some(parent) = cursor.parent() {
        if let Some(name) = cursor.file_name() {
            tail.push(name.to_os_string());
        }
        if let Ok(mut base) = parent.canonicalize() {
            base.extend(tail.iter().rev());
            return Ok(base);
        }
        cursor = parent;
    }
    Ok(normal)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
