//! Thumbnail generation and the per-context thumbnail cache.
//!
//! # Cache layout
//!
//! `<cache dir>/<id>_<res>.jpg` with an optional `<id>_<res>.gif` beside it.
//! The id encodes name and modification time of the source, so edited
//! media gets a new file instead of overwriting the old one.
//!
//! # Work per entity
//!
//! 1. Skip when the still exists and is newer than every source file.
//! 2. Render by kind: videos from a frame at a fraction of their duration,
//!    sequences from their middle file, stills directly.
//! 3. Optionally render an animated preview, retrying once with a smaller
//!    palette if it exceeds the size budget.
//! 4. Record the result in the context store.
//!
//! Every `eviction_interval` completions the cache is measured; when over
//! budget the oldest quarter of stills is deleted and their rows marked
//! invalid.

use super::{submit, Batch, WorkerPool, SHUTDOWN_GRACE};
use crate::config::ThumbnailSettings;
use crate::core::context::{Context, ContextRouter};
use crate::core::entity::{EntityKind, MediaEntity, RenderKind};
use crate::core::file::{epoch_secs, mtime, newest_mtime};
use crate::core::store::{NewThumbnail, Store, Stores};
use crate::core::tools::{sample_indices, AnimSpec, FrameTool, MediaProbe, Palette};
use crate::error::{Error, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// What a worker produced for one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThumbnailOutcome {
    pub path: PathBuf,
    pub animated: Option<PathBuf>,
    /// Existing thumbnail was still fresh
    pub skipped: bool,
}

/// Size of one context's cache directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInfo {
    pub contexts: Vec<Context>,
    pub dir: PathBuf,
    pub stills: usize,
    pub animated: usize,
    pub bytes: u64,
    pub max_bytes: u64,
}

impl std::fmt::Display for CacheInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.contexts.iter().map(|c| c.as_str()).collect();
        write!(
            f,
            "{} {}: {} stills, {} animated, {:.1} / {} MB",
            names.join("+"),
            self.dir.display(),
            self.stills,
            self.animated,
            self.bytes as f64 / (1024.0 * 1024.0),
            self.max_bytes / (1024 * 1024)
        )
    }
}

/// Characters that cannot appear in cache file names.
const UNSAFE: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Filename-safe form of a cache id.
#[must_use]
pub fn sanitize(id: &str) -> String {
    let replaced: String = id.chars().map(|c| if UNSAFE.contains(&c) { '_' } else { c }).collect();
    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

fn mtime_token(path: &Path) -> Option<String> {
    mtime(path).map(|t| epoch_secs(t).to_string())
}

/// Content identity of `entity`: `<stem>_<mtime>` for videos,
/// `<name>_<file count>_<first file mtime>` otherwise.
#[must_use]
pub fn thumbnail_id(entity: &MediaEntity) -> String {
    if entity.kind == EntityKind::Video {
        let stem = entity.path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        return match mtime_token(&entity.path) {
            Some(t) => format!("{}_{}", stem, t),
            None => stem,
        };
    }
    let mut id = format!("{}_{}", entity.name, entity.files.len());
    if let Some(t) = entity.files.first().and_then(|f| mtime_token(f)) {
        id.push('_');
        id.push_str(&t);
    }
    id
}

/// Whether `thumb` exists and is strictly newer than the newest source.
#[must_use]
pub fn is_fresh(thumb: &Path, entity: &MediaEntity) -> bool {
    let Some(thumb_time) = mtime(thumb) else {
        return false;
    };
    let newest = if entity.files.len() > 1 { newest_mtime(&entity.files) } else { mtime(&entity.path) };
    matches!(newest, Some(source) if thumb_time > source)
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn cache_files(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let pattern = format!("{}/*.{}", glob::Pattern::escape(&dir.to_string_lossy()), ext);
    match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(|p| p.ok()).collect(),
        Err(e) => {
            warn!("Bad cache pattern {}: {}", pattern, e);
            Vec::new()
        }
    }
}

/// Delete the oldest quarter of stills (and their animated siblings) when
/// the whole of `dir` exceeds `max_bytes`. Returns the deleted stills.
pub fn evict(dir: &Path, max_bytes: u64) -> Vec<PathBuf> {
    let mut stills: Vec<(PathBuf, u64, std::time::SystemTime)> = cache_files(dir, "jpg")
        .into_iter()
        .filter_map(|p| {
            let meta = fs::metadata(&p).ok()?;
            Some((p, meta.len(), meta.modified().ok()?))
        })
        .collect();
    let animated: u64 = cache_files(dir, "gif").iter().map(|p| file_len(p)).sum();
    let total: u64 = stills.iter().map(|s| s.1).sum::<u64>() + animated;
    if total <= max_bytes {
        return Vec::new();
    }
    info!("Cache {} holds {} bytes, limit {}", dir.display(), total, max_bytes);
    stills.sort_by_key(|s| s.2);
    let count = stills.len() / 4;
    let mut removed = Vec::new();
    for (path, _, _) in stills.into_iter().take(count) {
        match fs::remove_file(&path) {
            Ok(()) => {
                let _ = fs::remove_file(path.with_extension("gif"));
                debug!("Evicted {}", path.display());
                removed.push(path);
            }
            Err(e) => warn!("Cannot evict {}: {}", path.display(), e),
        }
    }
    info!("Evicted {} thumbnails from {}", removed.len(), dir.display());
    removed
}

fn to_strings(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.to_string_lossy().into_owned()).collect()
}

/// Shared state of the thumbnail workers.
struct Renderer {
    settings: ThumbnailSettings,
    frames: Arc<dyn FrameTool>,
    probe: Arc<dyn MediaProbe>,
    completed: AtomicUsize,
    evicting: Mutex<()>,
}

impl Renderer {
    fn still_path(&self, cache_dir: &Path, entity: &MediaEntity) -> PathBuf {
        cache_dir.join(format!("{}_{}.jpg", sanitize(&thumbnail_id(entity)), self.settings.resolution))
    }

    fn anim_spec(&self, palette: Palette) -> AnimSpec {
        AnimSpec {
            frame_count: self.settings.animated.frame_count,
            fps: self.settings.animated.fps,
            resolution: self.settings.resolution,
            palette,
        }
    }

    /// Render one entity. Every completion, skipped or failed included,
    /// advances the eviction counter.
    fn process(&self, entity: &MediaEntity, cache_dir: &Path, store: &Store) -> Result<ThumbnailOutcome> {
        let outcome = self.render(entity, cache_dir, store);
        let n = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.settings.eviction_interval == 0 {
            self.check_cache(cache_dir, store);
        }
        outcome
    }

    fn render(&self, entity: &MediaEntity, cache_dir: &Path, store: &Store) -> Result<ThumbnailOutcome> {
        if entity.files.is_empty() && entity.kind != EntityKind::Video {
            return Err(Error::Validation(format!("{} has no files", entity.path.display())));
        }
        let still = self.still_path(cache_dir, entity);
        let gif = still.with_extension("gif");
        if is_fresh(&still, entity) {
            debug!("{} is fresh", still.display());
            return Ok(ThumbnailOutcome { animated: gif.is_file().then_some(gif), path: still, skipped: true });
        }

        let started = Instant::now();
        let res = self.settings.resolution;
        let animate = self.settings.animated.enabled;
        let (source_frame, animated) = match entity.render_kind() {
            RenderKind::Video => {
                let duration = match self.probe.probe(&entity.path) {
                    Ok(info) => info.duration,
                    Err(e) => {
                        debug!("No duration for {}: {}", entity.path.display(), e);
                        None
                    }
                };
                let at = duration.map_or(1.0, |d| d * self.settings.time_offset);
                self.frames.extract_frame(&entity.path, &still, at, res)?;
                let animated = match duration {
                    Some(d) if animate => self.with_budget(&gif, |spec| self.frames.animate_video(&entity.path, &gif, d, spec)),
                    _ => None,
                };
                (Some(at), animated)
            }
            RenderKind::Sequence => {
                let middle = entity.files.len() / 2;
                self.frames.image_thumbnail(&entity.files[middle], &still, res)?;
                let animated = if animate {
                    let picks: Vec<PathBuf> = sample_indices(entity.files.len(), self.settings.animated.frame_count)
                        .into_iter()
                        .map(|i| entity.files[i].clone())
                        .collect();
                    self.with_budget(&gif, |spec| self.frames.animate_sequence(&picks, &gif, spec))
                } else {
                    None
                };
                (Some(middle as f64), animated)
            }
            RenderKind::Still => {
                let src = entity.files.first().unwrap_or(&entity.path);
                self.frames.image_thumbnail(src, &still, res)?;
                (None, None)
            }
        };

        let thumb = NewThumbnail {
            path: still.to_string_lossy().into_owned(),
            resolution: res,
            file_size: Some(file_len(&still) as i64),
            generation_time: Some(started.elapsed().as_secs_f64()),
            source_frame,
            animated_path: animated.as_ref().map(|p| p.to_string_lossy().into_owned()),
        };
        store.save_thumbnail(entity, &thumb)?;
        debug!("Thumbnail {} in {:.2}s", still.display(), started.elapsed().as_secs_f64());
        Ok(ThumbnailOutcome { path: still, animated, skipped: false })
    }

    /// Render an animated preview within the size budget, or give up on it.
    fn with_budget(&self, gif: &Path, render: impl Fn(&AnimSpec) -> Result<()>) -> Option<PathBuf> {
        let max = self.settings.animated.max_size_kb * 1024;
        for palette in [Palette::Standard, Palette::Aggressive] {
            match render(&self.anim_spec(palette)) {
                Ok(()) if file_len(gif) <= max => return Some(gif.to_path_buf()),
                Ok(()) => debug!("{} over {} KB with {:?} palette", gif.display(), max / 1024, palette),
                Err(e) => {
                    warn!("Animated preview {} failed: {}", gif.display(), e);
                    break;
                }
            }
        }
        let _ = fs::remove_file(gif);
        None
    }

    fn check_cache(&self, cache_dir: &Path, store: &Store) {
        let Ok(_guard) = self.evicting.try_lock() else {
            return;
        };
        let removed = evict(cache_dir, self.settings.max_cache_bytes);
        if let Err(e) = store.invalidate_thumbnails(&to_strings(&removed)) {
            warn!("Cannot invalidate evicted thumbnails: {}", e);
        }
    }
}

/// Thumbnail worker pool plus cache queries.
pub struct ThumbnailPipeline {
    renderer: Arc<Renderer>,
    router: Arc<ContextRouter>,
    stores: Arc<Stores>,
    pool: WorkerPool,
}

impl ThumbnailPipeline {
    pub fn new(
        settings: ThumbnailSettings,
        router: Arc<ContextRouter>,
        stores: Arc<Stores>,
        frames: Arc<dyn FrameTool>,
        probe: Arc<dyn MediaProbe>,
    ) -> Result<Self> {
        let pool = WorkerPool::new("thumbnail", settings.workers)?;
        let renderer =
            Arc::new(Renderer { settings, frames, probe, completed: AtomicUsize::new(0), evicting: Mutex::new(()) });
        Ok(Self { renderer, router, stores, pool })
    }

    #[must_use]
    pub fn settings(&self) -> &ThumbnailSettings {
        &self.renderer.settings
    }

    /// Queue thumbnails for `entities`, routed by the context of `path`.
    pub fn queue(&self, entities: Vec<MediaEntity>, path: &Path) -> Result<Batch<ThumbnailOutcome>> {
        let (ctx, store) = self.stores.store_for_path(path)?;
        let cache_dir = self.router.get_cache_location(ctx);
        fs::create_dir_all(&cache_dir).map_err(|e| Error::io(&cache_dir, e))?;
        info!("Queueing {} thumbnails into {} ({} context)", entities.len(), cache_dir.display(), ctx);
        let renderer = Arc::clone(&self.renderer);
        submit(&self.pool, entities, move |entity| renderer.process(entity, &cache_dir, &store))
    }

    fn cache_dir_for(&self, path: &Path) -> PathBuf {
        self.router.get_cache_location(self.router.get_context(path))
    }

    /// Still for `entity` if one exists: the expected cache file first,
    /// then the stored record.
    pub fn get_thumbnail_path(&self, entity: &MediaEntity, path: &Path) -> Option<PathBuf> {
        let still = self.renderer.still_path(&self.cache_dir_for(path), entity);
        if still.is_file() {
            return Some(still);
        }
        let (_, store) = self.stores.store_for_path(path).ok()?;
        let row = store.thumbnail_for(&entity.path.to_string_lossy(), self.renderer.settings.resolution).ok()??;
        let stored = PathBuf::from(row.path);
        (row.is_valid && stored.is_file()).then_some(stored)
    }

    pub fn get_animated_thumbnail_path(&self, entity: &MediaEntity, path: &Path) -> Option<PathBuf> {
        let gif = self.renderer.still_path(&self.cache_dir_for(path), entity).with_extension("gif");
        if gif.is_file() {
            return Some(gif);
        }
        let (_, store) = self.stores.store_for_path(path).ok()?;
        let row = store.thumbnail_for(&entity.path.to_string_lossy(), self.renderer.settings.resolution).ok()??;
        row.animated_path.map(PathBuf::from).filter(|p| p.is_file())
    }

    /// One entry per distinct cache directory.
    pub fn cache_info(&self) -> Vec<CacheInfo> {
        let mut infos: Vec<CacheInfo> = Vec::new();
        for ctx in Context::ALL {
            let dir = self.router.get_cache_location(ctx);
            if let Some(info) = infos.iter_mut().find(|i| i.dir == dir) {
                info.contexts.push(ctx);
                continue;
            }
            let stills = cache_files(&dir, "jpg");
            let animated = cache_files(&dir, "gif");
            let bytes = stills.iter().chain(&animated).map(|p| file_len(p)).sum();
            infos.push(CacheInfo {
                contexts: vec![ctx],
                dir,
                stills: stills.len(),
                animated: animated.len(),
                bytes,
                max_bytes: self.renderer.settings.max_cache_bytes,
            });
        }
        infos
    }

    /// Delete cached files of `context` (every context when `None`) and
    /// mark their rows invalid. Returns the number of files removed.
    pub fn clear_cache(&self, context: Option<Context>) -> Result<usize> {
        let contexts: Vec<Context> = match context {
            Some(c) => vec![c],
            None => Context::ALL.to_vec(),
        };
        let mut seen: Vec<PathBuf> = Vec::new();
        let mut removed = 0;
        for ctx in contexts {
            let dir = self.router.get_cache_location(ctx);
            if seen.contains(&dir) {
                continue;
            }
            let mut stills = Vec::new();
            for ext in ["jpg", "gif"] {
                for file in cache_files(&dir, ext) {
                    fs::remove_file(&file).map_err(|e| Error::io(&file, e))?;
                    removed += 1;
                    if ext == "jpg" {
                        stills.push(file);
                    }
                }
            }
            self.stores.store(ctx)?.invalidate_thumbnails(&to_strings(&stills))?;
            info!("Cleared {} cache {}", ctx, dir.display());
            seen.push(dir);
        }
        Ok(removed)
    }

    pub fn shutdown(&self) -> bool {
        self.pool.shutdown(SHUTDOWN_GRACE)
    }
}
