//! Catalog engine.
//!
//! # Architecture
//! - `file`: path helpers, extension classification, mtimes and sizes
//! - `seq`: groups numbered image files into sequences by naming pattern
//! - `folder`: decides whether a directory is a pure sequence folder
//! - `scan`: turns directories into [`MediaEntity`] records
//! - `context`: maps paths to general / user / project contexts
//! - `store`: one SQLite store per context with pooled, retried sessions
//! - `tools`: `ffprobe` / `ffmpeg` wrappers behind traits
//! - `pipeline`: metadata and thumbnail worker pools
//!
//! [`Catalog`] wires all of them from one [`Config`].
//!
//! # Flow
//! A scan resolves nothing and persists nothing; it only returns entities.
//! Queueing those entities for metadata or thumbnails routes each batch to
//! the store and cache of the path's context.

pub mod context;
pub mod entity;
pub mod file;
pub mod folder;
pub mod pipeline;
pub mod scan;
pub mod seq;
pub mod store;
pub mod tools;

pub use context::{Context, ContextRouter};
pub use entity::{EntityKind, MediaEntity};
pub use pipeline::{Batch, BatchReport, CacheInfo, PipelineEvent, ThumbnailOutcome};
pub use scan::{Discovery, ScanResult};
pub use seq::{Seq, SequenceDetector};
pub use store::{MetadataFilter, MetadataRecord, Store, Stores};

use crate::config::{Config, MetadataSettings, ScanSettings, StoreSettings, ThumbnailSettings, ToolSettings};
use crate::error::Result;
use log::{info, warn};
use pipeline::{MetadataPipeline, ThumbnailPipeline};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tools::{Ffmpeg, FrameTool, MediaProbe};

/// Entry point of the engine: discovery, stores and both pipelines.
///
/// # Example
/// ```ignore
/// use stockshot::{Catalog, Config};
///
/// let catalog = Catalog::open(Config::builtin())?;
/// let entities = catalog.scan("/shots/010".as_ref(), false);
/// let report = catalog.queue_thumbnails(entities, "/shots/010".as_ref())?.wait();
/// println!("{} thumbnails, {} failed", report.succeeded.len(), report.failed.len());
/// ```
pub struct Catalog {
    config: Config,
    router: Arc<ContextRouter>,
    stores: Arc<Stores>,
    discovery: Discovery,
    thumbnails: ThumbnailPipeline,
    metadata: MetadataPipeline,
    frames: Arc<dyn FrameTool>,
    probe: Arc<dyn MediaProbe>,
    /// Tools were built from the config and follow its reloads
    own_tools: bool,
}

impl Catalog {
    /// Open with `ffmpeg` / `ffprobe` as configured.
    pub fn open(config: Config) -> Result<Self> {
        let ffmpeg = Arc::new(Ffmpeg::new(&ToolSettings::from_config(&config)));
        let mut catalog = Self::with_tools(config, Arc::clone(&ffmpeg) as Arc<dyn FrameTool>, ffmpeg)?;
        catalog.own_tools = true;
        Ok(catalog)
    }

    /// Open with caller-supplied tools.
    pub fn with_tools(config: Config, frames: Arc<dyn FrameTool>, probe: Arc<dyn MediaProbe>) -> Result<Self> {
        let router = Arc::new(ContextRouter::new(&config));
        let stores = Arc::new(Stores::initialize(Arc::clone(&router), StoreSettings::from_config(&config))?);
        let (thumbnails, metadata) = build_pipelines(&config, &router, &stores, &frames, &probe)?;
        info!("Catalog ready");
        Ok(Self {
            discovery: Discovery::new(ScanSettings::from_config(&config)),
            config,
            router,
            stores,
            thumbnails,
            metadata,
            frames,
            probe,
            own_tools: false,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn router(&self) -> &Arc<ContextRouter> {
        &self.router
    }

    #[must_use]
    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    #[must_use]
    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn scan(&self, dir: &Path, recursive: bool) -> Vec<MediaEntity> {
        self.discovery.scan(dir, recursive)
    }

    pub fn scan_with_progress(
        &self,
        dir: &Path,
        recursive: bool,
        progress: &mut dyn FnMut(usize, usize),
    ) -> ScanResult {
        self.discovery.scan_with_progress(dir, recursive, progress)
    }

    pub fn queue_thumbnails(&self, entities: Vec<MediaEntity>, path: &Path) -> Result<Batch<ThumbnailOutcome>> {
        self.thumbnails.queue(entities, path)
    }

    pub fn process_metadata(&self, entities: Vec<MediaEntity>, path: &Path) -> Result<Batch<MetadataRecord>> {
        self.metadata.process(entities, path)
    }

    pub fn get_thumbnail_path(&self, entity: &MediaEntity, path: &Path) -> Option<PathBuf> {
        self.thumbnails.get_thumbnail_path(entity, path)
    }

    pub fn get_animated_thumbnail_path(&self, entity: &MediaEntity, path: &Path) -> Option<PathBuf> {
        self.thumbnails.get_animated_thumbnail_path(entity, path)
    }

    pub fn get_entity_metadata(&self, path: &Path) -> Result<Option<Map<String, Value>>> {
        self.metadata.get_entity_metadata(path)
    }

    pub fn search_by_metadata(&self, filter: &MetadataFilter) -> Result<Vec<String>> {
        self.metadata.search_by_metadata(filter)
    }

    pub fn metadata_summary(&self, context: Context) -> Result<store::MetadataSummary> {
        self.metadata.summary(context)
    }

    pub fn cache_info(&self) -> Vec<CacheInfo> {
        self.thumbnails.cache_info()
    }

    pub fn clear_cache(&self, context: Option<Context>) -> Result<usize> {
        self.thumbnails.clear_cache(context)
    }

    /// Re-read configuration files and rebuild everything derived from
    /// them. In-flight batches of the old pipelines get the shutdown grace.
    pub fn reload(&mut self) -> Result<()> {
        self.config.reload()?;
        self.router.reload(&self.config);
        self.stores.reload(StoreSettings::from_config(&self.config))?;
        if self.own_tools {
            let ffmpeg = Arc::new(Ffmpeg::new(&ToolSettings::from_config(&self.config)));
            self.frames = Arc::clone(&ffmpeg) as Arc<dyn FrameTool>;
            self.probe = ffmpeg;
        }
        let (thumbnails, metadata) = build_pipelines(&self.config, &self.router, &self.stores, &self.frames, &self.probe)?;
        let old_thumbnails = std::mem::replace(&mut self.thumbnails, thumbnails);
        let old_metadata = std::mem::replace(&mut self.metadata, metadata);
        self.discovery = Discovery::new(ScanSettings::from_config(&self.config));
        stop(&old_thumbnails, &old_metadata);
        info!("Catalog reloaded");
        Ok(())
    }

    /// Stop both pipelines. Returns whether every worker finished in time.
    pub fn shutdown(&self) -> bool {
        let done = stop(&self.thumbnails, &self.metadata);
        info!("Catalog shut down");
        done
    }
}

fn build_pipelines(
    config: &Config,
    router: &Arc<ContextRouter>,
    stores: &Arc<Stores>,
    frames: &Arc<dyn FrameTool>,
    probe: &Arc<dyn MediaProbe>,
) -> Result<(ThumbnailPipeline, MetadataPipeline)> {
    let thumbnails = ThumbnailPipeline::new(
        ThumbnailSettings::from_config(config),
        Arc::clone(router),
        Arc::clone(stores),
        Arc::clone(frames),
        Arc::clone(probe),
    )?;
    let metadata = MetadataPipeline::new(MetadataSettings::from_config(config), Arc::clone(stores), Arc::clone(probe))?;
    Ok((thumbnails, metadata))
}

fn stop(thumbnails: &ThumbnailPipeline, metadata: &MetadataPipeline) -> bool {
    let thumbs_done = thumbnails.shutdown();
    let meta_done = metadata.shutdown();
    if !(thumbs_done && meta_done) {
        warn!("Workers still running after shutdown grace");
    }
    thumbs_done && meta_done
}

#[cfg(test)]
mod tests;
