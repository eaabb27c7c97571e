//! # Stockshot - Media Catalog Engine
//!
//! Indexing and caching engine for review workflows over large libraries of
//! video files and image sequences.
//!
//! # Features
//!
//! - **Entity Discovery**: groups numbered frames into sequences by naming
//!   pattern and recognizes whole folders of frames
//! - **Context Routing**: every path belongs to the general, user or project
//!   context, each with its own store and thumbnail cache
//! - **SQLite Stores**: WAL mode, versioned migrations, gated sessions and
//!   retry with backoff on lock contention
//! - **Thumbnails**: static and animated previews through `ffmpeg`, with a
//!   size-bounded disk cache
//! - **Metadata**: `ffprobe` extraction into structured fields plus an
//!   open-ended map, searchable by range filters
//!
//! # Quick Start
//!
//! ```ignore
//! use stockshot::{Catalog, Config, PipelineEvent};
//! use std::path::Path;
//!
//! let catalog = Catalog::open(Config::builtin())?;
//! let dir = Path::new("/shots/010");
//!
//! let entities = catalog.scan(dir, true);
//! for entity in &entities {
//!     println!("{}", entity);
//! }
//!
//! let batch = catalog.queue_thumbnails(entities.clone(), dir)?;
//! let report = batch.wait_with(|event| {
//!     if let PipelineEvent::Progress { done, total } = event {
//!         println!("{}/{}", done, total);
//!     }
//! });
//! println!("{} failed", report.failed.len());
//!
//! catalog.process_metadata(entities, dir)?.wait();
//! catalog.shutdown();
//! ```
//!
//! # Configuration
//!
//! ```ignore
//! use stockshot::config::{Config, ConfigPaths};
//!
//! let config = Config::load(ConfigPaths {
//!     general: Some("/studio/stockshot.json".into()),
//!     project: Some("/proj/.stockshot.json".into()),
//!     user: dirs_next::config_dir().map(|d| d.join("stockshot/user.json")),
//! })?;
//! let fps: u32 = config.get_or("thumbnails.animated.fps", 10);
//! ```
//!
//! # Lower Level
//!
//! The pieces behind [`Catalog`] are public: [`core::seq::SequenceDetector`],
//! [`core::scan::Discovery`], [`core::context::ContextRouter`],
//! [`core::store::Stores`] and the pipelines in [`core::pipeline`].

pub mod config;
pub mod core;
pub mod error;

pub use crate::config::{Config, ConfigPaths};
pub use crate::core::{
    Batch, BatchReport, CacheInfo, Catalog, Context, EntityKind, MediaEntity, MetadataFilter, MetadataRecord,
    PipelineEvent, ScanResult, ThumbnailOutcome,
};
pub use crate::error::{Error, Result};
