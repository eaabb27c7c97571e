//! Metadata extraction workers and metadata queries.

use super::{submit, Batch, WorkerPool, SHUTDOWN_GRACE};
use crate::config::MetadataSettings;
use crate::core::context::Context;
use crate::core::entity::{EntityKind, MediaEntity};
use crate::core::store::{MetadataFilter, MetadataRecord, MetadataSummary, Stores};
use crate::core::tools::{MediaProbe, ProbeInfo};
use crate::error::Result;
use log::{debug, info};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Structured fields from a probe; the rest goes to the custom bag.
pub fn record_from_probe(info: ProbeInfo) -> MetadataRecord {
    let mut rec = MetadataRecord {
        duration: info.duration,
        fps: info.fps,
        width: info.width,
        height: info.height,
        aspect_ratio: info.aspect_ratio,
        format: info.format,
        codec: info.codec,
        audio_codec: info.audio_codec,
        colorspace: info.colorspace,
        bit_depth: info.bit_depth,
        bitrate: info.bitrate,
        frame_count: info.frame_count,
        has_audio: info.has_audio,
        ..Default::default()
    };
    let extra = [
        ("pixel_format", info.pixel_format.map(Value::from)),
        ("color_range", info.color_range.map(Value::from)),
        ("audio_channels", info.audio_channels.map(Value::from)),
        ("audio_sample_rate", info.audio_sample_rate.map(Value::from)),
    ];
    for (key, value) in extra {
        if let Some(v) = value {
            rec.custom.insert(key.to_string(), v);
        }
    }
    if !info.tags.is_empty() {
        rec.custom.insert("tags".to_string(), json!(info.tags));
    }
    rec
}

/// Facts available without a probe.
fn basic_record(path: &Path) -> MetadataRecord {
    let mut rec = MetadataRecord {
        format: path.extension().map(|e| e.to_string_lossy().to_lowercase()),
        ..Default::default()
    };
    if let Ok(meta) = std::fs::metadata(path) {
        rec.custom.insert("file_size".to_string(), json!(meta.len()));
    }
    rec
}

/// Probe `entity` and describe it. Never fails: a failed probe degrades
/// to what the file system knows.
pub fn extract(probe: &dyn MediaProbe, entity: &MediaEntity) -> MetadataRecord {
    let first = entity.files.first().unwrap_or(&entity.path);
    let probed = match entity.kind {
        EntityKind::Video => probe.probe(&entity.path),
        _ => probe.probe(first).map(ProbeInfo::still),
    };
    let mut rec = match probed {
        Ok(info) => record_from_probe(info),
        Err(e) => {
            debug!("Probe of {} failed, using file facts: {}", first.display(), e);
            basic_record(first)
        }
    };

    if entity.kind != EntityKind::Video {
        if let Some(n) = entity.frame_count {
            rec.frame_count = Some(n as i64);
        }
        if entity.files.len() > 1 {
            rec.custom.insert("is_sequence".to_string(), json!(true));
            if let Some((a, b)) = entity.frame_range {
                rec.custom.insert("frame_range".to_string(), json!(format!("{}-{}", a, b)));
            }
        }
    }
    rec.custom.insert("entity_name".to_string(), json!(entity.name));
    rec.custom.insert("entity_type".to_string(), json!(entity.kind.as_str()));
    rec.custom.insert("file_count".to_string(), json!(entity.file_count()));
    if let Some(size) = entity.file_size {
        rec.custom.insert("total_size".to_string(), json!(size));
    }
    rec
}

pub struct MetadataPipeline {
    settings: MetadataSettings,
    probe: Arc<dyn MediaProbe>,
    stores: Arc<Stores>,
    pool: WorkerPool,
}

impl MetadataPipeline {
    pub fn new(settings: MetadataSettings, stores: Arc<Stores>, probe: Arc<dyn MediaProbe>) -> Result<Self> {
        let pool = WorkerPool::new("metadata", settings.workers)?;
        Ok(Self { settings, probe, stores, pool })
    }

    /// Extract and store metadata for `entities` in the store of `path`.
    /// With automatic extraction off the batch is empty.
    pub fn process(&self, entities: Vec<MediaEntity>, path: &Path) -> Result<Batch<MetadataRecord>> {
        if !self.settings.auto_extract {
            info!("Metadata extraction disabled, skipping {} entities", entities.len());
            return submit(&self.pool, Vec::new(), |_: &MediaEntity| Ok(MetadataRecord::default()));
        }
        let (ctx, store) = self.stores.store_for_path(path)?;
        info!("Extracting metadata for {} entities ({} context)", entities.len(), ctx);
        let probe = Arc::clone(&self.probe);
        submit(&self.pool, entities, move |entity| {
            let rec = extract(probe.as_ref(), entity);
            store.save_metadata(entity, &rec)?;
            Ok(rec)
        })
    }

    /// Flat metadata of the entity at `path`, `None` fields omitted.
    pub fn get_entity_metadata(&self, path: &Path) -> Result<Option<Map<String, Value>>> {
        let (_, store) = self.stores.store_for_path(path)?;
        let rec = store.metadata_for_path(&path.to_string_lossy())?;
        Ok(rec.map(|r| r.to_map()))
    }

    /// Matching entity paths across every open store.
    pub fn search_by_metadata(&self, filter: &MetadataFilter) -> Result<Vec<String>> {
        let mut found = Vec::new();
        for store in self.stores.distinct() {
            found.extend(store.search_metadata(filter)?);
        }
        found.sort();
        found.dedup();
        Ok(found)
    }

    pub fn summary(&self, context: Context) -> Result<MetadataSummary> {
        self.stores.store(context)?.metadata_summary()
    }

    pub fn shutdown(&self) -> bool {
        self.pool.shutdown(SHUTDOWN_GRACE)
    }
}
