//! Row types and queries over a single store connection.
//!
//! These functions never open transactions or retry; callers run them
//! through [`super::Store`], which does both.

use crate::core::entity::MediaEntity;
use crate::error::{Error, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRow {
    pub id: i64,
    pub path: String,
    pub entity_type: String,
    pub name: String,
    pub project_id: Option<i64>,
    pub file_size: Option<i64>,
    pub file_count: i64,
    pub metadata_extracted: bool,
    pub thumbnail_generated: bool,
    pub last_accessed: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const ENTITY_COLUMNS: &str = "id, path, entity_type, name, project_id, file_size, file_count, \
     metadata_extracted, thumbnail_generated, last_accessed, created_at, updated_at";

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<EntityRow> {
    Ok(EntityRow {
        id: row.get(0)?,
        path: row.get(1)?,
        entity_type: row.get(2)?,
        name: row.get(3)?,
        project_id: row.get(4)?,
        file_size: row.get(5)?,
        file_count: row.get(6)?,
        metadata_extracted: row.get::<_, i64>(7)? != 0,
        thumbnail_generated: row.get::<_, i64>(8)? != 0,
        last_accessed: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

pub fn find_entity(conn: &Connection, path: &str, project_id: Option<i64>) -> Result<Option<EntityRow>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM entities WHERE path = ?1 AND IFNULL(project_id, 0) = IFNULL(?2, 0)",
                ENTITY_COLUMNS
            ),
            params![path, project_id],
            entity_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Id of the row for `entity`, creating it when absent. Existing rows get
/// their size, count and scan time refreshed.
pub fn ensure_entity(conn: &Connection, entity: &MediaEntity, project_id: Option<i64>) -> Result<i64> {
    let path = entity.path.to_string_lossy();
    let size = entity.file_size.map(|s| s as i64);
    let count = entity.file_count().max(1) as i64;
    let ts = now();
    if let Some(row) = find_entity(conn, &path, project_id)? {
        conn.execute(
            "UPDATE entities SET file_size = ?2, file_count = ?3, updated_at = ?4, last_scanned = ?4 WHERE id = ?1",
            params![row.id, size, count, ts],
        )?;
        return Ok(row.id);
    }
    conn.execute(
        "INSERT INTO entities (path, entity_type, name, project_id, file_size, file_count,
                               created_at, updated_at, last_scanned)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7)",
        params![path, entity.kind.as_str(), entity.name, project_id, size, count, ts],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Record that the entity was looked at.
pub fn touch_entity(conn: &Connection, path: &str) -> Result<bool> {
    let n = conn.execute("UPDATE entities SET last_accessed = ?2 WHERE path = ?1", params![path, now()])?;
    Ok(n > 0)
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Technical metadata for one entity. Structured fields are optional;
/// anything else lives in `custom`.
///
/// Serializes flat, with `None` fields omitted and custom keys inlined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colorspace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_audio: Option<bool>,
    #[serde(flatten)]
    pub custom: BTreeMap<String, Value>,
}

impl MetadataRecord {
    /// Overlay `newer`: its `Some` fields win, custom maps merge.
    pub fn merge(&mut self, newer: MetadataRecord) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if newer.$field.is_some() { self.$field = newer.$field; })*
            };
        }
        take!(
            category, duration, fps, width, height, aspect_ratio, format, codec, audio_codec, colorspace,
            bit_depth, bitrate, frame_count, has_audio
        );
        self.custom.extend(newer.custom);
    }

    /// Flat JSON object, `None` fields omitted.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

const METADATA_COLUMNS: &str = "category, duration, fps, width, height, aspect_ratio, format, codec, \
     audio_codec, colorspace, bit_depth, bitrate, frame_count, has_audio, custom_fields";

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<MetadataRecord> {
    let custom: Option<String> = row.get(14)?;
    Ok(MetadataRecord {
        category: row.get(0)?,
        duration: row.get(1)?,
        fps: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        aspect_ratio: row.get(5)?,
        format: row.get(6)?,
        codec: row.get(7)?,
        audio_codec: row.get(8)?,
        colorspace: row.get(9)?,
        bit_depth: row.get(10)?,
        bitrate: row.get(11)?,
        frame_count: row.get(12)?,
        has_audio: row.get::<_, Option<i64>>(13)?.map(|v| v != 0),
        custom: custom.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default(),
    })
}

pub fn load_metadata(conn: &Connection, entity_id: i64) -> Result<Option<MetadataRecord>> {
    let rec = conn
        .query_row(
            &format!("SELECT {} FROM metadata WHERE entity_id = ?1", METADATA_COLUMNS),
            [entity_id],
            metadata_from_row,
        )
        .optional()?;
    Ok(rec)
}

/// Metadata of the entity at `path`, whatever its project scope.
pub fn metadata_for_path(conn: &Connection, path: &str) -> Result<Option<MetadataRecord>> {
    let rec = conn
        .query_row(
            &format!(
                "SELECT {} FROM metadata m JOIN entities e ON e.id = m.entity_id
                 WHERE e.path = ?1 ORDER BY m.updated_at DESC LIMIT 1",
                METADATA_COLUMNS
            ),
            [path],
            metadata_from_row,
        )
        .optional()?;
    Ok(rec)
}

/// Create or update the metadata row; existing values survive unless
/// `rec` replaces them. Marks the entity as extracted.
pub fn save_metadata(conn: &Connection, entity_id: i64, rec: MetadataRecord) -> Result<()> {
    let ts = now();
    let (merged, exists) = match load_metadata(conn, entity_id)? {
        Some(mut existing) => {
            existing.merge(rec);
            (existing, true)
        }
        None => (rec, false),
    };
    let custom = if merged.custom.is_empty() { None } else { Some(serde_json::to_string(&merged.custom)?) };
    let values = params![
        entity_id,
        merged.category,
        merged.duration,
        merged.fps,
        merged.width,
        merged.height,
        merged.aspect_ratio,
        merged.format,
        merged.codec,
        merged.audio_codec,
        merged.colorspace,
        merged.bit_depth,
        merged.bitrate,
        merged.frame_count,
        merged.has_audio,
        custom,
        ts
    ];
    if exists {
        conn.execute(
            "UPDATE metadata SET category = ?2, duration = ?3, fps = ?4, width = ?5, height = ?6,
                 aspect_ratio = ?7, format = ?8, codec = ?9, audio_codec = ?10, colorspace = ?11,
                 bit_depth = ?12, bitrate = ?13, frame_count = ?14, has_audio = ?15,
                 custom_fields = ?16, updated_at = ?17
             WHERE entity_id = ?1",
            values,
        )?;
    } else {
        conn.execute(
            "INSERT INTO metadata (entity_id, category, duration, fps, width, height, aspect_ratio, format,
                 codec, audio_codec, colorspace, bit_depth, bitrate, frame_count, has_audio,
                 custom_fields, extracted_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)",
            values,
        )?;
    }
    conn.execute(
        "UPDATE entities SET metadata_extracted = 1, updated_at = ?2 WHERE id = ?1",
        params![entity_id, ts],
    )?;
    Ok(())
}

/// Search criteria; unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataFilter {
    pub duration_min: Option<f64>,
    pub duration_max: Option<f64>,
    pub width_min: Option<i64>,
    pub width_max: Option<i64>,
    pub height_min: Option<i64>,
    pub height_max: Option<i64>,
    /// Substring of the container format, case-insensitive
    pub format: Option<String>,
    pub codec: Option<String>,
    pub colorspace: Option<String>,
    pub category: Option<String>,
    pub has_audio: Option<bool>,
}

/// Paths of entities whose metadata satisfies every set criterion.
pub fn search_metadata(conn: &Connection, filter: &MetadataFilter) -> Result<Vec<String>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    let mut real = |clause: &'static str, v: Option<f64>| {
        if let Some(v) = v {
            clauses.push(clause);
            values.push(SqlValue::Real(v));
        }
    };
    real("m.duration >= ?", filter.duration_min);
    real("m.duration <= ?", filter.duration_max);
    let ints = [
        ("m.width >= ?", filter.width_min),
        ("m.width <= ?", filter.width_max),
        ("m.height >= ?", filter.height_min),
        ("m.height <= ?", filter.height_max),
    ];
    for (clause, v) in ints {
        if let Some(v) = v {
            clauses.push(clause);
            values.push(SqlValue::Integer(v));
        }
    }
    if let Some(format) = &filter.format {
        clauses.push("m.format LIKE ?");
        values.push(SqlValue::Text(format!("%{}%", format)));
    }
    for (clause, v) in [
        ("m.codec = ? COLLATE NOCASE", &filter.codec),
        ("m.colorspace = ? COLLATE NOCASE", &filter.colorspace),
        ("m.category = ? COLLATE NOCASE", &filter.category),
    ] {
        if let Some(v) = v {
            clauses.push(clause);
            values.push(SqlValue::Text(v.clone()));
        }
    }
    if let Some(has_audio) = filter.has_audio {
        clauses.push("IFNULL(m.has_audio, 0) = ?");
        values.push(SqlValue::Integer(has_audio as i64));
    }

    let mut sql = String::from("SELECT DISTINCT e.path FROM metadata m JOIN entities e ON e.id = m.entity_id");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY e.path");

    let mut stmt = conn.prepare(&sql)?;
    let paths = stmt
        .query_map(params_from_iter(values.iter()), |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(paths)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataSummary {
    pub total_entities: i64,
    pub with_metadata: i64,
    pub coverage_percent: f64,
    pub formats: BTreeMap<String, i64>,
}

pub fn metadata_summary(conn: &Connection) -> Result<MetadataSummary> {
    let total_entities: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?;
    let with_metadata: i64 = conn.query_row("SELECT COUNT(*) FROM metadata", [], |r| r.get(0))?;
    let mut stmt =
        conn.prepare("SELECT format, COUNT(*) FROM metadata WHERE format IS NOT NULL GROUP BY format")?;
    let formats = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
    let coverage_percent =
        if total_entities > 0 { with_metadata as f64 * 100.0 / total_entities as f64 } else { 0.0 };
    Ok(MetadataSummary { total_entities, with_metadata, coverage_percent, formats })
}

// ---------------------------------------------------------------------------
// Thumbnails
// ---------------------------------------------------------------------------

/// A generated thumbnail about to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewThumbnail {
    pub path: String,
    pub resolution: u32,
    pub file_size: Option<i64>,
    /// Seconds spent generating
    pub generation_time: Option<f64>,
    /// Timestamp (video) or frame index (sequence) the still came from
    pub source_frame: Option<f64>,
    pub animated_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThumbnailRow {
    pub id: i64,
    pub entity_id: i64,
    pub path: String,
    pub resolution: u32,
    pub file_size: Option<i64>,
    pub generated_at: String,
    pub generation_time: Option<f64>,
    pub source_frame: Option<f64>,
    pub animated_path: Option<String>,
    pub is_valid: bool,
}

fn animated_from_extra(extra: Option<String>) -> Option<String> {
    let value: Value = serde_json::from_str(&extra?).ok()?;
    value.get("animated_path")?.as_str().map(String::from)
}

/// Record a thumbnail for (entity, resolution), replacing any previous one,
/// and flag the entity as having a thumbnail.
pub fn save_thumbnail(conn: &Connection, entity_id: i64, thumb: &NewThumbnail) -> Result<()> {
    let ts = now();
    let extra = thumb.animated_path.as_ref().map(|p| json!({ "animated_path": p }).to_string());
    conn.execute(
        "INSERT INTO thumbnails (entity_id, path, resolution, file_size, generated_at, generation_time,
                                 source_frame, extra_data, is_valid)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)
         ON CONFLICT(entity_id, resolution) DO UPDATE SET
             path = excluded.path,
             file_size = excluded.file_size,
             generated_at = excluded.generated_at,
             generation_time = excluded.generation_time,
             source_frame = excluded.source_frame,
             extra_data = excluded.extra_data,
             is_valid = 1",
        params![
            entity_id,
            thumb.path,
            thumb.resolution,
            thumb.file_size,
            ts,
            thumb.generation_time,
            thumb.source_frame,
            extra
        ],
    )?;
    conn.execute(
        "UPDATE entities SET thumbnail_generated = 1, updated_at = ?2 WHERE id = ?1",
        params![entity_id, ts],
    )?;
    Ok(())
}

pub fn thumbnail_for(conn: &Connection, entity_path: &str, resolution: u32) -> Result<Option<ThumbnailRow>> {
    let row = conn
        .query_row(
            "SELECT t.id, t.entity_id, t.path, t.resolution, t.file_size, t.generated_at, t.generation_time,
                    t.source_frame, t.extra_data, t.is_valid
             FROM thumbnails t JOIN entities e ON e.id = t.entity_id
             WHERE e.path = ?1 AND t.resolution = ?2
             ORDER BY t.generated_at DESC LIMIT 1",
            params![entity_path, resolution],
            |row| {
                Ok(ThumbnailRow {
                    id: row.get(0)?,
                    entity_id: row.get(1)?,
                    path: row.get(2)?,
                    resolution: row.get(3)?,
                    file_size: row.get(4)?,
                    generated_at: row.get(5)?,
                    generation_time: row.get(6)?,
                    source_frame: row.get(7)?,
                    animated_path: animated_from_extra(row.get(8)?),
                    is_valid: row.get::<_, i64>(9)? != 0,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Mark thumbnails whose image was deleted from disk. Returns rows changed.
pub fn invalidate_thumbnails(conn: &Connection, paths: &[String]) -> Result<usize> {
    let mut stmt = conn.prepare("UPDATE thumbnails SET is_valid = 0 WHERE path = ?1 AND is_valid = 1")?;
    let mut changed = 0;
    for path in paths {
        changed += stmt.execute([path])?;
    }
    Ok(changed)
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagRow {
    pub id: i64,
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    /// Entities carrying the tag
    pub usage: i64,
}

/// Tags are stored trimmed and lower-case.
pub fn normalize_tag_name(name: &str) -> Result<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(Error::Validation("tag name cannot be empty".into()));
    }
    Ok(name)
}

/// Colors are `#RRGGBB`.
pub fn validate_color(color: &str) -> Result<()> {
    let ok = color.len() == 7 && color.starts_with('#') && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!("color must be #RRGGBB, got '{}'", color)))
    }
}

/// Id of the tag, creating it when needed. A given color or description
/// updates an existing tag.
pub fn ensure_tag(conn: &Connection, name: &str, color: Option<&str>, description: Option<&str>) -> Result<i64> {
    let name = normalize_tag_name(name)?;
    if let Some(c) = color {
        validate_color(c)?;
    }
    let existing: Option<i64> =
        conn.query_row("SELECT id FROM tags WHERE name = ?1", [&name], |r| r.get(0)).optional()?;
    if let Some(id) = existing {
        conn.execute(
            "UPDATE tags SET color = COALESCE(?2, color), description = COALESCE(?3, description) WHERE id = ?1",
            params![id, color, description],
        )?;
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO tags (name, color, description, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![name, color, description, now()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn tag_entity(conn: &Connection, entity_id: i64, tag: &str) -> Result<()> {
    let tag_id = ensure_tag(conn, tag, None, None)?;
    conn.execute(
        "INSERT OR IGNORE INTO entity_tags (entity_id, tag_id) VALUES (?1, ?2)",
        params![entity_id, tag_id],
    )?;
    Ok(())
}

pub fn untag_entity(conn: &Connection, entity_path: &str, tag: &str) -> Result<bool> {
    let tag = normalize_tag_name(tag)?;
    let n = conn.execute(
        "DELETE FROM entity_tags
         WHERE tag_id IN (SELECT id FROM tags WHERE name = ?2)
           AND entity_id IN (SELECT id FROM entities WHERE path = ?1)",
        params![entity_path, tag],
    )?;
    Ok(n > 0)
}

const TAG_SELECT: &str = "SELECT t.id, t.name, t.color, t.description,
            (SELECT COUNT(*) FROM entity_tags x WHERE x.tag_id = t.id)
     FROM tags t";

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<TagRow> {
    Ok(TagRow {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        description: row.get(3)?,
        usage: row.get(4)?,
    })
}

pub fn list_tags(conn: &Connection) -> Result<Vec<TagRow>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY t.name", TAG_SELECT))?;
    let tags = stmt.query_map([], tag_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tags)
}

pub fn tags_for_entity(conn: &Connection, entity_path: &str) -> Result<Vec<TagRow>> {
    let mut stmt = conn.prepare(&format!(
        "{} JOIN entity_tags et ON et.tag_id = t.id JOIN entities e ON e.id = et.entity_id
         WHERE e.path = ?1 ORDER BY t.name",
        TAG_SELECT
    ))?;
    let tags = stmt.query_map([entity_path], tag_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tags)
}

pub fn entities_with_tag(conn: &Connection, tag: &str) -> Result<Vec<String>> {
    let tag = normalize_tag_name(tag)?;
    let mut stmt = conn.prepare(
        "SELECT DISTINCT e.path FROM entities e
         JOIN entity_tags et ON et.entity_id = e.id JOIN tags t ON t.id = et.tag_id
         WHERE t.name = ?1 ORDER BY e.path",
    )?;
    let paths = stmt.query_map([tag], |r| r.get(0))?.collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(paths)
}

// ---------------------------------------------------------------------------
// Favorites
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FavoriteRow {
    pub id: i64,
    pub entity_path: String,
    pub entity_name: String,
    pub project_id: Option<i64>,
    pub user_id: Option<String>,
    pub note: Option<String>,
    pub created_at: String,
}

/// Scope clause binding the project id at `?{first}` and the user at the next slot.
fn favorite_scope(first: usize) -> String {
    format!(
        "IFNULL(project_id, 0) = IFNULL(?{}, 0) AND IFNULL(user_id, '') = IFNULL(?{}, '')",
        first,
        first + 1
    )
}

/// Favorite an entity within a (project, user) scope. Re-favoriting
/// updates the note.
pub fn add_favorite(
    conn: &Connection,
    entity_id: i64,
    project_id: Option<i64>,
    user_id: Option<&str>,
    note: Option<&str>,
) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            &format!("SELECT id FROM favorites WHERE entity_id = ?1 AND {}", favorite_scope(2)),
            params![entity_id, project_id, user_id],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        conn.execute("UPDATE favorites SET note = COALESCE(?2, note) WHERE id = ?1", params![id, note])?;
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO favorites (entity_id, project_id, user_id, note, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![entity_id, project_id, user_id, note, now()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn remove_favorite(
    conn: &Connection,
    entity_path: &str,
    project_id: Option<i64>,
    user_id: Option<&str>,
) -> Result<bool> {
    let n = conn.execute(
        &format!(
            "DELETE FROM favorites WHERE entity_id IN (SELECT id FROM entities WHERE path = ?1) AND {}",
            favorite_scope(2)
        ),
        params![entity_path, project_id, user_id],
    )?;
    Ok(n > 0)
}

pub fn list_favorites(conn: &Connection, project_id: Option<i64>, user_id: Option<&str>) -> Result<Vec<FavoriteRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT f.id, e.path, e.name, f.project_id, f.user_id, f.note, f.created_at
         FROM (SELECT * FROM favorites WHERE {}) f JOIN entities e ON e.id = f.entity_id
         ORDER BY f.created_at DESC, f.id DESC",
        favorite_scope(1)
    ))?;
    let rows = stmt
        .query_map(params![project_id, user_id], |row| {
            Ok(FavoriteRow {
                id: row.get(0)?,
                entity_path: row.get(1)?,
                entity_name: row.get(2)?,
                project_id: row.get(3)?,
                user_id: row.get(4)?,
                note: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn is_favorite(conn: &Connection, entity_path: &str, project_id: Option<i64>, user_id: Option<&str>) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!(
                "SELECT id FROM favorites
                 WHERE entity_id IN (SELECT id FROM entities WHERE path = ?1) AND {} LIMIT 1",
                favorite_scope(2)
            ),
            params![entity_path, project_id, user_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRow {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    pub created_at: String,
}

/// Id of the named project, creating it when absent.
pub fn ensure_project(conn: &Connection, name: &str, path: &str, description: Option<&str>) -> Result<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("project name cannot be empty".into()));
    }
    if let Some(p) = find_project(conn, name)? {
        return Ok(p.id);
    }
    let ts = now();
    conn.execute(
        "INSERT INTO projects (name, path, description, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
        params![name, path, description, ts],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_project(conn: &Connection, name: &str) -> Result<Option<ProjectRow>> {
    let row = conn
        .query_row(
            "SELECT id, name, path, description, created_at FROM projects WHERE name = ?1",
            [name],
            |row| {
                Ok(ProjectRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    path: row.get(2)?,
                    description: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}
