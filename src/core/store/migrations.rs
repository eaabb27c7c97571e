//! Versioned schema migrations.
//!
//! Versions apply in increasing order, each in its own transaction, and are
//! recorded in `schema_version`. Every step tolerates a database that already
//! has its tables or columns, so stores created by older builds upgrade in
//! place.

use crate::error::Result;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

struct Migration {
    version: u32,
    name: &'static str,
    apply: fn(&Transaction) -> Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, name: "base schema", apply: base_schema },
    Migration { version: 2, name: "thumbnail extra data", apply: thumbnail_extra_data },
    Migration { version: 3, name: "access time and metadata category", apply: access_and_category },
    Migration { version: 4, name: "search indexes", apply: search_indexes },
];

/// Highest version this build knows.
pub const LATEST_VERSION: u32 = 4;

/// Bring the schema up to [`LATEST_VERSION`]. Returns the resulting version.
pub fn run(conn: &mut Connection) -> Result<u32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )?;
    let start = current_version(conn)?;
    let mut current = start;
    for m in MIGRATIONS.iter().filter(|m| m.version > start) {
        let tx = conn.transaction()?;
        (m.apply)(&tx)?;
        tx.execute(
            "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![m.version, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        info!("Applied migration v{}: {}", m.version, m.name);
        current = m.version;
    }
    Ok(current)
}

pub fn current_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

pub fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn add_column(tx: &Transaction, table: &str, column: &str, decl: &str) -> Result<()> {
    if has_column(tx, table, column)? {
        debug!("{}.{} already present", table, column);
        return Ok(());
    }
    tx.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))?;
    Ok(())
}

fn base_schema(tx: &Transaction) -> Result<()> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL,
            description TEXT,
            config TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            name TEXT NOT NULL,
            project_id INTEGER REFERENCES projects(id) ON DELETE SET NULL,
            file_size INTEGER,
            file_count INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_scanned TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            metadata_extracted INTEGER NOT NULL DEFAULT 0,
            thumbnail_generated INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX IF NOT EXISTS uq_entities_path_project
            ON entities(path, IFNULL(project_id, 0));
        CREATE INDEX IF NOT EXISTS idx_entities_path ON entities(path);
        CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
        CREATE TABLE IF NOT EXISTS metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL UNIQUE REFERENCES entities(id) ON DELETE CASCADE,
            duration REAL,
            fps REAL,
            width INTEGER,
            height INTEGER,
            aspect_ratio REAL,
            format TEXT,
            codec TEXT,
            audio_codec TEXT,
            colorspace TEXT,
            bit_depth INTEGER,
            bitrate INTEGER,
            frame_count INTEGER,
            has_audio INTEGER,
            custom_fields TEXT,
            extracted_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            color TEXT,
            description TEXT,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS entity_tags (
            entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            PRIMARY KEY (entity_id, tag_id)
        );
        CREATE TABLE IF NOT EXISTS favorites (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            project_id INTEGER REFERENCES projects(id) ON DELETE CASCADE,
            user_id TEXT,
            note TEXT,
            created_at TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS uq_favorites_scope
            ON favorites(entity_id, IFNULL(project_id, 0), IFNULL(user_id, ''));
        CREATE TABLE IF NOT EXISTS thumbnails (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            resolution INTEGER NOT NULL CHECK (resolution BETWEEN 32 AND 1024),
            file_size INTEGER,
            generated_at TEXT NOT NULL,
            generation_time REAL,
            source_frame REAL,
            is_valid INTEGER NOT NULL DEFAULT 1,
            UNIQUE (entity_id, resolution)
        );",
    )?;
    Ok(())
}

fn thumbnail_extra_data(tx: &Transaction) -> Result<()> {
    add_column(tx, "thumbnails", "extra_data", "TEXT")
}

fn access_and_category(tx: &Transaction) -> Result<()> {
    add_column(tx, "entities", "last_accessed", "TEXT")?;
    add_column(tx, "metadata", "category", "TEXT")?;
    tx.execute_batch("CREATE INDEX IF NOT EXISTS idx_metadata_category ON metadata(category)")?;
    Ok(())
}

fn search_indexes(tx: &Transaction) -> Result<()> {
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_metadata_dimensions ON metadata(width, height);
         CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);
         CREATE INDEX IF NOT EXISTS idx_thumbnails_path ON thumbnails(path);",
    )?;
    Ok(())
}
