//! Per-context SQLite catalog stores.
//!
//! # Layout
//!
//! Each context owns `<store dir>/stockshot.db` plus `<store dir>/backups/`.
//! A store dir that is itself a file is the legacy single-file layout; it is
//! moved into the directory on open.
//!
//! # Sessions
//!
//! Writers go through a small regular pool (one session by default) and tag
//! lookups through a wider one. Every operation runs inside
//! [`retry::with_retry`]: transient contention rolls the transaction back
//! and tries again with backoff.

pub mod migrations;
pub mod pool;
pub mod records;
pub mod retry;
mod router;

pub use pool::{open_connection, Session, SessionPool};
pub use records::{
    EntityRow, FavoriteRow, MetadataFilter, MetadataRecord, MetadataSummary, NewThumbnail, ProjectRow, TagRow,
    ThumbnailRow,
};
pub use retry::{with_retry, RetryPolicy};
pub use router::Stores;

use crate::config::StoreSettings;
use crate::core::context::{Context, STORE_FILE};
use crate::core::entity::MediaEntity;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const BACKUP_DIR: &str = "backups";
const AUTO_BACKUP_PREFIX: &str = "stockshot_browser_";
const MANUAL_BACKUP_PREFIX: &str = "stockshot_browser_backup_";
const TABLES: &[&str] = &["projects", "entities", "metadata", "tags", "entity_tags", "favorites", "thumbnails"];

/// Size, age and row counts of one store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreInfo {
    pub context: Context,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<String>,
    pub schema_version: u32,
    pub tables: BTreeMap<String, i64>,
}

impl std::fmt::Display for StoreInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} store {} ({} bytes, v{})", self.context, self.path.display(), self.size_bytes, self.schema_version)?;
        for (table, rows) in &self.tables {
            write!(f, "\n  {:<12} {}", table, rows)?;
        }
        Ok(())
    }
}

pub struct Store {
    context: Context,
    dir: PathBuf,
    path: PathBuf,
    sessions: SessionPool,
    tag_sessions: SessionPool,
    retry: RetryPolicy,
    settings: StoreSettings,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("context", &self.context).field("path", &self.path).finish()
    }
}

impl Store {
    /// Open (creating if needed) the store in `dir` and bring its schema
    /// up to date. Runs an automatic backup when one is due.
    pub fn open(context: Context, dir: &Path, settings: &StoreSettings) -> Result<Self> {
        migrate_legacy_layout(dir)?;
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let path = dir.join(STORE_FILE);

        let mut conn = open_connection(&path)?;
        let version = migrations::run(&mut conn)?;

        let store = Self {
            context,
            dir: dir.to_path_buf(),
            sessions: SessionPool::new("regular", &path, settings.max_sessions, settings.session_timeout),
            tag_sessions: SessionPool::new("tag", &path, settings.max_tag_sessions, settings.session_timeout),
            path,
            retry: RetryPolicy::from_settings(settings),
            settings: settings.clone(),
        };
        store.sessions.park(conn);
        info!("Opened {} store {} (schema v{})", context, store.path.display(), version);

        if settings.backup_enabled {
            if let Err(e) = store.auto_backup() {
                warn!("Automatic backup of {} failed: {}", store.path.display(), e);
            }
        }
        Ok(store)
    }

    #[must_use]
    pub fn context(&self) -> Context {
        self.context
    }

    /// Directory holding the store file and its backups.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` in an immediate transaction on a regular session,
    /// committing on success and retrying transient failures.
    pub fn write<T>(&self, what: &str, mut op: impl FnMut(&Transaction) -> Result<T>) -> Result<T> {
        with_retry(&self.retry, what, || {
            let mut session = self.sessions.acquire()?;
            let tx = session.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = op(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    pub fn read<T>(&self, what: &str, mut op: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        with_retry(&self.retry, what, || {
            let session = self.sessions.acquire()?;
            op(&*session)
        })
    }

    /// Like [`Store::write`], on the tag pool.
    pub fn write_tags<T>(&self, what: &str, mut op: impl FnMut(&Transaction) -> Result<T>) -> Result<T> {
        with_retry(&self.retry, what, || {
            let mut session = self.tag_sessions.acquire()?;
            let tx = session.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = op(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    pub fn read_tags<T>(&self, what: &str, mut op: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        with_retry(&self.retry, what, || {
            let session = self.tag_sessions.acquire()?;
            op(&*session)
        })
    }

    // -- entities ------------------------------------------------------------

    pub fn upsert_entity(&self, entity: &MediaEntity, project_id: Option<i64>) -> Result<i64> {
        self.write("upsert entity", |tx| records::ensure_entity(tx, entity, project_id))
    }

    pub fn find_entity(&self, path: &str, project_id: Option<i64>) -> Result<Option<EntityRow>> {
        self.read("find entity", |c| records::find_entity(c, path, project_id))
    }

    pub fn touch_entity(&self, path: &str) -> Result<bool> {
        self.write("touch entity", |tx| records::touch_entity(tx, path))
    }

    // -- metadata ------------------------------------------------------------

    /// Store metadata for `entity`, creating the entity row when needed.
    pub fn save_metadata(&self, entity: &MediaEntity, rec: &MetadataRecord) -> Result<i64> {
        self.write("save metadata", |tx| {
            let id = records::ensure_entity(tx, entity, None)?;
            records::save_metadata(tx, id, rec.clone())?;
            Ok(id)
        })
    }

    pub fn metadata_for_path(&self, path: &str) -> Result<Option<MetadataRecord>> {
        self.read("load metadata", |c| records::metadata_for_path(c, path))
    }

    pub fn search_metadata(&self, filter: &MetadataFilter) -> Result<Vec<String>> {
        self.read("search metadata", |c| records::search_metadata(c, filter))
    }

    pub fn metadata_summary(&self) -> Result<MetadataSummary> {
        self.read("metadata summary", records::metadata_summary)
    }

    // -- thumbnails ----------------------------------------------------------

    pub fn save_thumbnail(&self, entity: &MediaEntity, thumb: &NewThumbnail) -> Result<i64> {
        self.write("save thumbnail", |tx| {
            let id = records::ensure_entity(tx, entity, None)?;
            records::save_thumbnail(tx, id, thumb)?;
            Ok(id)
        })
    }

    pub fn thumbnail_for(&self, entity_path: &str, resolution: u32) -> Result<Option<ThumbnailRow>> {
        self.read("load thumbnail", |c| records::thumbnail_for(c, entity_path, resolution))
    }

    pub fn invalidate_thumbnails(&self, paths: &[String]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        self.write("invalidate thumbnails", |tx| records::invalidate_thumbnails(tx, paths))
    }

    // -- tags ----------------------------------------------------------------

    pub fn create_tag(&self, name: &str, color: Option<&str>, description: Option<&str>) -> Result<i64> {
        self.write_tags("create tag", |tx| records::ensure_tag(tx, name, color, description))
    }

    pub fn tag_entity(&self, entity: &MediaEntity, tag: &str) -> Result<()> {
        self.write_tags("tag entity", |tx| {
            let id = records::ensure_entity(tx, entity, None)?;
            records::tag_entity(tx, id, tag)
        })
    }

    pub fn untag_entity(&self, entity_path: &str, tag: &str) -> Result<bool> {
        self.write_tags("untag entity", |tx| records::untag_entity(tx, entity_path, tag))
    }

    pub fn tags_for_entity(&self, entity_path: &str) -> Result<Vec<TagRow>> {
        self.read_tags("entity tags", |c| records::tags_for_entity(c, entity_path))
    }

    pub fn entities_with_tag(&self, tag: &str) -> Result<Vec<String>> {
        self.read_tags("tagged entities", |c| records::entities_with_tag(c, tag))
    }

    pub fn list_tags(&self) -> Result<Vec<TagRow>> {
        self.read_tags("list tags", records::list_tags)
    }

    // -- favorites -----------------------------------------------------------

    pub fn add_favorite(
        &self,
        entity: &MediaEntity,
        project_id: Option<i64>,
        user_id: Option<&str>,
        note: Option<&str>,
    ) -> Result<i64> {
        self.write("add favorite", |tx| {
            let id = records::ensure_entity(tx, entity, None)?;
            records::add_favorite(tx, id, project_id, user_id, note)
        })
    }

    pub fn remove_favorite(&self, entity_path: &str, project_id: Option<i64>, user_id: Option<&str>) -> Result<bool> {
        self.write("remove favorite", |tx| records::remove_favorite(tx, entity_path, project_id, user_id))
    }

    pub fn is_favorite(&self, entity_path: &str, project_id: Option<i64>, user_id: Option<&str>) -> Result<bool> {
        self.read("query favorite", |c| records::is_favorite(c, entity_path, project_id, user_id))
    }

    pub fn list_favorites(&self, project_id: Option<i64>, user_id: Option<&str>) -> Result<Vec<FavoriteRow>> {
        self.read("list favorites", |c| records::list_favorites(c, project_id, user_id))
    }

    // -- projects ------------------------------------------------------------

    pub fn create_project(&self, name: &str, path: &str, description: Option<&str>) -> Result<i64> {
        self.write("create project", |tx| records::ensure_project(tx, name, path, description))
    }

    pub fn find_project(&self, name: &str) -> Result<Option<ProjectRow>> {
        self.read("find project", |c| records::find_project(c, name))
    }

    // -- maintenance ---------------------------------------------------------

    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.dir.join(BACKUP_DIR)
    }

    /// Consistent copy of the store via `VACUUM INTO`. Without `dest` the
    /// copy lands in the backup directory under a timestamped name.
    pub fn create_backup(&self, dest: Option<&Path>) -> Result<PathBuf> {
        let dest = match dest {
            Some(d) => d.to_path_buf(),
            None => {
                let ts = Utc::now().format("%Y%m%d_%H%M%S_%3f");
                self.backup_dir().join(format!("{}{}.db", MANUAL_BACKUP_PREFIX, ts))
            }
        };
        self.vacuum_into(&dest)?;
        info!("Backed up {} to {}", self.path.display(), dest.display());
        Ok(dest)
    }

    fn vacuum_into(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let target = dest.to_string_lossy().into_owned();
        self.read("backup", |c| {
            c.execute("VACUUM INTO ?1", [&target])?;
            Ok(())
        })
    }

    /// Backups in the backup directory, oldest first.
    pub fn list_backups(&self) -> Result<Vec<PathBuf>> {
        list_matching(&self.backup_dir(), &format!("{}*.db", AUTO_BACKUP_PREFIX))
    }

    /// Take a timestamped backup if the newest automatic one is older than
    /// the configured interval, then prune down to `max_backups`.
    pub fn auto_backup(&self) -> Result<Option<PathBuf>> {
        let dir = self.backup_dir();
        let existing = list_matching(&dir, &format!("{}[0-9]*.db", AUTO_BACKUP_PREFIX))?;
        let due = match existing.last().and_then(|p| crate::core::file::mtime(p)) {
            Some(t) => SystemTime::now().duration_since(t).map_or(true, |age| age >= self.settings.backup_interval),
            None => true,
        };
        if !due {
            debug!("Backup of {} not due", self.path.display());
            return Ok(None);
        }
        let name = format!("{}{}.db", AUTO_BACKUP_PREFIX, Utc::now().format("%Y%m%d_%H%M%S"));
        let dest = dir.join(name);
        if dest.exists() {
            return Ok(None);
        }
        self.vacuum_into(&dest)?;
        info!("Automatic backup {}", dest.display());

        let mut all = existing;
        all.push(dest.clone());
        let keep = self.settings.max_backups.max(1);
        if all.len() > keep {
            for old in &all[..all.len() - keep] {
                match fs::remove_file(old) {
                    Ok(()) => debug!("Pruned backup {}", old.display()),
                    Err(e) => warn!("Cannot prune backup {}: {}", old.display(), e),
                }
            }
        }
        Ok(Some(dest))
    }

    /// Replace the store contents with `backup`. The current file is kept
    /// beside it as `stockshot.db.pre_restore`.
    pub fn restore_backup(&self, backup: &Path) -> Result<()> {
        if !backup.is_file() {
            return Err(Error::io(backup, std::io::Error::from(std::io::ErrorKind::NotFound)));
        }
        self.read("checkpoint", |c| {
            c.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            Ok(())
        })?;

        let _regular = self.sessions.exclusive()?;
        let _tags = self.tag_sessions.exclusive()?;

        let keep = sibling(&self.path, ".pre_restore");
        fs::copy(&self.path, &keep).map_err(|e| Error::io(&keep, e))?;
        fs::copy(backup, &self.path).map_err(|e| Error::io(&self.path, e))?;
        for suffix in ["-wal", "-shm"] {
            let side = sibling(&self.path, suffix);
            if side.exists() {
                fs::remove_file(&side).map_err(|e| Error::io(&side, e))?;
            }
        }

        let mut conn = open_connection(&self.path)?;
        migrations::run(&mut conn)?;
        self.sessions.park(conn);
        info!("Restored {} from {}", self.path.display(), backup.display());
        Ok(())
    }

    /// Rebuild the file and refresh planner statistics.
    pub fn vacuum(&self) -> Result<()> {
        self.read("vacuum", |c| {
            c.execute_batch("VACUUM; PRAGMA optimize;")?;
            Ok(())
        })?;
        info!("Vacuumed {}", self.path.display());
        Ok(())
    }

    pub fn info(&self) -> Result<StoreInfo> {
        let meta = fs::metadata(&self.path).map_err(|e| Error::io(&self.path, e))?;
        let modified = meta.modified().ok().map(|t| DateTime::<Utc>::from(t).to_rfc3339());
        let (schema_version, tables) = self.read("store info", |c| {
            let mut tables = BTreeMap::new();
            for table in TABLES {
                let n: i64 = c.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
                tables.insert(table.to_string(), n);
            }
            Ok((migrations::current_version(c)?, tables))
        })?;
        Ok(StoreInfo { context: self.context, path: self.path.clone(), size_bytes: meta.len(), modified, schema_version, tables })
    }

    /// Whether a session can be acquired and answers a trivial query.
    #[must_use]
    pub fn test_connection(&self) -> bool {
        match self.read("test connection", |c| Ok(c.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?)) {
            Ok(1) => true,
            Ok(_) => false,
            Err(e) => {
                warn!("Connection test on {} failed: {}", self.path.display(), e);
                false
            }
        }
    }
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn list_matching(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = format!("{}/{}", glob::Pattern::escape(&dir.to_string_lossy()), pattern);
    let entries = glob::glob(&full).map_err(|e| Error::Config(format!("bad glob {}: {}", full, e)))?;
    let mut found: Vec<PathBuf> = entries.filter_map(|e| e.ok()).collect();
    found.sort();
    Ok(found)
}

/// Move a legacy single-file store into the directory layout:
/// `<dir>` → `<dir>.old` → `<dir>/stockshot.db`.
pub fn migrate_legacy_layout(dir: &Path) -> Result<bool> {
    if !dir.is_file() {
        return Ok(false);
    }
    let parked = sibling(dir, ".old");
    if parked.exists() {
        return Err(Error::io(&parked, std::io::Error::from(std::io::ErrorKind::AlreadyExists)));
    }
    warn!("Legacy store file at {}, moving into directory layout", dir.display());
    fs::rename(dir, &parked).map_err(|e| Error::io(&parked, e))?;
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let target = dir.join(STORE_FILE);
    fs::rename(&parked, &target).map_err(|e| Error::io(&target, e))?;
    info!("Legacy store moved to {}", target.display());
    Ok(true)
}

#[cfg(test)]
mod tests;
