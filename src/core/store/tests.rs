use super::*;
use crate::config::Config;
use crate::core::context::ContextRouter;
use serde_json::json;
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

fn settings() -> StoreSettings {
    StoreSettings {
        backup_enabled: false,
        session_timeout: Duration::from_millis(200),
        retry_base: Duration::from_millis(1),
        retry_cap: Duration::from_millis(4),
        ..StoreSettings::default()
    }
}

fn open(dir: &Path) -> Store {
    Store::open(Context::General, dir, &settings()).unwrap()
}

fn video(path: &str) -> MediaEntity {
    MediaEntity::video(Path::new(path))
}

fn sqlite_error(code: std::os::raw::c_int) -> Error {
    Error::Db(rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None))
}

#[test]
fn test_open_creates_layout_and_schema() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("db");
    let store = open(&dir);
    assert!(dir.join("stockshot.db").is_file());
    let info = store.info().unwrap();
    assert_eq!(info.schema_version, migrations::LATEST_VERSION);
    assert_eq!(info.tables["entities"], 0);
    assert!(store.test_connection());
}

#[test]
fn test_migrations_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let mut conn = open_connection(&tmp.path().join("x.db")).unwrap();
    assert_eq!(migrations::run(&mut conn).unwrap(), 4);
    assert_eq!(migrations::run(&mut conn).unwrap(), 4);
    let applied: i64 = conn.query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0)).unwrap();
    assert_eq!(applied, 4);
}

#[test]
fn test_old_store_gains_missing_columns() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("old.db");
    let mut conn = open_connection(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE thumbnails (id INTEGER PRIMARY KEY, entity_id INTEGER NOT NULL, path TEXT NOT NULL,
             resolution INTEGER NOT NULL, file_size INTEGER, generated_at TEXT NOT NULL,
             generation_time REAL, source_frame REAL, is_valid INTEGER NOT NULL DEFAULT 1,
             UNIQUE (entity_id, resolution));
         CREATE TABLE entities (id INTEGER PRIMARY KEY, path TEXT NOT NULL, entity_type TEXT NOT NULL,
             name TEXT NOT NULL, project_id INTEGER, file_size INTEGER, file_count INTEGER NOT NULL DEFAULT 1,
             created_at TEXT NOT NULL, updated_at TEXT NOT NULL, last_scanned TEXT,
             is_active INTEGER NOT NULL DEFAULT 1, metadata_extracted INTEGER NOT NULL DEFAULT 0,
             thumbnail_generated INTEGER NOT NULL DEFAULT 0);",
    )
    .unwrap();
    assert!(!migrations::has_column(&conn, "thumbnails", "extra_data").unwrap());

    migrations::run(&mut conn).unwrap();
    assert!(migrations::has_column(&conn, "thumbnails", "extra_data").unwrap());
    assert!(migrations::has_column(&conn, "entities", "last_accessed").unwrap());
    assert!(migrations::has_column(&conn, "metadata", "category").unwrap());
}

#[test]
fn test_legacy_single_file_moves_into_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let legacy = tmp.path().join("database");
    {
        let mut conn = open_connection(&legacy).unwrap();
        migrations::run(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO tags (name, created_at) VALUES ('keep', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
    }
    for side in ["-wal", "-shm"] {
        let _ = fs::remove_file(sibling(&legacy, side));
    }

    let store = open(&legacy);
    assert!(legacy.is_dir());
    assert!(legacy.join("stockshot.db").is_file());
    assert!(!tmp.path().join("database.old").exists());
    let tags = store.list_tags().unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].name, "keep");
}

#[test]
fn test_pool_times_out_when_exhausted() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = SessionPool::new("regular", &tmp.path().join("p.db"), 1, Duration::from_millis(50));
    let held = pool.acquire().unwrap();
    match pool.acquire() {
        Err(Error::PoolTimeout { kind, .. }) => assert_eq!(kind, "regular"),
        other => panic!("expected timeout, got {:?}", other.map(|_| ())),
    }
    drop(held);
    assert!(pool.acquire().is_ok());
    assert_eq!(pool.available(), 1);
}

#[test]
fn test_exclusive_blocks_sessions() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = SessionPool::new("tag", &tmp.path().join("p.db"), 3, Duration::from_millis(30));
    let guard = pool.exclusive().unwrap();
    assert_eq!(pool.available(), 0);
    assert!(pool.acquire().is_err());
    drop(guard);
    assert_eq!(pool.available(), 3);
}

#[test]
fn test_retry_non_transient_runs_once() {
    let policy = RetryPolicy { base: Duration::from_millis(1), ..RetryPolicy::default() };
    let calls = Cell::new(0);
    let res: Result<()> = with_retry(&policy, "op", || {
        calls.set(calls.get() + 1);
        Err(Error::Validation("nope".into()))
    });
    assert!(matches!(res, Err(Error::Validation(_))));
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_retry_transient_exhausts_attempts() {
    let policy = RetryPolicy { max_attempts: 4, base: Duration::from_millis(1), ..RetryPolicy::default() };
    let calls = Cell::new(0);
    let res: Result<()> = with_retry(&policy, "op", || {
        calls.set(calls.get() + 1);
        Err(sqlite_error(rusqlite::ffi::SQLITE_BUSY))
    });
    assert!(res.unwrap_err().is_transient());
    assert_eq!(calls.get(), 4);
}

#[test]
fn test_retry_recovers() {
    let policy = RetryPolicy { base: Duration::from_millis(1), ..RetryPolicy::default() };
    let calls = Cell::new(0);
    let res = with_retry(&policy, "op", || {
        calls.set(calls.get() + 1);
        if calls.get() < 3 {
            Err(sqlite_error(rusqlite::ffi::SQLITE_LOCKED))
        } else {
            Ok(7)
        }
    });
    assert_eq!(res.unwrap(), 7);
    assert_eq!(calls.get(), 3);
}

#[test]
fn test_backoff_is_capped() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.backoff(0), Duration::from_millis(100));
    assert_eq!(policy.backoff(2), Duration::from_millis(400));
    assert_eq!(policy.backoff(10), Duration::from_secs(2));
}

#[test]
fn test_entity_upsert_is_stable() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    let e = video("/shots/010/clip.mov");
    let a = store.upsert_entity(&e, None).unwrap();
    let b = store.upsert_entity(&e, None).unwrap();
    assert_eq!(a, b);
    let row = store.find_entity("/shots/010/clip.mov", None).unwrap().unwrap();
    assert_eq!(row.entity_type, "video");
    assert_eq!(row.name, "clip");
    assert!(row.last_accessed.is_none());
    assert!(store.touch_entity("/shots/010/clip.mov").unwrap());
    assert!(store.find_entity("/shots/010/clip.mov", None).unwrap().unwrap().last_accessed.is_some());
}

#[test]
fn test_metadata_round_trip_omits_none() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    let e = video("/clips/a.mov");
    let mut rec = MetadataRecord {
        width: Some(1920),
        height: Some(1080),
        fps: Some(24.0),
        codec: Some("h264".into()),
        has_audio: Some(false),
        ..Default::default()
    };
    rec.custom.insert("entity_type".into(), json!("video"));
    store.save_metadata(&e, &rec).unwrap();

    let back = store.metadata_for_path("/clips/a.mov").unwrap().unwrap();
    assert_eq!(back, rec);
    let map = back.to_map();
    assert_eq!(map["width"], json!(1920));
    assert_eq!(map["entity_type"], json!("video"));
    assert!(!map.contains_key("duration"));
    assert!(store.find_entity("/clips/a.mov", None).unwrap().unwrap().metadata_extracted);
}

#[test]
fn test_metadata_update_merges() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    let e = video("/clips/b.mov");
    let mut first = MetadataRecord { width: Some(640), codec: Some("prores".into()), ..Default::default() };
    first.custom.insert("a".into(), json!(1));
    store.save_metadata(&e, &first).unwrap();

    let mut second = MetadataRecord { width: Some(1280), ..Default::default() };
    second.custom.insert("b".into(), json!(2));
    store.save_metadata(&e, &second).unwrap();

    let back = store.metadata_for_path("/clips/b.mov").unwrap().unwrap();
    assert_eq!(back.width, Some(1280));
    assert_eq!(back.codec.as_deref(), Some("prores"));
    assert_eq!(back.custom.len(), 2);
}

#[test]
fn test_search_and_summary() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    let hd = MetadataRecord {
        width: Some(1920),
        height: Some(1080),
        duration: Some(12.0),
        format: Some("mov,mp4,m4a".into()),
        codec: Some("h264".into()),
        has_audio: Some(true),
        ..Default::default()
    };
    let sd = MetadataRecord {
        width: Some(720),
        height: Some(576),
        duration: Some(3.0),
        format: Some("exr".into()),
        ..Default::default()
    };
    store.save_metadata(&video("/m/hd.mov"), &hd).unwrap();
    store.save_metadata(&video("/m/sd.mov"), &sd).unwrap();
    store.upsert_entity(&video("/m/bare.mov"), None).unwrap();

    let wide = MetadataFilter { width_min: Some(1280), ..Default::default() };
    assert_eq!(store.search_metadata(&wide).unwrap(), vec!["/m/hd.mov".to_string()]);
    let short = MetadataFilter { duration_max: Some(5.0), ..Default::default() };
    assert_eq!(store.search_metadata(&short).unwrap(), vec!["/m/sd.mov".to_string()]);
    let codec = MetadataFilter { codec: Some("H264".into()), has_audio: Some(true), ..Default::default() };
    assert_eq!(store.search_metadata(&codec).unwrap().len(), 1);
    let silent = MetadataFilter { has_audio: Some(false), ..Default::default() };
    assert_eq!(store.search_metadata(&silent).unwrap(), vec!["/m/sd.mov".to_string()]);
    let format = MetadataFilter { format: Some("mp4".into()), ..Default::default() };
    assert_eq!(store.search_metadata(&format).unwrap(), vec!["/m/hd.mov".to_string()]);
    assert_eq!(store.search_metadata(&MetadataFilter::default()).unwrap().len(), 2);

    let summary = store.metadata_summary().unwrap();
    assert_eq!(summary.total_entities, 3);
    assert_eq!(summary.with_metadata, 2);
    assert!((summary.coverage_percent - 66.666).abs() < 0.01);
    assert_eq!(summary.formats.get("exr"), Some(&1));
}

#[test]
fn test_thumbnail_upsert_and_invalidate() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    let e = video("/v/clip.mov");
    let mut thumb = NewThumbnail {
        path: "/cache/clip_1_128.jpg".into(),
        resolution: 128,
        file_size: Some(2048),
        generation_time: Some(0.5),
        source_frame: Some(1.2),
        animated_path: Some("/cache/clip_1_128.gif".into()),
    };
    store.save_thumbnail(&e, &thumb).unwrap();
    thumb.path = "/cache/clip_2_128.jpg".into();
    store.save_thumbnail(&e, &thumb).unwrap();

    let row = store.thumbnail_for("/v/clip.mov", 128).unwrap().unwrap();
    assert_eq!(row.path, "/cache/clip_2_128.jpg");
    assert_eq!(row.animated_path.as_deref(), Some("/cache/clip_1_128.gif"));
    assert!(row.is_valid);
    assert_eq!(store.info().unwrap().tables["thumbnails"], 1);
    assert!(store.find_entity("/v/clip.mov", None).unwrap().unwrap().thumbnail_generated);

    let n = store.invalidate_thumbnails(&["/cache/clip_2_128.jpg".to_string()]).unwrap();
    assert_eq!(n, 1);
    assert!(!store.thumbnail_for("/v/clip.mov", 128).unwrap().unwrap().is_valid);
    assert!(store.thumbnail_for("/v/clip.mov", 256).unwrap().is_none());
}

#[test]
fn test_thumbnail_resolution_checked() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    let thumb = NewThumbnail {
        path: "/cache/x.jpg".into(),
        resolution: 4096,
        file_size: None,
        generation_time: None,
        source_frame: None,
        animated_path: None,
    };
    let err = store.save_thumbnail(&video("/v/x.mov"), &thumb).unwrap_err();
    assert!(!err.is_transient());
}

#[test]
fn test_tags() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    assert!(store.create_tag("  ", None, None).is_err());
    assert!(store.create_tag("hero", Some("red"), None).is_err());
    let id = store.create_tag(" Hero ", Some("#FF0000"), Some("main shots")).unwrap();
    assert_eq!(store.create_tag("hero", None, None).unwrap(), id);

    let e = video("/t/a.mov");
    store.tag_entity(&e, "HERO").unwrap();
    store.tag_entity(&e, "hero").unwrap();
    store.tag_entity(&e, "wip").unwrap();

    let tags = store.tags_for_entity("/t/a.mov").unwrap();
    let names: Vec<_> = tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["hero", "wip"]);
    assert_eq!(tags[0].color.as_deref(), Some("#FF0000"));
    assert_eq!(tags[0].usage, 1);
    assert_eq!(store.entities_with_tag("Hero").unwrap(), vec!["/t/a.mov".to_string()]);

    assert!(store.untag_entity("/t/a.mov", "wip").unwrap());
    assert!(!store.untag_entity("/t/a.mov", "wip").unwrap());
    assert_eq!(store.list_tags().unwrap().len(), 2);
}

#[test]
fn test_tag_and_regular_sessions_write_concurrently() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = StoreSettings {
        max_sessions: 4,
        max_tag_sessions: 4,
        session_timeout: Duration::from_secs(5),
        ..settings()
    };
    let store = Store::open(Context::General, tmp.path(), &settings).unwrap();
    let entities: Vec<MediaEntity> = (0..10).map(|i| video(&format!("/c/shot{}.mov", i))).collect();
    let rec = MetadataRecord { width: Some(1920), ..Default::default() };

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| entities.iter().for_each(|e| store.tag_entity(e, "hero").unwrap()));
            s.spawn(|| entities.iter().for_each(|e| {
                store.save_metadata(e, &rec).unwrap();
            }));
        }
    });

    let rows: i64 = store
        .read("count rows", |c| Ok(c.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?))
        .unwrap();
    assert_eq!(rows, 10);
    for e in &entities {
        let path = e.path.to_string_lossy();
        let tags = store.tags_for_entity(&path).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(store.metadata_for_path(&path).unwrap().unwrap().width, Some(1920));
    }
    assert_eq!(store.entities_with_tag("hero").unwrap().len(), 10);
}

#[test]
fn test_filter_rejects_unknown_keys() {
    let filter: MetadataFilter = serde_json::from_str(r#"{"width_min": 1920}"#).unwrap();
    assert_eq!(filter.width_min, Some(1920));
    assert!(serde_json::from_str::<MetadataFilter>(r#"{"fps_min": 24}"#).is_err());
}

#[test]
fn test_favorites_scoped() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    let project = store.create_project("show", "/proj", None).unwrap();
    assert_eq!(store.create_project("show", "/elsewhere", None).unwrap(), project);
    assert_eq!(store.find_project("show").unwrap().unwrap().path, "/proj");

    let e = video("/f/a.mov");
    let a = store.add_favorite(&e, None, Some("alice"), Some("first")).unwrap();
    assert_eq!(store.add_favorite(&e, None, Some("alice"), Some("second")).unwrap(), a);
    store.add_favorite(&e, Some(project), None, None).unwrap();

    let mine = store.list_favorites(None, Some("alice")).unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].note.as_deref(), Some("second"));
    assert!(store.is_favorite("/f/a.mov", Some(project), None).unwrap());
    assert!(!store.is_favorite("/f/a.mov", None, None).unwrap());

    assert!(store.remove_favorite("/f/a.mov", None, Some("alice")).unwrap());
    assert!(store.list_favorites(None, Some("alice")).unwrap().is_empty());
    assert_eq!(store.list_favorites(Some(project), None).unwrap().len(), 1);
}

#[test]
fn test_backup_and_restore() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(&tmp.path().join("db"));
    store.create_tag("before", None, None).unwrap();
    let backup = store.create_backup(None).unwrap();
    assert!(backup.starts_with(store.backup_dir()));
    assert_eq!(store.list_backups().unwrap(), vec![backup.clone()]);

    store.create_tag("after", None, None).unwrap();
    store.restore_backup(&backup).unwrap();
    let names: Vec<_> = store.list_tags().unwrap().into_iter().map(|t| t.name).collect();
    assert_eq!(names, ["before"]);
    assert!(tmp.path().join("db/stockshot.db.pre_restore").is_file());

    assert!(store.restore_backup(&tmp.path().join("missing.db")).is_err());
}

#[test]
fn test_auto_backup_rotates() {
    let tmp = tempfile::tempdir().unwrap();
    let mut s = settings();
    s.backup_enabled = true;
    s.max_backups = 2;
    let store = Store::open(Context::General, tmp.path(), &s).unwrap();
    assert_eq!(store.list_backups().unwrap().len(), 1);
    // fresh backup, interval not reached
    assert!(store.auto_backup().unwrap().is_none());

    let backups = store.backup_dir();
    for stamp in ["20200101_000000", "20200102_000000"] {
        fs::write(backups.join(format!("stockshot_browser_{}.db", stamp)), b"old").unwrap();
    }
    let mut zero = s.clone();
    zero.backup_interval = Duration::ZERO;
    let store = Store { settings: zero, ..store };
    std::thread::sleep(Duration::from_millis(1100));
    assert!(store.auto_backup().unwrap().is_some());
    let left = store.list_backups().unwrap();
    assert_eq!(left.len(), 2);
    assert!(left.iter().all(|p| !p.to_string_lossy().contains("2020")));
}

#[test]
fn test_vacuum() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    store.upsert_entity(&video("/v/a.mov"), None).unwrap();
    store.vacuum().unwrap();
    assert_eq!(store.info().unwrap().tables["entities"], 1);
}

fn router(tmp: &Path, user_store: &str) -> Arc<ContextRouter> {
    let general = json!({ "paths": {
        "gen_db_directory": tmp.join("general").to_string_lossy(),
        "gen_thumbnail_directory": tmp.join("thumbs").to_string_lossy(),
        "user_db_path": user_store,
    }});
    let user = json!({ "directory_tree": { "configured_paths": [tmp.join("mine").to_string_lossy()] } });
    let config = Config::from_layers(general, json!({}), user);
    Arc::new(ContextRouter::new(&config))
}

#[test]
fn test_stores_route_and_fall_back() {
    let tmp = tempfile::tempdir().unwrap();
    let user_dir = tmp.path().join("user");
    let stores = Stores::initialize(router(tmp.path(), &user_dir.to_string_lossy()), settings()).unwrap();

    let (ctx, store) = stores.store_for_path(&tmp.path().join("mine/clip.mov")).unwrap();
    assert_eq!(ctx, Context::User);
    assert_eq!(store.dir(), user_dir);

    let (ctx, store) = stores.store_for_path(&tmp.path().join("other/clip.mov")).unwrap();
    assert_eq!(ctx, Context::General);
    assert_eq!(store.dir(), tmp.path().join("general"));

    // no project location configured
    let project = stores.store(Context::Project).unwrap();
    assert!(Arc::ptr_eq(&project, &stores.general().unwrap()));
    assert_eq!(stores.distinct().len(), 2);
    assert_eq!(stores.info_all().len(), 2);
    assert_eq!(stores.vacuum_all(), 2);
}

#[test]
fn test_unavailable_user_store_degrades() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("blocker");
    fs::write(&blocker, b"x").unwrap();
    // a store dir below a regular file cannot be created
    let bad = blocker.join("user");
    let stores = Stores::initialize(router(tmp.path(), &bad.to_string_lossy()), settings()).unwrap();
    let store = stores.store(Context::User).unwrap();
    assert_eq!(store.context(), Context::General);
}

#[test]
fn test_shared_location_shares_store() {
    let tmp = tempfile::tempdir().unwrap();
    let general = tmp.path().join("general");
    let stores = Stores::initialize(router(tmp.path(), &general.to_string_lossy()), settings()).unwrap();
    let user = stores.store(Context::User).unwrap();
    assert!(Arc::ptr_eq(&user, &stores.general().unwrap()));
    assert_eq!(stores.distinct().len(), 1);
}
