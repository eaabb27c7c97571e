use super::*;
use crate::config::ConfigPaths;
use crate::core::tools::{AnimSpec, ProbeInfo};
use crate::error::Error;
use serde_json::json;
use std::fs;

/// Writes a few bytes wherever a render is asked for.
struct StubTools;

impl MediaProbe for StubTools {
    fn probe(&self, _path: &Path) -> Result<ProbeInfo> {
        Ok(ProbeInfo {
            format: Some("exr_pipe".into()),
            duration: Some(3.0),
            width: Some(2048),
            height: Some(1080),
            codec: Some("exr".into()),
            ..Default::default()
        })
    }
}

impl FrameTool for StubTools {
    fn extract_frame(&self, _src: &Path, dest: &Path, _at: f64, _resolution: u32) -> Result<()> {
        fs::write(dest, b"jpeg").map_err(|e| Error::io(dest, e))
    }

    fn image_thumbnail(&self, _src: &Path, dest: &Path, _resolution: u32) -> Result<()> {
        fs::write(dest, b"jpeg").map_err(|e| Error::io(dest, e))
    }

    fn animate_video(&self, _src: &Path, dest: &Path, _duration: f64, _spec: &AnimSpec) -> Result<()> {
        fs::write(dest, b"gif").map_err(|e| Error::io(dest, e))
    }

    fn animate_sequence(&self, _frames: &[PathBuf], dest: &Path, _spec: &AnimSpec) -> Result<()> {
        fs::write(dest, b"gif").map_err(|e| Error::io(dest, e))
    }
}

fn tempdir() -> tempfile::TempDir {
    tempfile::Builder::new().prefix("catalog").tempdir().unwrap()
}

fn general_layer(tmp: &Path) -> Value {
    json!({
        "paths": {
            "gen_db_directory": tmp.join("db").to_string_lossy(),
            "gen_thumbnail_directory": tmp.join("thumbs").to_string_lossy(),
        },
        "database": { "backup_enabled": false },
    })
}

fn catalog(config: Config) -> Catalog {
    let tools = Arc::new(StubTools);
    Catalog::with_tools(config, Arc::clone(&tools) as Arc<dyn FrameTool>, tools).unwrap()
}

fn touch(dir: &Path, names: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    for n in names {
        fs::write(dir.join(n), b"data").unwrap();
    }
}

#[test]
fn test_scan_thumbnail_and_metadata() {
    let tmp = tempdir();
    let shot = tmp.path().join("shots/010");
    touch(&shot, &["a.1001.exr", "a.1002.exr", "a.1003.exr", "a.1004.exr"]);
    let cat = catalog(Config::from_layers(general_layer(tmp.path()), json!({}), json!({})));

    let entities = cat.scan(&shot, false);
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].kind, EntityKind::FolderSequence);
    assert_eq!(entities[0].frame_range, Some((1001, 1004)));

    let report = cat.queue_thumbnails(entities.clone(), &shot).unwrap().wait();
    assert_eq!(report.succeeded.len(), 1);
    let thumb = cat.get_thumbnail_path(&entities[0], &shot).unwrap();
    assert!(thumb.starts_with(tmp.path().join("thumbs")));
    assert!(cat.get_animated_thumbnail_path(&entities[0], &shot).is_some());

    let report = cat.process_metadata(entities, &shot).unwrap().wait();
    assert_eq!(report.succeeded.len(), 1);
    let meta = cat.get_entity_metadata(&shot).unwrap().unwrap();
    assert_eq!(meta["width"], json!(2048));
    assert_eq!(meta["frame_range"], json!("1001-1004"));
    assert_eq!(meta["entity_type"], json!("folder_sequence"));

    let filter = MetadataFilter { codec: Some("EXR".into()), ..Default::default() };
    assert_eq!(cat.search_by_metadata(&filter).unwrap(), vec![shot.to_string_lossy().into_owned()]);
    assert_eq!(cat.metadata_summary(Context::General).unwrap().with_metadata, 1);

    let info = cat.cache_info();
    assert_eq!((info[0].stills, info[0].animated), (1, 1));
    assert_eq!(cat.clear_cache(Some(Context::General)).unwrap(), 2);
    assert_eq!(cat.get_thumbnail_path(&cat.scan(&shot, false)[0], &shot), None);
    assert!(cat.shutdown());
}

#[test]
fn test_scan_with_progress_reports() {
    let tmp = tempdir();
    let root = tmp.path().join("lib");
    touch(&root, &["clip.mov", "ref.png"]);
    touch(&root.join("plates"), &["p.0001.dpx", "p.0002.dpx"]);
    let cat = catalog(Config::from_layers(general_layer(tmp.path()), json!({}), json!({})));

    let mut calls = Vec::new();
    let result = cat.scan_with_progress(&root, true, &mut |done, total| calls.push((done, total)));
    assert!(result.errors.is_empty());
    let kinds: Vec<EntityKind> = result.entities.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EntityKind::Video));
    assert!(kinds.contains(&EntityKind::Image));
    assert!(kinds.contains(&EntityKind::FolderSequence));
    assert!(!calls.is_empty());
}

#[test]
fn test_reload_picks_up_new_roots() {
    let tmp = tempdir();
    let general = tmp.path().join("general.json");
    let user = tmp.path().join("user.json");
    fs::write(&general, general_layer(tmp.path()).to_string()).unwrap();
    fs::write(&user, "{}").unwrap();
    let mine = tmp.path().join("mine");
    fs::create_dir_all(&mine).unwrap();

    let paths = ConfigPaths { general: Some(general), project: None, user: Some(user.clone()) };
    let mut cat = catalog(Config::load(paths).unwrap());
    assert_eq!(cat.router().get_context(&mine), Context::General);

    let layer = json!({
        "paths": { "user_db_path": tmp.path().join("userdb").to_string_lossy() },
        "directory_tree": { "configured_paths": [mine.to_string_lossy()] },
    });
    fs::write(&user, layer.to_string()).unwrap();
    cat.reload().unwrap();

    assert_eq!(cat.router().get_context(&mine), Context::User);
    let (ctx, store) = cat.stores().store_for_path(&mine).unwrap();
    assert_eq!(ctx, Context::User);
    assert_eq!(store.dir(), tmp.path().join("userdb"));
    assert!(tmp.path().join("userdb").join("stockshot.db").is_file());
}

#[test]
fn test_queue_after_shutdown_fails() {
    let tmp = tempdir();
    let clip = tmp.path().join("clip.mov");
    touch(tmp.path(), &["clip.mov"]);
    let cat = catalog(Config::from_layers(general_layer(tmp.path()), json!({}), json!({})));
    assert!(cat.shutdown());
    let err = cat.queue_thumbnails(vec![MediaEntity::video(&clip)], tmp.path()).unwrap_err();
    assert!(matches!(err, Error::Worker(_)));
}
