use super::*;
use serde_json::json;

#[test]
fn test_defaults_lookup() {
    let config = Config::builtin();
    assert_eq!(config.get_or("thumbnails.default_resolution", 0u32), 128);
    assert_eq!(config.get_or("thumbnails.animated.frame_count", 0usize), 25);
    assert!(config.get("no.such.key").is_none());
    assert_eq!(config.get_or("no.such.key", 7), 7);
}

#[test]
fn test_layer_precedence() {
    let general = json!({"thumbnails": {"default_resolution": 256, "max_cache_size_mb": 10}});
    let project = json!({"thumbnails": {"default_resolution": 512}});
    let user = json!({"thumbnails": {"animated": {"fps": 5}}});
    let config = Config::from_layers(general, project, user);

    assert_eq!(config.get_or("thumbnails.default_resolution", 0u32), 512);
    assert_eq!(config.get_or("thumbnails.max_cache_size_mb", 0u64), 10);
    assert_eq!(config.get_or("thumbnails.animated.fps", 0u32), 5);
    // sibling keys of a merged object survive
    assert_eq!(config.get_or("thumbnails.animated.frame_count", 0usize), 25);
}

#[test]
fn test_deep_merge_replaces_non_objects() {
    let mut base = json!({"a": {"b": [1, 2], "c": 1}});
    deep_merge(&mut base, &json!({"a": {"b": [3]}}));
    assert_eq!(base, json!({"a": {"b": [3], "c": 1}}));
}

#[test]
fn test_wrong_type_falls_back() {
    let config = Config::from_layers(json!({"ui": {"show_hidden_files": "yes"}}), Value::Null, Value::Null);
    assert!(!config.get_or("ui.show_hidden_files", false));
}

#[test]
fn test_set_overrides_user_layer() {
    let mut config = Config::builtin();
    config.set("directory_tree.configured_paths", json!(["/home/alice/edits"]));
    assert_eq!(
        lookup(config.user_layer(), "directory_tree.configured_paths"),
        Some(&json!(["/home/alice/edits"]))
    );
    assert_eq!(config.get_or::<Vec<String>>("directory_tree.configured_paths", vec![]).len(), 1);
}

#[test]
fn test_load_and_reload_files() {
    let dir = tempfile::tempdir().unwrap();
    let user = dir.path().join("user.json");
    std::fs::write(&user, r#"{"thumbnails": {"default_resolution": 64}}"#).unwrap();

    let mut config = Config::load(ConfigPaths { user: Some(user.clone()), ..Default::default() }).unwrap();
    assert_eq!(config.get_or("thumbnails.default_resolution", 0u32), 64);

    std::fs::write(&user, r#"{"thumbnails": {"default_resolution": 96}}"#).unwrap();
    config.reload().unwrap();
    assert_eq!(config.get_or("thumbnails.default_resolution", 0u32), 96);
}

#[test]
fn test_missing_file_is_empty_layer() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ConfigPaths { general: Some(dir.path().join("absent.json")), ..Default::default() };
    let config = Config::load(paths).unwrap();
    assert_eq!(config.get_or("sequence_detection.max_gap_frames", 0i64), 10);
}

#[test]
fn test_invalid_json_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = Config::load(ConfigPaths { project: Some(path), ..Default::default() }).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_scan_settings_normalize_extensions() {
    let config = Config::from_layers(
        json!({"sequence_detection": {"supported_extensions": ["EXR", ".Png", " "]}}),
        Value::Null,
        Value::Null,
    );
    let scan = ScanSettings::from_config(&config);
    assert!(scan.image_extensions.contains(".exr"));
    assert!(scan.image_extensions.contains(".png"));
    assert_eq!(scan.image_extensions.len(), 2);
    assert!(scan.ignored_filenames.contains("thumbs.db"));
}

#[test]
fn test_thumbnail_resolution_clamped() {
    let config = Config::from_layers(json!({"thumbnails": {"default_resolution": 4096}}), Value::Null, Value::Null);
    assert_eq!(ThumbnailSettings::from_config(&config).resolution, 1024);
}
