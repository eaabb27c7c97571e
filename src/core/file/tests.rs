use super::*;

fn settings() -> ScanSettings {
    ScanSettings::default()
}

#[test]
fn test_split_name() {
    assert_eq!(split_name("a.1001.EXR"), ("a.1001".to_string(), ".exr".to_string()));
    assert_eq!(split_name("README"), ("README".to_string(), String::new()));
    assert_eq!(split_name(".DS_Store"), (".DS_Store".to_string(), String::new()));
}

#[test]
fn test_classify_kinds() {
    let s = settings();
    assert_eq!(File::new("/shots/a.1001.exr", &s).kind, FileKind::Image);
    assert_eq!(File::new("/shots/plate.TGA", &s).kind, FileKind::Image);
    assert_eq!(File::new("/shots/clip.mov", &s).kind, FileKind::Video);
    assert_eq!(File::new("/shots/notes.pdf", &s).kind, FileKind::Other);
    assert_eq!(File::new("/shots/a.1001.tx", &s).kind, FileKind::Ignored);
}

#[test]
fn test_ignored_names_case_insensitive() {
    let s = settings();
    assert_eq!(File::new("/shots/thumbs.DB", &s).kind, FileKind::Ignored);
    assert_eq!(File::new("/shots/Desktop.ini", &s).kind, FileKind::Ignored);
    assert_eq!(File::new("/shots/.DS_Store", &s).kind, FileKind::Ignored);
}

#[test]
fn test_hidden() {
    let s = settings();
    assert!(File::new("/shots/.a.1001.exr", &s).is_hidden());
    assert!(!File::new("/shots/a.1001.exr", &s).is_hidden());
}

#[test]
fn test_total_size_and_mtime() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.bin");
    let b = dir.path().join("b.bin");
    std::fs::write(&a, [0u8; 10]).unwrap();
    std::fs::write(&b, [0u8; 5]).unwrap();
    let missing = dir.path().join("missing.bin");

    assert_eq!(total_size(&[a.clone(), b.clone(), missing.clone()]), Some(15));
    assert_eq!(total_size(&[missing.clone()]), None);
    let empty = dir.path().join("empty.mov");
    std::fs::write(&empty, b"").unwrap();
    assert_eq!(total_size(&[empty]), Some(0));
    assert!(mtime(&a).is_some());
    assert!(mtime(&missing).is_none());
    assert!(newest_mtime(&[a, b, missing]).is_some());
}
