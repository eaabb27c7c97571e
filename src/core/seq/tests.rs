use super::*;

fn detector() -> SequenceDetector {
    SequenceDetector::new(&ScanSettings::default())
}

fn paths(dir: &str, names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(|n| Path::new(dir).join(n)).collect()
}

#[test]
fn test_contiguous_sequence() {
    let names: Vec<String> = (1001..=1010).map(|i| format!("a.{}.exr", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let seqs = detector().detect(&paths("/shots/010", &refs));

    assert_eq!(seqs.len(), 1);
    let seq = &seqs[0];
    assert_eq!(seq.frame_range(), (1001, 1010));
    assert_eq!(seq.len(), 10);
    assert_eq!(seq.name, "a.####.exr");
    assert_eq!(seq.path(), PathBuf::from("/shots/010/a.####.exr"));
    assert!(seq.missed.is_empty());
}

#[test]
fn test_large_gap_rejects_group() {
    let seqs = detector().detect(&paths("/shots/020", &["b.1001.exr", "b.1050.exr"]));
    assert!(seqs.is_empty());
}

#[test]
fn test_gap_at_threshold_is_accepted() {
    // 1001 -> 1012 leaves 10 missing frames, exactly the default limit
    let seqs = detector().detect(&paths("/s", &["c.1001.exr", "c.1012.exr", "c.1013.exr"]));
    assert_eq!(seqs.len(), 1);
    assert_eq!(seqs[0].missed.len(), 10);
    assert_eq!(seqs[0].missed.first(), Some(&1002));
}

#[test]
fn test_files_sorted_by_frame_number() {
    let seqs = detector().detect(&paths("/s", &["a.1003.exr", "a.1001.exr", "a.1002.exr"]));
    let names: Vec<_> = seqs[0].files.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
    assert_eq!(names, ["a.1001.exr", "a.1002.exr", "a.1003.exr"]);
}

#[test]
fn test_grouping_separates_padding_and_extension() {
    let seqs = detector().detect(&paths(
        "/s",
        &["a.1001.exr", "a.1002.exr", "a.01001.exr", "a.01002.exr", "a.1001.png", "a.1002.png"],
    ));
    assert_eq!(seqs.len(), 3);
    let mut names: Vec<_> = seqs.iter().map(|s| s.name.clone()).collect();
    names.sort();
    assert_eq!(names, ["a.#####.exr", "a.####.exr", "a.####.png"]);
}

#[test]
fn test_underscore_pattern() {
    let seqs = detector().detect(&paths("/s", &["plate_0001.dpx", "plate_0002.dpx"]));
    assert_eq!(seqs.len(), 1);
    assert_eq!(seqs[0].name, "plate.####.dpx");
}

#[test]
fn test_first_pattern_wins() {
    // `.v2.` files also match the plain dotted pattern, which comes first
    let seqs = detector().detect(&paths("/s", &["comp.v2.1001.exr", "comp.v2.1002.exr"]));
    assert_eq!(seqs.len(), 1);
    assert_eq!(seqs[0].base, "comp.v2");
    assert_eq!(seqs[0].pattern, DEFAULT_PATTERNS[0]);
}

#[test]
fn test_case_insensitive_match() {
    let seqs = detector().detect(&paths("/s", &["A.1001.EXR", "A.1002.EXR"]));
    assert_eq!(seqs.len(), 1);
    assert_eq!(seqs[0].ext, "EXR");
}

#[test]
fn test_short_frame_tokens_do_not_match() {
    assert!(detector().detect(&paths("/s", &["a.001.exr", "a.002.exr"])).is_empty());
}

#[test]
fn test_min_len_respected() {
    let mut settings = ScanSettings::default();
    settings.min_sequence_length = 3;
    let det = SequenceDetector::new(&settings);
    assert!(det.detect(&paths("/s", &["a.1001.exr", "a.1002.exr"])).is_empty());
}

#[test]
fn test_unsupported_extension_skipped() {
    assert!(detector().detect(&paths("/s", &["a.1001.mov", "a.1002.mov"])).is_empty());
}

#[test]
fn test_custom_pattern() {
    let mut settings = ScanSettings::default();
    settings.custom_patterns = vec![r"(.+)-f(\d+)\.(exr)$".to_string(), r"(broken".to_string()];
    let det = SequenceDetector::new(&settings);
    assert_eq!(det.patterns().len(), DEFAULT_PATTERNS.len() + 1);

    let seqs = det.detect(&paths("/s", &["shot-f1.exr", "shot-f2.exr"]));
    assert_eq!(seqs.len(), 1);
    assert_eq!(seqs[0].name, "shot.#.exr");
}

#[test]
fn test_add_remove_pattern() {
    let mut det = detector();
    det.add_pattern(r"(.+)-(\d+)\.(png)$").unwrap();
    assert!(det.add_pattern(r"(.+)\.png$").is_err());
    assert!(det.remove_pattern(r"(.+)-(\d+)\.(png)$"));
    assert!(!det.remove_pattern(DEFAULT_PATTERNS[0]));
    assert_eq!(det.patterns().len(), DEFAULT_PATTERNS.len());
}

#[test]
fn test_test_pattern() {
    let results = SequenceDetector::test_pattern(DEFAULT_PATTERNS[1], &["plate_0010.exr", "plate.exr"]).unwrap();
    assert!(results[0].matched());
    assert_eq!(results[0].frame, Some(10));
    assert_eq!(results[0].base.as_deref(), Some("plate"));
    assert!(!results[1].matched());
}

#[test]
fn test_max_gap() {
    assert_eq!(max_gap(&[1, 2, 3]), 0);
    assert_eq!(max_gap(&[1, 5, 6]), 3);
    assert_eq!(max_gap(&[7]), 0);
}

#[test]
fn test_display() {
    let seqs = detector().detect(&paths("/s", &["a.1001.exr", "a.1003.exr"]));
    assert_eq!(format!("{}", seqs[0]), "Seq(\"/s/a.####.exr\", range: 1001-1003, missed: 1)");
}
