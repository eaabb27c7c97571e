use super::*;

const MOV: &str = r#"{
  "streams": [
    { "index": 0, "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
      "r_frame_rate": "24000/1001", "pix_fmt": "yuv420p10le", "color_space": "bt709" },
    { "index": 1, "codec_type": "audio", "codec_name": "aac", "channels": 2, "sample_rate": "48000" }
  ],
  "format": { "format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "10.010000",
              "size": "1048576", "bit_rate": "838860", "tags": { "TITLE": "Plate", "encoder": "Lavf" } }
}"#;

const EXR: &str = r#"{
  "streams": [ { "codec_type": "video", "codec_name": "exr", "width": 2048, "height": 858,
                 "r_frame_rate": "25/1", "pix_fmt": "gbrapf32le" } ],
  "format": { "format_name": "exr_pipe", "duration": "0.040000", "size": "3000000" }
}"#;

#[test]
fn test_parse_video_probe() {
    let info = ProbeInfo::parse(MOV).unwrap();
    assert_eq!(info.format.as_deref(), Some("mov"));
    assert_eq!(info.codec.as_deref(), Some("h264"));
    assert_eq!((info.width, info.height), (Some(1920), Some(1080)));
    assert_eq!(info.fps, Some(23.976));
    assert_eq!(info.bit_depth, Some(10));
    assert_eq!(info.colorspace.as_deref(), Some("bt709"));
    assert_eq!(info.frame_count, Some(239));
    assert_eq!(info.aspect_ratio, Some(1.778));
    assert_eq!(info.bitrate, Some(838_860));
    assert_eq!(info.file_size, Some(1_048_576));
    assert_eq!(info.has_audio, Some(true));
    assert_eq!(info.audio_codec.as_deref(), Some("aac"));
    assert_eq!(info.audio_sample_rate, Some(48_000));
    assert_eq!(info.tags.get("title").map(String::as_str), Some("Plate"));
}

#[test]
fn test_parse_still_probe() {
    let info = ProbeInfo::parse(EXR).unwrap().still();
    assert_eq!(info.format.as_deref(), Some("exr_pipe"));
    assert_eq!(info.bit_depth, None);
    assert_eq!(info.aspect_ratio, Some(2.387));
    assert_eq!(info.duration, None);
    assert_eq!(info.frame_count, None);
    assert_eq!(info.has_audio, None);
}

#[test]
fn test_parse_empty_and_invalid() {
    let info = ProbeInfo::parse("{}").unwrap();
    assert_eq!(info, ProbeInfo::default());
    assert!(matches!(ProbeInfo::parse("not json"), Err(Error::Json(_))));
}

#[test]
fn test_parse_rate() {
    assert_eq!(parse_rate("25/1"), Some(25.0));
    assert_eq!(parse_rate("30000/1001"), Some(29.97));
    assert_eq!(parse_rate("0/0"), None);
    assert_eq!(parse_rate("12.5"), Some(12.5));
    assert_eq!(parse_rate("n/a"), None);
}

#[test]
fn test_bit_depth_map() {
    assert_eq!(bit_depth_for("yuv444p"), Some(8));
    assert_eq!(bit_depth_for("YUV422P12LE"), Some(12));
    assert_eq!(bit_depth_for("rgba64le"), Some(16));
    assert_eq!(bit_depth_for("gray"), None);
}

#[test]
fn test_sample_indices() {
    assert_eq!(sample_indices(3, 25), vec![0, 1, 2]);
    assert_eq!(sample_indices(100, 4), vec![0, 25, 50, 75]);
    assert_eq!(sample_indices(10, 3), vec![0, 3, 6]);
    assert!(sample_indices(0, 5).is_empty());
}

#[test]
fn test_gif_filter_palettes() {
    let standard = gif_filter("fps=10", 128, Palette::Standard);
    assert!(standard.starts_with("fps=10,scale=-1:128:flags=lanczos"));
    assert!(standard.contains("max_colors=128"));
    assert!(standard.ends_with("dither=bayer:bayer_scale=5"));
    let aggressive = gif_filter("fps=10", 128, Palette::Aggressive);
    assert!(aggressive.contains("max_colors=64"));
    assert!(aggressive.ends_with("dither=none"));
}

#[test]
fn test_missing_binary_is_tool_error() {
    let tools = Ffmpeg::new(&ToolSettings {
        ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
        ffprobe: PathBuf::from("/nonexistent/ffprobe"),
        timeout: Duration::from_secs(1),
    });
    assert!(matches!(tools.probe(Path::new("x.mov")), Err(Error::Tool { tool: "ffprobe", .. })));
    let tmp = tempfile::tempdir().unwrap();
    let err = tools.extract_frame(Path::new("x.mov"), &tmp.path().join("x.jpg"), 1.0, 128).unwrap_err();
    assert!(matches!(err, Error::Tool { tool: "ffmpeg", .. }));
}

#[test]
fn test_animate_guards() {
    let tools = Ffmpeg::new(&ToolSettings::default());
    let spec = AnimSpec { frame_count: 25, fps: 10, resolution: 128, palette: Palette::Standard };
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("a.gif");
    assert!(matches!(tools.animate_video(Path::new("x.mov"), &dest, 0.0, &spec), Err(Error::Validation(_))));
    let one = vec![PathBuf::from("f.0001.exr")];
    assert!(matches!(tools.animate_sequence(&one, &dest, &spec), Err(Error::Validation(_))));
}

#[cfg(unix)]
#[test]
fn test_run_timed_collects_output() {
    let out = run_timed("sh", Command::new("sh").args(["-c", "echo hello; echo oops >&2"]), Duration::from_secs(5))
        .unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    assert_eq!(out.stderr_tail(), "oops");
}

#[cfg(unix)]
#[test]
fn test_run_timed_kills_on_timeout() {
    let start = Instant::now();
    let res = run_timed("sh", Command::new("sh").args(["-c", "sleep 5"]), Duration::from_millis(100));
    assert!(matches!(res, Err(Error::ToolTimeout { tool: "sh", .. })));
    assert!(start.elapsed() < Duration::from_secs(4));
}
