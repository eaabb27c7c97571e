//! `ffprobe -print_format json` output.

use crate::error::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Facts read from one probe. Anything ffprobe did not report is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProbeInfo {
    /// First entry of `format_name` (`"mov,mp4,..."` → `"mov"`)
    pub format: Option<String>,
    pub duration: Option<f64>,
    pub bitrate: Option<i64>,
    pub file_size: Option<u64>,
    pub codec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
    pub pixel_format: Option<String>,
    pub colorspace: Option<String>,
    pub color_range: Option<String>,
    pub bit_depth: Option<i64>,
    pub frame_count: Option<i64>,
    pub aspect_ratio: Option<f64>,
    pub has_audio: Option<bool>,
    pub audio_codec: Option<String>,
    pub audio_channels: Option<i64>,
    pub audio_sample_rate: Option<i64>,
    /// Container tags (title, artist, date, comment, ...)
    pub tags: BTreeMap<String, String>,
}

fn text(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string).filter(|s| !s.is_empty())
}

/// ffprobe writes most numbers as strings.
fn number(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn integer(v: &Value, key: &str) -> Option<i64> {
    number(v, key).map(|n| n as i64)
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// `"30000/1001"` → 29.97, `"25"` → 25.0. Zero denominators give `None`.
#[must_use]
pub fn parse_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((n, d)) => {
            let (n, d): (f64, f64) = (n.trim().parse().ok()?, d.trim().parse().ok()?);
            (d != 0.0).then(|| round3(n / d))
        }
        None => rate.trim().parse().ok(),
    }
}

/// Bits per channel of common pixel formats.
#[must_use]
pub fn bit_depth_for(pix_fmt: &str) -> Option<i64> {
    match pix_fmt.to_ascii_lowercase().as_str() {
        "yuv420p" | "yuv422p" | "yuv444p" | "rgb24" | "rgba" => Some(8),
        "yuv420p10le" | "yuv422p10le" | "yuv444p10le" => Some(10),
        "yuv420p12le" | "yuv422p12le" | "yuv444p12le" => Some(12),
        "rgb48le" | "rgba64le" => Some(16),
        _ => None,
    }
}

impl ProbeInfo {
    pub fn parse(json: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(json)?;
        let mut info = ProbeInfo::default();

        if let Some(format) = root.get("format") {
            info.format = text(format, "format_name").and_then(|f| f.split(',').next().map(str::to_string));
            info.duration = number(format, "duration").filter(|d| *d > 0.0);
            info.bitrate = integer(format, "bit_rate").filter(|b| *b > 0);
            info.file_size = integer(format, "size").and_then(|s| u64::try_from(s).ok());
            if let Some(tags) = format.get("tags").and_then(Value::as_object) {
                info.tags = tags
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.to_lowercase(), s.to_string())))
                    .collect();
            }
        }

        let streams = root.get("streams").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
        let kind = |s: &&Value| s.get("codec_type").and_then(Value::as_str).map(str::to_string);
        let video = streams.iter().find(|s| kind(s).as_deref() == Some("video")).or_else(|| streams.first());
        let audio = streams.iter().find(|s| kind(s).as_deref() == Some("audio"));

        if let Some(v) = video {
            info.codec = text(v, "codec_name");
            info.width = integer(v, "width").filter(|w| *w > 0);
            info.height = integer(v, "height").filter(|h| *h > 0);
            info.fps = v.get("r_frame_rate").and_then(Value::as_str).and_then(parse_rate).filter(|f| *f > 0.0);
            info.pixel_format = text(v, "pix_fmt");
            info.colorspace = text(v, "color_space");
            info.color_range = text(v, "color_range");
            info.bit_depth = info.pixel_format.as_deref().and_then(bit_depth_for);
        }
        if !streams.is_empty() {
            info.has_audio = Some(audio.is_some());
        }
        if let Some(a) = audio {
            info.audio_codec = text(a, "codec_name");
            info.audio_channels = integer(a, "channels");
            info.audio_sample_rate = integer(a, "sample_rate");
        }

        if let (Some(d), Some(f)) = (info.duration, info.fps) {
            info.frame_count = Some((d * f) as i64);
        }
        if let (Some(w), Some(h)) = (info.width, info.height) {
            info.aspect_ratio = Some(round3(w as f64 / h as f64));
        }
        Ok(info)
    }

    /// Drop the time-based fields, for probes of single frames.
    #[must_use]
    pub fn still(self) -> Self {
        Self {
            duration: None,
            fps: None,
            frame_count: None,
            bitrate: None,
            has_audio: None,
            audio_codec: None,
            audio_channels: None,
            audio_sample_rate: None,
            ..self
        }
    }
}
