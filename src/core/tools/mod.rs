//! External media tools: `ffprobe` for metadata, `ffmpeg` for frames.
//!
//! The pipelines only see the [`MediaProbe`] and [`FrameTool`] traits;
//! [`Ffmpeg`] implements both by spawning the binaries with a hard timeout.
//!
//! # Animated previews
//!
//! GIFs are built in one ffmpeg pass: sample frames, scale, composite over
//! black (drops alpha), generate a palette and map onto it. The
//! [`Palette::Aggressive`] variant trades quality for size and is used when
//! the first attempt exceeds the size budget.

mod probe;

pub use probe::{bit_depth_for, parse_rate, ProbeInfo};

use crate::config::ToolSettings;
use crate::error::{Error, Result};
use log::{debug, trace, warn};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Reads technical metadata from a media file.
pub trait MediaProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<ProbeInfo>;
}

/// Renders still and animated thumbnails.
pub trait FrameTool: Send + Sync {
    /// One frame of a video at `at` seconds, scaled to `resolution` rows.
    fn extract_frame(&self, src: &Path, dest: &Path, at: f64, resolution: u32) -> Result<()>;

    /// Still image scaled to `resolution` rows.
    fn image_thumbnail(&self, src: &Path, dest: &Path, resolution: u32) -> Result<()>;

    /// GIF of `spec.frame_count` frames spread over `duration` seconds.
    fn animate_video(&self, src: &Path, dest: &Path, duration: f64, spec: &AnimSpec) -> Result<()>;

    /// GIF from already-sampled sequence frames, in order.
    fn animate_sequence(&self, frames: &[PathBuf], dest: &Path, spec: &AnimSpec) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Palette {
    /// 128 colors, bayer dithering
    Standard,
    /// 64 colors, no dithering
    Aggressive,
}

impl Palette {
    #[must_use]
    pub fn max_colors(self) -> u32 {
        match self {
            Palette::Standard => 128,
            Palette::Aggressive => 64,
        }
    }

    #[must_use]
    pub fn dither(self) -> &'static str {
        match self {
            Palette::Standard => "bayer:bayer_scale=5",
            Palette::Aggressive => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimSpec {
    pub frame_count: usize,
    pub fps: u32,
    pub resolution: u32,
    pub palette: Palette,
}

/// `count` indices spread evenly over `0..len` (all of them when `len`
/// is not larger).
#[must_use]
pub fn sample_indices(len: usize, count: usize) -> Vec<usize> {
    if len <= count {
        return (0..len).collect();
    }
    (0..count).map(|i| i * len / count).collect()
}

/// Finished child process.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ToolOutput {
    /// Last line of stderr, for error messages.
    #[must_use]
    pub fn stderr_tail(&self) -> &str {
        self.stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
    }
}

const POLL: Duration = Duration::from_millis(10);

/// Run `cmd` to completion, killing it once `timeout` elapses.
///
/// Output pipes are drained on helper threads so a chatty child cannot
/// block on a full pipe.
pub fn run_timed(tool: &'static str, cmd: &mut Command, timeout: Duration) -> Result<ToolOutput> {
    trace!("{} {:?}", tool, cmd);
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Tool { tool, message: format!("cannot start {:?}: {}", cmd.get_program(), e) })?;

    let stdout = child.stdout.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });
    let stderr = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                warn!("{} killed after {:?}", tool, timeout);
                return Err(Error::ToolTimeout { tool, timeout });
            }
            Ok(None) => std::thread::sleep(POLL),
            Err(e) => return Err(Error::Tool { tool, message: format!("wait failed: {}", e) }),
        }
    };

    let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
    Ok(ToolOutput { status, stdout, stderr: String::from_utf8_lossy(&stderr).into_owned() })
}

/// `ffmpeg` / `ffprobe` command-line backend.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Duration,
}

impl Ffmpeg {
    pub fn new(settings: &ToolSettings) -> Self {
        Self { ffmpeg: settings.ffmpeg.clone(), ffprobe: settings.ffprobe.clone(), timeout: settings.timeout }
    }

    /// Run ffmpeg and require a non-empty `dest` afterwards.
    fn render(&self, args: &[String], dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let out = run_timed("ffmpeg", Command::new(&self.ffmpeg).args(args).arg("-y").arg(dest), self.timeout)?;
        let written = std::fs::metadata(dest).map(|m| m.len() > 0).unwrap_or(false);
        if out.status.success() && written {
            Ok(())
        } else {
            Err(Error::Tool { tool: "ffmpeg", message: format!("{}: {}", out.status, out.stderr_tail()) })
        }
    }

    fn remove_empty(dest: &Path) {
        if std::fs::metadata(dest).map(|m| m.len() == 0).unwrap_or(false) {
            let _ = std::fs::remove_file(dest);
        }
    }
}

fn scale(resolution: u32) -> String {
    format!("scale=-1:{}:flags=lanczos", resolution)
}

/// Composite over black, then palette-map into a GIF.
fn gif_filter(sampler: &str, resolution: u32, palette: Palette) -> String {
    format!(
        "{},{},split=2[s0][s1];[s0]format=yuv420p,drawbox=c=black:t=fill[bg];\
         [bg][s1]overlay=alpha=straight[comp];[comp]split[s3][s4];\
         [s3]palettegen=max_colors={}:stats_mode=single[p];[s4][p]paletteuse=dither={}",
        sampler,
        scale(resolution),
        palette.max_colors(),
        palette.dither()
    )
}

fn still_over_black(resolution: u32) -> String {
    format!(
        "{},split=2[bg][img];[bg]format=rgb24,drawbox=c=black:t=fill[bg];[bg][img]overlay=alpha=straight",
        scale(resolution)
    )
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl MediaProbe for Ffmpeg {
    fn probe(&self, path: &Path) -> Result<ProbeInfo> {
        let out = run_timed(
            "ffprobe",
            Command::new(&self.ffprobe)
                .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
                .arg(path),
            self.timeout,
        )?;
        if !out.status.success() {
            return Err(Error::Tool { tool: "ffprobe", message: format!("{}: {}", out.status, out.stderr_tail()) });
        }
        ProbeInfo::parse(&String::from_utf8_lossy(&out.stdout))
    }
}

impl FrameTool for Ffmpeg {
    fn extract_frame(&self, src: &Path, dest: &Path, at: f64, resolution: u32) -> Result<()> {
        let a = args(&[
            "-ss",
            &format!("{:.3}", at),
            "-i",
            &src.to_string_lossy(),
            "-vframes",
            "1",
            "-vf",
            &format!("scale=-1:{}", resolution),
            "-q:v",
            "2",
        ]);
        self.render(&a, dest)
    }

    /// Alpha-aware first, then a plain scale, then with the demuxer forced.
    fn image_thumbnail(&self, src: &Path, dest: &Path, resolution: u32) -> Result<()> {
        let s = src.to_string_lossy().into_owned();
        let demuxer = match src.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("png") => "png_pipe",
            _ => "image2",
        };
        let attempts = [
            args(&["-i", &s, "-vf", &still_over_black(resolution), "-frames:v", "1", "-q:v", "2"]),
            args(&["-i", &s, "-vf", &scale(resolution), "-frames:v", "1", "-q:v", "2"]),
            args(&["-f", demuxer, "-i", &s, "-vf", &scale(resolution), "-frames:v", "1", "-q:v", "2"]),
        ];
        let mut last = None;
        for (i, a) in attempts.iter().enumerate() {
            Self::remove_empty(dest);
            match self.render(a, dest) {
                Ok(()) => return Ok(()),
                Err(e @ Error::ToolTimeout { .. }) => return Err(e),
                Err(e) => {
                    debug!("Image thumbnail attempt {} for {} failed: {}", i + 1, s, e);
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or(Error::Tool { tool: "ffmpeg", message: "no attempt made".into() }))
    }

    fn animate_video(&self, src: &Path, dest: &Path, duration: f64, spec: &AnimSpec) -> Result<()> {
        if duration <= 0.0 {
            return Err(Error::Validation(format!("cannot animate {} without a duration", src.display())));
        }
        let sampler = format!("fps=fps={}/{}", spec.frame_count, duration);
        let a = args(&[
            "-i",
            &src.to_string_lossy(),
            "-filter_complex",
            &gif_filter(&sampler, spec.resolution, spec.palette),
            "-r",
            &spec.fps.to_string(),
            "-loop",
            "0",
        ]);
        self.render(&a, dest)
    }

    /// Frames are first scaled into a temporary directory as a contiguous
    /// `frame_%04d.jpg` run, then assembled at `spec.fps`.
    fn animate_sequence(&self, frames: &[PathBuf], dest: &Path, spec: &AnimSpec) -> Result<()> {
        if frames.len() < 2 {
            return Err(Error::Validation("an animated sequence needs at least two frames".into()));
        }
        let staging = tempfile::Builder::new()
            .prefix("stockshot-frames")
            .tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;
        let mut staged = 0usize;
        for frame in frames {
            let out = staging.path().join(format!("frame_{:04}.jpg", staged));
            let a = args(&["-i", &frame.to_string_lossy(), "-vf", &still_over_black(spec.resolution), "-q:v", "2"]);
            match self.render(&a, &out) {
                Ok(()) => staged += 1,
                Err(e) => warn!("Skipping frame {}: {}", frame.display(), e),
            }
        }
        if staged == 0 {
            return Err(Error::Tool { tool: "ffmpeg", message: "no sequence frame could be processed".into() });
        }
        let pattern = staging.path().join("frame_%04d.jpg");
        let a = args(&[
            "-framerate",
            &spec.fps.to_string(),
            "-i",
            &pattern.to_string_lossy(),
            "-filter_complex",
            &gif_filter(&format!("fps={}", spec.fps), spec.resolution, spec.palette),
            "-loop",
            "0",
        ]);
        self.render(&a, dest)
    }
}

#[cfg(test)]
mod tests;
