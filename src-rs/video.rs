use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::frame::Frame;

const PROBE_TIMEOUT_MS: u64 = 5_000;
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("unable to open {}: {reason}", .path.display())]
    Open { path: PathBuf, reason: String },
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("malformed frame: {width}x{height} with {len} bytes")]
    MalformedFrame { width: u32, height: u32, len: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Yields decoded frames on demand. `Ok(None)` marks the end of the stream.
pub trait VideoSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, VideoError>;
}

/// Opens `path` as an image-sequence directory or, for anything else, as a
/// video file decoded by the system `ffmpeg`.
pub fn open_source(path: &Path) -> Result<Box<dyn VideoSource>, VideoError> {
    if path.is_dir() {
        Ok(Box::new(ImageSequenceSource::open(path)?))
    } else {
        Ok(Box::new(FfmpegSource::open(path)?))
    }
}

/// Checks that `path` can be opened without keeping it open.
pub fn is_valid_video(path: &Path) -> bool {
    if path.is_dir() {
        return ImageSequenceSource::open(path).is_ok();
    }
    path.is_file() && probe_dimensions(path).is_ok()
}

fn open_error(path: &Path, reason: impl Into<String>) -> VideoError {
    VideoError::Open {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Reads the first video stream's dimensions with `ffprobe`.
fn probe_dimensions(path: &Path) -> Result<(u32, u32), VideoError> {
    let mut child = probe_command(path)
        .spawn()
        .map_err(|err| open_error(path, format!("ffprobe unavailable: {err}")))?;

    match child.wait_timeout(Duration::from_millis(PROBE_TIMEOUT_MS)) {
        Ok(Some(_)) => {}
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(open_error(
                path,
                format!("ffprobe timed out after {PROBE_TIMEOUT_MS}ms"),
            ));
        }
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(open_error(path, err.to_string()));
        }
    }

    let output = child
        .wait_with_output()
        .map_err(|err| open_error(path, err.to_string()))?;
    if !output.status.success() {
        return Err(open_error(
            path,
            format!("ffprobe failed with {}", output.status),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_dimensions(&stdout).ok_or_else(|| open_error(path, "no video stream found"))
}

/// Only stdout is piped; it is read after the child exits, so it must stay
/// small. Diagnostics are discarded.
fn probe_command(path: &Path) -> Command {
    let mut cmd = Command::new("ffprobe");
    cmd.args(["-v", "error", "-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height", "-of", "csv=p=0:s=x"])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    cmd
}

/// Rotation metadata is not applied, so decoded frames keep the coded
/// dimensions that `ffprobe` reports.
fn decoder_command(path: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
        .arg(path)
        .args(["-f", "rawvideo", "-pix_fmt", "bgr24", "pipe:1"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    cmd
}

fn parse_dimensions(raw: &str) -> Option<(u32, u32)> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (w, h) = line.split_once('x')?;
    let w = w.trim().parse::<u32>().ok()?;
    let h = h.trim().parse::<u32>().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Streams raw BGR24 frames from an `ffmpeg` child process.
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self, VideoError> {
        if !path.is_file() {
            return Err(open_error(path, "no such file"));
        }
        let (width, height) = probe_dimensions(path)?;
        info!("opened {} ({width}x{height})", path.display());

        let mut child = decoder_command(path)
            .spawn()
            .map_err(|err| open_error(path, format!("ffmpeg unavailable: {err}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| open_error(path, "ffmpeg stdout not captured"))?;

        Ok(Self {
            child,
            stdout,
            width,
            height,
        })
    }
}

impl VideoSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, VideoError> {
        let len = self.width as usize * self.height as usize * 3;
        let mut data = vec![0u8; len];
        match self.stdout.read_exact(&mut data) {
            Ok(()) => Frame::from_bgr(self.width, self.height, data).map(Some),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(VideoError::Io(err)),
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        debug!("ffmpeg decoder released");
    }
}

/// Treats every image file in a directory (sorted by file name) as one frame.
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self, VideoError> {
        let entries = fs::read_dir(dir).map_err(|err| open_error(dir, err.to_string()))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(open_error(dir, "directory contains no image frames"));
        }
        info!("opened {} ({} frames)", dir.display(), files.len());
        Ok(Self { files, next: 0 })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl VideoSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, VideoError> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let image = image::open(path).map_err(|err| {
            warn!("failed to decode {}: {err}", path.display());
            VideoError::Read(format!("{}: {err}", path.display()))
        })?;
        Frame::from_rgb(image.to_rgb8()).map(Some)
    }
}
