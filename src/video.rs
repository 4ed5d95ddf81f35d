use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, AnalysisResult};

/// A decoded RGB24 frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub const CHANNELS: usize = 3;

    /// A black frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * Self::CHANNELS],
            width,
            height,
        }
    }

    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut frame = Self::new(width, height);
        for pixel in frame.data.chunks_exact_mut(Self::CHANNELS) {
            pixel.copy_from_slice(&color);
        }
        frame
    }

    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> AnalysisResult<Self> {
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(AnalysisError::ImageOperation(format!(
                "Frame buffer holds {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self { data, width, height })
    }

    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }

    pub fn to_image(&self) -> AnalysisResult<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| AnalysisError::ImageOperation("Failed to create image buffer".to_string()))
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * Self::CHANNELS
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = (y as usize * self.width as usize + x as usize) * Self::CHANNELS;
        Some([self.data[index], self.data[index + 1], self.data[index + 2]])
    }

    /// Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: i64, y: i64, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return;
        }
        let index = (y as usize * self.width as usize + x as usize) * Self::CHANNELS;
        self.data[index..index + Self::CHANNELS].copy_from_slice(&color);
    }
}

/// Stream properties read once before decoding starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    /// Frames per second; 0 when the container does not report one
    pub frame_rate: f64,
    pub frame_count: Option<u64>,
    pub codec: String,
    /// Display rotation in degrees, normalised to 0, 90, 180 or 270.
    /// `width`/`height` already account for it.
    #[serde(default)]
    pub rotation: u32,
}

/// Sequential frame supplier for the analysis pipeline.
#[async_trait]
pub trait FrameSource: Send {
    fn metadata(&self) -> &VideoMetadata;

    /// `Ok(None)` at end of stream.
    async fn next_frame(&mut self) -> AnalysisResult<Option<Frame>>;
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

impl FfprobeStream {
    /// Display-matrix rotation, falling back to the legacy `rotate` tag.
    fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| self.tags.get("rotate").and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0);
        if !degrees.is_finite() {
            return 0;
        }
        // Quarter turns only; FFmpeg's autorotate handles nothing finer.
        let quarter_turns = (degrees / 90.0).round() as i64;
        (quarter_turns.rem_euclid(4) * 90) as u32
    }
}

/// Parses FFprobe rationals like `30000/1001`. `0/0` yields `None`.
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.trim().parse().ok()
}

/// Reads stream metadata with `ffprobe`.
pub async fn read_video_metadata(path: &Path) -> AnalysisResult<VideoMetadata> {
    if !path.exists() {
        return Err(AnalysisError::video_not_found(path));
    }
    which::which("ffprobe").map_err(|_| AnalysisError::FfmpegNotFound)?;

    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-select_streams", "v:0"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(AnalysisError::video_decode(
            path,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    parse_ffprobe_output(path, &output.stdout)
}

/// Builds [`VideoMetadata`] from `ffprobe -show_streams` JSON. FFmpeg
/// autorotates while decoding, so quarter-turn rotations swap the reported
/// dimensions to match the frames the decoder will emit.
pub fn parse_ffprobe_output(path: &Path, json: &[u8]) -> AnalysisResult<VideoMetadata> {
    let parsed: FfprobeOutput = serde_json::from_slice(json)?;
    let stream = parsed
        .streams
        .into_iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| AnalysisError::video_decode(path, "No video stream found"))?;

    let coded_width = stream.width.unwrap_or(0);
    let coded_height = stream.height.unwrap_or(0);
    if coded_width == 0 || coded_height == 0 {
        return Err(AnalysisError::video_decode(path, "Video stream has no dimensions"));
    }

    let rotation = stream.rotation();
    let (width, height) = if rotation % 180 == 90 {
        debug!("Stream rotated {} degrees, decoding as {}x{}", rotation, coded_height, coded_width);
        (coded_height, coded_width)
    } else {
        (coded_width, coded_height)
    };

    let frame_rate = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .filter(|fps| fps.is_finite() && *fps > 0.0)
        .unwrap_or(0.0);

    Ok(VideoMetadata {
        width,
        height,
        frame_rate,
        frame_count: stream.nb_frames.as_deref().and_then(|n| n.parse().ok()),
        codec: stream.codec_name.unwrap_or_default(),
        rotation,
    })
}

/// Decodes a video file to RGB24 frames through an `ffmpeg` child process.
///
/// The child is killed when the reader is dropped, so an early exit from the
/// frame loop still releases the decoder.
pub struct FfmpegFrameReader {
    path: PathBuf,
    metadata: VideoMetadata,
    child: Child,
    stdout: ChildStdout,
    finished: bool,
}

impl FfmpegFrameReader {
    pub async fn open(path: &Path) -> AnalysisResult<Self> {
        let metadata = read_video_metadata(path).await?;
        which::which("ffmpeg").map_err(|_| AnalysisError::FfmpegNotFound)?;

        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-pix_fmt", "rgb24", "-f", "rawvideo", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AnalysisError::video_decode(path, format!("Failed to spawn FFmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AnalysisError::video_decode(path, "Failed to capture FFmpeg stdout"))?;

        info!(
            "🎞️ Opened {} ({}x{} @ {:.2} fps, codec {})",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.frame_rate,
            metadata.codec
        );

        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            child,
            stdout,
            finished: false,
        })
    }

    async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(e) = self.child.kill().await {
            debug!("FFmpeg decoder already exited: {}", e);
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameReader {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    async fn next_frame(&mut self) -> AnalysisResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let mut buffer = vec![0u8; Frame::byte_len(self.metadata.width, self.metadata.height)];
        match self.stdout.read_exact(&mut buffer).await {
            Ok(_) => Frame::from_rgb(self.metadata.width, self.metadata.height, buffer).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.finish().await;
                Ok(None)
            }
            Err(e) => {
                warn!("Decoder read failed for {}: {}", self.path.display(), e);
                self.finish().await;
                Err(AnalysisError::video_decode(&self.path, e.to_string()))
            }
        }
    }
}
