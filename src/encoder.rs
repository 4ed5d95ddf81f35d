use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use crate::config::EncoderConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::video::Frame;

/// One codec/container combination in the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecProfile {
    /// Short label used in logs and reports
    pub name: String,
    /// FFmpeg encoder name
    pub codec: String,
    /// Output file extension
    pub container: String,
    /// Extra FFmpeg output arguments
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl CodecProfile {
    pub fn new(name: &str, codec: &str, container: &str, extra_args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            codec: codec.to_string(),
            container: container.to_string(),
            extra_args: extra_args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// H.264/MP4 first, then Xvid/AVI, then Motion-JPEG/AVI.
pub fn default_codec_profiles() -> Vec<CodecProfile> {
    vec![
        CodecProfile::new("h264", "libx264", "mp4", &["-pix_fmt", "yuv420p", "-preset", "veryfast"]),
        CodecProfile::new("xvid", "mpeg4", "avi", &["-vtag", "xvid", "-q:v", "5"]),
        CodecProfile::new("mjpeg", "mjpeg", "avi", &["-q:v", "5"]),
    ]
}

/// An open writer accepting frames in order.
#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: &Frame) -> AnalysisResult<()>;

    /// Flushes and closes the output.
    async fn finish(self: Box<Self>) -> AnalysisResult<()>;
}

/// Opens writers for a given profile. Failing to open is what triggers the
/// next profile in the chain.
#[async_trait]
pub trait WriterBackend: Send + Sync {
    async fn open(
        &self,
        path: &Path,
        profile: &CodecProfile,
        fps: f64,
        width: u32,
        height: u32,
    ) -> AnalysisResult<Box<dyn FrameWriter>>;
}

/// Result of a successful encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedVideo {
    pub path: PathBuf,
    pub codec: String,
    pub frames_written: usize,
    pub fps: f64,
}

/// Writes annotated frames, walking the codec fallback chain on open failure.
#[derive(Clone)]
pub struct VideoEncoder {
    backend: Arc<dyn WriterBackend>,
    profiles: Vec<CodecProfile>,
    min_fps: f64,
}

impl VideoEncoder {
    pub fn new(backend: Arc<dyn WriterBackend>, profiles: Vec<CodecProfile>, min_fps: f64) -> Self {
        Self {
            backend,
            profiles,
            min_fps,
        }
    }

    pub fn ffmpeg(config: &EncoderConfig) -> Self {
        Self::new(Arc::new(FfmpegWriterBackend), config.profiles.clone(), config.min_fps)
    }

    /// The source rate, raised to the configured floor when missing or too low.
    pub fn output_fps(&self, source_fps: f64) -> f64 {
        if source_fps.is_finite() && source_fps > self.min_fps {
            source_fps
        } else {
            self.min_fps
        }
    }

    /// Encodes `frames` to `stem` plus the extension of the first profile
    /// that both opens and finishes. FFmpeg only starts the encoder once the
    /// first frame arrives, so a failed write or a non-zero exit also moves
    /// on to the next profile; its partial output is removed first.
    pub async fn encode(&self, frames: &[Frame], stem: &Path, source_fps: f64) -> AnalysisResult<EncodedVideo> {
        let first = frames
            .first()
            .ok_or_else(|| AnalysisError::encoding("no frames to write"))?;
        let (width, height) = (first.width, first.height);
        if let Some(odd) = frames.iter().find(|f| f.width != width || f.height != height) {
            return Err(AnalysisError::encoding(format!(
                "frame size changed mid-stream ({}x{} -> {}x{})",
                width, height, odd.width, odd.height
            )));
        }
        let fps = self.output_fps(source_fps);

        let mut last_error = None;
        for profile in &self.profiles {
            let path = stem.with_extension(&profile.container);
            let attempt = match self.backend.open(&path, profile, fps, width, height).await {
                Ok(writer) => write_all(writer, frames).await,
                Err(e) => Err(e),
            };

            match attempt {
                Ok(()) => {
                    info!("💾 Video saved successfully: {} ({}, {} frames)", path.display(), profile.name, frames.len());
                    return Ok(EncodedVideo {
                        path,
                        codec: profile.name.clone(),
                        frames_written: frames.len(),
                        fps,
                    });
                }
                Err(e) => {
                    warn!("⚠️ Codec {} failed, trying next fallback: {}", profile.name, e);
                    remove_partial_output(&path).await;
                    last_error = Some(e);
                }
            }
        }

        Err(AnalysisError::encoding(match last_error {
            Some(e) => format!("all codec fallbacks exhausted (last error: {})", e),
            None => "no codec profiles configured".to_string(),
        }))
    }
}

/// Dropping the writer on error kills the encoder process.
async fn write_all(mut writer: Box<dyn FrameWriter>, frames: &[Frame]) -> AnalysisResult<()> {
    for frame in frames {
        writer.write_frame(frame).await?;
    }
    writer.finish().await
}

async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {}", path.display(), e),
    }
}

/// Spawns `ffmpeg` reading rawvideo on stdin.
pub struct FfmpegWriterBackend;

impl FfmpegWriterBackend {
    /// `ffmpeg -h encoder=X` names the encoder only when it is compiled in.
    async fn encoder_available(codec: &str) -> bool {
        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-h", &format!("encoder={}", codec)])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) => String::from_utf8_lossy(&output.stdout).contains(&format!("Encoder {}", codec)),
            Err(e) => {
                debug!("Encoder check for {} failed: {}", codec, e);
                false
            }
        }
    }
}

#[async_trait]
impl WriterBackend for FfmpegWriterBackend {
    async fn open(
        &self,
        path: &Path,
        profile: &CodecProfile,
        fps: f64,
        width: u32,
        height: u32,
    ) -> AnalysisResult<Box<dyn FrameWriter>> {
        which::which("ffmpeg").map_err(|_| AnalysisError::FfmpegNotFound)?;
        if !Self::encoder_available(&profile.codec).await {
            return Err(AnalysisError::encoding(format!("encoder {} not available", profile.codec)));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut child = Command::new("ffmpeg")
            .args(["-y", "-hide_banner", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", width, height)])
            .args(["-r", &format!("{:.3}", fps)])
            .args(["-i", "-", "-an", "-c:v", &profile.codec])
            .args(&profile.extra_args)
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AnalysisError::encoding(format!("Failed to spawn FFmpeg: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AnalysisError::encoding("Failed to capture FFmpeg stdin"))?;

        debug!("Opened {} writer for {}", profile.name, path.display());
        Ok(Box::new(FfmpegFrameWriter {
            child,
            stdin: Some(stdin),
            frame_bytes: Frame::byte_len(width, height),
        }))
    }
}

struct FfmpegFrameWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    frame_bytes: usize,
}

#[async_trait]
impl FrameWriter for FfmpegFrameWriter {
    async fn write_frame(&mut self, frame: &Frame) -> AnalysisResult<()> {
        if frame.data.len() != self.frame_bytes {
            return Err(AnalysisError::encoding("frame buffer does not match writer size"));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AnalysisError::encoding("writer already closed"))?;
        stdin
            .write_all(&frame.data)
            .await
            .map_err(|e| AnalysisError::encoding(format!("FFmpeg rejected frame data: {}", e)))
    }

    async fn finish(mut self: Box<Self>) -> AnalysisResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().await?;
        }

        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            pipe.read_to_string(&mut stderr).await?;
        }

        let status = self.child.wait().await?;
        if !status.success() {
            return Err(AnalysisError::encoding(format!(
                "FFmpeg exited with {:?}: {}",
                status.code(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}
