use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{AnalysisCache, AnalysisSummary};
use crate::config::{CrickLensConfig, PipelineConfig};
use crate::encoder::VideoEncoder;
use crate::error::{AnalysisError, AnalysisResult};
use crate::pipeline::FramePipeline;
use crate::pose::{PoseDetector, RemotePoseDetector};
use crate::risk::RiskAssessor;
use crate::video::{FfmpegFrameReader, FrameSource};

/// Runs the full video analysis: decode, per-frame pipeline, encode,
/// aggregate, and publish the summary to the shared cache.
#[derive(Clone)]
pub struct VideoAnalyzer {
    detector: Arc<dyn PoseDetector>,
    assessor: RiskAssessor,
    encoder: VideoEncoder,
    pipeline_config: PipelineConfig,
    cache: AnalysisCache,
    cancel: CancellationToken,
}

impl VideoAnalyzer {
    pub fn new(detector: Arc<dyn PoseDetector>, encoder: VideoEncoder, config: &CrickLensConfig) -> Self {
        Self {
            detector,
            assessor: RiskAssessor::new(config.risk),
            encoder,
            pipeline_config: config.pipeline.clone(),
            cache: AnalysisCache::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// HTTP pose service plus FFmpeg encoder, as configured.
    pub fn from_config(config: &CrickLensConfig) -> AnalysisResult<Self> {
        let detector = RemotePoseDetector::new(config.pose.clone())?;
        Ok(Self::new(Arc::new(detector), VideoEncoder::ffmpeg(&config.encoder), config))
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    pub fn output_dir(&self) -> &Path {
        &self.pipeline_config.output_dir
    }

    pub async fn analyze_path(&self, path: &Path) -> AnalysisResult<Arc<AnalysisSummary>> {
        if !path.exists() {
            return Err(AnalysisError::video_not_found(path));
        }
        info!("🎬 Analyzing video: {}", path.display());
        let mut reader = FfmpegFrameReader::open(path).await?;
        self.analyze_source(&mut reader).await
    }

    pub async fn analyze_source(&self, source: &mut dyn FrameSource) -> AnalysisResult<Arc<AnalysisSummary>> {
        let pipeline = FramePipeline::new(self.detector.clone(), self.assessor.clone(), &self.pipeline_config)
            .with_cancellation(self.cancel.clone());
        let output = pipeline.run(source).await?;

        if output.records.is_empty() {
            return Err(AnalysisError::NoFramesProcessed);
        }

        let stem = self.output_stem();
        let encoded = self.encoder.encode(&output.frames, &stem, output.frame_rate).await?;

        let video_size = match tokio::fs::metadata(&encoded.path).await {
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                warn!("Annotated video missing after encode ({}): {}", encoded.path.display(), e);
                None
            }
        };

        let summary = AnalysisSummary::new(output.records, output.frame_rate, &encoded, video_size);
        info!(
            "📊 Overall risk: back={} knees={} shoulders={}",
            summary.max_injury_risk.back, summary.max_injury_risk.knees, summary.max_injury_risk.shoulders
        );
        Ok(self.cache.store(summary))
    }

    /// `<output_dir>/annotated_<uuid>`; the encoder adds the extension.
    fn output_stem(&self) -> PathBuf {
        self.pipeline_config
            .output_dir
            .join(format!("annotated_{}", Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::default_codec_profiles;
    use crate::mock::{MemoryFrameSource, MemoryWriterBackend, MockPoseDetector};

    fn analyzer(dir: &Path, backend: Arc<MemoryWriterBackend>) -> VideoAnalyzer {
        let mut config = CrickLensConfig::default();
        config.pipeline.output_dir = dir.to_path_buf();
        let encoder = VideoEncoder::new(backend, default_codec_profiles(), config.encoder.min_fps);
        VideoAnalyzer::new(Arc::new(MockPoseDetector::never()), encoder, &config)
    }

    #[tokio::test]
    async fn test_missing_video_is_input_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path(), Arc::new(MemoryWriterBackend::new()));
        let err = analyzer.analyze_path(&dir.path().join("nope.mp4")).await.unwrap_err();
        assert!(matches!(err, AnalysisError::InputNotFound { .. }));
        assert!(analyzer.cache().latest().is_none());
    }

    #[tokio::test]
    async fn test_empty_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path(), Arc::new(MemoryWriterBackend::new()));
        let mut source = MemoryFrameSource::solid(0, 8, 8, 30.0);
        let err = analyzer.analyze_source(&mut source).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoFramesProcessed));
    }

    #[tokio::test]
    async fn test_summary_is_cached_with_output_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryWriterBackend::new().writing_files());
        let analyzer = analyzer(dir.path(), backend);
        let mut source = MemoryFrameSource::solid(6, 8, 8, 0.0);

        let summary = analyzer.analyze_source(&mut source).await.unwrap();
        assert_eq!(summary.total_frames, 6);
        assert!(summary.video_exists);
        assert!(summary.video_size > 0);
        assert_eq!(summary.codec, "h264");

        let name = summary.output_video_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("annotated_") && name.ends_with(".mp4"), "{}", name);
        assert_eq!(analyzer.cache().latest().unwrap().output_video_path, summary.output_video_path);
    }
}
