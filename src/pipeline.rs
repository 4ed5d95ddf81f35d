use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::annotate::FrameAnnotator;
use crate::config::PipelineConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::pose::{PoseDetector, PoseLandmark};
use crate::risk::{BatPositionHistory, JointRisks, RiskAnalysis, RiskAssessor};
use crate::video::{Frame, FrameSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameStatus {
    #[serde(rename = "Analyzed")]
    Analyzed,
    #[serde(rename = "No pose detected")]
    NoPoseDetected,
    #[serde(rename = "Pose detection failed")]
    DetectionFailed,
}

impl FrameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyzed => "Analyzed",
            Self::NoPoseDetected => "No pose detected",
            Self::DetectionFailed => "Pose detection failed",
        }
    }
}

/// Per-frame result. Records are appended in frame order and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame: usize,
    pub injury_risk: JointRisks,
    pub analysis: RiskAnalysis,
    pub status: FrameStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FrameRecord {
    fn analyzed(frame: usize, injury_risk: JointRisks, analysis: RiskAnalysis, error: Option<String>) -> Self {
        Self {
            frame,
            injury_risk,
            analysis,
            status: FrameStatus::Analyzed,
            error,
        }
    }

    fn without_pose(frame: usize, status: FrameStatus, error: Option<String>) -> Self {
        Self {
            frame,
            injury_risk: JointRisks::default(),
            analysis: RiskAnalysis::default(),
            status,
            error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub records: Vec<FrameRecord>,
    /// Annotated frames, one per record
    pub frames: Vec<Frame>,
    pub frame_rate: f64,
    pub bat_positions: BatPositionHistory,
}

impl PipelineOutput {
    pub fn frames_with_pose(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == FrameStatus::Analyzed)
            .count()
    }
}

/// Sequential read, detect, assess, annotate loop over one video.
pub struct FramePipeline {
    detector: Arc<dyn PoseDetector>,
    assessor: RiskAssessor,
    annotator: FrameAnnotator,
    max_frames: usize,
    progress_log_interval: usize,
    cancel: CancellationToken,
}

impl FramePipeline {
    pub fn new(detector: Arc<dyn PoseDetector>, assessor: RiskAssessor, config: &PipelineConfig) -> Self {
        Self {
            detector,
            assessor,
            annotator: FrameAnnotator::default(),
            max_frames: config.max_frames,
            progress_log_interval: config.progress_log_interval.max(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Processes frames until end of stream or the frame cap.
    pub async fn run(&self, source: &mut dyn FrameSource) -> AnalysisResult<PipelineOutput> {
        let frame_rate = source.metadata().frame_rate;
        let started = Instant::now();
        info!("🏏 Starting frame analysis (cap {} frames, {:.2} fps)", self.max_frames, frame_rate);

        let mut records = Vec::new();
        let mut frames = Vec::new();
        let mut bat_positions = BatPositionHistory::new();

        while records.len() < self.max_frames {
            if self.cancel.is_cancelled() {
                warn!("🛑 Frame analysis cancelled after {} frames", records.len());
                return Err(AnalysisError::Cancelled);
            }

            let Some(mut frame) = source.next_frame().await? else {
                break;
            };
            let index = records.len();

            let record = match self.detector.detect(&frame).await {
                Ok(Some(pose)) => {
                    let assessment = self.assessor.assess(&pose, frame_rate, &bat_positions);
                    if let Some(e) = &assessment.error {
                        error!("Frame {}: {}", index, e);
                    }

                    // Recorded after assessment: speed compares the two previous wrists.
                    if let Ok(wrist) = pose.get(PoseLandmark::RightWrist) {
                        bat_positions.push(wrist.to_pixel(frame.width, frame.height));
                    }

                    self.annotator.annotate(&mut frame, &pose, &assessment.risks, index);
                    FrameRecord::analyzed(index, assessment.risks, assessment.analysis, assessment.error)
                }
                Ok(None) => FrameRecord::without_pose(index, FrameStatus::NoPoseDetected, None),
                Err(e) if !e.is_fatal() => {
                    error!("Frame {}: {}", index, e);
                    FrameRecord::without_pose(index, FrameStatus::DetectionFailed, Some(e.to_string()))
                }
                Err(e) => return Err(e),
            };

            records.push(record);
            frames.push(frame);

            if records.len() % self.progress_log_interval == 0 {
                debug!("Processed {} frames", records.len());
            }
        }

        let output = PipelineOutput {
            records,
            frames,
            frame_rate,
            bat_positions,
        };

        info!(
            "✅ Frame analysis complete: {} frames ({} with pose) in {:.2}s",
            output.records.len(),
            output.frames_with_pose(),
            started.elapsed().as_secs_f64()
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{neutral_pose, pose_with, MemoryFrameSource, MockPoseDetector};
    use crate::pose::Landmark;
    use crate::risk::RiskLevel;

    fn pipeline(detector: MockPoseDetector, max_frames: usize) -> FramePipeline {
        let config = PipelineConfig {
            max_frames,
            ..PipelineConfig::default()
        };
        FramePipeline::new(Arc::new(detector), RiskAssessor::default(), &config)
    }

    #[tokio::test]
    async fn test_no_pose_frames_are_low_and_unannotated() {
        let mut source = MemoryFrameSource::solid(5, 16, 16, 30.0);
        let output = pipeline(MockPoseDetector::never(), 100).run(&mut source).await.unwrap();

        assert_eq!(output.records.len(), 5);
        for (i, record) in output.records.iter().enumerate() {
            assert_eq!(record.frame, i);
            assert_eq!(record.status, FrameStatus::NoPoseDetected);
            assert_eq!(record.injury_risk, JointRisks::default());
        }
        assert!(output.frames.iter().all(|f| *f == Frame::filled(16, 16, [40, 40, 40])));
        assert!(output.bat_positions.is_empty());
    }

    #[tokio::test]
    async fn test_frame_cap() {
        let mut source = MemoryFrameSource::solid(30, 8, 8, 25.0);
        let detector = Arc::new(MockPoseDetector::always(neutral_pose()));
        let config = PipelineConfig {
            max_frames: 12,
            ..PipelineConfig::default()
        };
        let output = FramePipeline::new(detector.clone(), RiskAssessor::default(), &config)
            .run(&mut source)
            .await
            .unwrap();
        // Frames past the cap are never sent to the detector.
        assert_eq!(detector.calls(), 12);
        assert_eq!(output.records.len(), 12);
        assert_eq!(output.frames.len(), 12);
        assert_eq!(output.bat_positions.len(), 12);
    }

    #[tokio::test]
    async fn test_wrist_history_drives_swing_speed() {
        // Right wrist jumps 0.5 of a 100px frame between frames 0 and 1.
        let poses = vec![
            Some(pose_with(&[(PoseLandmark::RightWrist, Landmark::new(0.1, 0.5))])),
            Some(pose_with(&[(PoseLandmark::RightWrist, Landmark::new(0.6, 0.5))])),
            Some(neutral_pose()),
        ];
        let mut source = MemoryFrameSource::solid(3, 100, 100, 30.0);
        let output = pipeline(MockPoseDetector::scripted(poses), 100).run(&mut source).await.unwrap();

        // Frames 0 and 1 see fewer than two recorded wrists.
        assert!(output.records[0].analysis.swing_speed.is_none());
        assert!(output.records[1].analysis.swing_speed.is_none());
        assert_eq!(
            output.records[2].analysis.swing_speed.as_deref(),
            Some("Swing speed: 1500.00 units/second")
        );
        assert_eq!(output.records[2].injury_risk.shoulders, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_detector_errors_do_not_stop_the_pipeline() {
        let mut source = MemoryFrameSource::solid(4, 8, 8, 30.0);
        let detector = MockPoseDetector::always(neutral_pose()).failing_on(&[1, 2]);
        let output = pipeline(detector, 100).run(&mut source).await.unwrap();

        assert_eq!(output.records.len(), 4);
        assert_eq!(output.records[1].status, FrameStatus::DetectionFailed);
        assert!(output.records[2].error.as_deref().unwrap().contains("Pose detection failed"));
        assert_eq!(output.records[3].status, FrameStatus::Analyzed);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_frame() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut source = MemoryFrameSource::solid(4, 8, 8, 30.0);
        let err = pipeline(MockPoseDetector::never(), 100)
            .with_cancellation(cancel)
            .run(&mut source)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
    }

    #[test]
    fn test_status_serializes_as_text() {
        assert_eq!(
            serde_json::to_string(&FrameStatus::NoPoseDetected).unwrap(),
            "\"No pose detected\""
        );
    }
}
