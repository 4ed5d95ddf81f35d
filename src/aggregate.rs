use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::encoder::EncodedVideo;
use crate::exercises::{suggest_exercises, Exercise};
use crate::pipeline::FrameRecord;
use crate::risk::JointRisks;

/// Per-joint maximum across `records`. All Low for an empty slice.
pub fn max_risk<'a>(records: impl IntoIterator<Item = &'a FrameRecord>) -> JointRisks {
    records
        .into_iter()
        .fold(JointRisks::default(), |acc, record| acc.merge_max(record.injury_risk))
}

/// Request-level result of one video analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub max_injury_risk: JointRisks,
    pub exercises: Vec<Exercise>,
    pub total_frames: usize,
    pub frame_rate: f64,
    pub output_video_path: PathBuf,
    pub video_exists: bool,
    pub video_size: u64,
    pub codec: String,
    pub frame_data: Vec<FrameRecord>,
}

impl AnalysisSummary {
    /// `video_size` is `None` when the output file could not be found.
    pub fn new(records: Vec<FrameRecord>, frame_rate: f64, encoded: &EncodedVideo, video_size: Option<u64>) -> Self {
        let max_injury_risk = max_risk(&records);
        Self {
            exercises: suggest_exercises(&max_injury_risk),
            max_injury_risk,
            total_frames: records.len(),
            frame_rate,
            output_video_path: encoded.path.clone(),
            video_exists: video_size.is_some(),
            video_size: video_size.unwrap_or(0),
            codec: encoded.codec.clone(),
            frame_data: records,
        }
    }

    /// Multi-line report returned to the model as the video tool output.
    pub fn render_report(&self) -> String {
        let joints: String = self
            .max_injury_risk
            .iter()
            .map(|(joint, level)| format!("- {}: {}\n", joint, level))
            .collect();
        let exercises: String = self
            .exercises
            .iter()
            .map(|e| format!("• {}: {}\n", e.name, e.description))
            .collect();

        format!(
            "\nVideo analysis completed successfully!\n\n\
             Processed {} frames with {:.1} FPS.\n\n\
             Overall Injury Risk Assessment:\n{}\n\
             Recommended Exercises:\n{}\n\
             Annotated video saved at: {}\n\
             Video file exists: {}\n\
             Video file size: {} bytes\n",
            self.total_frames,
            self.frame_rate,
            joints,
            exercises,
            self.output_video_path.display(),
            self.video_exists,
            self.video_size
        )
    }
}

/// Single-slot register holding the most recent [`AnalysisSummary`].
///
/// Clones share the slot. Writers replace the previous entry outright, so
/// two analyses racing on one handle leave whichever finished last.
#[derive(Debug, Clone, Default)]
pub struct AnalysisCache {
    slot: Arc<RwLock<Option<Arc<AnalysisSummary>>>>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, summary: AnalysisSummary) -> Arc<AnalysisSummary> {
        let summary = Arc::new(summary);
        *self.slot.write() = Some(summary.clone());
        debug!("Analysis cache updated: {}", summary.output_video_path.display());
        summary
    }

    pub fn latest(&self) -> Option<Arc<AnalysisSummary>> {
        self.slot.read().clone()
    }
}
