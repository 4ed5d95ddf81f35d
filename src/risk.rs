use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error};

use crate::error::AnalysisResult;
use crate::geometry::{calculate_angle, Point2};
use crate::pose::{Pose, PoseLandmark};

/// Injury-risk severity. The derived order (Low < Moderate < High) is the
/// only one used when risks are compared or combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum RiskLevel {
    #[default]
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Moderate => "Moderate",
            Self::High => "High",
        }
    }

    /// Moderate and High both warrant remedial exercises.
    pub fn is_elevated(self) -> bool {
        self >= Self::Moderate
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Joint {
    Back,
    Knees,
    Shoulders,
}

impl Joint {
    /// Check order used for reports and exercise recommendations.
    pub const ALL: [Joint; 3] = [Joint::Back, Joint::Knees, Joint::Shoulders];

    pub fn label(self) -> &'static str {
        match self {
            Self::Back => "Back",
            Self::Knees => "Knees",
            Self::Shoulders => "Shoulders",
        }
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Risk classification per joint category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JointRisks {
    pub back: RiskLevel,
    pub knees: RiskLevel,
    pub shoulders: RiskLevel,
}

impl JointRisks {
    pub fn get(&self, joint: Joint) -> RiskLevel {
        match joint {
            Joint::Back => self.back,
            Joint::Knees => self.knees,
            Joint::Shoulders => self.shoulders,
        }
    }

    fn slot(&mut self, joint: Joint) -> &mut RiskLevel {
        match joint {
            Joint::Back => &mut self.back,
            Joint::Knees => &mut self.knees,
            Joint::Shoulders => &mut self.shoulders,
        }
    }

    pub fn set(&mut self, joint: Joint, level: RiskLevel) {
        *self.slot(joint) = level;
    }

    /// Raises `joint` to at least `level`; never lowers it.
    pub fn raise(&mut self, joint: Joint, level: RiskLevel) {
        let slot = self.slot(joint);
        *slot = (*slot).max(level);
    }

    /// Per-joint maximum of `self` and `other`.
    pub fn merge_max(self, other: JointRisks) -> JointRisks {
        JointRisks {
            back: self.back.max(other.back),
            knees: self.knees.max(other.knees),
            shoulders: self.shoulders.max(other.shoulders),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Joint, RiskLevel)> + '_ {
        Joint::ALL.into_iter().map(move |joint| (joint, self.get(joint)))
    }
}

/// Angle and swing-speed limits. Defaults mirror the coaching guidance the
/// tool was calibrated against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    /// Spine lean (degrees) above which back risk is High
    pub spine_high: f64,
    /// Spine lean (degrees) above which back risk is Moderate
    pub spine_moderate: f64,
    /// Knee angle (degrees) below which knee risk is High
    pub knee_high: f64,
    /// Knee angle (degrees) below which knee risk is Moderate
    pub knee_moderate: f64,
    /// Shoulder angle (degrees) above which shoulder risk is High
    pub shoulder_high: f64,
    /// Shoulder angle (degrees) above which shoulder risk is Moderate
    pub shoulder_moderate: f64,
    /// Wrist speed (pixels/second) above which shoulder risk is forced High
    pub swing_speed_high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            spine_high: 30.0,
            spine_moderate: 20.0,
            knee_high: 120.0,
            knee_moderate: 140.0,
            shoulder_high: 90.0,
            shoulder_moderate: 70.0,
            swing_speed_high: 50.0,
        }
    }
}

/// Human-readable rationale for one frame's classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knees: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shoulders: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swing_speed: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointAngles {
    pub spine: f64,
    pub left_knee: f64,
    pub shoulder: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risks: JointRisks,
    pub analysis: RiskAnalysis,
    pub angles: Option<JointAngles>,
    pub swing_speed: Option<f64>,
    /// Set when the frame could not be assessed; risks are then all Low.
    pub error: Option<String>,
}

/// Right-wrist positions in pixel space, one per frame with a detected pose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatPositionHistory {
    positions: Vec<Point2>,
}

impl BatPositionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, position: Point2) {
        self.positions.push(position);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Point2] {
        &self.positions
    }

    /// Distance between the two latest positions times the frame rate.
    /// `None` until two positions have been recorded.
    pub fn swing_speed(&self, frame_rate: f64) -> Option<f64> {
        match self.positions.as_slice() {
            [.., previous, latest] => Some(latest.distance(*previous) * frame_rate),
            _ => None,
        }
    }
}

impl FromIterator<Point2> for BatPositionHistory {
    fn from_iter<I: IntoIterator<Item = Point2>>(iter: I) -> Self {
        Self {
            positions: iter.into_iter().collect(),
        }
    }
}

/// The landmarks the rules read, resolved up front so a missing point fails
/// before any joint is classified.
struct Keypoints {
    left_shoulder: Point2,
    left_elbow: Point2,
    left_hip: Point2,
    right_hip: Point2,
    left_knee: Point2,
    left_ankle: Point2,
}

impl Keypoints {
    fn from_pose(pose: &Pose) -> AnalysisResult<Self> {
        Ok(Self {
            left_shoulder: pose.point(PoseLandmark::LeftShoulder)?,
            left_elbow: pose.point(PoseLandmark::LeftElbow)?,
            left_hip: pose.point(PoseLandmark::LeftHip)?,
            right_hip: pose.point(PoseLandmark::RightHip)?,
            left_knee: pose.point(PoseLandmark::LeftKnee)?,
            left_ankle: pose.point(PoseLandmark::LeftAnkle)?,
        })
    }
}

/// Classifies back, knee and shoulder strain from a single pose.
#[derive(Debug, Clone, Default)]
pub struct RiskAssessor {
    thresholds: RiskThresholds,
}

impl RiskAssessor {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    /// Never fails: assessment errors are logged and reported in
    /// [`RiskAssessment::error`] with every joint left at Low.
    pub fn assess(&self, pose: &Pose, frame_rate: f64, history: &BatPositionHistory) -> RiskAssessment {
        match self.try_assess(pose, frame_rate, history) {
            Ok(assessment) => assessment,
            Err(e) => {
                error!("Error in injury risk assessment: {}", e);
                RiskAssessment {
                    error: Some(format!("Error in analysis: {}", e)),
                    ..RiskAssessment::default()
                }
            }
        }
    }

    fn try_assess(&self, pose: &Pose, frame_rate: f64, history: &BatPositionHistory) -> AnalysisResult<RiskAssessment> {
        let points = Keypoints::from_pose(pose)?;
        let mut risks = JointRisks::default();
        let mut analysis = RiskAnalysis::default();

        let hip_mid = Point2::midpoint(points.left_hip, points.right_hip);
        let spine = calculate_angle(points.left_shoulder, hip_mid, points.left_hip);
        let back = self.classify_spine(spine);
        risks.set(Joint::Back, back);
        analysis.back = Some(
            match back {
                RiskLevel::High => "Excessive forward lean detected, increasing spinal strain.",
                RiskLevel::Moderate => "Moderate forward lean; monitor posture.",
                RiskLevel::Low => "Good spinal alignment.",
            }
            .to_string(),
        );

        let left_knee = calculate_angle(points.left_hip, points.left_knee, points.left_ankle);
        let knees = self.classify_knee(left_knee);
        risks.set(Joint::Knees, knees);
        analysis.knees = Some(
            match knees {
                RiskLevel::High => "Excessive knee bend detected, potential for strain.",
                RiskLevel::Moderate => "Moderate knee bend; consider strengthening exercises.",
                RiskLevel::Low => "Good knee alignment.",
            }
            .to_string(),
        );

        let shoulder = calculate_angle(points.left_hip, points.left_shoulder, points.left_elbow);
        let shoulders = self.classify_shoulder(shoulder);
        risks.set(Joint::Shoulders, shoulders);
        let mut shoulder_text = match shoulders {
            RiskLevel::High => "Excessive shoulder rotation detected, risk of strain.",
            RiskLevel::Moderate => "Moderate shoulder rotation; ensure proper warm-up.",
            RiskLevel::Low => "Good shoulder alignment.",
        }
        .to_string();

        let swing_speed = history.swing_speed(frame_rate);
        if let Some(speed) = swing_speed {
            analysis.swing_speed = Some(format!("Swing speed: {:.2} units/second", speed));
            if speed > self.thresholds.swing_speed_high {
                risks.raise(Joint::Shoulders, RiskLevel::High);
                shoulder_text.push_str(" High swing speed increases shoulder strain.");
            }
        }
        analysis.shoulders = Some(shoulder_text);

        debug!(
            "Angles spine={:.1} knee={:.1} shoulder={:.1} -> {:?}",
            spine, left_knee, shoulder, risks
        );

        Ok(RiskAssessment {
            risks,
            analysis,
            angles: Some(JointAngles {
                spine,
                left_knee,
                shoulder,
            }),
            swing_speed,
            error: None,
        })
    }

    pub fn classify_spine(&self, angle: f64) -> RiskLevel {
        if angle > self.thresholds.spine_high {
            RiskLevel::High
        } else if angle > self.thresholds.spine_moderate {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    pub fn classify_knee(&self, angle: f64) -> RiskLevel {
        if angle < self.thresholds.knee_high {
            RiskLevel::High
        } else if angle < self.thresholds.knee_moderate {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    pub fn classify_shoulder(&self, angle: f64) -> RiskLevel {
        if angle > self.thresholds.shoulder_high {
            RiskLevel::High
        } else if angle > self.thresholds.shoulder_moderate {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{neutral_pose, pose_with};
    use crate::pose::Landmark;

    #[test]
    fn test_risk_order_is_severity_not_alphabetical() {
        assert!(RiskLevel::Low < RiskLevel::Moderate);
        assert!(RiskLevel::Moderate < RiskLevel::High);
        // "High" < "Low" < "Moderate" as strings; the enum must disagree.
        assert_eq!(RiskLevel::High.max(RiskLevel::Low), RiskLevel::High);
        assert_eq!(RiskLevel::Moderate.max(RiskLevel::Low), RiskLevel::Moderate);
    }

    #[test]
    fn test_spine_boundaries() {
        let assessor = RiskAssessor::default();
        assert_eq!(assessor.classify_spine(25.0), RiskLevel::Moderate);
        assert_eq!(assessor.classify_spine(20.0), RiskLevel::Low);
        assert_eq!(assessor.classify_spine(30.0), RiskLevel::Moderate);
        assert_eq!(assessor.classify_spine(30.5), RiskLevel::High);
    }

    #[test]
    fn test_knee_and_shoulder_boundaries() {
        let assessor = RiskAssessor::default();
        assert_eq!(assessor.classify_knee(119.9), RiskLevel::High);
        assert_eq!(assessor.classify_knee(120.0), RiskLevel::Moderate);
        assert_eq!(assessor.classify_knee(140.0), RiskLevel::Low);
        assert_eq!(assessor.classify_shoulder(90.0), RiskLevel::Moderate);
        assert_eq!(assessor.classify_shoulder(90.1), RiskLevel::High);
        assert_eq!(assessor.classify_shoulder(70.0), RiskLevel::Low);
    }

    #[test]
    fn test_neutral_pose_is_low_everywhere() {
        let assessment = RiskAssessor::default().assess(&neutral_pose(), 30.0, &BatPositionHistory::new());
        assert_eq!(assessment.risks, JointRisks::default());
        assert_eq!(assessment.analysis.back.as_deref(), Some("Good spinal alignment."));
        assert_eq!(assessment.analysis.knees.as_deref(), Some("Good knee alignment."));
        assert_eq!(assessment.analysis.shoulders.as_deref(), Some("Good shoulder alignment."));
        assert!(assessment.swing_speed.is_none());
        assert!(assessment.analysis.swing_speed.is_none());
        assert!(assessment.error.is_none());
    }

    #[test]
    fn test_forward_lean_is_high_back_risk() {
        // Hips side by side put the shoulder almost perpendicular to the hip line.
        let pose = pose_with(&[(PoseLandmark::RightHip, Landmark::new(0.6, 0.6))]);
        let assessment = RiskAssessor::default().assess(&pose, 30.0, &BatPositionHistory::new());
        assert_eq!(assessment.risks.back, RiskLevel::High);
        assert!(assessment.angles.unwrap().spine > 30.0);
    }

    #[test]
    fn test_deep_knee_bend_is_high_knee_risk() {
        let pose = pose_with(&[(PoseLandmark::LeftAnkle, Landmark::new(0.4, 0.6))]);
        let assessment = RiskAssessor::default().assess(&pose, 30.0, &BatPositionHistory::new());
        assert_eq!(assessment.risks.knees, RiskLevel::High);
        assert_eq!(
            assessment.analysis.knees.as_deref(),
            Some("Excessive knee bend detected, potential for strain.")
        );
    }

    #[test]
    fn test_swing_speed_forces_high_shoulders() {
        let history: BatPositionHistory = vec![Point2::new(0.0, 0.0), Point2::new(3.0, 4.0)].into_iter().collect();
        let assessment = RiskAssessor::default().assess(&neutral_pose(), 30.0, &history);

        let speed = assessment.swing_speed.unwrap();
        assert!((speed - 150.0).abs() < 1e-9);
        assert_eq!(assessment.risks.shoulders, RiskLevel::High);
        assert_eq!(assessment.analysis.swing_speed.as_deref(), Some("Swing speed: 150.00 units/second"));
        assert_eq!(
            assessment.analysis.shoulders.as_deref(),
            Some("Good shoulder alignment. High swing speed increases shoulder strain.")
        );
    }

    #[test]
    fn test_slow_swing_leaves_shoulders_alone() {
        let history: BatPositionHistory = vec![Point2::new(10.0, 10.0), Point2::new(10.0, 11.0)].into_iter().collect();
        let assessment = RiskAssessor::default().assess(&neutral_pose(), 30.0, &history);
        assert_eq!(assessment.swing_speed, Some(30.0));
        assert_eq!(assessment.risks.shoulders, RiskLevel::Low);
    }

    #[test]
    fn test_single_position_has_no_speed() {
        let history: BatPositionHistory = vec![Point2::new(3.0, 4.0)].into_iter().collect();
        assert_eq!(history.swing_speed(30.0), None);
        assert_eq!(BatPositionHistory::new().swing_speed(30.0), None);
    }

    #[test]
    fn test_missing_landmarks_default_to_low_with_error() {
        let pose = Pose::new(vec![Landmark::new(0.5, 0.5); 20]);
        let assessment = RiskAssessor::default().assess(&pose, 30.0, &BatPositionHistory::new());
        assert_eq!(assessment.risks, JointRisks::default());
        let error = assessment.error.unwrap();
        assert!(error.starts_with("Error in analysis:"), "{}", error);
        assert!(error.contains("left_hip"));
    }

    #[test]
    fn test_raise_never_downgrades() {
        let mut risks = JointRisks {
            shoulders: RiskLevel::High,
            ..JointRisks::default()
        };
        risks.raise(Joint::Shoulders, RiskLevel::Moderate);
        assert_eq!(risks.shoulders, RiskLevel::High);
        risks.raise(Joint::Back, RiskLevel::Moderate);
        assert_eq!(risks.back, RiskLevel::Moderate);
    }
}
