use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::PoseConfig;
use crate::error::{AnalysisError, AnalysisResult};
use crate::geometry::Point2;
use crate::video::Frame;

/// Number of landmarks in the BlazePose topology.
pub const LANDMARK_COUNT: usize = 33;

/// Body keypoints in the order the pose service reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseLandmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl PoseLandmark {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEyeInner => "left_eye_inner",
            Self::LeftEye => "left_eye",
            Self::LeftEyeOuter => "left_eye_outer",
            Self::RightEyeInner => "right_eye_inner",
            Self::RightEye => "right_eye",
            Self::RightEyeOuter => "right_eye_outer",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::MouthLeft => "mouth_left",
            Self::MouthRight => "mouth_right",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftPinky => "left_pinky",
            Self::RightPinky => "right_pinky",
            Self::LeftIndex => "left_index",
            Self::RightIndex => "right_index",
            Self::LeftThumb => "left_thumb",
            Self::RightThumb => "right_thumb",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
            Self::LeftHeel => "left_heel",
            Self::RightHeel => "right_heel",
            Self::LeftFootIndex => "left_foot_index",
            Self::RightFootIndex => "right_foot_index",
        }
    }
}

impl fmt::Display for PoseLandmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Skeleton edges drawn on annotated frames.
pub const POSE_CONNECTIONS: &[(PoseLandmark, PoseLandmark)] = &[
    (PoseLandmark::Nose, PoseLandmark::LeftEye),
    (PoseLandmark::Nose, PoseLandmark::RightEye),
    (PoseLandmark::LeftEye, PoseLandmark::LeftEar),
    (PoseLandmark::RightEye, PoseLandmark::RightEar),
    (PoseLandmark::MouthLeft, PoseLandmark::MouthRight),
    (PoseLandmark::LeftShoulder, PoseLandmark::RightShoulder),
    (PoseLandmark::LeftShoulder, PoseLandmark::LeftElbow),
    (PoseLandmark::LeftElbow, PoseLandmark::LeftWrist),
    (PoseLandmark::RightShoulder, PoseLandmark::RightElbow),
    (PoseLandmark::RightElbow, PoseLandmark::RightWrist),
    (PoseLandmark::LeftWrist, PoseLandmark::LeftIndex),
    (PoseLandmark::RightWrist, PoseLandmark::RightIndex),
    (PoseLandmark::LeftShoulder, PoseLandmark::LeftHip),
    (PoseLandmark::RightShoulder, PoseLandmark::RightHip),
    (PoseLandmark::LeftHip, PoseLandmark::RightHip),
    (PoseLandmark::LeftHip, PoseLandmark::LeftKnee),
    (PoseLandmark::LeftKnee, PoseLandmark::LeftAnkle),
    (PoseLandmark::RightHip, PoseLandmark::RightKnee),
    (PoseLandmark::RightKnee, PoseLandmark::RightAnkle),
    (PoseLandmark::LeftAnkle, PoseLandmark::LeftHeel),
    (PoseLandmark::LeftHeel, PoseLandmark::LeftFootIndex),
    (PoseLandmark::RightAnkle, PoseLandmark::RightHeel),
    (PoseLandmark::RightHeel, PoseLandmark::RightFootIndex),
];

/// A detected keypoint in normalized [0, 1] image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default = "default_visibility")]
    pub visibility: f64,
}

fn default_visibility() -> f64 {
    1.0
}

impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            visibility: 1.0,
        }
    }

    pub fn point(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }

    pub fn to_pixel(&self, width: u32, height: u32) -> Point2 {
        Point2::new(self.x * f64::from(width), self.y * f64::from(height))
    }
}

/// One frame's landmark set. Immutable once detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    landmarks: Vec<Landmark>,
}

impl Pose {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        Self { landmarks }
    }

    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    pub fn get(&self, landmark: PoseLandmark) -> AnalysisResult<&Landmark> {
        self.landmarks
            .get(landmark.index())
            .ok_or(AnalysisError::MissingLandmark(landmark))
    }

    pub fn point(&self, landmark: PoseLandmark) -> AnalysisResult<Point2> {
        self.get(landmark).map(Landmark::point)
    }
}

/// Produces landmarks for a decoded frame. `Ok(None)` means no person was found.
#[async_trait]
pub trait PoseDetector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> AnalysisResult<Option<Pose>>;
}

#[derive(Serialize)]
struct PoseRequest {
    image: String,
    width: u32,
    height: u32,
    min_detection_confidence: f32,
    min_tracking_confidence: f32,
}

#[derive(Deserialize)]
struct PoseResponse {
    #[serde(default)]
    landmarks: Option<Vec<Landmark>>,
}

/// Client for an HTTP pose-estimation service speaking the BlazePose layout.
pub struct RemotePoseDetector {
    config: PoseConfig,
    client: reqwest::Client,
}

impl RemotePoseDetector {
    pub fn new(config: PoseConfig) -> AnalysisResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("CrickLens/0.1")
            .build()
            .map_err(|e| AnalysisError::PoseDetection(format!("Failed to create HTTP client: {}", e)))?;

        info!("🦴 Initialized pose service client for: {}", config.base_url);

        Ok(Self { config, client })
    }

    fn encode_frame(&self, frame: &Frame) -> AnalysisResult<String> {
        let image = frame.to_image()?;
        let mut buffer = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, self.config.jpeg_quality);
        encoder
            .encode_image(&image)
            .map_err(|e| AnalysisError::PoseDetection(format!("Failed to encode frame as JPEG: {}", e)))?;

        Ok(general_purpose::STANDARD.encode(&buffer))
    }
}

#[async_trait]
impl PoseDetector for RemotePoseDetector {
    async fn detect(&self, frame: &Frame) -> AnalysisResult<Option<Pose>> {
        let request = PoseRequest {
            image: self.encode_frame(frame)?,
            width: frame.width,
            height: frame.height,
            min_detection_confidence: self.config.min_detection_confidence,
            min_tracking_confidence: self.config.min_tracking_confidence,
        };

        let url = format!("{}/v1/pose", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::PoseDetection(format!("Failed to reach pose service: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AnalysisError::PoseDetection(format!("Pose service error ({}): {}", status, body)));
        }

        let parsed: PoseResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::PoseDetection(format!("Failed to parse pose response: {}", e)))?;

        match parsed.landmarks {
            Some(landmarks) if !landmarks.is_empty() => {
                debug!("Pose service returned {} landmarks", landmarks.len());
                Ok(Some(Pose::new(landmarks)))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_indices_follow_blazepose() {
        assert_eq!(PoseLandmark::LeftShoulder.index(), 11);
        assert_eq!(PoseLandmark::RightWrist.index(), 16);
        assert_eq!(PoseLandmark::LeftHip.index(), 23);
        assert_eq!(PoseLandmark::RightFootIndex.index(), LANDMARK_COUNT - 1);
    }

    #[test]
    fn test_missing_landmark_is_an_error() {
        let pose = Pose::new(vec![Landmark::new(0.5, 0.5); 12]);
        assert!(pose.point(PoseLandmark::LeftShoulder).is_ok());
        match pose.point(PoseLandmark::LeftHip) {
            Err(AnalysisError::MissingLandmark(PoseLandmark::LeftHip)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_landmark_deserializes_without_optional_fields() {
        let landmark: Landmark = serde_json::from_str(r#"{"x": 0.25, "y": 0.75}"#).unwrap();
        assert_eq!(landmark.point(), Point2::new(0.25, 0.75));
        assert_eq!(landmark.visibility, 1.0);
        assert_eq!(landmark.to_pixel(200, 100), Point2::new(50.0, 75.0));
    }

    #[test]
    fn test_pose_response_without_person() {
        let parsed: PoseResponse = serde_json::from_str(r#"{"landmarks": null}"#).unwrap();
        assert!(parsed.landmarks.is_none());
    }
}
