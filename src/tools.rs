use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::analyzer::VideoAnalyzer;
use crate::conversation::ConversationState;
use crate::error::{AnalysisError, AnalysisResult};
use crate::image_ops::{ImageOperation, ImageProcessor};
use crate::model::{ToolCall, ToolDefinition};

pub const VIDEO_TOOL: &str = "video_pose_estimation_tool";
pub const IMAGE_TOOL: &str = "advanced_image_processor";

fn default_video_operation() -> String {
    "pose_estimation".to_string()
}

fn default_image_operation() -> String {
    "general".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VideoToolArgs {
    #[serde(default)]
    pub video_path: String,
    #[serde(default = "default_video_operation")]
    pub operation_type: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageToolArgs {
    #[serde(default)]
    pub thought: String,
    pub image_path: String,
    #[serde(default = "default_image_operation")]
    pub operation_type: String,
    #[serde(default)]
    pub operations: Vec<ImageOperation>,
}

/// A model tool call decoded into typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    VideoPoseEstimation(VideoToolArgs),
    ImageProcessing(ImageToolArgs),
}

impl ToolInvocation {
    pub fn parse(call: &ToolCall) -> AnalysisResult<Self> {
        let raw = call.function.arguments.trim();
        let raw = if raw.is_empty() { "{}" } else { raw };
        let invalid = |e: serde_json::Error| AnalysisError::ToolArguments(format!("{}: {}", call.function.name, e));

        match call.function.name.as_str() {
            VIDEO_TOOL => serde_json::from_str(raw).map(Self::VideoPoseEstimation).map_err(invalid),
            IMAGE_TOOL => serde_json::from_str(raw).map(Self::ImageProcessing).map_err(invalid),
            other => Err(AnalysisError::ToolArguments(format!("Unknown tool: {}", other))),
        }
    }
}

/// Schemas advertised to the model.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            VIDEO_TOOL,
            "Process a cricket batting video for pose estimation and biomechanical analysis. \
             Returns per-joint injury risk (back, knees, shoulders), swing speed findings, \
             recommended exercises and the path of an annotated video.",
            json!({
                "type": "object",
                "properties": {
                    "video_path": {"type": "string", "description": "Path to the uploaded video"},
                    "operation_type": {"type": "string", "default": "pose_estimation"}
                },
                "required": ["video_path"]
            }),
        ),
        ToolDefinition::function(
            IMAGE_TOOL,
            "Apply a sequence of image operations to an image and save the result as PNG. \
             Reports output size, mean brightness and edge density.",
            json!({
                "type": "object",
                "properties": {
                    "thought": {"type": "string", "description": "Why these operations are being applied"},
                    "image_path": {"type": "string"},
                    "operation_type": {"type": "string", "default": "general"},
                    "operations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "operation": {
                                    "type": "string",
                                    "enum": [
                                        "grayscale", "gaussian_blur", "edge_detect", "threshold",
                                        "dilate", "erode", "morph_open", "morph_close", "invert", "resize"
                                    ]
                                },
                                "sigma": {"type": "number"},
                                "threshold": {"type": "number"},
                                "level": {"type": "integer", "minimum": 0, "maximum": 255},
                                "radius": {"type": "integer", "minimum": 1},
                                "width": {"type": "integer", "minimum": 1},
                                "height": {"type": "integer", "minimum": 1}
                            },
                            "required": ["operation"]
                        }
                    }
                },
                "required": ["thought", "image_path", "operations"]
            }),
        ),
    ]
}

#[derive(Debug, Clone)]
pub struct ToolExecutionResult {
    pub success: bool,
    /// Text handed back to the model as the tool message
    pub message: String,
    pub execution_time: Duration,
    pub side_effects: Vec<String>,
}

/// Executes model tool calls against the conversation state. Failures are
/// reported in the returned text, never as errors.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn run(&self, call: &ToolCall, state: &mut ConversationState) -> ToolExecutionResult;
}

/// Human-readable text for a failed video analysis.
pub fn video_error_text(err: &AnalysisError) -> String {
    match err {
        AnalysisError::InputNotFound { .. } => format!("Error: {}", err),
        AnalysisError::DecodeFailure { path, .. } => format!("Error: Could not open video at {}", path.display()),
        AnalysisError::EncodingFailure(_) => "Error: Could not create output video file".to_string(),
        AnalysisError::NoFramesProcessed => format!("Error: {}", err),
        other => format!("Error processing video: {}", other),
    }
}

pub fn image_success_text(thought: &str, output: &str) -> String {
    format!("Image processing completed.\nThought: {}\nOutput: {}", thought, output)
}

pub fn image_failure_text(thought: &str, err: &AnalysisError) -> String {
    format!("Image processing failed.\nThought: {}\nError: Error: {}", thought, err)
}

pub struct ToolExecutor {
    analyzer: VideoAnalyzer,
    images: ImageProcessor,
}

impl ToolExecutor {
    pub fn new(analyzer: VideoAnalyzer) -> Self {
        let images = ImageProcessor::new(analyzer.output_dir());
        Self { analyzer, images }
    }

    pub fn analyzer(&self) -> &VideoAnalyzer {
        &self.analyzer
    }

    async fn run_video(&self, args: VideoToolArgs, state: &mut ConversationState) -> (bool, String, Vec<String>) {
        let path = if args.video_path.trim().is_empty() {
            state.video_path.clone().unwrap_or_default()
        } else {
            PathBuf::from(args.video_path.trim())
        };
        debug!("Processing video at path: {} ({})", path.display(), args.operation_type);

        if path.as_os_str().is_empty() {
            return (false, "Error: No video path was provided.".to_string(), Vec::new());
        }

        match self.analyzer.analyze_path(&path).await {
            Ok(summary) => {
                let report = summary.render_report();
                let output = summary.output_video_path.clone();
                state.output_video_path = Some(output.clone());
                state.set_variable("output_video_path", json!(output.display().to_string()));
                state.analysis = Some(summary);
                (true, report, vec![format!("wrote {}", output.display())])
            }
            Err(e) => {
                error!("Video processing error: {}", e);
                (false, video_error_text(&e), Vec::new())
            }
        }
    }

    async fn run_image(&self, args: ImageToolArgs, state: &mut ConversationState) -> (bool, String, Vec<String>) {
        debug!("Processing image at path: {} ({})", args.image_path, args.operation_type);

        match self.images.process(Path::new(&args.image_path), &args.operations).await {
            Ok(processed) => {
                let saved = processed.output_path.display().to_string();
                state.output_image_paths.push(processed.output_path.clone());
                state.set_variable("saved_image_paths", json!([saved.clone()]));
                let message = image_success_text(&args.thought, &processed.render());
                (true, message, vec![format!("wrote {}", saved)])
            }
            Err(e) => {
                error!("Image processing error: {}", e);
                let message = image_failure_text(&args.thought, &e);
                (false, message, Vec::new())
            }
        }
    }
}

#[async_trait]
impl ToolRunner for ToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    async fn run(&self, call: &ToolCall, state: &mut ConversationState) -> ToolExecutionResult {
        let start_time = Instant::now();
        info!("🔧 Executing tool: {}", call.function.name);

        let (success, message, side_effects) = match ToolInvocation::parse(call) {
            Ok(ToolInvocation::VideoPoseEstimation(args)) => self.run_video(args, state).await,
            Ok(ToolInvocation::ImageProcessing(args)) => self.run_image(args, state).await,
            Err(e) => {
                error!("Rejected tool call {}: {}", call.id, e);
                (false, format!("Error: {}", e), Vec::new())
            }
        };

        state.record_tool_output(&call.function.name, &message);
        let execution_time = start_time.elapsed();
        debug!(
            "Tool {} finished in {}ms (success: {})",
            call.function.name,
            execution_time.as_millis(),
            success
        );

        ToolExecutionResult {
            success,
            message,
            execution_time,
            side_effects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrickLensConfig;
    use crate::encoder::{default_codec_profiles, VideoEncoder};
    use crate::mock::{MemoryWriterBackend, MockPoseDetector};
    use serde_json::Value;
    use std::sync::Arc;

    fn schema_operation_names(definitions: &[ToolDefinition]) -> Vec<String> {
        definitions
            .iter()
            .find(|d| d.function.name == IMAGE_TOOL)
            .and_then(|d| d.function.parameters.pointer("/properties/operations/items/properties/operation/enum"))
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(|n| n.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    fn executor(dir: &Path) -> ToolExecutor {
        let mut config = CrickLensConfig::default();
        config.pipeline.output_dir = dir.to_path_buf();
        let encoder = VideoEncoder::new(Arc::new(MemoryWriterBackend::new()), default_codec_profiles(), 10.0);
        ToolExecutor::new(VideoAnalyzer::new(Arc::new(MockPoseDetector::never()), encoder, &config))
    }

    #[test]
    fn test_parse_video_call_with_defaults() {
        let call = ToolCall::new("c1", VIDEO_TOOL, r#"{"video_path": "uploads/a.mp4"}"#);
        match ToolInvocation::parse(&call).unwrap() {
            ToolInvocation::VideoPoseEstimation(args) => {
                assert_eq!(args.video_path, "uploads/a.mp4");
                assert_eq!(args.operation_type, "pose_estimation");
            }
            other => panic!("unexpected invocation: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_tool_and_bad_json() {
        assert!(ToolInvocation::parse(&ToolCall::new("c", "python_exec", "{}")).is_err());
        assert!(ToolInvocation::parse(&ToolCall::new("c", IMAGE_TOOL, "{not json")).is_err());
    }

    #[test]
    fn test_schema_lists_every_operation() {
        let names = schema_operation_names(&tool_definitions());
        assert_eq!(names.len(), 10);
        for name in &names {
            let op: ImageOperation = match name.as_str() {
                "gaussian_blur" => serde_json::from_value(json!({"operation": name, "sigma": 1.0})).unwrap(),
                "threshold" => serde_json::from_value(json!({"operation": name, "level": 10})).unwrap(),
                "dilate" | "erode" | "morph_open" | "morph_close" => {
                    serde_json::from_value(json!({"operation": name, "radius": 1})).unwrap()
                }
                "resize" => serde_json::from_value(json!({"operation": name, "width": 2, "height": 2})).unwrap(),
                _ => serde_json::from_value(json!({"operation": name})).unwrap(),
            };
            assert_eq!(op.name(), name);
        }
    }

    #[test]
    fn test_video_error_texts() {
        assert_eq!(
            video_error_text(&AnalysisError::video_not_found("x.mp4")),
            "Error: Video not found at x.mp4"
        );
        assert_eq!(
            video_error_text(&AnalysisError::video_decode("x.mp4", "moov atom not found")),
            "Error: Could not open video at x.mp4"
        );
        assert_eq!(
            video_error_text(&AnalysisError::encoding("nope")),
            "Error: Could not create output video file"
        );
        assert_eq!(
            video_error_text(&AnalysisError::NoFramesProcessed),
            "Error: No frames could be processed from the video."
        );
        assert!(video_error_text(&AnalysisError::FfmpegNotFound).starts_with("Error processing video: "));
    }

    #[tokio::test]
    async fn test_missing_video_becomes_tool_text() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path());
        let mut state = ConversationState::new();
        let call = ToolCall::new("c1", VIDEO_TOOL, r#"{"video_path": "/nope/clip.mp4"}"#);

        let result = executor.run(&call, &mut state).await;
        assert!(!result.success);
        assert_eq!(result.message, "Error: Video not found at /nope/clip.mp4");
        assert_eq!(state.intermediate_outputs.len(), 1);
        assert!(state.analysis.is_none());
    }

    #[tokio::test]
    async fn test_image_tool_records_saved_paths() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("pitch.png");
        image::RgbImage::from_pixel(6, 6, image::Rgb([200, 10, 10])).save(&input).unwrap();

        let executor = executor(dir.path());
        let mut state = ConversationState::new();
        let args = json!({
            "thought": "check edges",
            "image_path": input.display().to_string(),
            "operations": [{"operation": "grayscale"}, {"operation": "edge_detect", "threshold": 10.0}]
        });
        let call = ToolCall::new("c2", IMAGE_TOOL, args.to_string());

        let result = executor.run(&call, &mut state).await;
        assert!(result.success, "{}", result.message);
        assert!(result.message.starts_with("Image processing completed.\nThought: check edges\nOutput: "));
        assert_eq!(state.output_image_paths.len(), 1);
        assert!(state.output_image_paths[0].exists());
        assert_eq!(state.current_variables["saved_image_paths"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_image_tool_failure_text() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path());
        let mut state = ConversationState::new();
        let call = ToolCall::new(
            "c3",
            IMAGE_TOOL,
            r#"{"thought": "t", "image_path": "/no/img.png", "operations": []}"#,
        );

        let result = executor.run(&call, &mut state).await;
        assert!(!result.success);
        assert_eq!(
            result.message,
            "Image processing failed.\nThought: t\nError: Error: Image not found at /no/img.png"
        );
    }
}
