//! In-memory stand-ins for the external collaborators: pose service, video
//! decoder, FFmpeg writer and chat model. Used by the unit and integration
//! tests and by the benchmark.

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::conversation::ConversationState;
use crate::encoder::{CodecProfile, FrameWriter, WriterBackend};
use crate::error::{AnalysisError, AnalysisResult};
use crate::model::{ChatMessage, ChatModel, ModelResponse, ToolCall, ToolDefinition};
use crate::pose::{Landmark, Pose, PoseDetector, PoseLandmark, LANDMARK_COUNT};
use crate::tools::{tool_definitions, ToolExecutionResult, ToolRunner};
use crate::video::{Frame, FrameSource, VideoMetadata};

/// Upright stance that classifies Low on every joint.
pub fn neutral_pose() -> Pose {
    let mut landmarks = vec![Landmark::new(0.5, 0.5); LANDMARK_COUNT];
    let mut place = |landmark: PoseLandmark, x: f64, y: f64| landmarks[landmark.index()] = Landmark::new(x, y);
    place(PoseLandmark::LeftShoulder, 0.5, 0.3);
    place(PoseLandmark::RightShoulder, 0.52, 0.3);
    place(PoseLandmark::LeftElbow, 0.55, 0.45);
    place(PoseLandmark::LeftWrist, 0.58, 0.55);
    place(PoseLandmark::RightWrist, 0.6, 0.55);
    place(PoseLandmark::LeftHip, 0.5, 0.6);
    place(PoseLandmark::RightHip, 0.5, 0.6);
    place(PoseLandmark::LeftKnee, 0.5, 0.75);
    place(PoseLandmark::LeftAnkle, 0.5, 0.9);
    Pose::new(landmarks)
}

/// [`neutral_pose`] with some landmarks moved.
pub fn pose_with(overrides: &[(PoseLandmark, Landmark)]) -> Pose {
    let mut landmarks = neutral_pose().landmarks().to_vec();
    for (landmark, value) in overrides {
        landmarks[landmark.index()] = *value;
    }
    Pose::new(landmarks)
}

/// Replays a script of detections, one entry per frame, then `fallback`.
pub struct MockPoseDetector {
    script: Vec<Option<Pose>>,
    fallback: Option<Pose>,
    failing: HashSet<usize>,
    calls: AtomicUsize,
}

impl MockPoseDetector {
    pub fn scripted(script: Vec<Option<Pose>>) -> Self {
        Self {
            script,
            fallback: None,
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(pose: Pose) -> Self {
        Self {
            fallback: Some(pose),
            ..Self::scripted(Vec::new())
        }
    }

    pub fn never() -> Self {
        Self::scripted(Vec::new())
    }

    /// Calls with these zero-based indices return a detection error.
    pub fn failing_on(mut self, calls: &[usize]) -> Self {
        self.failing.extend(calls.iter().copied());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoseDetector for MockPoseDetector {
    async fn detect(&self, _frame: &Frame) -> AnalysisResult<Option<Pose>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&call) {
            return Err(AnalysisError::PoseDetection(format!("mock detector failure on call {}", call)));
        }
        Ok(self.script.get(call).cloned().unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Frames served from memory with fixed metadata.
pub struct MemoryFrameSource {
    metadata: VideoMetadata,
    frames: VecDeque<Frame>,
    served: usize,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<Frame>, frame_rate: f64) -> Self {
        let (width, height) = frames.first().map(|f| (f.width, f.height)).unwrap_or((0, 0));
        Self {
            metadata: VideoMetadata {
                width,
                height,
                frame_rate,
                frame_count: Some(frames.len() as u64),
                codec: "rawvideo".to_string(),
                rotation: 0,
            },
            frames: frames.into(),
            served: 0,
        }
    }

    /// `count` grey frames.
    pub fn solid(count: usize, width: u32, height: u32, frame_rate: f64) -> Self {
        Self::new(vec![Frame::filled(width, height, [40, 40, 40]); count], frame_rate)
    }

    pub fn served(&self) -> usize {
        self.served
    }
}

#[async_trait]
impl FrameSource for MemoryFrameSource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    async fn next_frame(&mut self) -> AnalysisResult<Option<Frame>> {
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.served += 1;
        }
        Ok(frame)
    }
}

#[derive(Default)]
struct MemoryWriterState {
    frames: HashMap<PathBuf, usize>,
    opened: Vec<String>,
}

/// Writer backend that counts frames instead of encoding them. Codecs listed
/// as failing refuse to open; codecs listed as breaking open and then reject
/// the first frame, the way FFmpeg reports encoder startup errors.
#[derive(Default)]
pub struct MemoryWriterBackend {
    failing: HashSet<String>,
    breaking: HashSet<String>,
    write_files: bool,
    state: Arc<Mutex<MemoryWriterState>>,
}

impl MemoryWriterBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(codecs: &[&str]) -> Self {
        Self {
            failing: codecs.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn breaking_on_write(codecs: &[&str]) -> Self {
        Self {
            breaking: codecs.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Also creates a placeholder file at the output path when a writer opens.
    pub fn writing_files(mut self) -> Self {
        self.write_files = true;
        self
    }

    pub fn frame_count(&self, path: &Path) -> Option<usize> {
        self.state.lock().frames.get(path).copied()
    }

    /// Encoder names that opened successfully, in order.
    pub fn opened_codecs(&self) -> Vec<String> {
        self.state.lock().opened.clone()
    }
}

#[async_trait]
impl WriterBackend for MemoryWriterBackend {
    async fn open(
        &self,
        path: &Path,
        profile: &CodecProfile,
        _fps: f64,
        width: u32,
        height: u32,
    ) -> AnalysisResult<Box<dyn FrameWriter>> {
        if self.failing.contains(&profile.codec) {
            return Err(AnalysisError::encoding(format!("encoder {} not available", profile.codec)));
        }
        self.state.lock().opened.push(profile.codec.clone());
        if self.write_files {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, b"").await?;
        }
        Ok(Box::new(MemoryFrameWriter {
            path: path.to_path_buf(),
            frame_bytes: Frame::byte_len(width, height),
            written: 0,
            broken: self.breaking.contains(&profile.codec),
            write_files: self.write_files,
            state: self.state.clone(),
        }))
    }
}

struct MemoryFrameWriter {
    path: PathBuf,
    frame_bytes: usize,
    written: usize,
    broken: bool,
    write_files: bool,
    state: Arc<Mutex<MemoryWriterState>>,
}

#[async_trait]
impl FrameWriter for MemoryFrameWriter {
    async fn write_frame(&mut self, frame: &Frame) -> AnalysisResult<()> {
        if self.broken {
            return Err(AnalysisError::encoding("Broken pipe (os error 32)"));
        }
        if frame.data.len() != self.frame_bytes {
            return Err(AnalysisError::encoding("frame buffer does not match writer size"));
        }
        self.written += 1;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> AnalysisResult<()> {
        if self.write_files {
            tokio::fs::write(&self.path, format!("memory video: {} frames\n", self.written)).await?;
        }
        debug!("Memory writer closed {} after {} frames", self.path.display(), self.written);
        self.state.lock().frames.insert(self.path.clone(), self.written);
        Ok(())
    }
}

enum Script {
    Queue(VecDeque<Result<ChatMessage, String>>),
    Repeat(ChatMessage),
}

/// Chat model that replays canned replies and records what it was sent.
pub struct ScriptedChatModel {
    script: Mutex<Script>,
    seen: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    latency: Duration,
}

impl ScriptedChatModel {
    /// `Err` entries simulate a failed model call.
    pub fn new(replies: Vec<Result<ChatMessage, String>>) -> Self {
        Self {
            script: Mutex::new(Script::Queue(replies.into())),
            seen: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
        }
    }

    pub fn repeating(reply: ChatMessage) -> Self {
        Self {
            script: Mutex::new(Script::Repeat(reply)),
            seen: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
        }
    }

    /// Each reply is delayed by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Message lists received so far, one entry per call.
    pub fn seen_messages(&self) -> Arc<Mutex<Vec<Vec<ChatMessage>>>> {
        self.seen.clone()
    }

    /// A reply that calls one tool.
    pub fn tool_request(id: &str, tool: &str, arguments: serde_json::Value) -> Result<ChatMessage, String> {
        Ok(ChatMessage::assistant_with_tools(
            "",
            vec![ToolCall::new(id, tool, arguments.to_string())],
        ))
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn complete(&self, messages: &[ChatMessage], _tools: &[ToolDefinition]) -> anyhow::Result<ModelResponse> {
        self.seen.lock().push(messages.to_vec());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let reply = match &mut *self.script.lock() {
            Script::Queue(queue) => queue.pop_front().unwrap_or_else(|| Err("script exhausted".to_string())),
            Script::Repeat(message) => Ok(message.clone()),
        };
        let message = reply.map_err(|e| anyhow!(e))?;
        Ok(ModelResponse {
            finish_reason: Some(if message.tool_calls.is_empty() { "stop" } else { "tool_calls" }.to_string()),
            tokens_generated: message.content.split_whitespace().count(),
            processing_time_ms: self.latency.as_millis(),
            message,
        })
    }
}

/// Tool runner that answers every call with the same text.
pub struct RecordingToolRunner {
    reply: String,
    calls: Arc<Mutex<usize>>,
}

impl RecordingToolRunner {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<Mutex<usize>> {
        self.calls.clone()
    }
}

#[async_trait]
impl ToolRunner for RecordingToolRunner {
    fn definitions(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    async fn run(&self, call: &ToolCall, state: &mut ConversationState) -> ToolExecutionResult {
        *self.calls.lock() += 1;
        state.record_tool_output(&call.function.name, &self.reply);
        ToolExecutionResult {
            success: true,
            message: self.reply.clone(),
            execution_time: Duration::ZERO,
            side_effects: Vec::new(),
        }
    }
}
