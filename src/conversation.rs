use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::aggregate::AnalysisSummary;
use crate::model::{ChatMessage, Role};

/// One tool execution kept for the response layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntermediateOutput {
    pub tool: String,
    pub output: String,
}

/// Per-request state threaded through the orchestration loop and dropped
/// when the request ends.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    /// Values produced by tool calls, e.g. `saved_image_paths`
    pub current_variables: BTreeMap<String, Value>,
    pub intermediate_outputs: Vec<IntermediateOutput>,
    pub video_path: Option<PathBuf>,
    pub output_image_paths: Vec<PathBuf>,
    pub output_video_path: Option<PathBuf>,
    /// Summary of the analysis run during this request, if any
    #[serde(skip)]
    pub analysis: Option<Arc<AnalysisSummary>>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_message(message: impl Into<String>, video_path: Option<PathBuf>) -> Self {
        Self {
            messages: vec![ChatMessage::user(message)],
            video_path,
            ..Self::default()
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn last_assistant_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.as_str())
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.current_variables.insert(key.into(), value);
    }

    pub fn record_tool_output(&mut self, tool: &str, output: &str) {
        self.intermediate_outputs.push(IntermediateOutput {
            tool: tool.to_string(),
            output: output.to_string(),
        });
    }

    /// The message list sent to the model: `system_prompt` first when the
    /// history has no system message, and the latest user message suffixed
    /// with the video path when one is known and not already mentioned.
    /// The stored history is left untouched.
    pub fn prepare_model_messages(&self, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if !self.messages.iter().any(|m| m.role == Role::System) {
            messages.push(ChatMessage::system(system_prompt));
        }
        messages.extend(self.messages.iter().cloned());

        if let Some(path) = &self.video_path {
            let path = path.display().to_string();
            if let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == Role::User) {
                if !last_user.content.contains(&path) {
                    last_user.content.push_str(&format!("\nVideo path: {}", path));
                }
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_injected_once() {
        let state = ConversationState::with_user_message("hello", None);
        let messages = state.prepare_model_messages("be helpful");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::system("be helpful"));

        let mut state = ConversationState::new();
        state.push(ChatMessage::system("custom"));
        state.push(ChatMessage::user("hi"));
        let messages = state.prepare_model_messages("be helpful");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "custom");
    }

    #[test]
    fn test_video_hint_goes_on_latest_user_message() {
        let mut state = ConversationState::with_user_message("first", Some(PathBuf::from("uploads/shot.mp4")));
        state.push(ChatMessage::assistant("ok"));
        state.push(ChatMessage::user("analyze my batting"));

        let messages = state.prepare_model_messages("sys");
        assert_eq!(messages[1].content, "first");
        assert_eq!(messages[3].content, "analyze my batting\nVideo path: uploads/shot.mp4");
        // History itself is not rewritten.
        assert_eq!(state.messages[2].content, "analyze my batting");
    }

    #[test]
    fn test_video_hint_skipped_when_already_mentioned() {
        let state = ConversationState::with_user_message(
            "please check uploads/shot.mp4",
            Some(PathBuf::from("uploads/shot.mp4")),
        );
        let messages = state.prepare_model_messages("sys");
        assert_eq!(messages[1].content, "please check uploads/shot.mp4");
    }

    #[test]
    fn test_last_assistant_reply_skips_tool_requests() {
        let mut state = ConversationState::new();
        state.push(ChatMessage::assistant("final answer"));
        state.push(ChatMessage::assistant_with_tools("", vec![]));
        assert_eq!(state.last_assistant_reply(), Some("final answer"));
    }
}
