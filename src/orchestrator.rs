use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::conversation::ConversationState;
use crate::model::{ChatMessage, ChatModel, ToolCall};
use crate::tools::ToolRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting a tool
    Completed,
    ModelError,
    TurnLimit,
    Cancelled,
}

/// Orchestration loop states.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    AwaitingModel,
    ExecutingTools(Vec<ToolCall>),
    Done(StopReason),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub reply: String,
    /// Model invocations made during the turn
    pub turns: usize,
    pub tool_calls: usize,
    /// Tool calls that reported a failure back to the model
    pub failed_tool_calls: usize,
    /// Completion tokens reported across all model calls
    pub tokens_generated: usize,
    pub model_time: Duration,
    pub tool_time: Duration,
    pub stop_reason: StopReason,
}

pub fn model_error_text(err: &anyhow::Error) -> String {
    format!(
        "I encountered an error while processing your request: {}. Please try again with a different approach.",
        err
    )
}

/// Alternates model calls and tool execution until the model stops asking
/// for tools, the turn limit is hit, or the request is cancelled.
pub struct ToolOrchestrator {
    model: Arc<dyn ChatModel>,
    tools: Arc<dyn ToolRunner>,
    system_prompt: String,
    max_turns: usize,
    cancel: CancellationToken,
}

impl ToolOrchestrator {
    pub fn new(model: Arc<dyn ChatModel>, tools: Arc<dyn ToolRunner>, config: &OrchestratorConfig) -> Self {
        Self {
            model,
            tools,
            system_prompt: config.system_prompt.clone(),
            max_turns: config.max_turns.max(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run_turn(&self, state: &mut ConversationState) -> TurnOutcome {
        let definitions = self.tools.definitions();
        let mut turns = 0;
        let mut tool_calls = 0;
        let mut failed_tool_calls = 0;
        let mut tokens_generated = 0;
        let mut model_time = Duration::ZERO;
        let mut tool_time = Duration::ZERO;
        let mut loop_state = LoopState::AwaitingModel;

        let stop_reason = loop {
            loop_state = match loop_state {
                LoopState::AwaitingModel => {
                    if self.cancel.is_cancelled() {
                        state.push(ChatMessage::assistant("The request was cancelled before it completed."));
                        LoopState::Done(StopReason::Cancelled)
                    } else if turns >= self.max_turns {
                        warn!("⏱️ Turn limit of {} model calls reached", self.max_turns);
                        state.push(ChatMessage::assistant(format!(
                            "I stopped after {} model calls without reaching a final answer. Please narrow the request and try again.",
                            self.max_turns
                        )));
                        LoopState::Done(StopReason::TurnLimit)
                    } else {
                        turns += 1;
                        let messages = state.prepare_model_messages(&self.system_prompt);
                        debug!("🧠 Model call {} with {} messages", turns, messages.len());

                        let completion = tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => None,
                            result = self.model.complete(&messages, &definitions) => Some(result),
                        };

                        if let Some(Ok(response)) = &completion {
                            tokens_generated += response.tokens_generated;
                            model_time += Duration::from_millis(response.processing_time_ms as u64);
                            debug!(
                                "Model call {} finished ({:?}, {} tokens, {}ms)",
                                turns,
                                response.finish_reason.as_deref().unwrap_or("unknown"),
                                response.tokens_generated,
                                response.processing_time_ms
                            );
                        }

                        match completion {
                            None => {
                                warn!("🛑 Model call {} abandoned on cancellation", turns);
                                state.push(ChatMessage::assistant("The request was cancelled before it completed."));
                                LoopState::Done(StopReason::Cancelled)
                            }
                            Some(Ok(response)) if response.requests_tools() => {
                                let calls = response.message.tool_calls.clone();
                                state.push(response.message);
                                LoopState::ExecutingTools(calls)
                            }
                            Some(Ok(response)) => {
                                state.push(response.message);
                                LoopState::Done(StopReason::Completed)
                            }
                            Some(Err(e)) => {
                                error!("LLM call error: {}", e);
                                state.push(ChatMessage::assistant(model_error_text(&e)));
                                LoopState::Done(StopReason::ModelError)
                            }
                        }
                    }
                }
                LoopState::ExecutingTools(calls) => {
                    let mut cancelled = false;
                    for call in &calls {
                        if self.cancel.is_cancelled() {
                            cancelled = true;
                            break;
                        }
                        let result = self.tools.run(call, state).await;
                        tool_calls += 1;
                        tool_time += result.execution_time;
                        if result.success {
                            for effect in &result.side_effects {
                                info!("📎 {}: {}", call.function.name, effect);
                            }
                        } else {
                            failed_tool_calls += 1;
                            warn!("Tool {} reported a failure", call.function.name);
                        }
                        state.push(ChatMessage::tool_result(call, result.message));
                    }

                    if cancelled {
                        state.push(ChatMessage::assistant("The request was cancelled before it completed."));
                        LoopState::Done(StopReason::Cancelled)
                    } else {
                        LoopState::AwaitingModel
                    }
                }
                LoopState::Done(reason) => break reason,
            };
        };

        let reply = state.last_assistant_reply().unwrap_or_default().to_string();
        info!(
            "💬 Turn finished: {:?} after {} model calls ({} tokens, {}ms) and {} tool calls ({} failed, {}ms)",
            stop_reason,
            turns,
            tokens_generated,
            model_time.as_millis(),
            tool_calls,
            failed_tool_calls,
            tool_time.as_millis()
        );

        TurnOutcome {
            reply,
            turns,
            tool_calls,
            failed_tool_calls,
            tokens_generated,
            model_time,
            tool_time,
            stop_reason,
        }
    }
}
