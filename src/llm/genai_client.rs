//! [`LlmClient`] backed by the `genai` crate.
//!
//! Requests are streamed with content, tool-call and usage capture turned on,
//! the same way the interactive agent loop drives Ollama. Only the captured
//! end-of-stream values are returned; chunks are not surfaced because
//! sub-agents run headless.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use genai::Client;
use genai::chat::{ChatMessage, ChatOptions, ChatStreamEvent, Tool, ToolResponse};

use super::{ChatRequest, ChatResponse, FinishReason, LlmClient, Message, Role, ToolCall, Usage};
use crate::error::LlmError;

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Chat backend for any model name `genai` can resolve (bare names go to Ollama).
pub struct GenaiClient {
    client: Client,
    model: String,
    ollama_url: String,
}

impl GenaiClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::default(),
            model: model.into(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
        }
    }

    /// Override the endpoint probed by [`GenaiClient::check_ready`].
    pub fn with_ollama_url(mut self, url: impl Into<String>) -> Self {
        self.ollama_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Validate that Ollama is running and the configured model is available.
    ///
    /// Step 1: GET the base URL with a 5-second timeout.
    /// Step 2: POST `{base}/api/show` to verify the model exists locally.
    pub async fn check_ready(&self) -> Result<(), LlmError> {
        let http = reqwest::Client::new();
        let base_url = self.ollama_url.trim_end_matches('/');

        http.get(format!("{base_url}/"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| LlmError::Unavailable {
                url: base_url.to_string(),
                message: format!("Is Ollama running? {e}"),
            })?;

        let resp = http
            .post(format!("{base_url}/api/show"))
            .json(&serde_json::json!({ "model": self.model }))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| LlmError::ModelNotAvailable {
                model: self.model.clone(),
                message: format!("Failed to query model info: {e}"),
            })?;

        if !resp.status().is_success() {
            return Err(LlmError::ModelNotAvailable {
                model: self.model.clone(),
                message: format!(
                    "Model not found (HTTP {}). Run `ollama pull {}` to download it.",
                    resp.status(),
                    self.model
                ),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl LlmClient for GenaiClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let messages: Vec<ChatMessage> = request.messages.iter().map(to_chat_message).collect();
        let mut chat_req = genai::chat::ChatRequest::new(messages);
        if !request.tools.is_empty() {
            let tools: Vec<Tool> = request
                .tools
                .iter()
                .map(|def| {
                    Tool::new(def.name.clone())
                        .with_description(def.description.clone())
                        .with_schema(def.schema.clone())
                })
                .collect();
            chat_req = chat_req.with_tools(tools);
        }

        let chat_options = ChatOptions::default()
            .with_capture_content(true)
            .with_capture_tool_calls(true)
            .with_capture_usage(true);

        let stream_res = self
            .client
            .exec_chat_stream(&self.model, chat_req, Some(&chat_options))
            .await
            .map_err(|e| LlmError::Request(format!("LLM stream error: {e}")))?;

        let mut stream = stream_res.stream;
        let mut captured: Option<ChatResponse> = None;
        let mut last_error: Option<String> = None;

        while let Some(event) = stream.next().await {
            match event {
                Ok(ChatStreamEvent::End(end)) => {
                    let content = end
                        .captured_first_text()
                        .map(|text| text.to_string())
                        .unwrap_or_default();
                    let tool_calls: Vec<ToolCall> = end
                        .captured_tool_calls()
                        .map(|calls| {
                            calls
                                .into_iter()
                                .map(|call| {
                                    ToolCall::new(
                                        call.call_id.clone(),
                                        call.fn_name.clone(),
                                        call.fn_arguments.clone(),
                                    )
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    let usage = end
                        .captured_usage
                        .as_ref()
                        .map(|usage| {
                            Usage::new(
                                usage.prompt_tokens.unwrap_or(0).max(0) as u64,
                                usage.completion_tokens.unwrap_or(0).max(0) as u64,
                            )
                        })
                        .unwrap_or_default();
                    let finish_reason = if tool_calls.is_empty() {
                        FinishReason::EndTurn
                    } else {
                        FinishReason::ToolUse
                    };
                    captured = Some(ChatResponse {
                        content,
                        tool_calls,
                        finish_reason,
                        usage,
                    });
                }
                Ok(_) => {
                    // Chunks are folded into the End capture.
                }
                Err(e) => {
                    tracing::warn!(model = %self.model, error = %e, "LLM stream event error");
                    // The End event may still arrive.
                    last_error = Some(e.to_string());
                }
            }
        }

        captured.ok_or_else(|| {
            LlmError::Request(format!(
                "stream ended without a final event{}",
                last_error.map(|e| format!(": {e}")).unwrap_or_default()
            ))
        })
    }
}

/// Convert a provider-neutral turn into a genai message.
fn to_chat_message(msg: &Message) -> ChatMessage {
    match msg.role {
        Role::System => ChatMessage::system(msg.content.clone()),
        Role::User => ChatMessage::user(msg.content.clone()),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let calls: Vec<genai::chat::ToolCall> = msg
                .tool_calls
                .iter()
                .map(|call| genai::chat::ToolCall {
                    call_id: call.id.clone(),
                    fn_name: call.name.clone(),
                    fn_arguments: serde_json::Value::Object(call.arguments.clone()),
                    thought_signatures: None,
                })
                .collect();
            ChatMessage::from(calls)
        }
        Role::Assistant => ChatMessage::assistant(msg.content.clone()),
        Role::Tool => ToolResponse::new(
            msg.tool_call_id.clone().unwrap_or_default(),
            msg.content.clone(),
        )
        .into(),
    }
}
