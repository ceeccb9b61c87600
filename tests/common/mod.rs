//! Scripted collaborators shared by the integration suites.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};

use delegate::error::{LlmError, SubagentError, ToolError};
use delegate::llm::{ChatRequest, ChatResponse, LlmClient, ToolCall, ToolDefinition};
use delegate::subagent::executor::Executor;
use delegate::subagent::fork::ContextForker;
use delegate::subagent::scope::CancelScope;
use delegate::subagent::types::{
    ResourceLimits, SubagentContext, SubagentResult, SubagentStatus,
};
use delegate::tools::ToolExecutor;

/// Replays canned responses in order; errors once the script runs out.
#[derive(Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    /// Tool names advertised on each request, in call order.
    advertised: Mutex<Vec<Vec<String>>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<ChatResponse, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            advertised: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.advertised.lock().unwrap().len()
    }

    pub fn advertised(&self) -> Vec<Vec<String>> {
        self.advertised.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.advertised
            .lock()
            .unwrap()
            .push(request.tools.into_iter().map(|t| t.name).collect());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Request("script exhausted".to_string())))
    }
}

/// Tools `a`, `b` and `boom`; records every invocation. `boom` always fails.
/// Every invocation sleeps for `delay` first.
#[derive(Default)]
pub struct RecordingTools {
    invoked: Mutex<Vec<String>>,
    delay: Duration,
}

impl RecordingTools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            invoked: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn invoked(&self) -> Vec<String> {
        self.invoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for RecordingTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        ["a", "b", "boom"]
            .into_iter()
            .map(|name| ToolDefinition {
                name: name.to_string(),
                description: format!("test tool {name}"),
                schema: json!({"type": "object", "properties": {}}),
            })
            .collect()
    }

    async fn execute(&self, name: &str, _args: &Map<String, Value>) -> Result<String, ToolError> {
        self.invoked.lock().unwrap().push(name.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match name {
            "a" | "b" => Ok(format!("{name} ok")),
            "boom" => Err(ToolError::Failed {
                tool: name.to_string(),
                message: "exploded".to_string(),
            }),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

/// A response asking for one call to `tool`.
pub fn call(tool: &str, tokens: u64) -> Result<ChatResponse, LlmError> {
    Ok(ChatResponse::tool_use(
        vec![ToolCall::new(format!("call-{tool}"), tool, json!({}))],
        tokens,
    ))
}

pub fn answer(text: &str, tokens: u64) -> Result<ChatResponse, LlmError> {
    Ok(ChatResponse::end_turn(text, tokens))
}

/// Sleeps for `delay`, then reports Complete.
///
/// A cooperative executor also watches its scope and stops early with
/// Cancelled or Timeout; an uncooperative one ignores it entirely.
pub struct SlowExecutor {
    pub delay: Duration,
    pub cooperative: bool,
}

impl SlowExecutor {
    pub fn cooperative(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            cooperative: true,
        })
    }

    pub fn stubborn(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            cooperative: false,
        })
    }
}

#[async_trait]
impl Executor for SlowExecutor {
    async fn execute(
        &self,
        scope: CancelScope,
        context: SubagentContext,
    ) -> Result<SubagentResult, SubagentError> {
        let status = if self.cooperative {
            let deadline = scope
                .deadline()
                .unwrap_or_else(|| tokio::time::Instant::now() + self.delay);
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => SubagentStatus::Complete,
                _ = scope.token().cancelled() => SubagentStatus::Cancelled,
                _ = tokio::time::sleep_until(deadline) => SubagentStatus::Timeout,
            }
        } else {
            tokio::time::sleep(self.delay).await;
            SubagentStatus::Complete
        };

        Ok(SubagentResult {
            status,
            output: "slow work".to_string(),
            completed_at: Some(Utc::now()),
            ..SubagentResult::running(context.id)
        })
    }

    fn cancel(&self, _id: &str) -> Result<(), SubagentError> {
        Ok(())
    }

    fn status(&self, id: &str) -> Result<SubagentStatus, SubagentError> {
        Err(SubagentError::NotFound(id.to_string()))
    }
}

pub fn limits(max_tokens: i64, max_tool_calls: i64, timeout: Duration) -> ResourceLimits {
    ResourceLimits::new(max_tokens, max_tool_calls, timeout)
}

pub fn context_with(allowed: Option<&[String]>, limits: ResourceLimits) -> SubagentContext {
    ContextForker::new()
        .fork("parent-ctx", &[], "test-skill", allowed, limits)
        .unwrap()
}

pub fn context() -> SubagentContext {
    context_with(None, limits(0, 0, Duration::from_secs(30)))
}
