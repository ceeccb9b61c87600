//! Bounded LLM + tools loop for a single sub-agent.
//!
//! [`SubagentExecutor::execute`] drives one [`SubagentContext`] to a terminal
//! [`SubagentResult`]. Business failures (LLM errors, tool errors, budget
//! overruns, cancellation) are encoded in the result's status; only a
//! malformed context or a duplicate in-flight ID produce an `Err`.
//!
//! Per iteration:
//! 1. cancelled -> Cancelled; deadline passed or a budget exceeded -> Timeout
//! 2. one LLM call with the accumulated conversation
//! 3. token budget checked after the call (cost is unknown beforehand)
//! 4. final answer -> Complete, otherwise run the requested tools in order,
//!    checking the tool-call budget and allowlist *before* each invocation
//! 5. budgets re-checked after the tool batch
//!
//! Cancellation is cooperative: an in-flight LLM or tool call is never
//! interrupted, the signal is observed at the next loop boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::lock;
use super::scope::CancelScope;
use super::types::{
    LimitViolation, SubagentContext, SubagentId, SubagentResult, SubagentStatus,
    SubagentStepResult,
};
use crate::error::SubagentError;
use crate::llm::{ChatRequest, LlmClient, Message, ToolDefinition};
use crate::tools::{ToolExecutor, is_tool_allowed};

/// Hard ceiling on loop iterations, independent of any resource budget.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// Anything the [`super::lifecycle::LifecycleManager`] can supervise.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `context` to a terminal result under `scope`.
    async fn execute(
        &self,
        scope: CancelScope,
        context: SubagentContext,
    ) -> Result<SubagentResult, SubagentError>;

    /// Signal an in-flight run to stop at its next loop boundary.
    fn cancel(&self, id: &str) -> Result<(), SubagentError>;

    /// Status of an in-flight run. Runs that have returned are not tracked here.
    fn status(&self, id: &str) -> Result<SubagentStatus, SubagentError>;
}

/// The production [`Executor`]: LLM collaborator + tool collaborator.
#[derive(Clone)]
pub struct SubagentExecutor {
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolExecutor>,
    max_iterations: u32,
    in_flight: Arc<Mutex<HashMap<SubagentId, CancellationToken>>>,
}

impl SubagentExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            llm,
            tools,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Override the hard iteration ceiling (minimum 1).
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Register `id` as in flight; the returned guard unregisters it on drop.
    fn track(
        &self,
        id: &SubagentId,
        token: CancellationToken,
    ) -> Result<InFlightGuard, SubagentError> {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.contains_key(id) {
            return Err(SubagentError::AlreadyTracked(id.clone()));
        }
        in_flight.insert(id.clone(), token);
        Ok(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            id: id.clone(),
        })
    }

    /// Tool schemas the context's allowlist lets the model see.
    fn advertised_tools(&self, context: &SubagentContext) -> Vec<ToolDefinition> {
        self.tools
            .definitions()
            .into_iter()
            .filter(|def| is_tool_allowed(context.allowed_tools.as_deref(), &def.name))
            .collect()
    }

    async fn drive(
        &self,
        scope: &CancelScope,
        context: &SubagentContext,
        run: &mut RunState,
    ) -> Finish {
        let limits = context.resource_limits;
        let tools = self.advertised_tools(context);

        for iteration in 1..=self.max_iterations {
            if scope.is_cancelled() {
                return Finish::failed(SubagentStatus::Cancelled, "sub-agent cancelled");
            }
            if scope.is_expired() {
                return Finish::failed(
                    SubagentStatus::Timeout,
                    format!("deadline exceeded after {:?}", run.elapsed()),
                );
            }
            if let Err(violation) = limits.check(run.tokens_used, run.tool_calls_made, run.elapsed())
            {
                return Finish::failed(SubagentStatus::Timeout, violation.to_string());
            }

            let request = ChatRequest {
                messages: run.conversation.clone(),
                tools: tools.clone(),
            };
            let call_started = Instant::now();
            let response = match self.llm.chat(request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(id = %context.id, iteration, error = %e, "LLM call failed");
                    return Finish::failed(SubagentStatus::Error, format!("LLM call failed: {e}"));
                }
            };

            let step_tokens = response.usage.total_tokens;
            run.tokens_used = run.tokens_used.saturating_add(step_tokens);
            if let Some(limit) = limits.token_limit().filter(|limit| run.tokens_used > *limit) {
                let violation = LimitViolation::Tokens {
                    used: run.tokens_used,
                    limit,
                };
                return Finish::failed(SubagentStatus::Error, violation.to_string());
            }

            run.conversation.push(Message::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            run.steps.push(SubagentStepResult {
                step_number: iteration,
                action: format!(
                    "{}: {} tool call(s)",
                    response.finish_reason,
                    response.tool_calls.len()
                ),
                result: response.content.clone(),
                tokens_used: step_tokens,
                duration: call_started.elapsed(),
            });
            tracing::debug!(
                id = %context.id,
                step = iteration,
                tokens = step_tokens,
                tool_calls = response.tool_calls.len(),
                "Sub-agent step"
            );

            if response.is_final() {
                return Finish::complete(response.content);
            }

            for call in &response.tool_calls {
                if let Some(limit) = limits
                    .tool_call_limit()
                    .filter(|limit| run.tool_calls_made >= *limit)
                {
                    return Finish::failed(
                        SubagentStatus::Error,
                        format!(
                            "tool call limit reached ({limit}); refusing to run '{}'",
                            call.name
                        ),
                    );
                }
                if !is_tool_allowed(context.allowed_tools.as_deref(), &call.name) {
                    return Finish::failed(
                        SubagentStatus::Error,
                        format!("tool '{}' is not allowed for this sub-agent", call.name),
                    );
                }

                let output = match self.tools.execute(&call.name, &call.arguments).await {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::warn!(id = %context.id, tool = %call.name, error = %e, "Tool call failed");
                        return Finish::failed(
                            SubagentStatus::Error,
                            format!("tool '{}' failed: {e}", call.name),
                        );
                    }
                };
                run.tool_calls_made += 1;
                run.conversation.push(Message::tool_result(call.id.clone(), output));
            }

            if let Err(violation) = limits.check(run.tokens_used, run.tool_calls_made, run.elapsed())
            {
                // Wall-clock expiry is always a Timeout, whichever check sees it first.
                let status = match violation {
                    LimitViolation::Time { .. } => SubagentStatus::Timeout,
                    _ => SubagentStatus::Error,
                };
                return Finish::failed(status, violation.to_string());
            }
        }

        Finish::failed(
            SubagentStatus::Error,
            format!("exceeded maximum iterations ({})", self.max_iterations),
        )
    }
}

#[async_trait]
impl Executor for SubagentExecutor {
    async fn execute(
        &self,
        scope: CancelScope,
        context: SubagentContext,
    ) -> Result<SubagentResult, SubagentError> {
        context.validate()?;
        let _guard = self.track(&context.id, scope.token().clone())?;

        let mut run = RunState::new(&context);
        let finish = self.drive(&scope, &context, &mut run).await;
        let result = run.finish(&context, finish);

        tracing::info!(
            id = %result.subagent_id,
            status = %result.status,
            tokens = result.tokens_used,
            tool_calls = result.tool_calls_made,
            steps = result.step_results.len(),
            "Sub-agent finished"
        );
        Ok(result)
    }

    fn cancel(&self, id: &str) -> Result<(), SubagentError> {
        let in_flight = lock(&self.in_flight);
        let token = in_flight
            .get(id)
            .ok_or_else(|| SubagentError::NotFound(id.to_string()))?;
        token.cancel();
        Ok(())
    }

    fn status(&self, id: &str) -> Result<SubagentStatus, SubagentError> {
        if lock(&self.in_flight).contains_key(id) {
            Ok(SubagentStatus::Running)
        } else {
            Err(SubagentError::NotFound(id.to_string()))
        }
    }
}

struct InFlightGuard {
    in_flight: Arc<Mutex<HashMap<SubagentId, CancellationToken>>>,
    id: SubagentId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.id);
    }
}

/// Mutable state of one run. Owned by the executing task only.
struct RunState {
    started: Instant,
    conversation: Vec<Message>,
    steps: Vec<SubagentStepResult>,
    tokens_used: u64,
    tool_calls_made: u64,
}

impl RunState {
    fn new(context: &SubagentContext) -> Self {
        Self {
            started: Instant::now(),
            conversation: context.conversation_history.clone(),
            steps: Vec::new(),
            tokens_used: 0,
            tool_calls_made: 0,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn finish(self, context: &SubagentContext, finish: Finish) -> SubagentResult {
        let mut metadata = HashMap::new();
        metadata.insert(
            "skill_name".to_string(),
            serde_json::Value::from(context.skill_name.clone()),
        );
        metadata.insert(
            "parent_context_id".to_string(),
            serde_json::Value::from(context.parent_context_id.clone()),
        );
        metadata.insert(
            "conversation_len".to_string(),
            serde_json::Value::from(self.conversation.len()),
        );

        SubagentResult {
            subagent_id: context.id.clone(),
            status: finish.status,
            output: finish.output,
            error_message: finish.error,
            tokens_used: self.tokens_used,
            tool_calls_made: self.tool_calls_made,
            execution_time: self.elapsed(),
            completed_at: Some(Utc::now()),
            step_results: self.steps,
            metadata,
        }
    }
}

/// How the loop ended.
struct Finish {
    status: SubagentStatus,
    output: String,
    error: String,
}

impl Finish {
    fn complete(output: String) -> Self {
        Self {
            status: SubagentStatus::Complete,
            output,
            error: String::new(),
        }
    }

    fn failed(status: SubagentStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            output: String::new(),
            error: error.into(),
        }
    }
}
