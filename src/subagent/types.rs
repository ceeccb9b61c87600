//! Type definitions for the sub-agent orchestration subsystem.
//!
//! These types form the shared vocabulary between the
//! [`super::fork::ContextForker`], the [`super::executor::SubagentExecutor`]
//! and the [`super::lifecycle::LifecycleManager`]. Results derive
//! [`serde::Serialize`] so callers can persist or print them as JSON.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SubagentError;
use crate::llm::Message;

/// Unique identifier for a sub-agent.
///
/// UUID v4 strings: collision-free and readable in logs.
pub type SubagentId = String;

/// Lifecycle status of a sub-agent.
///
/// Valid transitions are `Pending -> Running -> <terminal>`; nothing leaves a
/// terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Pending,
    Running,
    Complete,
    Error,
    Timeout,
    Cancelled,
}

impl SubagentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubagentStatus::Complete
                | SubagentStatus::Error
                | SubagentStatus::Timeout
                | SubagentStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubagentStatus::Pending => "pending",
            SubagentStatus::Running => "running",
            SubagentStatus::Complete => "complete",
            SubagentStatus::Error => "error",
            SubagentStatus::Timeout => "timeout",
            SubagentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubagentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which budget a run went over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitViolation {
    Tokens { used: u64, limit: u64 },
    ToolCalls { made: u64, limit: u64 },
    Time { elapsed: Duration, limit: Duration },
}

impl fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitViolation::Tokens { used, limit } => {
                write!(f, "token limit exceeded ({used}/{limit})")
            }
            LimitViolation::ToolCalls { made, limit } => {
                write!(f, "tool call limit exceeded ({made}/{limit})")
            }
            LimitViolation::Time { elapsed, limit } => {
                write!(f, "time limit exceeded ({elapsed:?} > {limit:?})")
            }
        }
    }
}

/// Token / tool-call / wall-clock budget for one sub-agent.
///
/// `max_tokens` and `max_tool_calls` use `0` for "unlimited". They are signed
/// so that negative values coming from config or callers are rejected by
/// [`ResourceLimits::validate`] instead of wrapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_tokens: i64,
    pub max_tool_calls: i64,
    pub timeout: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_tokens: 0,
            max_tool_calls: 0,
            timeout: Duration::from_secs(300),
        }
    }
}

impl ResourceLimits {
    pub fn new(max_tokens: i64, max_tool_calls: i64, timeout: Duration) -> Self {
        Self {
            max_tokens,
            max_tool_calls,
            timeout,
        }
    }

    pub fn validate(&self) -> Result<(), SubagentError> {
        if self.timeout.is_zero() {
            return Err(SubagentError::Validation(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_tokens < 0 {
            return Err(SubagentError::Validation(format!(
                "max_tokens must be >= 0, got {}",
                self.max_tokens
            )));
        }
        if self.max_tool_calls < 0 {
            return Err(SubagentError::Validation(format!(
                "max_tool_calls must be >= 0, got {}",
                self.max_tool_calls
            )));
        }
        Ok(())
    }

    /// Token ceiling, or `None` when unlimited.
    pub fn token_limit(&self) -> Option<u64> {
        positive(self.max_tokens)
    }

    /// Tool-call ceiling, or `None` when unlimited.
    pub fn tool_call_limit(&self) -> Option<u64> {
        positive(self.max_tool_calls)
    }

    /// Report the first exceeded budget. Being exactly at a limit passes.
    pub fn check(
        &self,
        tokens_used: u64,
        tool_calls_made: u64,
        elapsed: Duration,
    ) -> Result<(), LimitViolation> {
        if let Some(limit) = self.token_limit().filter(|limit| tokens_used > *limit) {
            return Err(LimitViolation::Tokens {
                used: tokens_used,
                limit,
            });
        }
        if let Some(limit) = self.tool_call_limit().filter(|limit| tool_calls_made > *limit) {
            return Err(LimitViolation::ToolCalls {
                made: tool_calls_made,
                limit,
            });
        }
        if !self.timeout.is_zero() && elapsed > self.timeout {
            return Err(LimitViolation::Time {
                elapsed,
                limit: self.timeout,
            });
        }
        Ok(())
    }

    pub fn is_within_limits(
        &self,
        tokens_used: u64,
        tool_calls_made: u64,
        elapsed: Duration,
    ) -> bool {
        self.check(tokens_used, tool_calls_made, elapsed).is_ok()
    }
}

fn positive(value: i64) -> Option<u64> {
    u64::try_from(value).ok().filter(|v| *v > 0)
}

/// Isolated execution context for one sub-agent.
///
/// Built by [`super::fork::ContextForker::fork`]; every container is an owned
/// copy, so nothing here aliases the parent conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubagentContext {
    pub id: SubagentId,
    pub parent_context_id: String,
    pub skill_name: String,
    /// `None` = every tool, `Some(vec![])` = no tools, otherwise an exact allowlist.
    pub allowed_tools: Option<Vec<String>>,
    pub resource_limits: ResourceLimits,
    pub conversation_history: Vec<Message>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SubagentContext {
    /// Checks applied by both the forker and the supervisor.
    pub fn validate(&self) -> Result<(), SubagentError> {
        if self.id.is_empty() {
            return Err(SubagentError::Validation("sub-agent id is empty".to_string()));
        }
        if self.parent_context_id.is_empty() {
            return Err(SubagentError::Validation(
                "parent context id is empty".to_string(),
            ));
        }
        if self.skill_name.is_empty() {
            return Err(SubagentError::Validation("skill name is empty".to_string()));
        }
        self.resource_limits.validate()
    }
}

/// One LLM round-trip inside a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubagentStepResult {
    /// 1-based, strictly increasing.
    pub step_number: u32,
    /// Finish reason plus tool-call count, e.g. `tool_use: 2 tool call(s)`.
    pub action: String,
    pub result: String,
    pub tokens_used: u64,
    pub duration: Duration,
}

/// Outcome of a sub-agent run, and the record tracked by the supervisor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubagentResult {
    pub subagent_id: SubagentId,
    pub status: SubagentStatus,
    pub output: String,
    pub error_message: String,
    pub tokens_used: u64,
    pub tool_calls_made: u64,
    pub execution_time: Duration,
    pub completed_at: Option<DateTime<Utc>>,
    pub step_results: Vec<SubagentStepResult>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SubagentResult {
    /// Fresh record for a run that has just been started.
    pub fn running(id: impl Into<SubagentId>) -> Self {
        Self {
            subagent_id: id.into(),
            status: SubagentStatus::Running,
            output: String::new(),
            error_message: String::new(),
            tokens_used: 0,
            tool_calls_made: 0,
            execution_time: Duration::ZERO,
            completed_at: None,
            step_results: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}
