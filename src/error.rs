use std::path::PathBuf;
use std::time::Duration;

use crate::subagent::types::SubagentId;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// API-misuse errors from the fork / supervisor surface.
///
/// Ordinary sub-agent failures never show up here; they are recorded as a
/// terminal [`crate::subagent::types::SubagentResult`] instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubagentError {
    #[error("Invalid sub-agent request: {0}")]
    Validation(String),

    #[error("Sub-agent not found: {0}")]
    NotFound(SubagentId),

    #[error("Sub-agent already tracked: {0}")]
    AlreadyTracked(SubagentId),

    #[error("Max running sub-agents reached ({running}/{limit})")]
    CapacityExceeded { running: usize, limit: usize },

    #[error("Shutdown timed out after {timeout:?}; {remaining} sub-agent(s) still running")]
    ShutdownTimeout { timeout: Duration, remaining: usize },
}

/// Errors raised by an LLM collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Ollama not reachable at {url}: {message}")]
    Unavailable { url: String, message: String },

    #[error("Model '{model}' not available in Ollama: {message}")]
    ModelNotAvailable { model: String, message: String },

    #[error("LLM request failed: {0}")]
    Request(String),
}

/// Errors raised by a tool collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{tool}: invalid arguments: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("{tool} failed: {message}")]
    Failed { tool: String, message: String },
}
