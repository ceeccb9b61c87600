//! Tool collaborator boundary.
//!
//! The executor never runs tools itself: it checks the allowlist and the
//! tool-call budget, then hands the call to a [`ToolExecutor`].

pub mod workspace;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::llm::ToolDefinition;

/// Executes named tools on behalf of a sub-agent.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Schemas of every tool this executor can run.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run `name` with `args`, returning the output the model will see.
    ///
    /// An `Err` ends the calling sub-agent run with an Error status.
    async fn execute(&self, name: &str, args: &Map<String, Value>) -> Result<String, ToolError>;
}

/// Whether `tool` may be invoked under `allowed`.
///
/// `None` permits every tool, an empty list permits none, otherwise the name
/// must match an entry exactly.
pub fn is_tool_allowed(allowed: Option<&[String]>, tool: &str) -> bool {
    match allowed {
        None => true,
        Some(names) => names.iter().any(|name| name == tool),
    }
}
