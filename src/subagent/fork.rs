//! Builds isolated [`SubagentContext`]s from a parent conversation.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use super::types::{ResourceLimits, SubagentContext, SubagentId};
use crate::error::SubagentError;
use crate::llm::Message;

/// Creates sub-agent contexts. Stateless: forking registers nothing anywhere.
#[derive(Clone, Debug, Default)]
pub struct ContextForker;

impl ContextForker {
    pub fn new() -> Self {
        Self
    }

    /// Fork a new context from `parent_history`.
    ///
    /// The history and allowlist are copied into fresh containers, so later
    /// edits on either side are never seen by the other. `allowed_tools`
    /// keeps its three-way meaning: `None` = every tool, empty = no tools.
    pub fn fork(
        &self,
        parent_context_id: &str,
        parent_history: &[Message],
        skill_name: &str,
        allowed_tools: Option<&[String]>,
        resource_limits: ResourceLimits,
    ) -> Result<SubagentContext, SubagentError> {
        if parent_context_id.is_empty() {
            return Err(SubagentError::Validation(
                "parent context id is empty".to_string(),
            ));
        }
        if skill_name.is_empty() {
            return Err(SubagentError::Validation("skill name is empty".to_string()));
        }
        resource_limits.validate()?;

        let context = SubagentContext {
            id: new_subagent_id(),
            parent_context_id: parent_context_id.to_string(),
            skill_name: skill_name.to_string(),
            allowed_tools: allowed_tools.map(<[String]>::to_vec),
            resource_limits,
            conversation_history: parent_history.to_vec(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        };

        tracing::debug!(
            id = %context.id,
            parent = %context.parent_context_id,
            skill = %context.skill_name,
            history_len = context.conversation_history.len(),
            "Forked sub-agent context"
        );

        Ok(context)
    }
}

/// Random UUID v4, so IDs never repeat across live or finished runs.
pub fn new_subagent_id() -> SubagentId {
    Uuid::new_v4().to_string()
}
