use super::schema::{AppConfig, PartialConfig};
use crate::error::ConfigError;
use crate::llm::genai_client::DEFAULT_OLLAMA_URL;
use crate::subagent::executor::DEFAULT_MAX_ITERATIONS;
use crate::subagent::lifecycle::DEFAULT_SHUTDOWN_TIMEOUT;
use std::path::PathBuf;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    /// For allowed_tools: REPLACE semantics (if self has Some, use it entirely).
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            model: self.model.or(fallback.model),
            workspace: self.workspace.or(fallback.workspace),
            ollama_url: self.ollama_url.or(fallback.ollama_url),
            max_tokens: self.max_tokens.or(fallback.max_tokens),
            max_tool_calls: self.max_tool_calls.or(fallback.max_tool_calls),
            timeout_secs: self.timeout_secs.or(fallback.timeout_secs),
            max_iterations: self.max_iterations.or(fallback.max_iterations),
            allowed_tools: self.allowed_tools.or(fallback.allowed_tools),
            max_running: self.max_running.or(fallback.max_running),
            shutdown_timeout_secs: self.shutdown_timeout_secs.or(fallback.shutdown_timeout_secs),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    ///
    /// Rejects negative budgets, a non-positive timeout and a zero
    /// iteration ceiling.
    pub fn finalize(self) -> Result<AppConfig, ConfigError> {
        let max_tokens = self.max_tokens.unwrap_or(0);
        if max_tokens < 0 {
            return Err(ConfigError::Invalid(format!(
                "limits.max_tokens must be >= 0, got {max_tokens}"
            )));
        }
        let max_tool_calls = self.max_tool_calls.unwrap_or(0);
        if max_tool_calls < 0 {
            return Err(ConfigError::Invalid(format!(
                "limits.max_tool_calls must be >= 0, got {max_tool_calls}"
            )));
        }
        let timeout_secs = self.timeout_secs.unwrap_or(300);
        if timeout_secs <= 0 {
            return Err(ConfigError::Invalid(format!(
                "limits.timeout_secs must be > 0, got {timeout_secs}"
            )));
        }
        let max_iterations = self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        if max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_iterations must be > 0".to_string(),
            ));
        }

        Ok(AppConfig {
            model: self.model.unwrap_or_else(|| "llama3.2".to_string()),
            workspace: self
                .workspace
                .unwrap_or_else(|| PathBuf::from("./workspace")),
            ollama_url: self
                .ollama_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            max_tokens,
            max_tool_calls,
            timeout_secs: timeout_secs as u64,
            max_iterations,
            allowed_tools: self.allowed_tools,
            max_running: self.max_running.unwrap_or(0),
            shutdown_timeout_secs: self
                .shutdown_timeout_secs
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT.as_secs()),
        })
    }
}
