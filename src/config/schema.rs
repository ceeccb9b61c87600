use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::subagent::types::ResourceLimits;

/// The TOML file structure for delegate.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub general: Option<GeneralConfig>,
    pub limits: Option<LimitsConfig>,
    pub supervisor: Option<SupervisorConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub model: Option<String>,
    pub workspace: Option<String>,
    pub ollama_url: Option<String>,
}

/// Signed on purpose: negative values are reported, not silently wrapped.
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    pub max_tokens: Option<i64>,
    pub max_tool_calls: Option<i64>,
    pub timeout_secs: Option<i64>,
    pub max_iterations: Option<u32>,
    /// If specified, restricts every sub-agent to these tools.
    pub allowed_tools: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct SupervisorConfig {
    pub max_running: Option<usize>,
    pub shutdown_timeout_secs: Option<u64>,
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub workspace: PathBuf,
    pub ollama_url: String,
    pub max_tokens: i64,
    pub max_tool_calls: i64,
    pub timeout_secs: u64,
    pub max_iterations: u32,
    pub allowed_tools: Option<Vec<String>>,
    pub max_running: usize,
    pub shutdown_timeout_secs: u64,
}

impl AppConfig {
    /// Default budget for sub-agents started from this config.
    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits::new(
            self.max_tokens,
            self.max_tool_calls,
            Duration::from_secs(self.timeout_secs),
        )
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub model: Option<String>,
    pub workspace: Option<PathBuf>,
    pub ollama_url: Option<String>,
    pub max_tokens: Option<i64>,
    pub max_tool_calls: Option<i64>,
    pub timeout_secs: Option<i64>,
    pub max_iterations: Option<u32>,
    pub allowed_tools: Option<Vec<String>>,
    pub max_running: Option<usize>,
    pub shutdown_timeout_secs: Option<u64>,
}

impl ConfigFile {
    /// Flatten the sectioned file into a mergeable partial config.
    pub fn to_partial(self) -> PartialConfig {
        let general = self.general;
        let limits = self.limits;
        let supervisor = self.supervisor;

        PartialConfig {
            model: general.as_ref().and_then(|g| g.model.clone()),
            workspace: general
                .as_ref()
                .and_then(|g| g.workspace.as_ref().map(PathBuf::from)),
            ollama_url: general.and_then(|g| g.ollama_url),
            max_tokens: limits.as_ref().and_then(|l| l.max_tokens),
            max_tool_calls: limits.as_ref().and_then(|l| l.max_tool_calls),
            timeout_secs: limits.as_ref().and_then(|l| l.timeout_secs),
            max_iterations: limits.as_ref().and_then(|l| l.max_iterations),
            allowed_tools: limits.and_then(|l| l.allowed_tools),
            max_running: supervisor.as_ref().and_then(|s| s.max_running),
            shutdown_timeout_secs: supervisor.and_then(|s| s.shutdown_timeout_secs),
        }
    }
}
