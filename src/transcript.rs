//! JSONL transcript of a single sub-agent run.
//!
//! Each run gets its own `subagent-{id}.jsonl` in `{workspace_parent}/.delegate-logs/`,
//! next to the workspace rather than inside it so the sub-agent's tools
//! can never read or overwrite it.
//!
//! Uses synchronous `std::fs`: entries are small and flushed one at a time.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::subagent::types::{SubagentContext, SubagentResult, SubagentStatus};

fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// One line of a transcript, tagged with `event_type`.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    RunStart {
        timestamp: String,
        subagent_id: String,
        parent_context_id: String,
        skill_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        allowed_tools: Option<Vec<String>>,
        max_tokens: i64,
        max_tool_calls: i64,
        timeout_ms: u128,
        history_len: usize,
    },

    Step {
        timestamp: String,
        step_number: u32,
        action: String,
        result: String,
        tokens_used: u64,
        duration_ms: u128,
    },

    StatusChange {
        timestamp: String,
        status: SubagentStatus,
    },

    RunEnd {
        timestamp: String,
        status: SubagentStatus,
        tokens_used: u64,
        tool_calls_made: u64,
        execution_ms: u128,
        #[serde(skip_serializing_if = "String::is_empty")]
        error_message: String,
    },
}

/// Append-only JSONL writer for one sub-agent.
pub struct TranscriptLogger {
    writer: BufWriter<fs::File>,
    log_path: PathBuf,
}

impl TranscriptLogger {
    pub fn new(workspace_path: &Path, subagent_id: &str) -> anyhow::Result<Self> {
        let log_dir = Self::log_dir_for(workspace_path)?;
        fs::create_dir_all(&log_dir)?;

        let log_path = log_dir.join(format!("subagent-{subagent_id}.jsonl"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            log_path,
        })
    }

    /// `{workspace_parent}/.delegate-logs/`
    pub fn log_dir_for(workspace_path: &Path) -> anyhow::Result<PathBuf> {
        let parent = workspace_path.parent().ok_or_else(|| {
            anyhow::anyhow!(
                "Workspace path '{}' has no parent directory",
                workspace_path.display()
            )
        })?;
        Ok(parent.join(".delegate-logs"))
    }

    pub fn log_event(&mut self, event: &TranscriptEntry) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn log_run_start(&mut self, context: &SubagentContext) -> anyhow::Result<()> {
        let limits = &context.resource_limits;
        self.log_event(&TranscriptEntry::RunStart {
            timestamp: now_iso(),
            subagent_id: context.id.clone(),
            parent_context_id: context.parent_context_id.clone(),
            skill_name: context.skill_name.clone(),
            allowed_tools: context.allowed_tools.clone(),
            max_tokens: limits.max_tokens,
            max_tool_calls: limits.max_tool_calls,
            timeout_ms: limits.timeout.as_millis(),
            history_len: context.conversation_history.len(),
        })
    }

    pub fn log_status_change(&mut self, status: SubagentStatus) -> anyhow::Result<()> {
        self.log_event(&TranscriptEntry::StatusChange {
            timestamp: now_iso(),
            status,
        })
    }

    /// Write every step of a finished run followed by its `run_end` entry.
    pub fn log_result(&mut self, result: &SubagentResult) -> anyhow::Result<()> {
        for step in &result.step_results {
            self.log_event(&TranscriptEntry::Step {
                timestamp: now_iso(),
                step_number: step.step_number,
                action: step.action.clone(),
                result: step.result.clone(),
                tokens_used: step.tokens_used,
                duration_ms: step.duration.as_millis(),
            })?;
        }
        self.log_event(&TranscriptEntry::RunEnd {
            timestamp: now_iso(),
            status: result.status,
            tokens_used: result.tokens_used,
            tool_calls_made: result.tool_calls_made,
            execution_ms: result.execution_time.as_millis(),
            error_message: result.error_message.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;
    use crate::subagent::fork::ContextForker;
    use crate::subagent::types::{ResourceLimits, SubagentStepResult};
    use std::io::BufRead;
    use std::time::Duration;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        let file = fs::File::open(path).expect("open transcript");
        std::io::BufReader::new(file)
            .lines()
            .map(|line| serde_json::from_str(&line.expect("line")).expect("valid JSON"))
            .collect()
    }

    #[test]
    fn writes_into_sibling_log_dir() {
        let tmp = TempDir::new().unwrap();
        let workspace = tmp.path().join("workspace");
        let logger = TranscriptLogger::new(&workspace, "abc").unwrap();

        let log_dir = tmp.path().join(".delegate-logs");
        assert!(log_dir.is_dir());
        assert_eq!(logger.log_path(), log_dir.join("subagent-abc.jsonl"));
        assert!(!workspace.exists(), "workspace must not be touched");
    }

    #[test]
    fn run_start_records_context_shape() {
        let tmp = TempDir::new().unwrap();
        let context = ContextForker::new()
            .fork(
                "parent-1",
                &[Message::user("hello")],
                "summarize",
                Some(&["file_read".to_string()][..]),
                ResourceLimits::new(100, 2, Duration::from_secs(5)),
            )
            .unwrap();

        let mut logger = TranscriptLogger::new(&tmp.path().join("ws"), &context.id).unwrap();
        logger.log_run_start(&context).unwrap();

        let lines = read_lines(logger.log_path());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["event_type"], "run_start");
        assert_eq!(lines[0]["skill_name"], "summarize");
        assert_eq!(lines[0]["allowed_tools"][0], "file_read");
        assert_eq!(lines[0]["timeout_ms"], 5000);
        assert_eq!(lines[0]["history_len"], 1);
    }

    #[test]
    fn result_expands_to_steps_then_run_end() {
        let tmp = TempDir::new().unwrap();
        let mut logger = TranscriptLogger::new(&tmp.path().join("ws"), "r1").unwrap();

        let mut result = SubagentResult::running("r1");
        result.status = SubagentStatus::Complete;
        result.tokens_used = 30;
        for n in 1..=2 {
            result.step_results.push(SubagentStepResult {
                step_number: n,
                action: "tool_use: 1 tool call(s)".into(),
                result: String::new(),
                tokens_used: 15,
                duration: Duration::from_millis(10),
            });
        }

        logger.log_status_change(SubagentStatus::Running).unwrap();
        logger.log_result(&result).unwrap();

        let lines = read_lines(logger.log_path());
        let kinds: Vec<_> = lines
            .iter()
            .map(|l| l["event_type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, ["status_change", "step", "step", "run_end"]);
        assert_eq!(lines[0]["status"], "running");
        assert_eq!(lines[2]["step_number"], 2);
        assert_eq!(lines[3]["status"], "complete");
        assert_eq!(lines[3]["tokens_used"], 30);
        assert!(lines[3].get("error_message").is_none());
    }
}
