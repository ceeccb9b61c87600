use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "delegate",
    version,
    about = "Run budgeted, cancellable LLM sub-agents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fork a sub-agent for one task and wait for its result
    Run {
        /// Skill label recorded on the sub-agent (e.g., "summarize")
        #[arg(short, long)]
        skill: String,

        /// Task handed to the sub-agent as its first user message
        #[arg(short, long)]
        task: String,

        /// Ollama model name (e.g., "llama3.2", "qwen2.5:7b")
        #[arg(short, long)]
        model: Option<String>,

        /// Workspace directory path
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Path to config file (replaces the global config file)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Token budget (0 = unlimited)
        #[arg(long, allow_negative_numbers = true)]
        max_tokens: Option<i64>,

        /// Tool call budget (0 = unlimited)
        #[arg(long, allow_negative_numbers = true)]
        max_tool_calls: Option<i64>,

        /// Wall-clock timeout in seconds
        #[arg(long, allow_negative_numbers = true)]
        timeout: Option<i64>,

        /// Comma-separated tool allowlist (omit to allow every tool)
        #[arg(long, value_delimiter = ',', conflicts_with = "no_tools")]
        tools: Option<Vec<String>>,

        /// Deny every tool
        #[arg(long)]
        no_tools: bool,
    },
    /// List the tools a sub-agent can be given
    Tools {
        /// Workspace directory path
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },
}
