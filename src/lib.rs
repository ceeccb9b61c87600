pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod subagent;
pub mod tools;
pub mod transcript;
