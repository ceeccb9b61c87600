pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::{Cli, Commands};
use crate::error::ConfigError;
use anyhow::Context;
use std::path::Path;

/// Load configuration by merging global, workspace, and CLI sources.
/// Precedence: CLI > workspace config > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply). An explicit
/// `--config` path replaces the global file.
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    // Layer 1: Global config (~/.config/delegate/delegate.toml or platform equivalent)
    let global = match cli_config_path(cli) {
        Some(path) => load_toml_file(path).unwrap_or_default(),
        None => load_global_config(),
    };

    // Determine workspace path from CLI or global config, for loading workspace config.
    let workspace_path = cli_workspace(cli)
        .or_else(|| global.workspace.clone())
        .unwrap_or_else(|| std::path::PathBuf::from("./workspace"));

    // Layer 2: Workspace config (workspace/delegate.toml)
    let workspace = load_workspace_config(&workspace_path);

    // Layer 3: CLI args (converted to PartialConfig)
    let cli_partial = cli_to_partial(cli);

    // Merge: CLI > workspace > global > defaults
    let config = cli_partial
        .with_fallback(workspace)
        .with_fallback(global)
        .finalize()
        .context("Invalid configuration")?;

    Ok(config)
}

/// Load global config from the platform-specific config directory.
/// Returns empty PartialConfig if file not found.
fn load_global_config() -> PartialConfig {
    match global_config_path() {
        Some(p) => load_toml_file(&p).unwrap_or_default(),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

/// Load workspace config from workspace/delegate.toml.
/// Returns empty PartialConfig if file not found.
fn load_workspace_config(workspace_path: &Path) -> PartialConfig {
    let config_path = workspace_path.join("delegate.toml");
    load_toml_file(&config_path).unwrap_or_default()
}

/// Load and parse a TOML config file into a PartialConfig.
/// Returns None on file-not-found; parse errors are logged and also yield None.
pub fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
            Ok(config_file) => {
                tracing::info!("Loaded config from {}", path.display());
                Some(config_file.to_partial())
            }
            Err(e) => {
                let err = ConfigError::ParseError {
                    path: path.to_path_buf(),
                    message: e.message().to_string(),
                };
                tracing::warn!("{err}");
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            None
        }
        Err(e) => {
            let err = ConfigError::from(e);
            tracing::warn!("Failed to read config at {}: {err}", path.display());
            None
        }
    }
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/delegate/delegate.toml
/// macOS: ~/Library/Application Support/delegate/delegate.toml
fn global_config_path() -> Option<std::path::PathBuf> {
    directories::ProjectDirs::from("", "", "delegate")
        .map(|dirs| dirs.config_dir().join("delegate.toml"))
}

fn cli_config_path(cli: &Cli) -> Option<&Path> {
    match &cli.command {
        Commands::Run { config, .. } => config.as_deref(),
        Commands::Tools { .. } => None,
    }
}

/// Extract workspace path from CLI args.
fn cli_workspace(cli: &Cli) -> Option<std::path::PathBuf> {
    match &cli.command {
        Commands::Run { workspace, .. } => workspace.clone(),
        Commands::Tools { workspace } => workspace.clone(),
    }
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    match &cli.command {
        Commands::Run {
            model,
            workspace,
            max_tokens,
            max_tool_calls,
            timeout,
            tools,
            no_tools,
            ..
        } => PartialConfig {
            model: model.clone(),
            workspace: workspace.clone(),
            max_tokens: *max_tokens,
            max_tool_calls: *max_tool_calls,
            timeout_secs: *timeout,
            allowed_tools: if *no_tools {
                Some(Vec::new())
            } else {
                tools.clone()
            },
            ..Default::default()
        },
        Commands::Tools { workspace } => PartialConfig {
            workspace: workspace.clone(),
            ..Default::default()
        },
    }
}
