use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;

use delegate::cli::{Cli, Commands};
use delegate::config::{self, AppConfig};
use delegate::llm::Message;
use delegate::llm::genai_client::GenaiClient;
use delegate::subagent::executor::SubagentExecutor;
use delegate::subagent::fork::ContextForker;
use delegate::subagent::lifecycle::LifecycleManager;
use delegate::tools::ToolExecutor;
use delegate::tools::workspace::WorkspaceTools;
use delegate::transcript::TranscriptLogger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!("delegate starting");

    let config = config::load_config(&cli)?;
    tracing::info!(model = %config.model, workspace = %config.workspace.display(), "Config loaded");

    match &cli.command {
        Commands::Run { skill, task, .. } => run(&config, skill, task).await,
        Commands::Tools { .. } => {
            let tools = WorkspaceTools::new(&config.workspace)
                .with_context(|| format!("Cannot open workspace {}", config.workspace.display()))?;
            println!("{}", serde_json::to_string_pretty(&tools.definitions())?);
            Ok(())
        }
    }
}

/// Fork one sub-agent for `task`, supervise it to a terminal status and
/// print its result.
async fn run(config: &AppConfig, skill: &str, task: &str) -> anyhow::Result<()> {
    let llm = GenaiClient::new(config.model.clone()).with_ollama_url(config.ollama_url.clone());
    llm.check_ready().await?;

    let tools = WorkspaceTools::new(&config.workspace)
        .with_context(|| format!("Cannot open workspace {}", config.workspace.display()))?;
    let workspace_root = tools.root().to_path_buf();

    let executor = SubagentExecutor::new(Arc::new(llm), Arc::new(tools))
        .with_max_iterations(config.max_iterations);
    let manager = LifecycleManager::new(Arc::new(executor))
        .with_max_running(config.max_running)
        .with_shutdown_timeout(config.shutdown_timeout());

    let parent_id = format!("cli-{}", uuid::Uuid::new_v4());
    let context = ContextForker::new().fork(
        &parent_id,
        &[Message::user(task)],
        skill,
        config.allowed_tools.as_deref(),
        config.resource_limits(),
    )?;
    let id = context.id.clone();

    let mut transcript = TranscriptLogger::new(&workspace_root, &id)?;
    transcript.log_run_start(&context)?;
    tracing::info!(id = %id, path = %transcript.log_path().display(), "Transcript opened");
    let transcript = Arc::new(Mutex::new(transcript));

    let hook_transcript = Arc::clone(&transcript);
    manager.set_monitoring_hook(move |id, status| {
        tracing::info!(id = %id, status = %status, "Status change");
        if let Ok(mut t) = hook_transcript.lock() {
            if let Err(e) = t.log_status_change(status) {
                tracing::warn!(error = %e, "Failed to write transcript entry");
            }
        }
    });

    manager.start(context)?;

    let result = tokio::select! {
        result = manager.wait(&id) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(id = %id, "Interrupted, shutting down");
            if let Err(e) = manager.shutdown(None).await {
                tracing::warn!(error = %e, "Shutdown incomplete");
            }
            manager.get_status(&id)?
        }
    };

    match transcript.lock() {
        Ok(mut t) => t.log_result(&result)?,
        Err(_) => tracing::warn!(id = %id, "Transcript lock poisoned; skipping run_end"),
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
