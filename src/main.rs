use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use devpilot::agents::{CodingAgent, TaskContext};
use devpilot::analysis::Severity;
use devpilot::chains::{ChainEvent, TaskManager};
use devpilot::config::DevPilotConfig;
use devpilot::providers::demo::DemoProvider;
use devpilot::providers::ProviderRegistry;

#[derive(Parser)]
#[command(name = "devpilot", about = "LLM coding assistant with sequential task chains")]
struct Cli {
    /// Config file to use instead of ~/.config/devpilot/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Provider to use for this run (must be registered)
    #[arg(long, global = true)]
    provider: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a named chain of tasks, one per argument
    Chain {
        name: String,
        /// Task descriptions, executed in order
        #[arg(required = true)]
        tasks: Vec<String>,
        /// Source file the tasks operate on
        #[arg(long)]
        file: Option<PathBuf>,
        /// Language of the code (defaults to the file extension)
        #[arg(long)]
        language: Option<String>,
    },
    /// Ask a free-form question, streaming the answer
    Ask {
        query: Vec<String>,
    },
    /// Explain a source file
    Explain {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        language: Option<String>,
    },
    /// Run static analysis on a source file
    Analyze {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        language: Option<String>,
    },
}

fn read_source(file: &Path, language: Option<String>) -> Result<(String, String)> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let language = language
        .or_else(|| file.extension().and_then(|e| e.to_str()).map(str::to_string))
        .unwrap_or_else(|| "plaintext".to_string());
    Ok((code, language))
}

async fn build_agent(config: &DevPilotConfig, provider: Option<&str>) -> Result<CodingAgent> {
    for (name, problem) in config.provider_problems() {
        warn!("Provider '{}' is misconfigured: {}", name, problem);
    }

    // Network clients live outside this crate; the demo provider is always available
    let mut providers = ProviderRegistry::from_config(config);
    providers.register_checked(Arc::new(DemoProvider::new())).await?;

    for name in providers.unregistered(config) {
        match config.get_provider(&name) {
            Some(entry) => info!(
                "Provider '{}' ({:?}, model {}) has no client in this build, skipping",
                name, entry.provider_type, entry.model
            ),
            None => warn!("Provider '{}' is in the fallback order but not configured", name),
        }
    }

    if let Some(name) = provider {
        providers.set_active(name)?;
    }

    info!("Providers available: {}", providers.list_providers().join(", "));
    Ok(CodingAgent::new(config, Arc::new(providers)))
}

fn print_event(event: &ChainEvent) {
    match event {
        ChainEvent::TaskStarted { index, .. } => println!("▶ step {} started", index + 1),
        ChainEvent::TaskCompleted { index, .. } => println!("✓ step {} completed", index + 1),
        ChainEvent::TaskFailed { index, error, .. } => println!("✗ step {} failed: {}", index + 1, error),
        _ => {}
    }
}

/// Hand every event to `on_event` until the channel closes. A lagging
/// receiver keeps going; returns how many events were skipped.
async fn forward_events<F>(mut events: broadcast::Receiver<ChainEvent>, mut on_event: F) -> u64
where
    F: FnMut(&ChainEvent),
{
    let mut skipped = 0;
    loop {
        match events.recv().await {
            Ok(event) => on_event(&event),
            Err(RecvError::Lagged(count)) => {
                warn!("Skipped {} chain event(s)", count);
                skipped += count;
            }
            Err(RecvError::Closed) => return skipped,
        }
    }
}

async fn run_chain(
    config: &DevPilotConfig,
    agent: &CodingAgent,
    name: &str,
    tasks: &[String],
    context: Option<TaskContext>,
) -> Result<()> {
    let manager = TaskManager::with_config(config);
    let events = manager.subscribe();
    let printer = tokio::spawn(forward_events(events, print_event));

    let chain = manager.create_chain(name, tasks, context).await;
    for task in &chain.tasks {
        println!("  [{}] {}", task.task_type, task.description);
    }

    let outcome = manager.execute(&chain.id, agent).await;
    drop(manager);
    // Channel closes once the manager is gone
    let _ = printer.await;

    let outputs = outcome?;
    for (index, output) in outputs.iter().enumerate() {
        println!("\n── Step {} ──\n{}", index + 1, output.summary());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => DevPilotConfig::load_from(path)?,
        None => DevPilotConfig::load()?,
    };
    let agent = build_agent(&config, cli.provider.as_deref()).await?;

    match cli.command {
        Commands::Chain { name, tasks, file, language } => {
            let context = match file {
                Some(file) => {
                    let (code, language) = read_source(&file, language)?;
                    let mut context = TaskContext::for_code(code, language);
                    context.file_path = Some(file.display().to_string());
                    Some(context)
                }
                None => language.map(|language| TaskContext {
                    language: Some(language),
                    ..Default::default()
                }),
            };
            run_chain(&config, &agent, &name, &tasks, context).await?;
        }
        Commands::Ask { query } => {
            let mut stream = agent.stream_response(&query.join(" ")).await?;
            let mut stdout = std::io::stdout();
            while let Some(chunk) = stream.next().await {
                write!(stdout, "{}", chunk?)?;
                stdout.flush()?;
            }
            println!();
        }
        Commands::Explain { file, language } => {
            let (code, language) = read_source(&file, language)?;
            println!("{}", agent.explain_code(&code, &language).await?);
        }
        Commands::Analyze { file, language } => {
            let (code, language) = read_source(&file, language)?;
            let report = agent.analyze_and_fix(&code, &language).await?;

            println!("Score: {}/100", report.overall_score);
            println!(
                "{} error(s), {} warning(s)",
                report.count(Severity::Error),
                report.count(Severity::Warning)
            );
            for issue in &report.issues {
                println!("  {}", issue.describe());
            }
            for suggestion in &report.suggestions {
                println!("  hint: {}", suggestion);
            }
        }
    }

    Ok(())
}
