//! memo-consensus - Multi-Model Memo Editing
//!
//! Sends one investment memo section to several language models at once,
//! shows each edited version with its timing, then merges them into a final
//! version with a consolidation model. Every run is saved and can be listed
//! and viewed later.
//!
//! # Usage
//!
//! ```bash
//! # Edit a file with the default models
//! memo-consensus process --file market.md --section "Market Research"
//!
//! # Read from stdin, pick models, give up after ten minutes
//! cat team.md | memo-consensus process --models openai/gpt-4.1,x-ai/grok-3-beta --deadline-secs 600
//!
//! # Exercise the pipeline without calling any backend
//! memo-consensus process --file market.md --dry-run --no-save
//!
//! # Browse saved runs
//! memo-consensus list
//! memo-consensus view 20261019T083000Z-1a2b3c4d
//!
//! # Verbose logging
//! RUST_LOG=debug memo-consensus process --file market.md
//! ```

mod instructions;
mod report;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use consensus_core::{
    default_config_path, load_config_from_path, ClientRegistry, ConfigOverrides, ConsensusConfig,
    FileRunStore, MemoryRunStore, ModelIdentity, Pipeline, PipelineError, PipelineEvent, RunId,
    RunRequest, RunStore, Script, ScriptedClient, StoreError,
};

/// memo-consensus - edit memo sections with several models and merge the results
#[derive(Parser, Debug)]
#[command(name = "memo-consensus")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "MEMO_CONSENSUS_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short = 'l',
        long,
        env = "MEMO_CONSENSUS_LOG_LEVEL",
        default_value = "warn",
        global = true
    )]
    log_level: String,

    /// Directory holding saved runs
    #[arg(long, value_name = "DIR", global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a markdown document through several models
    Process {
        /// Markdown file to edit (reads stdin when absent)
        #[arg(short = 'f', long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Memo section the text belongs to
        #[arg(short = 's', long, value_name = "NAME")]
        section: Option<String>,

        /// Comma-separated models to dispatch (defaults from config)
        #[arg(short = 'm', long, value_delimiter = ',', value_name = "MODELS")]
        models: Vec<ModelIdentity>,

        /// Do not save the run
        #[arg(long)]
        no_save: bool,

        /// Give up on unfinished calls after this many seconds
        #[arg(long, value_name = "SECS")]
        deadline_secs: Option<u64>,

        /// Use scripted replies instead of calling any backend
        #[arg(long)]
        dry_run: bool,
    },

    /// List saved runs
    List,

    /// Show a saved run
    View {
        /// Run identifier (see `list`)
        id: String,
    },

    /// List known memo sections
    Sections,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "consensus_cli={level},consensus_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration and apply command-line overrides
fn resolve_config(args: &Args, deadline_secs: Option<u64>) -> Result<ConsensusConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(dir) = &args.store_dir {
        overrides = overrides.with_store_dir(dir.clone());
    }
    if let Some(secs) = deadline_secs {
        overrides = overrides.with_run_deadline_secs(secs);
    }
    overrides
        .apply(&mut config)
        .context("Invalid command-line options")?;

    info!(source = %config.source(), store = %config.store_dir.display(), "Configuration loaded");
    Ok(config)
}

/// Read the document from a file or stdin
async fn read_document(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            eprintln!("Enter your markdown text (press Ctrl+D when finished):");
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

/// Registry answering every configured model with scripted text
fn dry_run_registry(config: &ConsensusConfig, models: &[ModelIdentity]) -> ClientRegistry {
    let client = Arc::new(ScriptedClient::new(Script::Tagged));
    let mut registry = ClientRegistry::new();
    for model in config
        .models
        .iter()
        .map(|entry| &entry.id)
        .chain(models)
        .chain(std::iter::once(&config.consolidation_model))
    {
        registry.register(model.clone(), client.clone(), None);
    }
    registry
}

/// Print progress events to stderr as they arrive
fn spawn_progress() -> (
    tokio::sync::mpsc::UnboundedSender<PipelineEvent>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::StageChanged(stage) => eprintln!("{}", stage.description()),
                PipelineEvent::ModelSettled { result, .. } => {
                    let status = if result.is_success() { "done" } else { "failed" };
                    eprintln!(
                        "  {} {status} ({})",
                        result.model,
                        report::format_time(result.latency)
                    );
                }
            }
        }
    });
    (tx, handle)
}

async fn process(
    args: &Args,
    file: Option<&PathBuf>,
    section: Option<&str>,
    models: &[ModelIdentity],
    no_save: bool,
    deadline_secs: Option<u64>,
    dry_run: bool,
) -> Result<()> {
    let config = resolve_config(args, deadline_secs)?;

    let section = match section {
        Some(name) => instructions::find_section(name).map_or_else(
            || {
                warn!(section = name, "Unknown memo section; using base prompt only");
                name.trim().to_string()
            },
            ToString::to_string,
        ),
        None => instructions::GENERAL_SECTION.to_string(),
    };

    let text = read_document(file).await?;
    if text.trim().is_empty() {
        anyhow::bail!("No markdown text provided");
    }

    let models = if models.is_empty() {
        config.default_models.clone()
    } else {
        models.to_vec()
    };

    let store: Arc<dyn RunStore> = if no_save {
        Arc::new(MemoryRunStore::new())
    } else {
        Arc::new(FileRunStore::new(&config.store_dir))
    };

    let pipeline = if dry_run {
        Pipeline::with_registry(&config, dry_run_registry(&config, &models), store)?
    } else {
        Pipeline::from_config(&config, store)?
    };

    let (events, progress) = spawn_progress();
    let request = RunRequest::new(text, models)
        .with_label(section.clone())
        .with_instructions(instructions::edit_instructions(&section))
        .with_consolidation_instructions(instructions::consolidation_instructions(&section))
        .with_synthesis_directive(instructions::synthesis_directive(&section))
        .with_events(events);

    let outcome = pipeline.run(request).await;
    // The sender went away with the request; drain what is left
    let _ = progress.await;

    match outcome {
        Ok(record) => {
            println!("{}", report::render_record(&record));
            if no_save {
                println!("Run {} not saved (--no-save)", record.id);
            } else {
                println!(
                    "Results saved: {} in {}",
                    record.id,
                    config.store_dir.display()
                );
            }
            Ok(())
        }
        Err(PipelineError::Store { source, record }) => {
            println!("{}", report::render_record(&record));
            Err(source).context(format!("Run {} completed but was not saved", record.id))
        }
        Err(e) => Err(e.into()),
    }
}

async fn list(args: &Args) -> Result<()> {
    let config = resolve_config(args, None)?;
    let store = FileRunStore::new(&config.store_dir);
    let summaries = store.list().await.context("Failed to list saved runs")?;
    print!("{}", report::render_summaries(&summaries));
    Ok(())
}

async fn view(args: &Args, id: &str) -> Result<()> {
    let config = resolve_config(args, None)?;
    let store = FileRunStore::new(&config.store_dir);
    match store.get(&RunId::from(id)).await {
        Ok(record) => {
            println!("{}", report::render_record(&record));
            Ok(())
        }
        Err(StoreError::NotFound(_)) => anyhow::bail!("Result '{id}' not found"),
        Err(e) => Err(e).with_context(|| format!("Failed to load run {id}")),
    }
}

fn sections() {
    for (name, _) in instructions::MEMO_SECTIONS {
        println!("{name}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    match &args.command {
        Command::Process {
            file,
            section,
            models,
            no_save,
            deadline_secs,
            dry_run,
        } => {
            process(
                &args,
                file.as_ref(),
                section.as_deref(),
                models,
                *no_save,
                *deadline_secs,
                *dry_run,
            )
            .await
        }
        Command::List => list(&args).await,
        Command::View { id } => view(&args, id).await,
        Command::Sections => {
            sections();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_process_arguments() {
        let args = Args::try_parse_from([
            "memo-consensus",
            "process",
            "--models",
            "openai/gpt-4.1,x-ai/grok-3-beta",
            "--section",
            "market research",
            "--deadline-secs",
            "120",
            "--no-save",
        ])
        .unwrap();

        let Command::Process {
            models,
            section,
            deadline_secs,
            no_save,
            dry_run,
            ..
        } = args.command
        else {
            panic!("expected process");
        };
        assert_eq!(models.len(), 2);
        assert_eq!(models[1].as_str(), "x-ai/grok-3-beta");
        assert_eq!(section.as_deref(), Some("market research"));
        assert_eq!(deadline_secs, Some(120));
        assert!(no_save);
        assert!(!dry_run);
    }

    #[test]
    fn test_bad_model_identity_rejected() {
        assert!(Args::try_parse_from(["memo-consensus", "process", "--models", "gpt4"]).is_err());
    }

    #[test]
    fn test_dry_run_registry_covers_requested_models() {
        let config = ConsensusConfig::default();
        let extra = ModelIdentity::parse("ollama/llama3.2").unwrap();
        let registry = dry_run_registry(&config, std::slice::from_ref(&extra));

        assert!(registry.contains(&extra));
        assert!(registry.contains(&config.consolidation_model));
        for model in &config.default_models {
            assert!(registry.contains(model));
        }
    }
}
