use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::shutdown::shutdown_signal;
use common::{Configuration, StagingContext};
use compactor::{CompactionService, RunOutcome};
use staging::{Article, ObjectStoreAdapter, parse_batch, stage_batch};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "archivist")]
#[command(about = "Archivist - article archive with staged submissions (monolithic mode)")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<ArchivistCommands>,
}

#[derive(Subcommand)]
enum ArchivistCommands {
    #[command(flatten)]
    Common(CommonCommands),
    /// Merge all pending submissions into the archive once and exit
    Compact,
    /// Stage a single article read from a JSON file
    Stage { file: PathBuf },
    /// Stage every article in a JSON array file (plain or gzip)
    Import {
        file: PathBuf,
        /// Compact once after staging
        #[arg(long)]
        compact: bool,
    },
}

impl Default for ArchivistCommands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    let command = cli.command.unwrap_or_default();
    if let ArchivistCommands::Common(ref common_cmd) = command {
        if utils::handle_common_command(common_cmd, &config).await? {
            return Ok(());
        }
    }

    let context = StagingContext::from_config(&config).context("Failed to set up object storage")?;

    match command {
        ArchivistCommands::Common(_) => start(&config, context).await,
        ArchivistCommands::Compact => compact_once(&config, &context).await,
        ArchivistCommands::Stage { file } => stage_file(&context, &file).await,
        ArchivistCommands::Import { file, compact } => {
            import_file(&context, &file).await?;
            if compact {
                compact_once(&config, &context).await?;
            }
            Ok(())
        }
    }
}

/// Front door and compaction timer in one process, sharing one backend.
async fn start(config: &Configuration, context: StagingContext) -> Result<()> {
    tracing::info!("Starting Archivist in monolithic mode");
    tracing::info!("  Storage DSN: {}", common::storage::redact_dsn(&config.storage.dsn));
    tracing::info!("  Bucket: {}", context.backend.bucket());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let compactor_handle = if config.compactor.enabled {
        let service =
            CompactionService::new(context.compactor.clone(), config.compactor.tick_interval);
        let shutdown = wait_for(shutdown_rx.clone());
        Some(tokio::spawn(async move { service.run(shutdown).await }))
    } else {
        tracing::info!("Compactor is disabled in configuration (compactor.enabled = false)");
        None
    };

    let acceptor_config = config.clone();
    let acceptor_context = context.clone();
    let acceptor_shutdown = wait_for(shutdown_rx);
    let mut acceptor_handle = tokio::spawn(async move {
        acceptor::run(&acceptor_config, &acceptor_context, acceptor_shutdown).await
    });

    // The acceptor only returns on its own when it fails
    let early_exit = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut acceptor_handle => Some(result),
    };
    let _ = shutdown_tx.send(true);

    let acceptor_result = match early_exit {
        Some(result) => result,
        None => {
            tracing::info!("Shutting down Archivist");
            acceptor_handle.await
        }
    };

    if let Some(handle) = compactor_handle {
        if let Err(e) = handle.await {
            tracing::error!("Compaction service task failed: {e}");
        }
    }

    acceptor_result.context("Acceptor task panicked")??;
    tracing::info!("Archivist stopped");
    Ok(())
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    // A dropped sender also counts as shutdown
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn compact_once(config: &Configuration, context: &StagingContext) -> Result<()> {
    let service = CompactionService::new(context.compactor.clone(), config.compactor.tick_interval);

    match service.run_once().await? {
        RunOutcome::Compacted(report) => {
            let (processed, total) = report.counts();
            for key in &report.skipped {
                eprintln!("Skipped malformed entry {key}");
            }
            println!("Processed {processed} pending articles, total articles: {total}");
            Ok(())
        }
        RunOutcome::Contended { holder } => {
            anyhow::bail!("Compaction lease is held by {holder}, try again later")
        }
    }
}

async fn stage_file(context: &StagingContext, file: &Path) -> Result<()> {
    let body = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_slice(&body)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    let article = Article::from_value(value)
        .with_context(|| format!("Invalid article in {}", file.display()))?;

    let key = context.pending.stage(&article).await?;
    println!("Staged {} as {key}", article.url());
    Ok(())
}

async fn import_file(context: &StagingContext, file: &Path) -> Result<()> {
    let body = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let values = parse_batch(&body).with_context(|| format!("Failed to parse {}", file.display()))?;

    tracing::info!("Importing {} entries from {}", values.len(), file.display());
    let report = stage_batch(&context.pending, values).await?;

    println!(
        "Staged {} articles, rejected {}",
        report.staged.len(),
        report.rejected.len()
    );
    Ok(())
}
