//! Archivist Compactor Service
//!
//! Periodically folds pending article submissions into the canonical object.

use anyhow::{Context, Result};
use clap::Parser;
use common::StagingContext;
use common::cli::{CommonArgs, CommonCommands, utils};
use common::shutdown::shutdown_signal;
use compactor::{CompactionService, RunOutcome};

#[derive(Parser, Debug)]
#[command(name = "archivist-compactor")]
#[command(about = "Archivist compaction trigger")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Run a single compaction and exit
    #[arg(long)]
    once: bool,

    #[command(subcommand)]
    command: Option<CommonCommands>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::init_logging(&args.common);

    let config = utils::load_config(args.common.config.as_ref())?;

    let command = args.command.unwrap_or_default();
    if utils::handle_common_command(&command, &config).await? {
        return Ok(());
    }

    let context = StagingContext::from_config(&config).context("Failed to set up object storage")?;
    let service = CompactionService::new(context.compactor, config.compactor.tick_interval);

    if args.once {
        return match service.run_once().await? {
            RunOutcome::Compacted(report) => {
                let (processed, total) = report.counts();
                println!("Processed {processed} pending articles, total articles: {total}");
                Ok(())
            }
            RunOutcome::Contended { holder } => {
                anyhow::bail!("Compaction lease is held by {holder}, try again later")
            }
        };
    }

    if !config.compactor.enabled {
        tracing::info!("Compactor is disabled in configuration (compactor.enabled = false)");
        return Ok(());
    }

    tracing::info!("Starting Archivist Compactor Service");
    service.run(shutdown_signal()).await;

    Ok(())
}
