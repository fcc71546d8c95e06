use anyhow::{Context, Result};
use clap::Parser;
use common::StagingContext;
use common::cli::{CommonArgs, CommonCommands, utils};
use common::shutdown::shutdown_signal;

#[derive(Parser, Debug)]
#[command(name = "archivist-acceptor")]
#[command(about = "Archivist HTTP submission endpoint")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

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

    tracing::info!("Starting Archivist Acceptor Service");
    acceptor::run(&config, &context, shutdown_signal()).await
}
