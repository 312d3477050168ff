use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    course_harvest::logging::init().context("init logging")?;

    let cli = course_harvest::cli::Cli::parse();
    let config = course_harvest::config::HarvestConfig::from_cli(cli).context("configuration")?;
    tracing::debug!(?config, "parsed cli");

    course_harvest::harvest::run(config).await
}
