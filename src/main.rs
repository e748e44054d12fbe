//! fail2drop - ban hosts that keep failing in your logs

use anyhow::Result;
use clap::Parser;
use tracing::info;

use fail2drop::cli::{Cli, Commands};
use fail2drop::config::Config;
use fail2drop::error::Fail2dropError;
use fail2drop::logging;
use fail2drop::orchestrator::RunMode;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("fail2drop {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Configuration decides where logs go, so it is read before logging starts
    let config_found = cli.config.exists();
    let config = Config::load_or_default(&cli.config)
        .map_err(|e| Fail2dropError::Config(format!("{:#}", e)))?;

    let log_file = cli.log_file.as_deref().or(config.log_file.as_deref());
    logging::init(logging::level_for(cli.verbose, cli.quiet), log_file)?;

    if !config_found {
        info!(
            "No config at {:?}, using built-in sshd defaults",
            cli.config
        );
    }

    match cli.command {
        Commands::Run {
            once,
            dry_run,
            reset,
        } => {
            let mode = RunMode::from_flags(once, dry_run);
            fail2drop::commands::run::run(&config, mode, reset).await
        }
        Commands::Check => fail2drop::commands::check::run(&config),
        Commands::Version => Ok(()),
    }
}
