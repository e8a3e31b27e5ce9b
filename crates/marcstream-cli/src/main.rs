//! marcstream - main entry point

use clap::Parser;
use marcstream_cli::{commands, Cli, Commands};
use marcstream_common::logging::init_logging;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // settings and LOG_* variables may come from the environment file
    if let Err(e) = dotenvy::from_path(&cli.config) {
        if !e.not_found() {
            eprintln!("Error: cannot load {}: {}", cli.config.display(), e);
            return ExitCode::from(1);
        }
    }

    let log_config = match cli.log_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(e.exit_code());
        },
    };
    // the CLI works without logging
    let _guard = init_logging(&log_config).ok().flatten();

    let result = match &cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Glob(args) => commands::glob::run(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        },
    }
}
