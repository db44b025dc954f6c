//! `rxflow` command-line entry point
//!
//! Runs resumable batches of HTTP lookups through the configured
//! per-dependency transports.
//!
//! Results and checkpoint listings are user-facing output, so `println!` is
//! used for them; everything else goes through `tracing`.

#![allow(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

use std::process::ExitCode;

use rxflow_infra::{config, init_tracing};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod args;
mod commands;
mod pipeline;

use args::Command;
use commands::Outcome;

/// Exit status for a batch stopped by Ctrl-C
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let command = match args::parse(std::env::args().skip(1)) {
        Ok(Command::Help) => {
            args::print_help();
            return ExitCode::SUCCESS;
        }
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            eprintln!();
            args::print_help();
            return ExitCode::FAILURE;
        }
    };

    match run(command).await {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            error!(error = %format!("{e:#}"), "command failed");
            eprintln!("rxflow: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> anyhow::Result<Outcome> {
    let dotenv = dotenvy::dotenv().ok();
    let config = config::load_or_default()?;
    init_tracing(&config.logging);
    if let Some(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    match command {
        Command::Run(args) => {
            let cancel = CancellationToken::new();
            spawn_ctrl_c_handler(cancel.clone());
            commands::run(&config, args, cancel).await
        }
        Command::Status { batch_id, json } => commands::status(&config, &batch_id, json).await,
        Command::List => commands::list(&config).await,
        Command::Delete { batch_id } => commands::delete(&config, &batch_id).await,
        Command::Help => {
            args::print_help();
            Ok(Outcome::Done)
        }
    }
}

/// Cancel `token` on the first Ctrl-C; in-flight items finish first
fn spawn_ctrl_c_handler(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping after in-flight items");
                token.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for Ctrl-C"),
        }
    });
}
