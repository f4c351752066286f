mod ai_client;
mod cli;
mod config;
mod signals;
mod telegram_client;

use clap::Parser;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    match cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "latticeflow exited with an error");
            ExitCode::FAILURE
        }
    }
}
