mod backup;
mod cli;
mod config;
mod engine;
mod executor;
mod logging;
mod metrics;
mod model;
mod orchestrator;
mod policy;
mod scheduler;
#[cfg(feature = "tui")]
mod service;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use clap::Parser;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();

    match cli::run(args).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("docker-janitor: {e:#}");
            std::process::exit(1);
        }
    }
}
