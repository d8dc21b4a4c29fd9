mod backend;
mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_target(false).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => commands::serve(args).await,
        Command::Submit(args) => commands::submit(args).await,
        Command::Cancel(args) => commands::cancel(args).await,
        Command::Status { evaluation_id } => commands::status(cli.remote, cli.token, evaluation_id).await,
        Command::Pool => commands::pool(cli.remote, cli.token).await,
        Command::Queue => commands::queue(cli.remote, cli.token).await,
    }
}
