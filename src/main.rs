use cachecoord::cli::{self, Cli, Command};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Listen => cli::listen::run().await,
        Command::Ping => cli::ping::run().await,
        Command::RateCheck(args) => cli::rate_check::run(args).await,
        Command::Invalidate(args) => cli::invalidate::run(args).await,
    }
}
