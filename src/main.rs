mod auth;
mod cli;
mod config;
mod error;
mod lark;
mod output;
mod tree;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    output::print_banner();

    info!("Starting StoryMap");
    cli.execute().await?;

    Ok(())
}
