mod cli;
mod engine;
mod error;
mod logging;
mod model;
mod orchestrator;
mod text_summary;
#[cfg(test)]
mod test_support;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = args.json || args.text;

    cli::run(args).await?;

    // The push channel's reconnect loop and any detached upload must not keep
    // a headless run alive once it has printed its result.
    if is_non_tui {
        std::process::exit(0);
    }
    Ok(())
}
