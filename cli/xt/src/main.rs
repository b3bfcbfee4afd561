//! xt - CLI for extension development.

use anyhow::Result;
use clap::Parser;
use xt_cli::commands::Cli;
use xt_cli::{error, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format, cli.verbose);

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
