//! SignalDB deletion dry-run tool
//!
//! Evaluates delete requests against chunk descriptors and reports what a
//! compaction pass would delete, without touching any data.

use anyhow::{Context, Result};
use clap::Parser;
use deletion::cli::{Cli, Commands, utils};

fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::init_logging(&cli.common);

    if let Commands::Version = cli.command {
        println!("{}", utils::version_info());
        return Ok(());
    }

    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command {
        Commands::Check { input } => {
            let report = utils::check(&config, &input)?;
            let json =
                serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
            println!("{json}");
        }
        Commands::Config { json } => utils::display_config(&config, json)?,
        Commands::Validate => {
            utils::validate_config(&config)?;
            if !cli.common.quiet {
                println!("Configuration is valid");
            }
        }
        Commands::Version => {}
    }

    Ok(())
}
