//! Implementation of the `backends` subcommand.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use hpctest_executor::BackendRegistry;
use hpctest_executor::Config;
use hpctest_executor::ExecutionBackend;

/// Arguments to the `backends` subcommand.
#[derive(Parser, Debug)]
pub struct Args {}

/// Runs the `backends` subcommand.
pub fn backends(_: Args, config: Config) -> Result<()> {
    let registry = BackendRegistry::new();
    for name in registry.names() {
        let backend = registry.create(name, &config)?;
        let availability = backend.availability();
        let status = if availability.is_available() {
            "available".green()
        } else {
            "unavailable".red()
        };
        let selected = if name == config.batch.manager { " (selected)" } else { "" };
        println!("{name}{selected}: {status}: {availability}");
    }

    Ok(())
}
