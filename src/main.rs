//! The hpctest command line tool.

use std::io::IsTerminal;
use std::io::stderr;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap_verbosity_flag::Verbosity;
use colored::Colorize;
use git_testament::git_testament;
use git_testament::render_testament;
use hpctest::commands;
use hpctest::config;
use tracing_log::AsTrace;

git_testament!(TESTAMENT);

#[derive(Subcommand)]
enum Commands {
    /// Runs a command with the configured batch manager and prints its
    /// output.
    ///
    /// Batch managers that run jobs in the background by default (or any
    /// manager when `--background` is given) submit the command and wait for
    /// it to finish.
    Run(commands::run::Args),

    /// Submits commands as background jobs and waits for all of them.
    Submit(commands::submit::Args),

    /// Lists the known batch managers and whether they can run here.
    Backends(commands::backends::Args),
}

#[derive(Parser)]
#[command(author, version = render_testament!(TESTAMENT), propagate_version = true, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// The configuration file to use in addition to the default locations.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbose: Verbosity,
}

pub async fn inner() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_log::LogTracer::init()?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(cli.verbose.log_level_filter().as_trace())
        .with_writer(std::io::stderr)
        .with_ansi(stderr().is_terminal())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run::run(args, config).await,
        Commands::Submit(args) => commands::submit::submit(args, config).await,
        Commands::Backends(args) => commands::backends::backends(args, config),
    }
}

#[tokio::main]
pub async fn main() {
    if let Err(e) = inner().await {
        eprintln!(
            "{error}: {e:?}",
            error = if std::io::stderr().is_terminal() {
                "error".red().bold()
            } else {
                "error".normal()
            }
        );
        std::process::exit(1);
    }
}
