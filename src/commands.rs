//! Implementation of hpctest CLI commands.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Args;
use hpctest_executor::BackendRegistry;
use hpctest_executor::Config;
use hpctest_executor::Executor;
use hpctest_executor::Resources;

pub mod backends;
pub mod run;
pub mod submit;

/// Arguments describing where and with what resources a job runs.
#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// The number of MPI ranks; zero runs the command without MPI.
    #[arg(short = 'n', long, value_name = "N", default_value_t = 0)]
    pub ranks: u32,

    /// The number of OpenMP threads per rank; zero leaves threading unset.
    #[arg(short = 't', long, value_name = "N", default_value_t = 0)]
    pub threads: u32,

    /// The directory to run in; defaults to the current directory.
    #[arg(short = 'd', long, value_name = "DIR", default_value = ".")]
    pub dir: PathBuf,
}

impl JobArgs {
    /// Gets the requested resources.
    pub fn resources(&self) -> Resources {
        Resources::new(self.ranks, self.threads)
    }
}

/// Resolves the configured batch manager into an executor.
pub fn resolve(config: &Config) -> Result<Executor> {
    BackendRegistry::new()
        .resolve(config)
        .context("failed to select a batch manager")
}
