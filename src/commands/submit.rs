//! Implementation of the `submit` subcommand.
//!
//! Submits a batch of commands as background jobs and polls the batch
//! manager until every accepted job has finished.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use anyhow::bail;
use clap::Parser;
use colored::Colorize;
use hpctest_executor::Config;
use hpctest_executor::JobId;
use hpctest_executor::JobRequest;
use indexmap::IndexMap;
use tokio::select;
use tracing::debug;
use tracing::error;

use super::JobArgs;
use super::resolve;

/// Arguments to the `submit` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The jobs' placement and resources.
    #[command(flatten)]
    pub job: JobArgs,

    /// The directory containing `mpiexec`.
    #[arg(long, value_name = "DIR")]
    pub mpi_bin: Option<PathBuf>,

    /// The commands to submit, one job per command.
    #[arg(required = true, value_name = "COMMAND")]
    pub commands: Vec<String>,
}

/// Runs the `submit` subcommand.
pub async fn submit(args: Args, config: Config) -> Result<()> {
    let executor = resolve(&config)?;
    let resources = args.job.resources();

    let mut pending: IndexMap<JobId, (String, PathBuf)> = IndexMap::new();
    let mut rejected = 0;
    for (index, command) in args.commands.iter().enumerate() {
        let name = format!("hpctest-{index}");
        let request = JobRequest::builder()
            .command(executor.wrap(
                command,
                args.mpi_bin.as_deref(),
                resources.ranks,
                resources.threads,
            ))
            .run_dir(&args.job.dir)
            .resources(resources)
            .name(name)
            .description(command)
            .build();

        let submission = executor.submit_job(&request).await;
        match submission.job_id {
            Some(id) => {
                println!("{command}: submitted as job {id}");
                pending.insert(id, (command.clone(), request.out_path()));
            }
            None => {
                rejected += 1;
                println!(
                    "{command}: {failed} (exit code {code}): {output}",
                    failed = "submission failed".red(),
                    code = submission.code,
                    output = submission.output.trim()
                );
            }
        }
    }

    while !pending.is_empty() {
        select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                error!("interrupted: killing {count} running job(s)", count = pending.len());
                for id in executor.kill_all().await {
                    error!(job = %id, "job could not be killed");
                }
                return Err(anyhow!("interrupted with {count} job(s) running", count = pending.len()));
            }
            _ = tokio::time::sleep(config.batch.poll_interval()) => {}
        }

        let finished = executor
            .poll_for_finished_jobs()
            .await
            .context("failed to poll for finished jobs")?;
        debug!(finished = finished.len(), running = pending.len(), "polled batch manager");

        for id in finished {
            if let Some((command, out_path)) = pending.shift_remove(&id) {
                println!(
                    "{command}: job {id} {finished} (output in `{out}`)",
                    finished = "finished".green(),
                    out = out_path.display()
                );
            }
        }
    }

    if rejected > 0 {
        bail!(
            "{rejected} of {total} job(s) could not be submitted",
            total = args.commands.len()
        );
    }

    Ok(())
}
