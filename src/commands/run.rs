//! Implementation of the `run` subcommand.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use anyhow::bail;
use clap::Parser;
use hpctest_executor::Config;
use hpctest_executor::DEFAULT_JOB_NAME;
use hpctest_executor::JobRequest;
use tokio::select;
use tracing::error;
use tracing::info;

use super::JobArgs;
use super::resolve;

/// Arguments to the `run` subcommand.
#[derive(Parser, Debug)]
pub struct Args {
    /// The job's placement and resources.
    #[command(flatten)]
    pub job: JobArgs,

    /// The file to write the command's output to.
    ///
    /// Defaults to `<DIR>/<NAME>.out`.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// The directory containing `mpiexec`.
    #[arg(long, value_name = "DIR")]
    pub mpi_bin: Option<PathBuf>,

    /// A directory to prepend to `PATH` when running under the shell.
    #[arg(long, value_name = "DIR")]
    pub bin_path: Option<PathBuf>,

    /// The job name given to the batch manager.
    #[arg(long, value_name = "NAME", default_value = DEFAULT_JOB_NAME)]
    pub name: String,

    /// The job description; defaults to the command.
    #[arg(long, value_name = "TEXT")]
    pub description: Option<String>,

    /// Submits the command as a background job and waits for it, even if
    /// the batch manager runs commands in the foreground by default.
    #[arg(long)]
    pub background: bool,

    /// The command to run.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Runs the `run` subcommand.
pub async fn run(args: Args, config: Config) -> Result<()> {
    let executor = resolve(&config)?;
    let resources = args.job.resources();
    let command = args.command.join(" ");
    let wrapped = executor.wrap(
        &command,
        args.mpi_bin.as_deref(),
        resources.ranks,
        resources.threads,
    );
    let out_path = args
        .output
        .unwrap_or_else(|| args.job.dir.join(format!("{name}.out", name = args.name)));

    let request = JobRequest::builder()
        .command(wrapped)
        .run_dir(&args.job.dir)
        .resources(resources)
        .out_path(&out_path)
        .name(&args.name)
        .description(args.description.unwrap_or(command))
        .maybe_bin_path(args.bin_path)
        .build();

    if args.background || executor.default_to_background() {
        let submission = executor.submit_job(&request).await;
        let Some(id) = submission.job_id else {
            bail!(
                "failed to submit job (exit code {code}): {output}",
                code = submission.code,
                output = submission.output.trim()
            );
        };

        info!(job = %id, backend = executor.backend_name(), "waiting for job");
        select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                error!(job = %id, "interrupted: killing job");
                if let Err(e) = executor.kill(&id).await {
                    error!("{e}");
                }
                return Err(anyhow!("job `{id}` was interrupted"));
            }
            res = executor.wait_finished(&id) => res.with_context(|| format!("failed to wait for job `{id}`"))?,
        }
    } else {
        executor.run(&request).await.context("command failed")?;
    }

    let output = tokio::fs::read_to_string(&out_path)
        .await
        .with_context(|| format!("failed to read job output `{}`", out_path.display()))?;
    print!("{output}");
    Ok(())
}
