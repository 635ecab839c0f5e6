//! Implementation of the SLURM backend.
//!
//! Foreground jobs are launched directly with `srun`. Background jobs are
//! written to a batch script in the job's run directory and submitted with
//! `sbatch`; their completion is observed by listing the user's jobs with
//! `squeue` and noticing which tracked jobs are no longer listed.

use std::collections::HashSet;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::ExecutionBackend;
use crate::ExecutorError;
use crate::JobId;
use crate::JobRequest;
use crate::Result;
use crate::Submission;
use crate::config::BatchConfig;
use crate::config::SlurmBackendConfig;
use crate::process::capture;
use crate::process::export_lines;

/// The name of the backend.
const NAME: &str = "Slurm";

/// Matches the acknowledgement printed by `sbatch`, e.g. `Submitted batch job
/// 278025`.
static SBATCH_ACKNOWLEDGEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Submitted batch job ([0-9]+)").expect("regex should compile"));

/// Matches the leading job id of an `squeue` line.
///
/// Array and heterogeneous job suffixes (`_3`, `+1`) are not part of the id.
static SQUEUE_JOB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([0-9]+)").expect("regex should compile"));

/// The job states `squeue` can report for a job that will not run again.
const TERMINAL_STATES: &[&str] = &[
    "BOOT_FAIL",
    "CANCELLED",
    "COMPLETED",
    "DEADLINE",
    "FAILED",
    "NODE_FAIL",
    "OUT_OF_MEMORY",
    "PREEMPTED",
    "TIMEOUT",
];

/// Extracts the job id from the output of `sbatch`.
pub fn parse_sbatch_acknowledgement(output: &str) -> Option<JobId> {
    SBATCH_ACKNOWLEDGEMENT
        .captures(output)
        .map(|captures| JobId::new(&captures[1]))
}

/// Extracts the job ids from `squeue --noheader --format=%i` output.
///
/// Returns the ids along with the lines that did not start with a job id.
pub fn parse_squeue_listing(output: &str) -> (HashSet<JobId>, Vec<&str>) {
    let mut ids = HashSet::new();
    let mut unexpected = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        match SQUEUE_JOB_ID.captures(line) {
            Some(captures) => {
                ids.insert(JobId::new(&captures[1]));
            }
            None => unexpected.push(line),
        }
    }

    (ids, unexpected)
}

/// Interprets `squeue --noheader --format=%T --jobs=<id>` output.
///
/// Returns `true` if the job is no longer pending or running.
pub fn parse_squeue_state(output: &str) -> bool {
    match output.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(state) => TERMINAL_STATES.contains(&state),
        None => true,
    }
}

/// Formats the value of an `--export` option.
///
/// The job's own variables are not listed here because `--export` splits
/// its value at commas; they reach the job through the environment of `srun`
/// or through `export` lines in the batch script instead.
fn export_value(request: &JobRequest) -> String {
    let threads = request.resources().threads;
    if threads > 0 && !request.env().contains_key("OMP_NUM_THREADS") {
        format!("ALL,OMP_NUM_THREADS={threads}")
    } else {
        "ALL".to_string()
    }
}

/// Builds the `srun` arguments for a foreground job.
///
/// The job's command line is run by `shell` on each allocated task.
pub fn srun_arguments(
    config: &SlurmBackendConfig,
    shell: &str,
    request: &JobRequest,
) -> Vec<String> {
    let resources = request.resources();
    let mut args = vec![
        format!("--account={}", config.account),
        format!("--partition={}", config.partition),
        format!("--chdir={}", request.run_dir().display()),
        format!("--export={}", export_value(request)),
    ];
    if config.exclusive {
        args.push("--exclusive".to_string());
    }
    args.extend([
        format!("--ntasks={}", resources.scheduler_tasks()),
        format!("--cpus-per-task={}", resources.scheduler_cpus_per_task()),
        format!("--time={}", config.time),
        "--mail-type=NONE".to_string(),
        shell.to_string(),
        "-c".to_string(),
        request.command().to_string(),
    ]);
    args
}

/// Renders the batch script for a background job.
///
/// Fails if one of the job's environment variables cannot be exported.
pub fn render_batch_script(config: &SlurmBackendConfig, request: &JobRequest) -> Result<String> {
    let resources = request.resources();
    let mut directives = vec![
        format!("--job-name={}", request.name()),
        format!("--account={}", config.account),
        format!("--partition={}", config.partition),
        format!("--export={}", export_value(request)),
    ];
    if config.exclusive {
        directives.push("--exclusive".to_string());
    }
    directives.extend([
        format!("--ntasks={}", resources.scheduler_tasks()),
        format!("--cpus-per-task={}", resources.scheduler_cpus_per_task()),
        format!("--time={}", config.time),
        format!("--output={}", request.out_path().display()),
        "--mail-type=NONE".to_string(),
    ]);
    directives.extend(config.extra_sbatch_args.iter().cloned());

    let mut script = String::from("#!/bin/bash\n");
    for directive in directives {
        script.push_str(&format!("#SBATCH {directive}\n"));
    }
    for line in export_lines(request.env())? {
        script.push_str(&line);
        script.push('\n');
    }
    script.push_str(request.command());
    script.push('\n');
    Ok(script)
}

/// Writes a batch script to a uniquely named file in `dir`.
fn write_batch_script(dir: &Path, script: &str) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("sbatch-")
        .suffix(".slurm")
        .tempfile_in(dir)?;
    file.write_all(script.as_bytes())?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

/// Runs jobs with SLURM.
#[derive(Debug)]
pub struct SlurmBackend {
    /// The shell used to run `srun` command lines.
    shell: String,
    /// Whether to ask `sbatch` for verbose output.
    verbose: bool,
    /// The SLURM configuration.
    config: SlurmBackendConfig,
}

impl SlurmBackend {
    /// Creates a new SLURM backend.
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            verbose: config.debug.verbose,
            config: config.slurm.clone(),
        }
    }
}

impl ExecutionBackend for SlurmBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn default_to_background(&self) -> bool {
        true
    }

    fn required_commands(&self) -> Vec<String> {
        vec![
            self.config.srun.clone(),
            self.config.sbatch.clone(),
            self.config.squeue.clone(),
            self.config.scancel.clone(),
        ]
    }

    fn wrap(&self, command: &str, _mpi_bin: Option<&Path>, _ranks: u32, threads: u32) -> String {
        // `srun` and the batch allocation place the ranks.
        super::shell::wrap_command(command, None, 0, threads)
    }

    async fn run(&self, request: &JobRequest) -> Result<String> {
        let args = srun_arguments(&self.config, &self.shell, request);
        info!(
            description = request.description(),
            "running `{}` via srun",
            request.command()
        );

        let mut command = Command::new(&self.config.srun);
        command
            .args(&args)
            .current_dir(request.run_dir())
            .envs(request.env());
        let result = capture(command).await;
        if !result.success() {
            return Err(ExecutorError::Execution {
                output: result.output,
                code: result.code,
            });
        }

        Ok(result.output)
    }

    async fn submit(&self, request: &JobRequest) -> Result<Submission> {
        let script = render_batch_script(&self.config, request)?;
        debug!(%script, "generated sbatch script");
        let path = write_batch_script(request.run_dir(), &script)?;

        let mut command = Command::new(&self.config.sbatch);
        if self.verbose {
            command.arg("--verbose");
        }
        command.arg(&path).current_dir(request.run_dir());

        info!(
            description = request.description(),
            script = %path.display(),
            "submitting job"
        );
        let result = capture(command).await;
        debug!(output = %result.output, code = result.code, "sbatch finished");

        if !result.success() {
            return Ok(Submission::rejected(result.output, result.code));
        }

        match parse_sbatch_acknowledgement(&result.output) {
            Some(id) => Ok(Submission::accepted(id, result.output)),
            None => {
                error!(output = %result.output, "unexpected output from sbatch");
                Ok(Submission::rejected(result.output, 1))
            }
        }
    }

    async fn is_finished(&self, id: &JobId) -> Result<bool> {
        let mut command = Command::new(&self.config.squeue);
        command
            .arg("--noheader")
            .arg("--format=%T")
            .arg(format!("--jobs={id}"));
        let result = capture(command).await;

        if result.success() {
            return Ok(parse_squeue_state(&result.output));
        }

        // Jobs that have aged out of the controller are rejected by id.
        if result.output.contains("Invalid job id") {
            return Ok(true);
        }

        Err(ExecutorError::PollFailed {
            backend: NAME,
            output: result.output,
            code: result.code,
        })
    }

    async fn kill(&self, id: &JobId) -> Result<()> {
        let mut command = Command::new(&self.config.scancel);
        command.arg(id.as_str());
        let result = capture(command).await;
        if !result.success() {
            return Err(ExecutorError::KillFailed {
                job: id.clone(),
                output: result.output,
                code: result.code,
            });
        }

        Ok(())
    }

    async fn active_jobs(&self) -> Result<Option<HashSet<JobId>>> {
        let mut command = Command::new(&self.config.squeue);
        command.arg("--me").arg("--noheader").arg("--format=%i");
        let result = capture(command).await;
        if !result.success() {
            return Err(ExecutorError::PollFailed {
                backend: NAME,
                output: result.output,
                code: result.code,
            });
        }

        let (ids, unexpected) = parse_squeue_listing(&result.output);
        for line in unexpected {
            error!(line, "unexpected output from squeue");
        }

        Ok(Some(ids))
    }
}
