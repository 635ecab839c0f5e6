//! Job identifiers, requests, and submission results.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

/// The job name used when a request does not specify one.
pub const DEFAULT_JOB_NAME: &str = "hpctest";

/// Identifies a job tracked by an executor.
///
/// For the shell backend this is the child's process id; for scheduler
/// backends it is the id assigned by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a new job id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gets the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u32> for JobId {
    fn from(id: u32) -> Self {
        Self(id.to_string())
    }
}

/// The parallel resources requested for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resources {
    /// The number of message-passing ranks.
    ///
    /// Zero means the command is not launched with MPI.
    pub ranks: u32,
    /// The number of shared-memory threads per rank.
    ///
    /// Zero means the command is not run with OpenMP threading.
    pub threads: u32,
}

impl Resources {
    /// Creates a new resource request.
    pub fn new(ranks: u32, threads: u32) -> Self {
        Self { ranks, threads }
    }

    /// The task count to request from a scheduler.
    ///
    /// Schedulers have no notion of zero tasks, so a non-MPI job is one task.
    pub fn scheduler_tasks(&self) -> u32 {
        self.ranks.max(1)
    }

    /// The CPU count per task to request from a scheduler.
    pub fn scheduler_cpus_per_task(&self) -> u32 {
        self.threads.max(1)
    }
}

/// A request to run a command, in the foreground or in the background.
#[derive(Debug, Clone, bon::Builder)]
pub struct JobRequest {
    /// The shell command line to run.
    #[builder(into)]
    command: String,
    /// The directory to run the command in.
    #[builder(into)]
    run_dir: PathBuf,
    /// The requested parallel resources.
    #[builder(default)]
    resources: Resources,
    /// Where the job's output should be written.
    #[builder(into)]
    out_path: Option<PathBuf>,
    /// The job name given to the scheduler.
    #[builder(into, default = DEFAULT_JOB_NAME.to_string())]
    name: String,
    /// The human-readable description of the job.
    #[builder(into)]
    description: String,
    /// Additional environment variables for the command.
    #[builder(default)]
    env: IndexMap<String, String>,
    /// A directory to prepend to `PATH` when running under a local shell.
    #[builder(into)]
    bin_path: Option<PathBuf>,
}

impl JobRequest {
    /// Gets the command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Gets the run directory.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Gets the requested resources.
    pub fn resources(&self) -> Resources {
        self.resources
    }

    /// Gets the output path given in the request, if any.
    pub fn requested_out_path(&self) -> Option<&Path> {
        self.out_path.as_deref()
    }

    /// Gets the path the job's output is written to.
    ///
    /// Defaults to `<run_dir>/<name>.out`.
    pub fn out_path(&self) -> PathBuf {
        self.out_path
            .clone()
            .unwrap_or_else(|| self.run_dir.join(format!("{name}.out", name = self.name)))
    }

    /// Gets the job name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the job description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Gets the additional environment variables.
    pub fn env(&self) -> &IndexMap<String, String> {
        &self.env
    }

    /// Gets the directory prepended to `PATH`, if any.
    pub fn bin_path(&self) -> Option<&Path> {
        self.bin_path.as_deref()
    }
}

/// The result of submitting a job for background execution.
///
/// Submission failures are reported here rather than as errors so that a
/// harness can keep submitting the rest of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// The id of the accepted job; `None` when the submission failed.
    pub job_id: Option<JobId>,
    /// The captured output of the submission command.
    pub output: String,
    /// The submission status; zero means the job was accepted.
    pub code: i32,
}

impl Submission {
    /// Creates a submission for an accepted job.
    pub fn accepted(job_id: JobId, output: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id),
            output: output.into(),
            code: 0,
        }
    }

    /// Creates a submission for a rejected job.
    ///
    /// A zero code is replaced with `1` so that a rejection is never mistaken
    /// for acceptance.
    pub fn rejected(output: impl Into<String>, code: i32) -> Self {
        Self {
            job_id: None,
            output: output.into(),
            code: if code == 0 { 1 } else { code },
        }
    }

    /// Whether the job was accepted.
    pub fn is_accepted(&self) -> bool {
        self.code == 0 && self.job_id.is_some()
    }
}
