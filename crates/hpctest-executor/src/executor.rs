//! The executor through which a harness runs and tracks jobs.

use std::io;
use std::path::Path;
use std::time::Duration;

use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::Availability;
use crate::Backend;
use crate::ExecutionBackend;
use crate::ExecutorError;
use crate::JobId;
use crate::JobRequest;
use crate::Result;
use crate::Submission;
use crate::registry::JobRegistry;
use crate::registry::TrackedJob;

/// Runs jobs on a backend and tracks the ones running in the background.
///
/// An executor is created once with
/// [`BackendRegistry::resolve`](crate::BackendRegistry::resolve) and shared
/// by reference for the rest of the process.
#[derive(Debug)]
pub struct Executor {
    /// The backend jobs run on.
    backend: Backend,
    /// The background jobs that have not been observed finished or killed.
    jobs: Mutex<JobRegistry>,
    /// The delay between polls in [`Executor::wait_finished`].
    poll_interval: Duration,
}

impl Executor {
    /// Creates a new executor for the given backend.
    pub fn new(backend: Backend, poll_interval: Duration) -> Self {
        Self {
            backend,
            jobs: Mutex::new(JobRegistry::new()),
            poll_interval,
        }
    }

    /// Gets the backend.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Gets the name of the backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Whether jobs should run in the background unless asked otherwise.
    pub fn default_to_background(&self) -> bool {
        self.backend.default_to_background()
    }

    /// Checks whether the backend's tools are present.
    pub fn availability(&self) -> Availability {
        self.backend.availability()
    }

    /// Decorates a command with the backend's MPI and OpenMP launch syntax.
    pub fn wrap(&self, command: &str, mpi_bin: Option<&Path>, ranks: u32, threads: u32) -> String {
        self.backend.wrap(command, mpi_bin, ranks, threads)
    }

    /// Runs a job in the foreground, blocking until it exits.
    ///
    /// If the request names an output path, the job's stdout is written
    /// there.
    pub async fn run(&self, request: &JobRequest) -> Result<()> {
        let output = self.backend.run(request).await?;
        if let Some(path) = request.requested_out_path() {
            debug!(path = %path.display(), "writing job output");
            tokio::fs::write(path, output).await?;
        }

        Ok(())
    }

    /// Submits a job for background execution.
    ///
    /// An accepted job is tracked until it is observed finished or killed.
    /// Failures, including local ones such as being unable to write a batch
    /// script, are reported in the returned [`Submission`].
    pub async fn submit_job(&self, request: &JobRequest) -> Submission {
        let submission = match self.backend.submit(request).await {
            Ok(submission) => submission,
            Err(e) => {
                let code = match &e {
                    ExecutorError::Io(e) => e.raw_os_error().unwrap_or(-1),
                    _ => -1,
                };
                Submission::rejected(e.to_string(), code)
            }
        };

        match &submission.job_id {
            Some(id) if submission.is_accepted() => {
                info!(
                    job = %id,
                    description = request.description(),
                    backend = self.backend_name(),
                    "job submitted"
                );
                let job = TrackedJob::new(request.description(), request.out_path());
                self.jobs.lock().add(id.clone(), job);
            }
            _ => warn!(
                description = request.description(),
                code = submission.code,
                output = %submission.output,
                "job submission failed"
            ),
        }

        submission
    }

    /// Queries whether a background job has finished.
    ///
    /// A finished job is no longer tracked.
    pub async fn is_finished(&self, id: &JobId) -> Result<bool> {
        let finished = self.backend.is_finished(id).await?;
        if finished && let Some(job) = self.jobs.lock().remove(id) {
            info!(job = %id, description = job.description(), "job finished");
        }

        Ok(finished)
    }

    /// Waits for a background job to finish, polling at the configured
    /// interval.
    pub async fn wait_finished(&self, id: &JobId) -> Result<()> {
        while !self.is_finished(id).await? {
            tokio::time::sleep(self.poll_interval).await;
        }

        Ok(())
    }

    /// Finds the tracked jobs that have finished since the last poll.
    ///
    /// The returned jobs are no longer tracked. Jobs submitted or killed
    /// while the poll is in progress are left alone.
    pub async fn poll_for_finished_jobs(&self) -> Result<IndexSet<JobId>> {
        let snapshot = self.jobs.lock().ids();
        if snapshot.is_empty() {
            return Ok(IndexSet::new());
        }

        let candidates: Vec<JobId> = match self.backend.active_jobs().await? {
            Some(active) => snapshot
                .into_iter()
                .filter(|id| !active.contains(id))
                .collect(),
            None => {
                let mut finished = Vec::new();
                for id in snapshot {
                    match self.backend.is_finished(&id).await {
                        Ok(true) => finished.push(id),
                        Ok(false) => {}
                        Err(e) => error!(job = %id, "failed to query job status: {e}"),
                    }
                }
                finished
            }
        };

        let mut jobs = self.jobs.lock();
        let mut finished = IndexSet::new();
        for id in candidates {
            if let Some(job) = jobs.remove(&id) {
                info!(job = %id, description = job.description(), "job finished");
                finished.insert(id);
            }
        }

        Ok(finished)
    }

    /// Kills a background job.
    ///
    /// The job is no longer tracked even if the backend fails to kill it, so
    /// a failed kill may leave the job running unobserved.
    pub async fn kill(&self, id: &JobId) -> Result<()> {
        let job = self.jobs.lock().remove(id);
        let Some(job) = job else {
            return Err(ExecutorError::JobNotFound(id.clone()));
        };

        info!(job = %id, description = job.description(), "killing job");
        self.backend.kill(id).await.inspect_err(|e| {
            error!(job = %id, "{e}");
            warn!(
                job = %id,
                description = job.description(),
                out = %job.out_path().display(),
                "job is no longer tracked and may still be running"
            );
        })
    }

    /// Kills every tracked job.
    ///
    /// Returns the ids of the jobs that could not be killed.
    pub async fn kill_all(&self) -> Vec<JobId> {
        let ids = self.jobs.lock().ids();
        let mut failed = Vec::new();
        for id in ids {
            match self.kill(&id).await {
                Ok(()) | Err(ExecutorError::JobNotFound(_)) => {}
                Err(_) => failed.push(id),
            }
        }

        failed
    }

    /// Gets the description of a tracked job.
    pub fn description(&self, id: &JobId) -> Result<String> {
        self.jobs
            .lock()
            .get(id)
            .map(|job| job.description().to_string())
            .ok_or_else(|| ExecutorError::JobNotFound(id.clone()))
    }

    /// Reads the output a tracked job has written so far.
    pub async fn stdout(&self, id: &JobId) -> Result<String> {
        let path = self
            .jobs
            .lock()
            .get(id)
            .map(|job| job.out_path().to_path_buf())
            .ok_or_else(|| ExecutorError::JobNotFound(id.clone()))?;

        match tokio::fs::read_to_string(&path).await {
            Ok(output) => Ok(output),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Gets the ids of the tracked jobs, in submission order.
    pub fn running_jobs(&self) -> Vec<JobId> {
        self.jobs.lock().ids()
    }
}
