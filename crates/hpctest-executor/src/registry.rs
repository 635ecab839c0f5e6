//! The registry of background jobs tracked by an executor.

use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;

use crate::JobId;

/// A job that was accepted for background execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedJob {
    /// The job's description.
    description: String,
    /// Where the job writes its output.
    out_path: PathBuf,
}

impl TrackedJob {
    /// Creates a new tracked job.
    pub fn new(description: impl Into<String>, out_path: impl Into<PathBuf>) -> Self {
        Self {
            description: description.into(),
            out_path: out_path.into(),
        }
    }

    /// Gets the job's description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Gets the job's output path.
    pub fn out_path(&self) -> &Path {
        &self.out_path
    }
}

/// The set of running jobs and their descriptions.
///
/// A job's id and description are stored in the same entry, so an id is
/// running exactly when it has a description. Entries keep submission order.
#[derive(Debug, Default)]
pub struct JobRegistry {
    /// The running jobs, in submission order.
    jobs: IndexMap<JobId, TrackedJob>,
}

impl JobRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a job.
    ///
    /// Returns the previous entry if the id was already tracked.
    pub fn add(&mut self, id: JobId, job: TrackedJob) -> Option<TrackedJob> {
        self.jobs.insert(id, job)
    }

    /// Stops tracking a job.
    ///
    /// Returns `None` if the job was not tracked.
    pub fn remove(&mut self, id: &JobId) -> Option<TrackedJob> {
        self.jobs.shift_remove(id)
    }

    /// Gets a tracked job.
    pub fn get(&self, id: &JobId) -> Option<&TrackedJob> {
        self.jobs.get(id)
    }

    /// Whether a job is tracked.
    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.contains_key(id)
    }

    /// Gets the ids of the running jobs, in submission order.
    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.keys().cloned().collect()
    }

    /// The number of running jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no jobs are running.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
