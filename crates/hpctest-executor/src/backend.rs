//! Implementation of job execution backends.

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use tracing::warn;

use crate::Availability;
use crate::Config;
use crate::Executor;
use crate::ExecutorError;
use crate::JobId;
use crate::JobRequest;
use crate::Result;
use crate::Submission;

pub mod shell;
pub mod slurm;
pub mod summit;

use shell::ShellBackend;
use slurm::SlurmBackend;
use summit::SummitBackend;

/// Represents a job execution backend.
///
/// Backends only talk to the operating system or the scheduler; the
/// [`Executor`] owns the registry of running jobs.
#[allow(async_fn_in_trait)]
pub trait ExecutionBackend {
    /// Gets the name the backend is registered under.
    fn name(&self) -> &'static str;

    /// Whether jobs should run in the background unless asked otherwise.
    fn default_to_background(&self) -> bool;

    /// Gets the external commands the backend needs.
    fn required_commands(&self) -> Vec<String>;

    /// Checks whether the backend can run on this machine.
    fn availability(&self) -> Availability {
        crate::probe::check_commands(self.required_commands())
    }

    /// Decorates a command with MPI and OpenMP launch syntax.
    ///
    /// A `ranks` of zero disables the MPI launcher and a `threads` of zero
    /// disables OpenMP threading.
    fn wrap(&self, command: &str, mpi_bin: Option<&Path>, ranks: u32, threads: u32) -> String;

    /// Runs a job in the foreground.
    ///
    /// Returns the job's stdout, or an [`ExecutorError::Execution`] error if
    /// the job exits with a nonzero status.
    async fn run(&self, request: &JobRequest) -> Result<String>;

    /// Submits a job for background execution.
    ///
    /// Returns an error only if the submission could not be prepared locally.
    async fn submit(&self, request: &JobRequest) -> Result<Submission>;

    /// Queries whether a background job has finished.
    async fn is_finished(&self, id: &JobId) -> Result<bool>;

    /// Terminates a background job.
    async fn kill(&self, id: &JobId) -> Result<()>;

    /// Lists every active job of the current user in one query.
    ///
    /// Returns `None` if the backend cannot list jobs in bulk, in which case
    /// each job is queried with [`is_finished`](Self::is_finished).
    async fn active_jobs(&self) -> Result<Option<HashSet<JobId>>> {
        Ok(None)
    }
}

/// The supported backends.
#[derive(Debug)]
pub enum Backend {
    /// Runs jobs as children of this process.
    Shell(ShellBackend),
    /// Runs jobs with SLURM.
    Slurm(SlurmBackend),
    /// Runs jobs with LSF on Summit-style machines.
    Summit(SummitBackend),
}

/// Forwards a method call to the backend variant.
macro_rules! dispatch {
    ($self:ident, $backend:ident => $call:expr) => {
        match $self {
            Self::Shell($backend) => $call,
            Self::Slurm($backend) => $call,
            Self::Summit($backend) => $call,
        }
    };
}

impl ExecutionBackend for Backend {
    fn name(&self) -> &'static str {
        dispatch!(self, b => b.name())
    }

    fn default_to_background(&self) -> bool {
        dispatch!(self, b => b.default_to_background())
    }

    fn required_commands(&self) -> Vec<String> {
        dispatch!(self, b => b.required_commands())
    }

    fn wrap(&self, command: &str, mpi_bin: Option<&Path>, ranks: u32, threads: u32) -> String {
        dispatch!(self, b => b.wrap(command, mpi_bin, ranks, threads))
    }

    async fn run(&self, request: &JobRequest) -> Result<String> {
        dispatch!(self, b => b.run(request).await)
    }

    async fn submit(&self, request: &JobRequest) -> Result<Submission> {
        dispatch!(self, b => b.submit(request).await)
    }

    async fn is_finished(&self, id: &JobId) -> Result<bool> {
        dispatch!(self, b => b.is_finished(id).await)
    }

    async fn kill(&self, id: &JobId) -> Result<()> {
        dispatch!(self, b => b.kill(id).await)
    }

    async fn active_jobs(&self) -> Result<Option<HashSet<JobId>>> {
        dispatch!(self, b => b.active_jobs().await)
    }
}

/// Creates a backend from the configuration.
pub type BackendFactory = fn(&Config) -> Backend;

/// Maps batch manager names to the backends that implement them.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    /// The registered factories, in registration order.
    factories: IndexMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Creates a registry containing the built-in backends.
    ///
    /// `Lsf` is registered as an alias of `Summit`.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("Shell", |config| {
            Backend::Shell(ShellBackend::new(&config.batch))
        });
        registry.register("Slurm", |config| {
            Backend::Slurm(SlurmBackend::new(&config.batch))
        });
        registry.register("Summit", |config| {
            Backend::Summit(SummitBackend::new(&config.batch))
        });
        registry.register("Lsf", |config| {
            Backend::Summit(SummitBackend::new(&config.batch))
        });
        registry
    }

    /// Creates a registry with no backends.
    pub fn empty() -> Self {
        Self {
            factories: Default::default(),
        }
    }

    /// Registers a backend factory under the given name.
    ///
    /// Registering an existing name replaces its factory.
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Gets the registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Creates the backend registered under the given name.
    pub fn create(&self, name: &str, config: &Config) -> Result<Backend> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ExecutorError::UnknownBackend {
                name: name.to_string(),
                known: self.names().collect::<Vec<_>>().join(", "),
            })?;
        Ok(factory(config))
    }

    /// Resolves the configured backend into an executor.
    ///
    /// Fails if the configured name is not registered, or if the backend's
    /// tools are missing and `batch.debug.force` is not set.
    ///
    /// This should be called once at startup; the returned executor is then
    /// shared by reference.
    pub fn resolve(&self, config: &Config) -> Result<Executor> {
        let name = config.batch.manager.as_str();
        let backend = self.create(name, config)?;

        let availability = backend.availability();
        if !availability.is_available() {
            if !config.batch.debug.force {
                return Err(ExecutorError::Unavailable {
                    backend: name.to_string(),
                    reason: availability.to_string(),
                });
            }

            warn!(
                backend = name,
                "using batch manager `{name}` even though {availability}"
            );
        }

        Ok(Executor::new(backend, config.batch.poll_interval()))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
