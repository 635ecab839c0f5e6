//! Error types for job execution.

use crate::JobId;

/// Represents an error from resolving a backend or operating on jobs.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The configured backend name is not registered.
    #[error("configuration specifies unknown batch manager `{name}` (known managers: {known})")]
    UnknownBackend {
        /// The configured name.
        name: String,
        /// The registered names, comma separated.
        known: String,
    },

    /// The backend's required tools are missing and availability was not
    /// forced.
    #[error("configuration specifies `{backend}` as the batch manager, but {reason}")]
    Unavailable {
        /// The backend name.
        backend: String,
        /// Why the backend cannot run here.
        reason: String,
    },

    /// A foreground command exited with a nonzero status.
    #[error("command failed with exit code {code}: {output}")]
    Execution {
        /// The command's captured error output.
        output: String,
        /// The command's exit code.
        code: i32,
    },

    /// The scheduler status query itself failed.
    ///
    /// Polling is the only completion signal, so callers should treat this as
    /// fatal.
    #[error("failed to poll `{backend}` for job status (exit code {code}): {output}")]
    PollFailed {
        /// The backend name.
        backend: &'static str,
        /// The captured output of the status command.
        output: String,
        /// The status command's exit code.
        code: i32,
    },

    /// A kill request was rejected; the job may already be gone.
    #[error("attempt to kill job `{job}` failed (exit code {code}): {output}")]
    KillFailed {
        /// The job that could not be killed.
        job: JobId,
        /// The captured output of the kill command.
        output: String,
        /// The kill command's exit code.
        code: i32,
    },

    /// A job environment variable cannot be passed to a batch script.
    #[error("environment variable `{name}` cannot be exported: {reason}")]
    InvalidEnvironment {
        /// The variable name.
        name: String,
        /// Why the variable was rejected.
        reason: String,
    },

    /// The job is not tracked by the executor.
    #[error("job `{0}` is not tracked by the executor")]
    JobNotFound(JobId),

    /// An I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;
