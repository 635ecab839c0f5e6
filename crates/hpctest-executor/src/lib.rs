//! Job execution for the hpctest harness.
//!
//! A harness resolves a single [`Executor`] at startup from a [`Config`] and
//! a [`BackendRegistry`]. The executor runs commands either in the foreground
//! (blocking until the command exits) or in the background through a batch
//! scheduler, and tracks background jobs until they are observed finished or
//! are killed.
//!
//! The supported backends are:
//!
//! * `Shell`: runs commands as children of the current process.
//! * `Slurm`: `srun` in the foreground, `sbatch` in the background.
//! * `Summit`: an LSF-style scheduler driven with `jsrun` and `bsub`.
//!
//! ```no_run
//! # async fn example() -> Result<(), hpctest_executor::ExecutorError> {
//! use hpctest_executor::BackendRegistry;
//! use hpctest_executor::Config;
//! use hpctest_executor::JobRequest;
//!
//! let executor = BackendRegistry::new().resolve(&Config::default())?;
//! let request = JobRequest::builder()
//!     .command("echo hello")
//!     .run_dir("/tmp")
//!     .description("hello test")
//!     .build();
//! executor.run(&request).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
mod error;
mod executor;
mod job;
pub mod probe;
mod process;
pub mod registry;

pub use backend::Backend;
pub use backend::BackendFactory;
pub use backend::BackendRegistry;
pub use backend::ExecutionBackend;
pub use backend::shell::ShellBackend;
pub use backend::slurm::SlurmBackend;
pub use backend::summit::SummitBackend;
pub use config::Config;
pub use error::ExecutorError;
pub use error::Result;
pub use executor::Executor;
pub use job::DEFAULT_JOB_NAME;
pub use job::JobId;
pub use job::JobRequest;
pub use job::Resources;
pub use job::Submission;
pub use probe::Availability;
