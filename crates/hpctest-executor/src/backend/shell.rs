//! Implementation of the shell backend.
//!
//! The shell backend runs each job as a child process of the harness. It is
//! the default backend and needs nothing beyond a shell.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::process::Stdio;

use parking_lot::Mutex;
use tokio::process::Child;
use tracing::debug;
use tracing::info;

use super::ExecutionBackend;
use crate::ExecutorError;
use crate::JobId;
use crate::JobRequest;
use crate::Result;
use crate::Submission;
use crate::config::BatchConfig;
use crate::process::capture;
use crate::process::configure;
use crate::process::shell_command;

/// Runs jobs as children of the current process.
#[derive(Debug)]
pub struct ShellBackend {
    /// The shell used to run command lines.
    shell: String,
    /// The children of background jobs that have not been reaped.
    children: Mutex<HashMap<JobId, Child>>,
}

impl ShellBackend {
    /// Creates a new shell backend.
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            children: Default::default(),
        }
    }
}

/// Decorates a command with `mpiexec` and `OMP_NUM_THREADS`.
pub fn wrap_command(command: &str, mpi_bin: Option<&Path>, ranks: u32, threads: u32) -> String {
    let mut wrapped = String::new();
    if threads > 0 {
        wrapped.push_str(&format!("OMP_NUM_THREADS={threads} "));
    }

    if ranks > 0 {
        match mpi_bin {
            Some(bin) => wrapped.push_str(&format!(
                "{mpiexec} -n {ranks} ",
                mpiexec = bin.join("mpiexec").display()
            )),
            None => wrapped.push_str(&format!("mpiexec -n {ranks} ")),
        }
    }

    wrapped.push_str(command);
    wrapped
}

impl ExecutionBackend for ShellBackend {
    fn name(&self) -> &'static str {
        "Shell"
    }

    fn default_to_background(&self) -> bool {
        false
    }

    fn required_commands(&self) -> Vec<String> {
        vec![self.shell.clone()]
    }

    fn wrap(&self, command: &str, mpi_bin: Option<&Path>, ranks: u32, threads: u32) -> String {
        wrap_command(command, mpi_bin, ranks, threads)
    }

    async fn run(&self, request: &JobRequest) -> Result<String> {
        let mut command = shell_command(&self.shell, request.command());
        configure(
            &mut command,
            request.run_dir(),
            request.env(),
            request.bin_path(),
        )?;

        info!(description = request.description(), "running `{}`", request.command());
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
        let out_path = request.out_path();
        let stdout = File::create(&out_path)?;
        let stderr = stdout.try_clone()?;

        let mut command = shell_command(&self.shell, request.command());
        configure(
            &mut command,
            request.run_dir(),
            request.env(),
            request.bin_path(),
        )?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        // The job gets its own process group so that `kill` reaches every
        // process the command line starts.
        #[cfg(unix)]
        command.process_group(0);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(Submission::rejected(
                    e.to_string(),
                    e.raw_os_error().unwrap_or(-1),
                ));
            }
        };

        let Some(pid) = child.id() else {
            return Ok(Submission::rejected("child exited before it was tracked", -1));
        };

        let id = JobId::from(pid);
        debug!(job = %id, out = %out_path.display(), "spawned background shell job");
        self.children.lock().insert(id.clone(), child);
        Ok(Submission::accepted(id, String::new()))
    }

    async fn is_finished(&self, id: &JobId) -> Result<bool> {
        let mut children = self.children.lock();
        let Some(child) = children.get_mut(id) else {
            return Ok(true);
        };

        match child.try_wait()? {
            Some(status) => {
                debug!(job = %id, %status, "background shell job exited");
                children.remove(id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn kill(&self, id: &JobId) -> Result<()> {
        let child = self.children.lock().remove(id);
        let Some(mut child) = child else {
            return Err(ExecutorError::KillFailed {
                job: id.clone(),
                output: "no such child process".to_string(),
                code: -1,
            });
        };

        let failed = |e: std::io::Error| ExecutorError::KillFailed {
            job: id.clone(),
            output: e.to_string(),
            code: e.raw_os_error().unwrap_or(-1),
        };

        // An id of `None` means the child has already been reaped.
        if let Some(pid) = child.id() {
            kill_process_group(&mut child, pid).map_err(failed)?;
        }

        let status = child.wait().await.map_err(failed)?;
        debug!(job = %id, %status, "killed background shell job");
        Ok(())
    }
}

/// Kills every process in the group led by a background job.
#[cfg(unix)]
fn kill_process_group(_: &mut Child, pid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `kill` has no memory safety preconditions; a negative pid
    // addresses the process group.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }

    let e = std::io::Error::last_os_error();
    match e.raw_os_error() {
        // The whole group has already exited.
        Some(libc::ESRCH) => Ok(()),
        _ => Err(e),
    }
}

/// Kills a background job.
#[cfg(not(unix))]
fn kill_process_group(child: &mut Child, _: u32) -> std::io::Result<()> {
    child.start_kill()
}
