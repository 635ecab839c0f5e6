//! Invocation of external commands with captured output.

use std::env;
use std::io;
use std::iter;
use std::path::Path;
use std::process::Stdio;

use indexmap::IndexMap;
use tokio::process::Command;
use tracing::debug;

use crate::ExecutorError;
use crate::Result;

/// The captured result of an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CapturedOutput {
    /// The command's stdout on success, or its trimmed stderr on failure.
    pub output: String,
    /// The command's exit code; nonzero on failure.
    pub code: i32,
}

impl CapturedOutput {
    /// Whether the command exited successfully.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Creates a command that runs `line` with `shell -c`.
pub(crate) fn shell_command(shell: &str, line: &str) -> Command {
    let mut command = Command::new(shell);
    command.arg("-c").arg(line);
    command
}

/// Applies a job's working directory, environment, and `PATH` prefix to a
/// command.
///
/// Fails if `bin_path` cannot be joined into `PATH`, for example because it
/// contains the path separator.
pub(crate) fn configure(
    command: &mut Command,
    run_dir: &Path,
    env: &IndexMap<String, String>,
    bin_path: Option<&Path>,
) -> io::Result<()> {
    command.current_dir(run_dir).envs(env);
    if let Some(bin_path) = bin_path {
        let existing = env::var_os("PATH").unwrap_or_default();
        let path = env::join_paths(
            iter::once(bin_path.to_path_buf()).chain(env::split_paths(&existing)),
        )
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot add `{path}` to `PATH`: {e}", path = bin_path.display()),
            )
        })?;
        command.env("PATH", path);
    }

    Ok(())
}

/// Renders a job's environment as `export` lines for a POSIX shell script.
///
/// Values are quoted so that whitespace, commas, and shell metacharacters
/// reach the job unchanged.
pub(crate) fn export_lines(env: &IndexMap<String, String>) -> Result<Vec<String>> {
    env.iter()
        .map(|(name, value)| {
            if !is_variable_name(name) {
                return Err(ExecutorError::InvalidEnvironment {
                    name: name.clone(),
                    reason: "not a valid shell variable name".to_string(),
                });
            }

            let value = shlex::try_quote(value).map_err(|e| ExecutorError::InvalidEnvironment {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            Ok(format!("export {name}={value}"))
        })
        .collect()
}

/// Whether `name` can be assigned with `export` in a POSIX shell.
fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Runs a command to completion and captures its output.
///
/// A command that cannot be spawned is reported with the OS error code (or
/// `-1`) and the error message as its output.
pub(crate) async fn capture(mut command: Command) -> CapturedOutput {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(?command, "running command");

    match command.output().await {
        Ok(output) => {
            let code = output.status.code().unwrap_or(-1);
            if output.status.success() {
                CapturedOutput {
                    output: String::from_utf8_lossy(&output.stdout).into_owned(),
                    code,
                }
            } else {
                CapturedOutput {
                    output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    code: if code == 0 { -1 } else { code },
                }
            }
        }
        Err(e) => CapturedOutput {
            output: e.to_string(),
            code: e.raw_os_error().unwrap_or(-1),
        },
    }
}
