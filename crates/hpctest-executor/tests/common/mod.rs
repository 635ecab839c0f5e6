//! Helpers shared by the backend integration tests.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use hpctest_executor::JobRequest;

/// Writes an executable `sh` script standing in for a scheduler tool.
///
/// Returns the script's path as configured in a backend's config.
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_str().unwrap().to_string()
}

/// Writes a fake tool that logs its arguments, one invocation per line, to
/// `<name>.log` and then runs `body`.
pub fn logging_tool(dir: &Path, name: &str, body: &str) -> String {
    let log = dir.join(format!("{name}.log"));
    fake_tool(
        dir,
        name,
        &format!("echo \"$@\" >> '{log}'\n{body}", log = log.display()),
    )
}

/// Reads the invocations logged by a [`logging_tool`].
pub fn invocations(dir: &Path, name: &str) -> Vec<String> {
    fs::read_to_string(dir.join(format!("{name}.log")))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Creates a request for a trivially successful command.
pub fn request(dir: &Path, description: &str) -> JobRequest {
    JobRequest::builder()
        .command("true")
        .run_dir(dir)
        .description(description)
        .build()
}
