#![allow(clippy::missing_docs_in_private_items)]

//! LSF task execution backend for Summit-style machines.
//!
//! Foreground jobs are launched with `jsrun`. Background jobs are written to
//! a `bsub` script in a private scratch directory and submitted with `bsub`.
//!
//! LSF has no cheap per-job terminal status, so completion is observed by
//! listing all of the user's unfinished jobs with `bjobs` and treating every
//! tracked job missing from the listing as finished. See
//! <https://www.ibm.com/docs/en/spectrum-lsf/10.1.0?topic=reference-bjobs>
//! for the listing format.

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
use crate::config::SummitBackendConfig;
use crate::process::capture;
use crate::process::export_lines;

const NAME: &str = "Summit";

/// The scratch directory under the user's home for generated scripts.
const SCRATCH_DIR_NAME: &str = ".hpctest";

/// What `bjobs` says when the user has no pending or running jobs.
const NO_UNFINISHED_JOBS: &str = "No unfinished job found";

/// Matches `Job <29209> is submitted to default queue <batch>.`
static BSUB_ACKNOWLEDGEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Job <([0-9]+)> is submitted").expect("regex should compile"));

/// Matches the job id at the start of a `bjobs` line.
static BJOBS_JOB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)\s").expect("regex should compile"));

/// Extracts the job id from the output of `bsub`.
pub fn parse_bsub_acknowledgement(output: &str) -> Option<JobId> {
    BSUB_ACKNOWLEDGEMENT
        .captures(output)
        .map(|captures| JobId::new(&captures[1]))
}

/// Extracts the job ids from a `bjobs` listing.
///
/// A listing looks like:
///
/// ```text
/// JOBID USER     STAT  QUEUE      FROM_HOST   EXEC_HOST   JOB_NAME   SUBMIT_TIME
/// 3926  user1    RUN   priority   hostF        hostC      verilog    Oct 22 13:51
/// 1480  user1    PEND  priority   hostD                   generator  Oct 19 18:13
/// ```
///
/// The header line is skipped. Returns the ids along with the lines that did
/// not start with a job id.
pub fn parse_bjobs_listing(output: &str) -> (HashSet<JobId>, Vec<&str>) {
    let mut ids = HashSet::new();
    let mut unexpected = Vec::new();
    for line in output.lines().skip(1).filter(|l| !l.trim().is_empty()) {
        match BJOBS_JOB_ID.captures(line) {
            Some(captures) => {
                ids.insert(JobId::new(&captures[1]));
            }
            None => unexpected.push(line),
        }
    }

    (ids, unexpected)
}

/// Interprets the output of `bjobs <id>`.
///
/// Returns `true` if the job is not listed or its `STAT` column is `DONE` or
/// `EXIT`.
pub fn parse_bjobs_status(output: &str, id: &JobId) -> bool {
    let status = output.lines().skip(1).find_map(|line| {
        let mut columns = line.split_whitespace();
        (columns.next() == Some(id.as_str()))
            .then(|| columns.nth(1))
            .flatten()
    });

    match status {
        Some(status) => matches!(status, "DONE" | "EXIT"),
        None => true,
    }
}

/// Renders the `bsub` script for a background job.
///
/// Fails if one of the job's environment variables cannot be exported.
pub fn render_batch_script(config: &SummitBackendConfig, request: &JobRequest) -> Result<String> {
    let resources = request.resources();
    let mut lines = vec!["#!/bin/bash".to_string(), format!("#BSUB -J {}", request.name())];
    if !config.project.is_empty() {
        lines.push(format!("#BSUB -P {}", config.project));
    }
    lines.extend([
        format!("#BSUB -nnodes {}", resources.scheduler_tasks()),
        format!("#BSUB -W {}", config.time),
        format!("#BSUB -o {}", request.out_path().display()),
    ]);
    if resources.threads > 0 {
        lines.push(format!("export OMP_NUM_THREADS={}", resources.threads));
    }
    lines.extend(export_lines(request.env())?);
    lines.push(request.command().to_string());

    let mut script = lines.join("\n");
    script.push('\n');
    Ok(script)
}

/// Builds the `jsrun` arguments for a foreground job.
pub fn jsrun_arguments(shell: &str, request: &JobRequest) -> Vec<String> {
    let resources = request.resources();
    vec![
        "-n".to_string(),
        "1".to_string(),
        "-a".to_string(),
        resources.scheduler_tasks().to_string(),
        "-c".to_string(),
        resources.scheduler_cpus_per_task().to_string(),
        "-h".to_string(),
        request.run_dir().display().to_string(),
        shell.to_string(),
        "-c".to_string(),
        request.command().to_string(),
    ]
}

/// Runs jobs with LSF on Summit-style machines.
#[derive(Debug)]
pub struct SummitBackend {
    shell: String,
    /// Keep scripts next to the job rather than in the scratch directory.
    verbose: bool,
    config: SummitBackendConfig,
}

impl SummitBackend {
    /// Creates a new Summit backend.
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            verbose: config.debug.verbose,
            config: config.summit.clone(),
        }
    }

    /// Gets the directory generated scripts are written to.
    fn scratch_dir(&self, request: &JobRequest) -> PathBuf {
        if self.verbose {
            return request.run_dir().to_path_buf();
        }

        match &self.config.scratch_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .map(|home| home.join(SCRATCH_DIR_NAME))
                .unwrap_or_else(|| request.run_dir().to_path_buf()),
        }
    }

    /// Writes a `bsub` script to a uniquely named file in the scratch
    /// directory.
    fn write_batch_script(&self, request: &JobRequest, script: &str) -> Result<PathBuf> {
        let dir = self.scratch_dir(request);
        std::fs::create_dir_all(&dir)?;

        let mut file = tempfile::Builder::new()
            .prefix("summit-")
            .suffix(".bsub")
            .tempfile_in(&dir)?;
        file.write_all(script.as_bytes())?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        Ok(path)
    }
}

impl ExecutionBackend for SummitBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn default_to_background(&self) -> bool {
        true
    }

    fn required_commands(&self) -> Vec<String> {
        vec![
            self.config.jsrun.clone(),
            self.config.bsub.clone(),
            self.config.bjobs.clone(),
            self.config.bkill.clone(),
        ]
    }

    fn wrap(&self, command: &str, _mpi_bin: Option<&Path>, _ranks: u32, threads: u32) -> String {
        // `jsrun` and the batch allocation place the ranks.
        super::shell::wrap_command(command, None, 0, threads)
    }

    async fn run(&self, request: &JobRequest) -> Result<String> {
        info!(
            description = request.description(),
            "running `{}` via jsrun",
            request.command()
        );

        let mut command = Command::new(&self.config.jsrun);
        command
            .args(jsrun_arguments(&self.shell, request))
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
        debug!(%script, "generated bsub script");
        let path = self.write_batch_script(request, &script)?;

        let mut command = Command::new(&self.config.bsub);
        command.arg(&path).current_dir(request.run_dir());

        info!(
            description = request.description(),
            script = %path.display(),
            "submitting job"
        );
        let result = capture(command).await;
        debug!(output = %result.output, code = result.code, "bsub finished");

        if !result.success() {
            return Ok(Submission::rejected(result.output, result.code));
        }

        match parse_bsub_acknowledgement(&result.output) {
            Some(id) => Ok(Submission::accepted(id, result.output)),
            None => {
                error!(output = %result.output, "unexpected output from bsub");
                Ok(Submission::rejected(result.output, 1))
            }
        }
    }

    async fn is_finished(&self, id: &JobId) -> Result<bool> {
        let mut command = Command::new(&self.config.bjobs);
        command.arg(id.as_str());
        let result = capture(command).await;

        if result.success() {
            return Ok(parse_bjobs_status(&result.output, id));
        }

        // LSF forgets finished jobs after its clean period.
        if result.output.contains("is not found") {
            return Ok(true);
        }

        Err(ExecutorError::PollFailed {
            backend: NAME,
            output: result.output,
            code: result.code,
        })
    }

    async fn kill(&self, id: &JobId) -> Result<()> {
        let mut command = Command::new(&self.config.bkill);
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
        let result = capture(Command::new(&self.config.bjobs)).await;
        if !result.success() {
            if result.output.contains(NO_UNFINISHED_JOBS) {
                return Ok(Some(HashSet::new()));
            }

            return Err(ExecutorError::PollFailed {
                backend: NAME,
                output: result.output,
                code: result.code,
            });
        }

        let (ids, unexpected) = parse_bjobs_listing(&result.output);
        for line in unexpected {
            error!(line, "unexpected output from bjobs");
        }

        Ok(Some(ids))
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Resources;

    const LISTING: &str = "\
JOBID USER     STAT  QUEUE      FROM_HOST   EXEC_HOST   JOB_NAME   SUBMIT_TIME
3926  user1    RUN   priority   hostF        hostC      verilog    Oct 22 13:51
605   user1    SSUSP idle       hostQ        hostC      Test4      Oct 17 18:07
1480  user1    PEND  priority   hostD                   generator  Oct 19 18:13
";

    #[test]
    fn parses_acknowledgement() {
        assert_eq!(
            parse_bsub_acknowledgement("Job <29209> is submitted to default queue <batch>.\n"),
            Some(JobId::from("29209"))
        );
        assert_eq!(
            parse_bsub_acknowledgement("Job not submitted: project is required\n"),
            None
        );
    }

    #[test]
    fn parses_listing() {
        let (ids, unexpected) = parse_bjobs_listing(LISTING);
        assert_eq!(
            ids,
            HashSet::from([JobId::from("3926"), JobId::from("605"), JobId::from("1480")])
        );
        assert!(unexpected.is_empty());
    }

    #[test]
    fn listing_keeps_going_past_unexpected_lines() {
        let listing = "JOBID USER STAT\n77 user1 RUN\n  <<garbled>>\n78 user1 PEND\n";
        let (ids, unexpected) = parse_bjobs_listing(listing);
        assert_eq!(ids, HashSet::from([JobId::from("77"), JobId::from("78")]));
        assert_eq!(unexpected, ["  <<garbled>>"]);

        let (ids, unexpected) = parse_bjobs_listing("");
        assert!(ids.is_empty());
        assert!(unexpected.is_empty());
    }

    #[test]
    fn parses_status() {
        assert!(!parse_bjobs_status(LISTING, &"3926".into()));
        assert!(!parse_bjobs_status(LISTING, &"1480".into()));
        assert!(parse_bjobs_status(LISTING, &"9999".into()));
        assert!(parse_bjobs_status(
            "JOBID USER STAT QUEUE\n42 user1 DONE batch\n",
            &"42".into()
        ));
        assert!(parse_bjobs_status(
            "JOBID USER STAT QUEUE\n42 user1 EXIT batch\n",
            &"42".into()
        ));
    }

    #[test]
    fn renders_batch_script() {
        let config = SummitBackendConfig {
            project: "CSC322".to_string(),
            ..Default::default()
        };
        let request = JobRequest::builder()
            .command("./lulesh2.0 -s 30")
            .run_dir("/gpfs/run")
            .resources(Resources::new(2, 7))
            .out_path("/gpfs/run/lulesh.log")
            .name("lulesh")
            .description("lulesh +openmp")
            .env(IndexMap::from([("HPCTEST".to_string(), "1".to_string())]))
            .build();
        assert_eq!(
            render_batch_script(&config, &request).unwrap(),
            "#!/bin/bash
#BSUB -J lulesh
#BSUB -P CSC322
#BSUB -nnodes 2
#BSUB -W 0:05
#BSUB -o /gpfs/run/lulesh.log
export OMP_NUM_THREADS=7
export HPCTEST=1
./lulesh2.0 -s 30
"
        );
    }

    #[test]
    fn renders_serial_script_without_project() {
        let request = JobRequest::builder()
            .command("./xsbench")
            .run_dir("/gpfs/run")
            .name("xsbench")
            .description("xsbench")
            .build();
        assert_eq!(
            render_batch_script(&SummitBackendConfig::default(), &request).unwrap(),
            "#!/bin/bash
#BSUB -J xsbench
#BSUB -nnodes 1
#BSUB -W 0:05
#BSUB -o /gpfs/run/xsbench.out
./xsbench
"
        );
    }

    #[cfg(unix)]
    #[test]
    fn exported_values_keep_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let request = JobRequest::builder()
            .command(r#"printf '%s|' "$HPCRUN_EVENT" "$LIST""#)
            .run_dir(dir.path())
            .description("quoting")
            .env(IndexMap::from([
                ("HPCRUN_EVENT".to_string(), "REALTIME@5000 CYCLES".to_string()),
                ("LIST".to_string(), "a,b c".to_string()),
            ]))
            .build();

        let script = render_batch_script(&SummitBackendConfig::default(), &request).unwrap();
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(&script)
            .output()
            .unwrap();
        assert_eq!(
            String::from_utf8(output.stdout).unwrap(),
            "REALTIME@5000 CYCLES|a,b c|"
        );
    }

    #[test]
    fn builds_jsrun_arguments() {
        let request = JobRequest::builder()
            .command("./amg2013")
            .run_dir("/gpfs/amg")
            .resources(Resources::new(6, 0))
            .description("amg2013")
            .build();
        assert_eq!(
            jsrun_arguments("bash", &request),
            ["-n", "1", "-a", "6", "-c", "1", "-h", "/gpfs/amg", "bash", "-c", "./amg2013"]
        );
    }
}
