//! Integration tests for the SLURM backend against fake scheduler tools.

#![cfg(unix)]

mod common;

use std::fs;
use std::path::Path;

use hpctest_executor::BackendRegistry;
use hpctest_executor::Config;
use hpctest_executor::Executor;
use hpctest_executor::ExecutorError;
use hpctest_executor::JobId;
use hpctest_executor::JobRequest;
use hpctest_executor::Resources;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tempfile::tempdir;

/// A fake SLURM installation.
struct FakeSlurm {
    /// Holds the fake tools and their logs.
    dir: TempDir,
    /// The executor configured to use the fake tools.
    executor: Executor,
}

impl FakeSlurm {
    /// Creates a fake installation whose `scancel` rejects `bad_kill`.
    fn new(bad_kill: &str) -> Self {
        let dir = tempdir().unwrap();
        let path = dir.path();
        let queue = path.join("queue");
        fs::write(&queue, "").unwrap();

        let mut config = Config::default();
        config.batch.manager = "Slurm".to_string();
        config.batch.shell = "sh".to_string();
        config.batch.poll_interval_ms = 10;
        config.batch.slurm.sbatch = common::logging_tool(
            path,
            "sbatch",
            &format!(
                r#"n=$(cat '{next}' 2>/dev/null || echo 100)
echo $((n + 1)) > '{next}'
cp "$1" '{last}'
echo "Submitted batch job $n""#,
                next = path.join("next").display(),
                last = path.join("last.slurm").display(),
            ),
        );
        config.batch.slurm.squeue = common::logging_tool(
            path,
            "squeue",
            &format!(
                r#"queue='{queue}'
[ -f '{down}' ] && {{ echo 'slurm_load_jobs error: Unable to contact slurm controller' >&2; exit 1; }}
case "$*" in
*--me*) cat "$queue"; exit 0 ;;
esac
for arg in "$@"; do
    case "$arg" in --jobs=*) id="${{arg#--jobs=}}" ;; esac
done
if grep -qx "$id" "$queue"; then
    echo RUNNING
else
    echo 'slurm_load_jobs error: Invalid job id specified' >&2
    exit 1
fi"#,
                queue = queue.display(),
                down = path.join("down").display(),
            ),
        );
        config.batch.slurm.scancel = common::logging_tool(
            path,
            "scancel",
            &format!(
                r#"if [ "$1" = '{bad_kill}' ]; then
    echo "scancel: error: Kill job error on job id $1: Access/permission denied" >&2
    exit 1
fi"#
            ),
        );
        config.batch.slurm.srun = common::logging_tool(
            path,
            "srun",
            r#"while [ "$1" != "--mail-type=NONE" ]; do shift; done
shift
exec "$@""#,
        );

        let executor = BackendRegistry::new()
            .resolve(&config)
            .expect("fake SLURM should resolve");
        Self { dir, executor }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Sets the jobs `squeue` reports as pending or running.
    fn set_queue(&self, ids: &[&JobId]) {
        let listing: String = ids.iter().map(|id| format!("{id}\n")).collect();
        fs::write(self.path().join("queue"), listing).unwrap();
    }

    async fn submit(&self, description: &str) -> JobId {
        let submission = self
            .executor
            .submit_job(&common::request(self.path(), description))
            .await;
        assert_eq!(submission.code, 0, "submission failed: {}", submission.output);
        submission.job_id.expect("accepted job should have an id")
    }
}

#[tokio::test]
async fn submission_renders_script_and_tracks_job() {
    let slurm = FakeSlurm::new("");
    let request = JobRequest::builder()
        .command("./stream")
        .run_dir(slurm.path())
        .resources(Resources::new(2, 4))
        .name("stream")
        .description("stream +openmp")
        .build();

    let submission = slurm.executor.submit_job(&request).await;
    assert_eq!(submission.job_id, Some(JobId::from("100")));
    assert_eq!(submission.output.trim(), "Submitted batch job 100");
    assert_eq!(slurm.executor.description(&"100".into()).unwrap(), "stream +openmp");

    let script = fs::read_to_string(slurm.path().join("last.slurm")).unwrap();
    assert!(script.starts_with("#!/bin/bash\n#SBATCH --job-name=stream\n"));
    assert!(script.contains("#SBATCH --export=ALL,OMP_NUM_THREADS=4\n"));
    assert!(script.contains("#SBATCH --ntasks=2\n#SBATCH --cpus-per-task=4\n"));
    assert!(script.contains(&format!(
        "#SBATCH --output={}\n",
        slurm.path().join("stream.out").display()
    )));
    assert!(script.ends_with("\n./stream\n"));
}

#[tokio::test]
async fn rejected_submissions_are_not_tracked() {
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.batch.manager = "Slurm".to_string();
    config.batch.debug.force = true;
    config.batch.slurm.sbatch = common::fake_tool(
        dir.path(),
        "sbatch",
        "echo 'sbatch: error: invalid partition specified: commons' >&2; exit 1",
    );
    let executor = BackendRegistry::new().resolve(&config).unwrap();

    let submission = executor
        .submit_job(&common::request(dir.path(), "rejected"))
        .await;
    assert_eq!(submission.job_id, None);
    assert_eq!(submission.code, 1);
    assert_eq!(
        submission.output,
        "sbatch: error: invalid partition specified: commons"
    );

    config.batch.slurm.sbatch = common::fake_tool(dir.path(), "sbatch", "echo 'queued'");
    let executor = BackendRegistry::new().resolve(&config).unwrap();
    let submission = executor
        .submit_job(&common::request(dir.path(), "unparseable"))
        .await;
    assert_eq!(submission.job_id, None);
    assert_ne!(submission.code, 0);
    assert!(executor.running_jobs().is_empty());
}

#[tokio::test]
async fn poll_reports_jobs_missing_from_listing() {
    let slurm = FakeSlurm::new("");
    let a = slurm.submit("a").await;
    let b = slurm.submit("b").await;
    let c = slurm.submit("c").await;

    slurm.set_queue(&[&b]);
    let finished = slurm.executor.poll_for_finished_jobs().await.unwrap();
    assert_eq!(finished.into_iter().collect::<Vec<_>>(), [a.clone(), c.clone()]);
    assert_eq!(slurm.executor.running_jobs(), [b.clone()]);
    assert_eq!(slurm.executor.description(&b).unwrap(), "b");
    assert!(matches!(
        slurm.executor.description(&a),
        Err(ExecutorError::JobNotFound(_))
    ));

    let finished = slurm.executor.poll_for_finished_jobs().await.unwrap();
    assert!(finished.is_empty());

    slurm.set_queue(&[]);
    let finished = slurm.executor.poll_for_finished_jobs().await.unwrap();
    assert_eq!(finished.into_iter().collect::<Vec<_>>(), [b]);
    assert!(slurm.executor.running_jobs().is_empty());
}

#[tokio::test]
async fn failed_listing_is_an_error() {
    let slurm = FakeSlurm::new("");
    let id = slurm.submit("survives a failed poll").await;
    fs::write(slurm.path().join("down"), "").unwrap();

    match slurm.executor.poll_for_finished_jobs().await {
        Err(ExecutorError::PollFailed { backend, output, code }) => {
            assert_eq!(backend, "Slurm");
            assert_eq!(
                output,
                "slurm_load_jobs error: Unable to contact slurm controller"
            );
            assert_eq!(code, 1);
        }
        other => panic!("expected a poll failure, got {other:?}"),
    }
    assert_eq!(slurm.executor.running_jobs(), [id]);
}

#[tokio::test]
async fn is_finished_queries_each_job() {
    let slurm = FakeSlurm::new("");
    let id = slurm.submit("queried").await;
    slurm.set_queue(&[&id]);

    assert!(!slurm.executor.is_finished(&id).await.unwrap());
    assert!(!slurm.executor.is_finished(&id).await.unwrap());
    assert_eq!(slurm.executor.running_jobs(), [id.clone()]);

    slurm.set_queue(&[]);
    assert!(slurm.executor.is_finished(&id).await.unwrap());
    assert!(slurm.executor.running_jobs().is_empty());

    let queries = common::invocations(slurm.path(), "squeue");
    assert_eq!(queries.len(), 3);
    assert!(queries.iter().all(|q| q.ends_with(&format!("--jobs={id}"))));
}

#[tokio::test]
async fn kill_all_continues_past_failures() {
    let slurm = FakeSlurm::new("100");
    let a = slurm.submit("a").await;
    let b = slurm.submit("b").await;
    let c = slurm.submit("c").await;
    assert_eq!(a, JobId::from("100"));

    let failed = slurm.executor.kill_all().await;
    assert_eq!(failed, [a]);
    assert_eq!(common::invocations(slurm.path(), "scancel"), ["100", "101", "102"]);
    assert!(slurm.executor.running_jobs().is_empty());
    assert!(matches!(
        slurm.executor.kill(&b).await,
        Err(ExecutorError::JobNotFound(_))
    ));
    assert!(matches!(
        slurm.executor.kill(&c).await,
        Err(ExecutorError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn failed_kill_still_untracks_job() {
    let slurm = FakeSlurm::new("100");
    let id = slurm.submit("stuck").await;

    match slurm.executor.kill(&id).await {
        Err(ExecutorError::KillFailed { job, output, code }) => {
            assert_eq!(job, id);
            assert!(output.starts_with("scancel: error: Kill job error on job id 100"));
            assert_eq!(code, 1);
        }
        other => panic!("expected a kill failure, got {other:?}"),
    }
    assert!(slurm.executor.running_jobs().is_empty());
}

#[tokio::test]
async fn run_launches_through_srun() {
    let slurm = FakeSlurm::new("");
    let out = slurm.path().join("run.log");
    let request = JobRequest::builder()
        .command("echo launched; pwd")
        .run_dir(slurm.path())
        .resources(Resources::new(1, 3))
        .out_path(&out)
        .description("srun echo")
        .build();
    slurm.executor.run(&request).await.unwrap();
    let output = fs::read_to_string(out).unwrap();
    let mut lines = output.lines();
    assert_eq!(lines.next(), Some("launched"));
    assert_eq!(
        fs::canonicalize(lines.next().unwrap()).unwrap(),
        fs::canonicalize(slurm.path()).unwrap()
    );

    let invocations = common::invocations(slurm.path(), "srun");
    assert_eq!(invocations.len(), 1);
    assert!(invocations[0].starts_with("--account=commons --partition=commons --chdir="));
    assert!(invocations[0].contains(
        "--export=ALL,OMP_NUM_THREADS=3 --exclusive --ntasks=1 --cpus-per-task=3 --time=1:00:00"
    ));
    assert!(invocations[0].ends_with("--mail-type=NONE sh -c echo launched; pwd"));

    let request = JobRequest::builder()
        .command("echo 'out of memory' >&2; exit 137")
        .run_dir(slurm.path())
        .description("srun failure")
        .build();
    match slurm.executor.run(&request).await {
        Err(ExecutorError::Execution { output, code }) => {
            assert_eq!(output, "out of memory");
            assert_eq!(code, 137);
        }
        other => panic!("expected an execution error, got {other:?}"),
    }
}
