//! Implementation of executor configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// The default batch manager name.
pub const DEFAULT_BATCH_MANAGER: &str = "Shell";

/// The default shell used to run command lines.
pub const DEFAULT_SHELL: &str = "bash";

/// The default interval between polls when waiting on a job, in
/// milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Represents the executor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct Config {
    /// Batch execution configuration.
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Represents the `batch` section of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct BatchConfig {
    /// The name of the backend to run jobs with.
    ///
    /// Defaults to `Shell`.
    #[serde(default = "default_manager")]
    pub manager: String,
    /// The shell used to run command lines.
    ///
    /// Defaults to `bash`.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// The interval between polls while waiting on a job, in milliseconds.
    ///
    /// Defaults to 5 seconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Debugging switches.
    #[serde(default)]
    pub debug: DebugConfig,
    /// Configuration for the SLURM backend.
    #[serde(default)]
    pub slurm: SlurmBackendConfig,
    /// Configuration for the Summit (LSF) backend.
    #[serde(default)]
    pub summit: SummitBackendConfig,
}

fn default_manager() -> String {
    DEFAULT_BATCH_MANAGER.to_string()
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            manager: default_manager(),
            shell: default_shell(),
            poll_interval_ms: default_poll_interval_ms(),
            debug: Default::default(),
            slurm: Default::default(),
            summit: Default::default(),
        }
    }
}

impl BatchConfig {
    /// Gets the interval between polls while waiting on a job.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Represents the `batch.debug` section of the configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct DebugConfig {
    /// Use the configured backend even if its tools are missing.
    #[serde(default)]
    pub force: bool,
    /// Ask submission tools for verbose output and keep generated scripts
    /// next to the job.
    #[serde(default)]
    pub verbose: bool,
}

/// Represents configuration for the SLURM backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SlurmBackendConfig {
    /// The account jobs are charged to.
    #[serde(default = "default_slurm_account")]
    pub account: String,
    /// The partition jobs are submitted to.
    #[serde(default = "default_slurm_partition")]
    pub partition: String,
    /// The wall-clock limit for each job.
    #[serde(default = "default_slurm_time")]
    pub time: String,
    /// Whether jobs request exclusive use of their nodes.
    #[serde(default = "default_true")]
    pub exclusive: bool,
    /// Additional `#SBATCH` arguments for generated batch scripts.
    #[serde(default)]
    pub extra_sbatch_args: Vec<String>,
    /// The `srun` executable.
    #[serde(default = "default_srun")]
    pub srun: String,
    /// The `sbatch` executable.
    #[serde(default = "default_sbatch")]
    pub sbatch: String,
    /// The `squeue` executable.
    #[serde(default = "default_squeue")]
    pub squeue: String,
    /// The `scancel` executable.
    #[serde(default = "default_scancel")]
    pub scancel: String,
}

fn default_slurm_account() -> String {
    "commons".to_string()
}

fn default_slurm_partition() -> String {
    "commons".to_string()
}

fn default_slurm_time() -> String {
    "1:00:00".to_string()
}

fn default_true() -> bool {
    true
}

fn default_srun() -> String {
    "srun".to_string()
}

fn default_sbatch() -> String {
    "sbatch".to_string()
}

fn default_squeue() -> String {
    "squeue".to_string()
}

fn default_scancel() -> String {
    "scancel".to_string()
}

impl Default for SlurmBackendConfig {
    fn default() -> Self {
        Self {
            account: default_slurm_account(),
            partition: default_slurm_partition(),
            time: default_slurm_time(),
            exclusive: default_true(),
            extra_sbatch_args: Default::default(),
            srun: default_srun(),
            sbatch: default_sbatch(),
            squeue: default_squeue(),
            scancel: default_scancel(),
        }
    }
}

/// Represents configuration for the Summit (LSF) backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SummitBackendConfig {
    /// The project jobs are charged to.
    ///
    /// An empty project omits the `-P` directive.
    #[serde(default)]
    pub project: String,
    /// The wall-clock limit for each job, as `[hours:]minutes`.
    #[serde(default = "default_summit_time")]
    pub time: String,
    /// The directory generated `bsub` scripts are written to.
    ///
    /// Defaults to `~/.hpctest`.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    /// The `jsrun` executable.
    #[serde(default = "default_jsrun")]
    pub jsrun: String,
    /// The `bsub` executable.
    #[serde(default = "default_bsub")]
    pub bsub: String,
    /// The `bjobs` executable.
    #[serde(default = "default_bjobs")]
    pub bjobs: String,
    /// The `bkill` executable.
    #[serde(default = "default_bkill")]
    pub bkill: String,
}

fn default_summit_time() -> String {
    "0:05".to_string()
}

fn default_jsrun() -> String {
    "jsrun".to_string()
}

fn default_bsub() -> String {
    "bsub".to_string()
}

fn default_bjobs() -> String {
    "bjobs".to_string()
}

fn default_bkill() -> String {
    "bkill".to_string()
}

impl Default for SummitBackendConfig {
    fn default() -> Self {
        Self {
            project: Default::default(),
            time: default_summit_time(),
            scratch_dir: None,
            jsrun: default_jsrun(),
            bsub: default_bsub(),
            bjobs: default_bjobs(),
            bkill: default_bkill(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").expect("empty config should parse");
        assert_eq!(config.batch.manager, "Shell");
        assert_eq!(config.batch.shell, "bash");
        assert_eq!(config.batch.poll_interval(), Duration::from_secs(5));
        assert!(!config.batch.debug.force);
        assert_eq!(config.batch.slurm.account, "commons");
        assert_eq!(config.batch.slurm.partition, "commons");
        assert_eq!(config.batch.slurm.time, "1:00:00");
        assert!(config.batch.slurm.exclusive);
        assert_eq!(config.batch.summit.project, "");
        assert_eq!(config.batch.summit.time, "0:05");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
[batch]
manager = "Summit"

[batch.debug]
force = true

[batch.summit]
project = "CSC322"
bsub = "/opt/lsf/bin/bsub"
"#,
        )
        .expect("config should parse");
        assert_eq!(config.batch.manager, "Summit");
        assert!(config.batch.debug.force);
        assert!(!config.batch.debug.verbose);
        assert_eq!(config.batch.summit.project, "CSC322");
        assert_eq!(config.batch.summit.bsub, "/opt/lsf/bin/bsub");
        assert_eq!(config.batch.summit.bjobs, "bjobs");
        assert_eq!(config.batch.summit.time, "0:05");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = toml::from_str::<Config>("[batch]\nmanagr = \"Slurm\"\n");
        assert!(result.is_err());
    }
}
