//! Implementation of configuration loading.
//!
//! Configuration is layered, with later sources overriding earlier ones:
//!
//! 1. `hpctest/hpctest.toml` in the user's configuration directory.
//! 2. `hpctest.toml` in the current directory.
//! 3. The file given with `--config`, which must exist.
//! 4. Environment variables prefixed with `HPCTEST__`, with `__` separating
//!    nested keys (e.g. `HPCTEST__BATCH__MANAGER=Slurm`).

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use config::Environment;
use config::File;
use config::FileFormat;
use hpctest_executor::Config;
use tracing::debug;

/// The name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "hpctest.toml";

/// The prefix of configuration environment variables.
const ENV_PREFIX: &str = "HPCTEST";

/// The separator between the prefix and nested keys of configuration
/// environment variables.
const ENV_SEPARATOR: &str = "__";

/// Gets the path of the user's configuration file, if the platform has a
/// configuration directory.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("hpctest").join(CONFIG_FILE_NAME))
}

/// Loads the configuration from the default locations, the given file, and
/// the process environment.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut files = Vec::new();
    if let Some(user) = user_config_path() {
        files.push((user, false));
    }
    files.push((PathBuf::from(CONFIG_FILE_NAME), false));
    if let Some(path) = path {
        files.push((path.to_path_buf(), true));
    }

    load_from(&files, Environment::with_prefix(ENV_PREFIX))
}

/// Loads the configuration from the given files and environment source.
///
/// Each file is paired with whether it must exist.
fn load_from(files: &[(PathBuf, bool)], environment: Environment) -> Result<Config> {
    let mut builder = config::Config::builder();
    for (path, required) in files {
        debug!(path = %path.display(), required, "adding configuration file");
        builder = builder
            .add_source(File::new(&path.to_string_lossy(), FileFormat::Toml).required(*required));
    }

    let config = builder
        .add_source(
            environment
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        )
        .build()
        .context("failed to read configuration")?
        .try_deserialize::<Config>()
        .context("invalid configuration")?;

    debug!(?config, "loaded configuration");
    Ok(config)
}
