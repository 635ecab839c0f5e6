//! Detection of the external commands a backend needs.

use std::fmt;

use tracing::debug;

/// The result of probing for a set of required commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Availability {
    /// The commands that could not be found.
    missing: Vec<String>,
}

impl Availability {
    /// Whether every required command was found.
    pub fn is_available(&self) -> bool {
        self.missing.is_empty()
    }

    /// Gets the commands that could not be found.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.missing.len() {
            0 => write!(f, "all required commands are available"),
            1 => write!(f, "{} is missing", self.missing[0]),
            _ => write!(f, "{} are missing", self.missing.join(", ")),
        }
    }
}

/// Checks that every given command can be found.
///
/// Bare names are searched for on `PATH`; names containing a path separator
/// are checked directly.
pub fn check_commands<I, S>(commands: I) -> Availability
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let missing = commands
        .into_iter()
        .filter_map(|command| {
            let command = command.as_ref();
            match which::which(command) {
                Ok(path) => {
                    debug!(command, path = %path.display(), "found required command");
                    None
                }
                Err(_) => Some(command.to_string()),
            }
        })
        .collect();

    Availability { missing }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[cfg(unix)]
    #[test]
    fn finds_commands_on_path() {
        let availability = check_commands(["sh"]);
        assert!(availability.is_available());
        assert!(availability.missing().is_empty());
    }

    #[test]
    fn reports_missing_commands() {
        let availability = check_commands(["hpctest-no-such-command-a"]);
        assert!(!availability.is_available());
        assert_eq!(availability.to_string(), "hpctest-no-such-command-a is missing");

        let availability =
            check_commands(["hpctest-no-such-command-a", "hpctest-no-such-command-b"]);
        assert_eq!(
            availability.missing(),
            ["hpctest-no-such-command-a", "hpctest-no-such-command-b"]
        );
        assert_eq!(
            availability.to_string(),
            "hpctest-no-such-command-a, hpctest-no-such-command-b are missing"
        );
    }

    #[test]
    fn checks_paths_directly() {
        let availability = check_commands(["/nonexistent/hpctest/bsub"]);
        assert_eq!(availability.missing(), ["/nonexistent/hpctest/bsub"]);
    }
}
