//! Runs the external fingerprint matcher against a normalized clip.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::command_line;
use super::output_parser::{parse_matcher_output, ParsedOutput};

#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("Could not start matcher: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Matcher exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Matcher reported a match without a readable offset: {0:?}")]
    MalformedOutput(String),
}

/// What a completed matcher run found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchFinding {
    Matched { timecode_secs: f64 },
    NoMatch,
}

/// Looks a normalized clip up in a fingerprint database.
///
/// Implementations must stop any child process they own when the returned
/// future is dropped; the coordinator relies on that to cancel on timeout.
#[async_trait]
pub trait FingerprintMatcher: Send + Sync {
    async fn find_match(&self, sample: &Path, database: &Path)
        -> Result<MatchFinding, MatcherError>;
}

/// How to launch the matcher.
#[derive(Debug, Clone)]
pub struct MatcherCommand {
    /// Executable, usually the interpreter of the matcher's virtualenv.
    pub program: PathBuf,
    /// Arguments placed before the `match` subcommand, usually the script path.
    pub prefix_args: Vec<String>,
    /// The matcher resolves auxiliary files relative to its install dir.
    pub working_dir: PathBuf,
}

/// [`FingerprintMatcher`] driving the audfprint command line.
pub struct AudfprintMatcher {
    command: MatcherCommand,
}

impl AudfprintMatcher {
    pub fn new(command: MatcherCommand) -> Self {
        Self { command }
    }

    fn build_args(&self, sample: &Path, database: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self
            .command
            .prefix_args
            .iter()
            .map(OsString::from)
            .collect();
        args.push("match".into());
        args.push("--dbase".into());
        args.push(database.as_os_str().to_owned());
        args.push(sample.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl FingerprintMatcher for AudfprintMatcher {
    async fn find_match(
        &self,
        sample: &Path,
        database: &Path,
    ) -> Result<MatchFinding, MatcherError> {
        let args = self.build_args(sample, database);
        info!(
            "Running command: {} (cwd {:?})",
            command_line(&self.command.program, &args),
            self.command.working_dir
        );

        let output = Command::new(&self.command.program)
            .args(&args)
            .current_dir(&self.command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(MatcherError::Spawn)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("Matcher output: {}", stdout.trim());
        if !stderr.trim().is_empty() {
            debug!("Matcher errors: {}", stderr.trim());
        }

        match parse_matcher_output(&stdout) {
            ParsedOutput::Matched(timecode_secs) => {
                if !output.status.success() {
                    warn!(
                        "Matcher exited with {} but reported a match, keeping it",
                        output.status
                    );
                }
                Ok(MatchFinding::Matched { timecode_secs })
            }
            ParsedOutput::MalformedOutput(line) => Err(MatcherError::MalformedOutput(line)),
            ParsedOutput::NoMatch if output.status.success() => Ok(MatchFinding::NoMatch),
            ParsedOutput::NoMatch => Err(MatcherError::Failed {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            }),
        }
    }
}
