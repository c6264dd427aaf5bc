//! The match pipeline: normalize the clip, run the matcher under a deadline,
//! clear the staging area.

pub mod coordinator;
pub mod executor;
pub mod normalizer;
pub mod output_parser;

pub use coordinator::{
    AttemptState, MatchAttempt, MatchCoordinator, MatchFailure, MatchOutcome, UploadedFile,
    DEFAULT_MATCH_TIMEOUT,
};
pub use executor::{
    AudfprintMatcher, FingerprintMatcher, MatchFinding, MatcherCommand, MatcherError,
};
pub use normalizer::{AudioNormalizer, ConversionError, FfmpegNormalizer};
pub use output_parser::{parse_matcher_output, ParsedOutput};

use std::ffi::OsString;
use std::path::Path;

/// Shell-quoted rendering of a command, for logs only.
fn command_line(program: &Path, args: &[OsString]) -> String {
    let parts: Vec<String> = std::iter::once(program.as_os_str())
        .chain(args.iter().map(|a| a.as_os_str()))
        .map(|s| s.to_string_lossy().into_owned())
        .collect();

    shlex::try_join(parts.iter().map(String::as_str)).unwrap_or_else(|_| parts.join(" "))
}
