//! Fake external tools for end-to-end tests
//!
//! The server drives two executables: ffmpeg and the fingerprint matcher.
//! Tests replace both with small shell scripts written into the test's
//! temporary directory.

use super::constants::*;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// How the fake ffmpeg behaves
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FakeFfmpeg {
    /// Copies the `-i` input to the output path (the last argument)
    Converting,
    /// Prints an ffmpeg-like error and exits 1
    Failing,
}

/// How the fake matcher behaves
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FakeMatcher {
    /// Prints a hit at [`MATCHED_TIMECODE`]
    Matching,
    /// Prints a query summary without a hit
    NotMatching,
    /// Prints a hit line without a readable offset
    Garbled,
    /// Sleeps far beyond any test timeout, keeping its recorded pid
    Hanging,
    /// Prints a traceback and exits 1
    Crashing,
}

const FFMPEG_CONVERTING: &str = r#"#!/bin/sh
input=""
prev=""
for arg in "$@"; do
    if [ "$prev" = "-i" ]; then
        input="$arg"
    fi
    prev="$arg"
done
cp "$input" "$prev"
"#;

const FFMPEG_FAILING: &str = r#"#!/bin/sh
echo "Invalid data found when processing input" >&2
exit 1
"#;

fn matcher_script(behaviour: FakeMatcher) -> String {
    let record = format!(
        "echo $$ > \"{}\"\necho \"$@\" > \"{}\"\n",
        MATCHER_PID_FILE, MATCHER_INVOCATION_FILE
    );
    let body = match behaviour {
        FakeMatcher::Matching => format!(
            "echo \"Analyzed query of 5.0 s to 322 hashes\"\n\
             echo \"Matched query 5.0 sec 322 raw hashes as reference at {} s with 27 of 38 common hashes at rank 0\"\n",
            MATCHED_TIMECODE
        ),
        FakeMatcher::NotMatching => {
            "echo \"NOMATCH query 5.0 sec 322 raw hashes\"\n".to_string()
        }
        FakeMatcher::Garbled => "echo \"Matched query as reference at ??? s\"\n".to_string(),
        FakeMatcher::Hanging => format!("exec sleep {}\n", HANGING_MATCHER_SLEEP_SECS),
        FakeMatcher::Crashing => "echo \"Traceback (most recent call last):\" >&2\nexit 1\n"
            .to_string(),
    };
    format!("#!/bin/sh\n{}{}", record, body)
}

/// Writes an executable script at `dir/name`.
pub fn write_script(dir: &Path, name: &str, content: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(path)
}

/// Writes the fake ffmpeg into `dir` and returns its path.
pub fn create_fake_ffmpeg(dir: &Path, behaviour: FakeFfmpeg) -> Result<PathBuf> {
    let content = match behaviour {
        FakeFfmpeg::Converting => FFMPEG_CONVERTING,
        FakeFfmpeg::Failing => FFMPEG_FAILING,
    };
    write_script(dir, "ffmpeg", content)
}

/// Writes the fake matcher into `dir` and returns its path.
pub fn create_fake_matcher(dir: &Path, behaviour: FakeMatcher) -> Result<PathBuf> {
    write_script(dir, "matcher", &matcher_script(behaviour))
}
