//! Parser for the matcher's stdout.
//!
//! The matcher prints one line per query; a hit looks like
//! `Matched clip.wav 5.0 sec 322 raw hashes as show.adx at 812.4 s with 27 of 38 common hashes`.
//! The token after `at` is the offset into the reference recording.

const MATCH_MARKER: &str = "Matched";
const OFFSET_TOKEN: &str = "at";

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOutput {
    /// Offset in seconds into the reference recording.
    Matched(f64),
    NoMatch,
    /// A `Matched` line whose offset could not be read. Carries the raw line.
    MalformedOutput(String),
}

/// Scan matcher output. The first line containing `Matched` decides the result.
pub fn parse_matcher_output(stdout: &str) -> ParsedOutput {
    match stdout.lines().find(|line| line.contains(MATCH_MARKER)) {
        Some(line) => parse_match_line(line),
        None => ParsedOutput::NoMatch,
    }
}

fn parse_match_line(line: &str) -> ParsedOutput {
    let mut tokens = line.split_whitespace();

    if tokens.by_ref().any(|t| t == OFFSET_TOKEN) {
        if let Some(Ok(seconds)) = tokens.next().map(str::parse::<f64>) {
            if seconds.is_finite() {
                return ParsedOutput::Matched(seconds);
            }
        }
    }

    ParsedOutput::MalformedOutput(line.trim().to_string())
}
