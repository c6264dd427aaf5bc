//! Shared constants for end-to-end tests
//!
//! When the test clips, the fake tool output or the timing budget change,
//! update only this file.

// ============================================================================
// Staged Files
// ============================================================================

/// Name the test clip is uploaded under
pub const CLIP_NAME: &str = "clip.3gp";

/// Name the normalized clip gets in the sample directory
pub const NORMALIZED_CLIP_NAME: &str = "clip.wav";

/// Name the test fingerprint database is uploaded under
pub const ADX_NAME: &str = "show.adx";

/// Bytes of the test clip. The fake ffmpeg only copies it around.
pub const CLIP_BYTES: &[u8] = b"fake 3gp clip";

/// Bytes of the test fingerprint database
pub const ADX_BYTES: &[u8] = b"fake adx database";

// ============================================================================
// Fake Matcher Output
// ============================================================================

/// Offset the matching fake matcher reports
pub const MATCHED_TIMECODE: f64 = 61.5;

/// File the fake matcher records its arguments into, inside its working dir
pub const MATCHER_INVOCATION_FILE: &str = "invocation.txt";

/// File the fake matcher records its process id into, inside its working dir
pub const MATCHER_PID_FILE: &str = "matcher.pid";

// ============================================================================
// Timeouts
// ============================================================================

/// Match timeout used by default in tests (seconds)
pub const TEST_MATCH_TIMEOUT_SECS: u64 = 5;

/// Match timeout for tests that expect the matcher to be cancelled (seconds)
pub const SHORT_MATCH_TIMEOUT_SECS: u64 = 1;

/// Match timeout for tests where the client gives up first (seconds)
pub const DISCONNECT_MATCH_TIMEOUT_SECS: u64 = 3;

/// How long an impatient client waits for a match (milliseconds)
pub const IMPATIENT_CLIENT_TIMEOUT_MS: u64 = 1000;

/// Grace period for the server to finish work after a response (seconds)
pub const SETTLE_TIMEOUT_SECS: u64 = 5;

/// How long the hanging fake matcher sleeps (seconds)
pub const HANGING_MATCHER_SLEEP_SECS: u64 = 30;

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;
