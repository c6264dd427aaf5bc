//! Bounded match coordinator.
//!
//! One call to [`MatchCoordinator::run`] is one match attempt:
//!
//! ```text
//! Idle -> Converting -> MatchingInFlight -> {Matched, NotMatched, TimedOut, Failed} -> Cleaned
//!            \-> Failed
//! ```
//!
//! Whatever the terminal state, the staging area is cleared before `run`
//! returns. Uploads, clears and match attempts all go through the same lock,
//! so at most one attempt touches the staging area at a time.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::executor::{FingerprintMatcher, MatchFinding, MatcherError};
use super::normalizer::{AudioNormalizer, ConversionError};
use crate::server::metrics;
use crate::staging::{ClearReport, StagingArea, StagingError, StagingKind};

/// Default wall-clock budget for the matcher.
pub const DEFAULT_MATCH_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Converting,
    MatchingInFlight,
    Matched,
    NotMatched,
    TimedOut,
    Failed,
    Cleaned,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Error)]
pub enum MatchFailure {
    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Matcher(#[from] MatcherError),

    #[error("Match worker stopped unexpectedly: {0}")]
    Worker(String),
}

#[derive(Debug)]
pub enum MatchOutcome {
    Matched { timecode_secs: f64 },
    NotMatched,
    TimedOut,
    Failed(MatchFailure),
}

impl MatchOutcome {
    /// Short machine-readable cause, shared by responses, logs and metrics.
    pub fn cause(&self) -> &'static str {
        match self {
            MatchOutcome::Matched { .. } => "matched",
            MatchOutcome::NotMatched => "no_match",
            MatchOutcome::TimedOut => "timeout",
            MatchOutcome::Failed(MatchFailure::Staging(StagingError::InvalidFilename(_))) => {
                "invalid_filename"
            }
            MatchOutcome::Failed(MatchFailure::Staging(_)) => "staging_error",
            MatchOutcome::Failed(MatchFailure::Conversion(_)) => "conversion_failed",
            MatchOutcome::Failed(MatchFailure::Matcher(MatcherError::MalformedOutput(_))) => {
                "malformed_output"
            }
            MatchOutcome::Failed(MatchFailure::Matcher(_))
            | MatchOutcome::Failed(MatchFailure::Worker(_)) => "matcher_failed",
        }
    }

    fn terminal_state(&self) -> AttemptState {
        match self {
            MatchOutcome::Matched { .. } => AttemptState::Matched,
            MatchOutcome::NotMatched => AttemptState::NotMatched,
            MatchOutcome::TimedOut => AttemptState::TimedOut,
            MatchOutcome::Failed(_) => AttemptState::Failed,
        }
    }
}

/// Result of one attempt, after cleanup.
#[derive(Debug)]
pub struct MatchAttempt {
    pub id: Uuid,
    pub outcome: MatchOutcome,
    pub elapsed: Duration,
    /// `None` when a staging directory could not even be listed.
    pub cleanup: Option<ClearReport>,
}

/// A file received by the upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub kind: StagingKind,
    pub filename: String,
    pub data: Vec<u8>,
}

pub struct MatchCoordinator {
    staging: StagingArea,
    normalizer: Arc<dyn AudioNormalizer>,
    matcher: Arc<dyn FingerprintMatcher>,
    match_timeout: Duration,
    staging_lock: Mutex<()>,
}

impl MatchCoordinator {
    pub fn new(
        staging: StagingArea,
        normalizer: Arc<dyn AudioNormalizer>,
        matcher: Arc<dyn FingerprintMatcher>,
        match_timeout: Duration,
    ) -> Self {
        Self {
            staging,
            normalizer,
            matcher,
            match_timeout,
            staging_lock: Mutex::new(()),
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn match_timeout(&self) -> Duration {
        self.match_timeout
    }

    /// Store uploaded files. Waits for any in-flight attempt to finish first.
    pub async fn store_uploads(
        &self,
        files: &[UploadedFile],
    ) -> Result<Vec<PathBuf>, StagingError> {
        let _guard = self.staging_lock.lock().await;

        // Validate every name before writing anything.
        for file in files {
            self.staging.resolve(file.kind, &file.filename)?;
        }

        let mut paths = Vec::with_capacity(files.len());
        for file in files {
            let path = self
                .staging
                .store(file.kind, &file.filename, &file.data)
                .await?;
            metrics::record_upload(file.kind.as_str(), file.data.len());
            paths.push(path);
        }
        Ok(paths)
    }

    /// Explicit clear. Waits for any in-flight attempt to finish first.
    pub async fn clear(&self) -> Result<ClearReport, StagingError> {
        let _guard = self.staging_lock.lock().await;
        let report = self.staging.clear_all().await?;
        if !report.is_clean() {
            metrics::record_cleanup_failures(report.failures.len());
        }
        Ok(report)
    }

    /// Run one full match attempt for files previously stored under the given names.
    ///
    /// The attempt runs on its own task, so it still reaches a terminal state
    /// and cleans up when the caller stops waiting for it.
    pub async fn run(self: &Arc<Self>, sample_name: &str, database_name: &str) -> MatchAttempt {
        let id = Uuid::new_v4();
        let start = Instant::now();
        let coordinator = Arc::clone(self);
        let sample_name = sample_name.to_string();
        let database_name = database_name.to_string();

        let attempt = tokio::spawn(
            async move { coordinator.attempt(id, &sample_name, &database_name).await }
                .instrument(info_span!("match_attempt", %id)),
        );

        match attempt.await {
            Ok(attempt) => attempt,
            Err(e) => {
                warn!("Match attempt {} stopped unexpectedly: {}", id, e);
                let _guard = self.staging_lock.lock().await;
                let cleanup = self.cleanup().await;
                MatchAttempt {
                    id,
                    outcome: MatchOutcome::Failed(MatchFailure::Worker(e.to_string())),
                    elapsed: start.elapsed(),
                    cleanup,
                }
            }
        }
    }

    async fn attempt(&self, id: Uuid, sample_name: &str, database_name: &str) -> MatchAttempt {
        let _guard = self.staging_lock.lock().await;
        let start = Instant::now();
        let mut state = AttemptState::Idle;

        let outcome = self.drive(&mut state, sample_name, database_name).await;
        transition(&mut state, outcome.terminal_state());

        let cleanup = self.cleanup().await;
        transition(&mut state, AttemptState::Cleaned);

        let elapsed = start.elapsed();
        metrics::record_match_outcome(outcome.cause(), elapsed);

        match &outcome {
            MatchOutcome::Matched { timecode_secs } => info!(
                "Match found at {} seconds ({}ms)",
                timecode_secs,
                elapsed.as_millis()
            ),
            MatchOutcome::NotMatched => info!("No match found ({}ms)", elapsed.as_millis()),
            MatchOutcome::TimedOut => warn!(
                "Matching timed out after {}s",
                self.match_timeout.as_secs_f64()
            ),
            MatchOutcome::Failed(e) => warn!("Match attempt failed: {}", e),
        }
        transition(&mut state, AttemptState::Idle);

        MatchAttempt {
            id,
            outcome,
            elapsed,
            cleanup,
        }
    }

    async fn drive(
        &self,
        state: &mut AttemptState,
        sample_name: &str,
        database_name: &str,
    ) -> MatchOutcome {
        let sample = match self.staging.resolve(StagingKind::Sample, sample_name) {
            Ok(path) => path,
            Err(e) => return MatchOutcome::Failed(e.into()),
        };
        let database = match self.staging.resolve(StagingKind::Database, database_name) {
            Ok(path) => path,
            Err(e) => return MatchOutcome::Failed(e.into()),
        };
        debug!("Matching {:?} against {:?}", sample, database);

        transition(state, AttemptState::Converting);
        let normalized = match self.normalizer.normalize(&sample).await {
            Ok(path) => path,
            Err(e) => return MatchOutcome::Failed(e.into()),
        };
        debug!("Audio converted to {:?}", normalized);

        transition(state, AttemptState::MatchingInFlight);
        let matcher = self.matcher.clone();
        let mut worker = AbortOnDropHandle::new(tokio::spawn(
            async move { matcher.find_match(&normalized, &database).await }.in_current_span(),
        ));

        match tokio::time::timeout(self.match_timeout, &mut worker).await {
            Ok(Ok(Ok(MatchFinding::Matched { timecode_secs }))) => {
                MatchOutcome::Matched { timecode_secs }
            }
            Ok(Ok(Ok(MatchFinding::NoMatch))) => MatchOutcome::NotMatched,
            Ok(Ok(Err(e))) => MatchOutcome::Failed(e.into()),
            Ok(Err(join_error)) => {
                MatchOutcome::Failed(MatchFailure::Worker(join_error.to_string()))
            }
            Err(_) => {
                // Dropping the worker's future kills the matcher process, wait for
                // that before cleanup so nothing writes into the staging area later.
                worker.abort();
                let _ = worker.await;
                MatchOutcome::TimedOut
            }
        }
    }

    async fn cleanup(&self) -> Option<ClearReport> {
        match self.staging.clear_all().await {
            Ok(report) => {
                if !report.is_clean() {
                    metrics::record_cleanup_failures(report.failures.len());
                }
                debug!("Cleared {} staged files", report.removed.len());
                if let Ok(false) = self.staging.is_empty().await {
                    warn!("Staging area still holds files after cleanup");
                }
                Some(report)
            }
            Err(e) => {
                warn!("Staging cleanup failed: {}", e);
                metrics::record_cleanup_failures(1);
                None
            }
        }
    }
}

fn transition(state: &mut AttemptState, next: AttemptState) {
    debug!("{} -> {}", state, next);
    *state = next;
}
