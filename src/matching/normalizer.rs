//! Conversion of uploaded clips to the canonical matcher input using ffmpeg.

use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::command_line;
use crate::server::metrics;

/// Sample rate expected by the fingerprint matcher.
pub const CANONICAL_SAMPLE_RATE: u32 = 44_100;
/// Channel count expected by the fingerprint matcher.
pub const CANONICAL_CHANNELS: u32 = 1;
/// Extension of normalized files.
pub const CANONICAL_EXTENSION: &str = "wav";
/// Added to the stem of clips uploaded as canonical `.wav` files.
const RENORMALIZED_SUFFIX: &str = "norm";

fn with_extension(stem: &OsStr, extension: &str) -> OsString {
    let mut name = stem.to_os_string();
    name.push(".");
    name.push(extension);
    name
}

/// Errors that can occur during conversion.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("ffmpeg failed ({status}): {stderr}")]
    ConversionFailed { status: String, stderr: String },

    #[error("Could not run ffmpeg: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input has no usable file name: {0:?}")]
    InvalidInput(PathBuf),
}

/// Turns an arbitrary audio container into the canonical waveform file.
#[async_trait]
pub trait AudioNormalizer: Send + Sync {
    /// Convert `input` and return the path of the normalized file.
    async fn normalize(&self, input: &Path) -> Result<PathBuf, ConversionError>;
}

/// [`AudioNormalizer`] backed by an ffmpeg executable.
pub struct FfmpegNormalizer {
    ffmpeg_path: PathBuf,
    output_dir: PathBuf,
}

impl FfmpegNormalizer {
    /// # Arguments
    /// * `ffmpeg_path` - ffmpeg executable, either a bare name looked up in PATH or a full path
    /// * `output_dir` - where normalized files are written (the sample staging directory)
    pub fn new(ffmpeg_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Deterministic output location for `input`: same stem, `.wav` extension.
    /// A clip that already is `<stem>.wav` in the output directory gets
    /// `<stem>.norm.wav`, as ffmpeg cannot write over its own input.
    pub fn output_path_for(&self, input: &Path) -> Result<PathBuf, ConversionError> {
        let stem = input
            .file_stem()
            .ok_or_else(|| ConversionError::InvalidInput(input.to_path_buf()))?;

        let output = self.output_dir.join(with_extension(stem, CANONICAL_EXTENSION));
        if output != input {
            return Ok(output);
        }

        let mut stem = stem.to_os_string();
        stem.push(".");
        stem.push(RENORMALIZED_SUFFIX);
        Ok(self.output_dir.join(with_extension(&stem, CANONICAL_EXTENSION)))
    }

    fn build_args(input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-i".into(),
            input.as_os_str().to_owned(),
            "-ar".into(),
            CANONICAL_SAMPLE_RATE.to_string().into(),
            "-ac".into(),
            CANONICAL_CHANNELS.to_string().into(),
            "-y".into(), // Overwrite a previous normalization of the same clip
            output.as_os_str().to_owned(),
        ]
    }
}

#[async_trait]
impl AudioNormalizer for FfmpegNormalizer {
    async fn normalize(&self, input: &Path) -> Result<PathBuf, ConversionError> {
        let output_path = self.output_path_for(input)?;
        let args = Self::build_args(input, &output_path);

        info!("Running command: {}", command_line(&self.ffmpeg_path, &args));
        let start = Instant::now();

        let output = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        metrics::record_conversion(output.status.success(), start.elapsed());

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConversionError::ConversionFailed {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        debug!("Converted {:?} to {:?}", input, output_path);
        Ok(output_path)
    }
}
