mod file_config;

pub use file_config::{FileConfig, MatcherFileConfig};

use crate::matching::{MatcherCommand, DEFAULT_MATCH_TIMEOUT};
use crate::server::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::server::{RequestsLoggingLevel, ServerConfig};
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub base_dir: Option<PathBuf>,
    pub sample_dir: Option<PathBuf>,
    pub fingerprint_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub max_upload_bytes: usize,
    pub ffmpeg_path: Option<PathBuf>,
    pub matcher_program: Option<PathBuf>,
    pub matcher_args: Vec<String>,
    pub matcher_workdir: Option<PathBuf>,
    pub match_timeout_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            sample_dir: None,
            fingerprint_dir: None,
            port: 5000,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            ffmpeg_path: None,
            matcher_program: None,
            matcher_args: Vec::new(),
            matcher_workdir: None,
            match_timeout_secs: DEFAULT_MATCH_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_dir: PathBuf,
    pub sample_dir: PathBuf,
    pub fingerprint_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub max_upload_bytes: usize,

    /// Bare names are looked up in PATH.
    pub ffmpeg_path: PathBuf,
    pub matcher: MatcherCommand,
    pub match_timeout: Duration,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present. Relative paths are
    /// taken relative to `base_dir`.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();
        let matcher_file = file.matcher.unwrap_or_default();

        let base_dir = match file.base_dir.map(PathBuf::from).or_else(|| cli.base_dir.clone()) {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        if !base_dir.exists() {
            bail!("Base directory does not exist: {:?}", base_dir);
        }
        if !base_dir.is_dir() {
            bail!("base_dir is not a directory: {:?}", base_dir);
        }

        let sample_dir = file
            .sample_dir
            .map(PathBuf::from)
            .or_else(|| cli.sample_dir.clone())
            .map(|p| relative_to(&base_dir, p))
            .unwrap_or_else(|| base_dir.join("temp_audio"));
        let fingerprint_dir = file
            .fingerprint_dir
            .map(PathBuf::from)
            .or_else(|| cli.fingerprint_dir.clone())
            .map(|p| relative_to(&base_dir, p))
            .unwrap_or_else(|| base_dir.join("fingerprints"));
        if sample_dir == fingerprint_dir {
            bail!(
                "sample_dir and fingerprint_dir must be different directories: {:?}",
                sample_dir
            );
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());
        let max_upload_bytes = file.max_upload_bytes.unwrap_or(cli.max_upload_bytes);

        let ffmpeg_path = file
            .ffmpeg_path
            .map(PathBuf::from)
            .or_else(|| cli.ffmpeg_path.clone())
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));

        let matcher_install_dir = base_dir.join("audfprint");
        let matcher = MatcherCommand {
            program: matcher_file
                .program
                .map(PathBuf::from)
                .or_else(|| cli.matcher_program.clone())
                .map(|p| relative_to(&base_dir, p))
                .unwrap_or_else(|| default_interpreter(&base_dir)),
            prefix_args: match matcher_file.args {
                Some(args) => args,
                None if !cli.matcher_args.is_empty() => cli.matcher_args.clone(),
                None => vec![matcher_install_dir
                    .join("audfprint.py")
                    .to_string_lossy()
                    .into_owned()],
            },
            working_dir: matcher_file
                .working_dir
                .map(PathBuf::from)
                .or_else(|| cli.matcher_workdir.clone())
                .map(|p| relative_to(&base_dir, p))
                .unwrap_or(matcher_install_dir),
        };

        let timeout_secs = matcher_file.timeout_secs.unwrap_or(cli.match_timeout_secs);
        if timeout_secs == 0 {
            bail!("match timeout must be at least one second");
        }

        Ok(Self {
            base_dir,
            sample_dir,
            fingerprint_dir,
            port,
            metrics_port,
            logging_level,
            max_upload_bytes,
            ffmpeg_path,
            matcher,
            match_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            requests_logging_level: self.logging_level.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

fn relative_to(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Interpreter of the matcher's virtualenv.
fn default_interpreter(base_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        base_dir.join("venv").join("Scripts").join("python.exe")
    } else {
        base_dir.join("venv").join("bin").join("python")
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
