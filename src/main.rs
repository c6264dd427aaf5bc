use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use adx_match_server::config;
use adx_match_server::matching::{AudfprintMatcher, FfmpegNormalizer, MatchCoordinator};
use adx_match_server::server::{metrics, run_server, RequestsLoggingLevel};
use adx_match_server::staging::StagingArea;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory the staging and matcher defaults are derived from.
    /// Defaults to the current directory.
    #[clap(long, value_parser = parse_path)]
    pub base_dir: Option<PathBuf>,

    /// Where uploaded clips are staged. Defaults to `<base_dir>/temp_audio`.
    #[clap(long, value_parser = parse_path)]
    pub sample_dir: Option<PathBuf>,

    /// Where uploaded .adx databases are staged. Defaults to `<base_dir>/fingerprints`.
    #[clap(long, value_parser = parse_path)]
    pub fingerprint_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 5000)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Maximum accepted size of an upload request body, in bytes.
    #[clap(long, default_value_t = adx_match_server::server::config::DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// ffmpeg executable. Bare names are looked up in PATH.
    #[clap(long)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Interpreter or executable of the fingerprint matcher.
    /// Defaults to the python of `<base_dir>/venv`.
    #[clap(long, value_parser = parse_path)]
    pub matcher_program: Option<PathBuf>,

    /// Arguments placed before `match --dbase <db> <clip>`. Repeatable.
    /// Defaults to `<base_dir>/audfprint/audfprint.py`.
    #[clap(long = "matcher-arg")]
    pub matcher_args: Vec<String>,

    /// Working directory of the matcher. Defaults to `<base_dir>/audfprint`.
    #[clap(long, value_parser = parse_path)]
    pub matcher_workdir: Option<PathBuf>,

    /// Seconds a match attempt may run before it is cancelled.
    #[clap(long, default_value_t = 25)]
    pub match_timeout_secs: u64,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            base_dir: args.base_dir.clone(),
            sample_dir: args.sample_dir.clone(),
            fingerprint_dir: args.fingerprint_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            max_upload_bytes: args.max_upload_bytes,
            ffmpeg_path: args.ffmpeg_path.clone(),
            matcher_program: args.matcher_program.clone(),
            matcher_args: args.matcher_args.clone(),
            matcher_workdir: args.matcher_workdir.clone(),
            match_timeout_secs: args.match_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    info!("Starting adx-match-server ({})", env!("GIT_HASH"));

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  base_dir: {:?}", app_config.base_dir);
    info!("  sample_dir: {:?}", app_config.sample_dir);
    info!("  fingerprint_dir: {:?}", app_config.fingerprint_dir);
    info!("  ffmpeg: {:?}", app_config.ffmpeg_path);
    info!("  matcher: {:?}", app_config.matcher);
    info!("  match timeout: {}s", app_config.match_timeout.as_secs());

    if !app_config.matcher.program.exists() {
        warn!(
            "Matcher program {:?} does not exist, match attempts will fail",
            app_config.matcher.program
        );
    }

    info!("Initializing metrics...");
    metrics::init_metrics();

    let staging = StagingArea::new(&app_config.sample_dir, &app_config.fingerprint_dir);
    staging
        .init()
        .await
        .context("Failed to create staging directories")?;

    let normalizer = FfmpegNormalizer::new(&app_config.ffmpeg_path, &app_config.sample_dir);
    let matcher = AudfprintMatcher::new(app_config.matcher.clone());
    let coordinator = Arc::new(MatchCoordinator::new(
        staging,
        Arc::new(normalizer),
        Arc::new(matcher),
        app_config.match_timeout,
    ));

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);

    let shutdown_token = CancellationToken::new();
    let mut server = tokio::spawn(run_server(
        app_config.server_config(),
        coordinator,
        shutdown_token.clone(),
    ));

    tokio::select! {
        result = &mut server => {
            info!("HTTP server stopped: {:?}", result);
            result?
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            server.await?
        }
    }
}
