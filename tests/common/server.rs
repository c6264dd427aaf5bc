//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own staging area and fake tools.

use super::constants::*;
use super::fixtures::{create_fake_ffmpeg, create_fake_matcher, FakeFfmpeg, FakeMatcher};
use adx_match_server::matching::{
    AudfprintMatcher, FfmpegNormalizer, MatchCoordinator, MatcherCommand,
};
use adx_match_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use adx_match_server::staging::StagingArea;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Knobs for [`TestServer::spawn_with`]
#[derive(Debug, Clone)]
pub struct TestServerOptions {
    pub ffmpeg: FakeFfmpeg,
    pub matcher: FakeMatcher,
    pub match_timeout_secs: u64,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            ffmpeg: FakeFfmpeg::Converting,
            matcher: FakeMatcher::Matching,
            match_timeout_secs: TEST_MATCH_TIMEOUT_SECS,
        }
    }
}

/// Test server instance with isolated staging directories
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Staging area for direct filesystem checks in tests
    pub staging: StagingArea,

    /// Working directory the fake matcher runs in
    pub matcher_workdir: PathBuf,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a server whose matcher behaves as given, with a working ffmpeg
    pub async fn spawn(matcher: FakeMatcher) -> Self {
        Self::spawn_with(TestServerOptions {
            matcher,
            ..Default::default()
        })
        .await
    }

    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Creates a temporary base directory with both staging directories
    /// 2. Writes the fake ffmpeg and matcher scripts
    /// 3. Binds to a random port (127.0.0.1:0)
    /// 4. Spawns the server in a background task
    /// 5. Waits for the server to be ready
    ///
    /// # Panics
    ///
    /// Panics if any of the above fails.
    pub async fn spawn_with(options: TestServerOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let tools_dir = base.join("tools");
        let matcher_workdir = base.join("audfprint");
        std::fs::create_dir_all(&tools_dir).expect("Failed to create tools dir");
        std::fs::create_dir_all(&matcher_workdir).expect("Failed to create matcher dir");

        let ffmpeg_path =
            create_fake_ffmpeg(&tools_dir, options.ffmpeg).expect("Failed to write fake ffmpeg");
        let matcher_path = create_fake_matcher(&tools_dir, options.matcher)
            .expect("Failed to write fake matcher");

        let staging = StagingArea::new(base.join("temp_audio"), base.join("fingerprints"));
        staging
            .init()
            .await
            .expect("Failed to create staging directories");

        let coordinator = Arc::new(MatchCoordinator::new(
            staging.clone(),
            Arc::new(FfmpegNormalizer::new(ffmpeg_path, staging.sample_dir())),
            Arc::new(AudfprintMatcher::new(MatcherCommand {
                program: matcher_path,
                prefix_args: vec![],
                working_dir: matcher_workdir.clone(),
            })),
            Duration::from_secs(options.match_timeout_secs),
        ));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            ..Default::default()
        };
        let app = make_app(config, coordinator);

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            staging,
            matcher_workdir,
            _temp_dir: temp_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Arguments the fake matcher was last invoked with, if it ran
    pub fn matcher_invocation(&self) -> Option<String> {
        std::fs::read_to_string(self.matcher_workdir.join(MATCHER_INVOCATION_FILE))
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Process id the fake matcher recorded when it last started
    pub fn matcher_pid(&self) -> Option<u32> {
        std::fs::read_to_string(self.matcher_workdir.join(MATCHER_PID_FILE))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// True when neither staging directory holds a file
    pub async fn staging_is_empty(&self) -> bool {
        self.staging
            .is_empty()
            .await
            .expect("Failed to inspect staging area")
    }

    /// Polls the staging area until it is empty, false if `timeout` passes first
    pub async fn wait_for_staging_empty(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        loop {
            if self.staging_is_empty().await {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
        }
    }

    /// Polls until the process `pid` is gone, false if `timeout` passes first
    pub async fn wait_for_process_exit(pid: u32, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        loop {
            if !process_is_alive(pid) {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
        }
    }

    /// Waits for the server to become ready by polling the / endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A killed child stays a zombie until its parent reaps it, which counts as gone.
#[cfg(target_os = "linux")]
fn process_is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // The state follows the parenthesized command name
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_is_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    false
}
