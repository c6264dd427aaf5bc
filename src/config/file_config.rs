use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub base_dir: Option<String>,
    pub sample_dir: Option<String>,
    pub fingerprint_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub max_upload_bytes: Option<usize>,

    // External tools
    pub ffmpeg_path: Option<String>,
    pub matcher: Option<MatcherFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MatcherFileConfig {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
