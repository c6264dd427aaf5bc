use super::RequestsLoggingLevel;

/// Default request body limit for `/upload`, both files included.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    pub metrics_port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 5000,
            metrics_port: 9091,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}
