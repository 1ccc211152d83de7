use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// root directory uploads land in and files are served from
    pub upload_dir: PathBuf,
    /// bind address
    pub host: String,
    /// bind port
    pub port: u16,
    /// largest file a client may declare, in bytes
    pub max_file_size: u64,
    /// chunk size in bytes, only used to reconcile progress from disk
    pub chunk_size: u64,
    /// largest single request body (one chunk plus multipart overhead)
    pub max_request_size: usize,
    /// number of tokio worker threads
    pub worker_threads: usize,
    /// cors allowed origins (comma-separated), empty means any
    pub cors_origins: Vec<String>,
    /// rate limit: one request is replenished every this many milliseconds per client
    pub rate_limit_replenish_ms: u64,
    /// rate limit: burst size per client
    pub rate_limit_burst: u32,
}

impl Config {
    /// load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // sizes are configured in GB/MB like the upload form shows them
        let max_file_size_gb = env_parse::<u64>("MAX_FILE_SIZE_GB")
            .filter(|v| *v > 0)
            .unwrap_or(20);
        let chunk_size_mb = env_parse::<u64>("CHUNK_SIZE_MB")
            .filter(|v| *v > 0)
            .unwrap_or(5);
        let max_request_size_mb = env_parse::<usize>("MAX_REQUEST_SIZE_MB")
            .filter(|v| *v > 0)
            .unwrap_or(64);

        Self {
            upload_dir: std::env::var("UPLOAD_DIR")
                .unwrap_or_else(|_| "./uploads".to_string())
                .into(),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse::<u16>("PORT").unwrap_or(18181),
            max_file_size: max_file_size_gb * GIB,
            chunk_size: chunk_size_mb * MIB,
            max_request_size: max_request_size_mb * MIB as usize,
            worker_threads: env_parse::<usize>("WORKER_THREADS")
                .filter(|t| *t > 0)
                .unwrap_or(8),
            cors_origins,
            rate_limit_replenish_ms: env_parse::<u64>("RATE_LIMIT_REPLENISH_MS")
                .filter(|r| *r > 0)
                .unwrap_or(20),
            rate_limit_burst: env_parse::<u32>("RATE_LIMIT_BURST")
                .filter(|b| *b > 0)
                .unwrap_or(100),
        }
    }
}

// unset or unparsable falls back to the default
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
