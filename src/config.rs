//! Flat, read-only configuration surface. One `Config` constructed at startup
//! from the environment and handed to every component as `Arc<Config>` —
//! no cyclic config graph, no process-wide singleton.

use std::env;
use std::time::Duration;

fn env_var(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendKind {
    Local,
    S3,
    WebDav,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct Config {
    // --- pipeline / encoding ---
    pub webp_quality: u8,
    pub webp_effort: u8,
    pub webp_enabled: bool,
    pub skip_smaller_than_kb: u64,
    pub max_dimension: u32,
    pub max_retries: u32,
    pub backoff_base: Duration,

    pub thumbnail_enabled: bool,
    pub thumbnail_sizes: Vec<u32>,
    pub thumbnail_quality: u8,

    // --- scanner ---
    pub scanner_enabled: bool,
    pub scanner_interval: Duration,
    pub scanner_batch_size: u32,
    pub orphan_threshold: Duration,

    // --- upload ---
    pub upload_max_size_mb: u64,

    // --- cache ---
    pub image_cache_ttl: Duration,
    pub image_data_cache_ttl: Duration,
    pub image_data_cache_max_bytes: u64,
    pub cache_backend: CacheBackendKind,
    pub redis_url: String,

    // --- concurrency ---
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub max_concurrent_decodes: usize,

    // --- storage ---
    pub storage_backend: StorageBackendKind,
    pub storage_backend_id: i32,
    pub local_storage_root: String,
    pub s3_bucket: String,
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub webdav_base_url: String,
    pub webdav_username: Option<String>,
    pub webdav_password: Option<String>,

    // --- infra ---
    pub database_url: String,
    pub bind_host: String,
    pub bind_port: u16,
    /// Origin the HTTP shell advertises in upload response links. Not part
    /// of the pipeline's own contract, but the shell needs it to build
    /// `url`/`html`/`bbcode`/`markdown` links without re-deriving its own bind address.
    pub public_base_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        let storage_backend = match env_var("STORAGE_BACKEND", "local").as_str() {
            "s3" => StorageBackendKind::S3,
            "webdav" => StorageBackendKind::WebDav,
            _ => StorageBackendKind::Local,
        };
        let cache_backend = match env_var("CACHE_BACKEND", "memory").as_str() {
            "redis" => CacheBackendKind::Redis,
            _ => CacheBackendKind::Memory,
        };

        Self {
            webp_quality: env_parse("WEBP_QUALITY", 80),
            webp_effort: env_parse("WEBP_EFFORT", 4),
            webp_enabled: env_parse("WEBP_ENABLED", true),
            skip_smaller_than_kb: env_parse("SKIP_SMALLER_THAN_KB", 10),
            max_dimension: env_parse("MAX_DIMENSION", 8000),
            max_retries: env_parse("MAX_RETRIES", 5),
            backoff_base: Duration::from_secs(60 * env_parse::<u64>("BACKOFF_BASE_MINUTES", 5)),

            thumbnail_enabled: env_parse("THUMBNAIL_ENABLED", true),
            thumbnail_sizes: env_var("THUMBNAIL_SIZES", "600")
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect(),
            thumbnail_quality: env_parse("THUMBNAIL_QUALITY", 80),

            scanner_enabled: env_parse("SCANNER_ENABLED", true),
            scanner_interval: Duration::from_secs(
                60 * env_parse::<u64>("SCANNER_INTERVAL_MINUTES", 1).max(1),
            ),
            scanner_batch_size: env_parse::<u32>("SCANNER_BATCH_SIZE", 100).clamp(1, 1000),
            orphan_threshold: Duration::from_secs(60 * 10),

            upload_max_size_mb: env_parse("UPLOAD_MAX_SIZE_MB", 25),

            image_cache_ttl: Duration::from_secs(env_parse("IMAGE_CACHE_TTL_SECONDS", 3600)),
            image_data_cache_ttl: Duration::from_secs(env_parse(
                "IMAGE_DATA_CACHE_TTL_SECONDS",
                3600,
            )),
            image_data_cache_max_bytes: env_parse("IMAGE_DATA_CACHE_MAX_BYTES", 1_048_576),
            cache_backend,
            redis_url: env_var("REDIS_URL", "redis://127.0.0.1:6379"),

            worker_count: env_parse("WORKER_COUNT", default_worker_count()),
            queue_capacity: env_parse("QUEUE_CAPACITY", 100),
            max_concurrent_decodes: env_parse("MAX_CONCURRENT_DECODES", 2),

            storage_backend,
            storage_backend_id: env_parse("STORAGE_BACKEND_ID", 1),
            local_storage_root: env_var("LOCAL_STORAGE_ROOT", "./data/images"),
            s3_bucket: env_var("S3_BUCKET", "imagehost"),
            s3_endpoint: env::var("S3_ENDPOINT").ok().filter(|s| !s.trim().is_empty()),
            s3_region: env_var("S3_REGION", "us-east-1"),
            webdav_base_url: env_var("WEBDAV_BASE_URL", "http://127.0.0.1:8080/webdav"),
            webdav_username: env::var("WEBDAV_USERNAME").ok(),
            webdav_password: env::var("WEBDAV_PASSWORD").ok(),

            database_url: env_var("DATABASE_URL", "postgres://localhost/imagehost"),
            bind_host: env_var("HOST", "0.0.0.0"),
            bind_port: env_parse("PORT", 8080),
            public_base_url: env_var("PUBLIC_BASE_URL", "http://localhost:8080"),
        }
    }

    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let capped = retry_count.min(5);
        let delay = self.backoff_base * 2u32.saturating_pow(capped);
        delay.min(Duration::from_secs(60 * 60))
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2)
        .min(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_one_hour() {
        let cfg = Config {
            backoff_base: Duration::from_secs(300),
            ..Config::from_env()
        };
        assert_eq!(cfg.backoff_for(0), Duration::from_secs(300));
        assert_eq!(cfg.backoff_for(1), Duration::from_secs(600));
        assert_eq!(cfg.backoff_for(5), Duration::from_secs(3600));
        assert_eq!(cfg.backoff_for(50), Duration::from_secs(3600));
    }
}
