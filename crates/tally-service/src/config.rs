//! Service configuration.

use tally_core::{PlanCatalog, DEFAULT_TRIAL_CREDITS, DEFAULT_TRIAL_DAYS};

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to the `RocksDB` data directory (default: "/data/tally").
    pub data_dir: String,

    /// Shared secret for provider webhook signatures. When unset, signature
    /// verification is skipped with a warning (development mode).
    pub webhook_secret: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Default trial length in days.
    pub trial_days: i64,

    /// Default trial credit cap.
    pub trial_credits: i64,

    /// Interval between trial-expiry sweeps, in seconds.
    pub trial_expiry_interval_seconds: u64,

    /// Capacity of the in-process recent-event-id cache. The cache is a
    /// latency hint only; the durable event table is the dedup mechanism.
    pub recent_event_cache_size: usize,

    /// Plan catalog mapping plan ids to prices and credit grants.
    pub plans: PlanCatalog,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/tally".into()),
            webhook_secret: std::env::var("WEBHOOK_SECRET").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            trial_days: std::env::var("TRIAL_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TRIAL_DAYS),
            trial_credits: std::env::var("TRIAL_CREDITS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TRIAL_CREDITS),
            trial_expiry_interval_seconds: std::env::var("TRIAL_EXPIRY_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3600),
            recent_event_cache_size: std::env::var("RECENT_EVENT_CACHE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024),
            plans: PlanCatalog::default(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/tally".into(),
            webhook_secret: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            trial_days: DEFAULT_TRIAL_DAYS,
            trial_credits: DEFAULT_TRIAL_CREDITS,
            trial_expiry_interval_seconds: 3600,
            recent_event_cache_size: 1024,
            plans: PlanCatalog::default(),
        }
    }
}
