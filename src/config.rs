use crate::error::{AppError, Result};

/// Default validity window for a freshly published deal (hours).
pub const DEFAULT_EXPIRY_HOURS: u32 = 24;

/// Maximum deletions committed in one purge transaction.
/// Matches the managed document store's write-batch ceiling.
pub const PURGE_CHUNK_SIZE: usize = 500;

/// Countdown refresh interval (seconds).
pub const COUNTDOWN_TICK_SECS: u64 = 1;

/// Feed re-subscribe backoff values in milliseconds. The last value repeats.
pub const RESUBSCRIBE_BACKOFF_MS: &[u64] = &[250, 500, 1000, 2000];

/// Admin session lifetime: 7 days.
pub const SESSION_DURATION_SECS: i64 = 7 * 24 * 60 * 60;

/// How often abandoned admin sessions are swept (seconds).
pub const SESSION_SWEEP_SECS: u64 = 300;

/// Shortest accepted admin password.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Cosmetic "people watching" counter range assigned at publish time.
pub const TRENDING_MIN: u32 = 500;
pub const TRENDING_MAX: u32 = 2500;

pub const DEFAULT_PLATFORMS: &[&str] = &["Amazon", "Flipkart", "Myntra", "Ajio"];

/// Remote hosts product images may be loaded from.
pub const DEFAULT_IMAGE_HOSTS: &[&str] = &[
    "m.media-amazon.com",
    "www.amazon.in",
    "rukminim1.flixcart.com",
    "rukminim2.flixcart.com",
    "assets.ajio.com",
    "assets.myntassets.com",
    "via.placeholder.com",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Expiry applied when a publish request omits `expiryHours` (DEFAULT_EXPIRY_HOURS)
    pub default_expiry_hours: u32,
    /// Deletions per purge transaction (PURGE_CHUNK_SIZE)
    pub purge_chunk_size: usize,
    /// Vendors accepted by the publish form (PLATFORMS, comma-separated)
    pub platforms: Vec<String>,
    /// Image host allow-list (IMAGE_HOSTS, comma-separated)
    pub image_hosts: Vec<String>,
    /// Whether `POST /auth/signup` may create admin accounts (ALLOW_SIGNUP)
    pub allow_signup: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "dealzo.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            default_expiry_hours: match std::env::var("DEFAULT_EXPIRY_HOURS") {
                Ok(v) => v.parse::<u32>().ok().filter(|h| *h > 0).ok_or_else(|| {
                    AppError::Config("DEFAULT_EXPIRY_HOURS must be a positive integer".to_string())
                })?,
                Err(_) => DEFAULT_EXPIRY_HOURS,
            },
            purge_chunk_size: match std::env::var("PURGE_CHUNK_SIZE") {
                Ok(v) => v.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                    AppError::Config("PURGE_CHUNK_SIZE must be a positive integer".to_string())
                })?,
                Err(_) => PURGE_CHUNK_SIZE,
            },
            platforms: list_var("PLATFORMS", DEFAULT_PLATFORMS),
            image_hosts: list_var("IMAGE_HOSTS", DEFAULT_IMAGE_HOSTS),
            allow_signup: std::env::var("ALLOW_SIGNUP")
                .map(|v| !matches!(v.trim(), "0" | "false" | "no"))
                .unwrap_or(true),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "dealzo.db".to_string(),
            api_port: 3000,
            default_expiry_hours: DEFAULT_EXPIRY_HOURS,
            purge_chunk_size: PURGE_CHUNK_SIZE,
            platforms: DEFAULT_PLATFORMS.iter().map(|s| s.to_string()).collect(),
            image_hosts: DEFAULT_IMAGE_HOSTS.iter().map(|s| s.to_string()).collect(),
            allow_signup: true,
        }
    }
}

fn list_var(name: &str, default: &[&str]) -> Vec<String> {
    let parsed: Vec<String> = std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if parsed.is_empty() {
        default.iter().map(|s| s.to_string()).collect()
    } else {
        parsed
    }
}
