use std::env;

/// Runtime configuration, read from the environment once at startup and
/// passed around inside `AppState`. Policy constants (rate ceiling, stuck
/// threshold, batch size, cache window) are tunable rather than hard-coded.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub use_mock_ai: bool,
    pub ip_hash_salt: String,
    /// Shared secret for the worker-trigger endpoint; unset means open (dev mode).
    pub worker_secret: Option<String>,
    pub rate_limit_max_per_day: i32,
    pub rate_limit_window_hours: i64,
    pub stuck_threshold_secs: i64,
    pub sweep_batch_size: usize,
    pub cache_window_hours: i64,
    pub browser_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_api_base: "https://api.openai.com".to_string(),
            use_mock_ai: false,
            ip_hash_salt: "local-dev-salt".to_string(),
            worker_secret: None,
            rate_limit_max_per_day: 50,
            rate_limit_window_hours: 24,
            stuck_threshold_secs: 300,
            sweep_batch_size: 1,
            cache_window_hours: 24,
            browser_enabled: true,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty()),
            openai_api_base: env::var("OPENAI_API_BASE")
                .unwrap_or(defaults.openai_api_base),
            use_mock_ai: env_bool("USE_MOCK_AI", defaults.use_mock_ai),
            ip_hash_salt: env::var("IP_HASH_SALT").unwrap_or(defaults.ip_hash_salt),
            worker_secret: env::var("WORKER_SECRET").ok().filter(|v| !v.is_empty()),
            rate_limit_max_per_day: env_parse(
                "RATE_LIMIT_MAX_PER_DAY",
                defaults.rate_limit_max_per_day,
            ),
            rate_limit_window_hours: env_parse(
                "RATE_LIMIT_WINDOW_HOURS",
                defaults.rate_limit_window_hours,
            ),
            stuck_threshold_secs: env_parse("STUCK_THRESHOLD_SECS", defaults.stuck_threshold_secs),
            sweep_batch_size: env_parse("SWEEP_BATCH_SIZE", defaults.sweep_batch_size),
            cache_window_hours: env_parse("CACHE_WINDOW_HOURS", defaults.cache_window_hours),
            browser_enabled: env_bool("BROWSER_ENABLED", defaults.browser_enabled),
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
