use std::env;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // AI provider
    pub anthropic_api_key: String,
    pub anthropic_model: String,

    // Content source
    pub reddit_user_agent: String,
    pub search_limit: u32,
    pub search_timeframe: String,

    // Notifications
    pub slack_webhook_url: Option<String>,

    // Scheduling
    pub tick_interval_secs: u64,
    pub dispatch_batch_size: u32,
    pub keyword_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            anthropic_model: env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            reddit_user_agent: env::var("REDDIT_USER_AGENT")
                .unwrap_or_else(|_| "leadscout/0.1 (lead discovery bot)".to_string()),
            search_limit: parsed_env("SEARCH_LIMIT", 10),
            search_timeframe: env::var("SEARCH_TIMEFRAME").unwrap_or_else(|_| "day".to_string()),
            slack_webhook_url: env::var("SLACK_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            tick_interval_secs: parsed_env("TICK_INTERVAL_SECS", 60),
            dispatch_batch_size: parsed_env("DISPATCH_BATCH_SIZE", 5),
            keyword_timeout_secs: parsed_env("KEYWORD_TIMEOUT_SECS", 120),
        }
    }

    /// Log non-secret settings at startup.
    pub fn log_redacted(&self) {
        info!(
            model = self.anthropic_model.as_str(),
            user_agent = self.reddit_user_agent.as_str(),
            search_limit = self.search_limit,
            timeframe = self.search_timeframe.as_str(),
            tick_interval_secs = self.tick_interval_secs,
            batch_size = self.dispatch_batch_size,
            keyword_timeout_secs = self.keyword_timeout_secs,
            slack = self.slack_webhook_url.is_some(),
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number, got '{v}'")),
        Err(_) => default,
    }
}
