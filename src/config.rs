use std::fmt;

use serde::Deserialize;

#[derive(Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,

    /// API key for the chat-completions endpoint. Follow-ups fall back to
    /// static templates when unset.
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,

    pub graph_api_base: String,
    pub graph_api_version: String,
    /// Token echoed back during the Messenger webhook handshake
    pub fb_verify_token: Option<String>,
    /// App secret used to check `X-Hub-Signature-256` on webhook posts
    pub fb_app_secret: Option<String>,

    /// Bearer secret for the cron endpoint; the check is skipped when unset
    pub cron_secret: Option<String>,
    /// Header the hosting platform sets on its own scheduled invocations
    pub platform_cron_header: String,
    /// Bearer token for the control-panel API
    pub admin_token: Option<String>,

    pub http_timeout_secs: u64,
    pub follow_up_batch_size: i64,
    pub cooldown_hours: i64,
    pub default_delay_hours: i64,
    pub retry_backoff_hours: i64,
    pub takeover_minutes: i64,
    /// Run the follow-up processor in-process every N seconds
    pub cron_interval_secs: Option<u64>,
    /// Schedule an initial follow-up after each inbound message
    pub auto_follow_up: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")?,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            llm_api_key: optional("LLM_API_KEY"),
            llm_base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://integrate.api.nvidia.com/v1".to_string()),
            llm_model: std::env::var("LLM_MODEL")
                .unwrap_or_else(|_| "meta/llama-3.1-8b-instruct".to_string()),
            graph_api_base: std::env::var("GRAPH_API_BASE")
                .unwrap_or_else(|_| "https://graph.facebook.com".to_string()),
            graph_api_version: std::env::var("GRAPH_API_VERSION")
                .unwrap_or_else(|_| "v19.0".to_string()),
            fb_verify_token: optional("FB_VERIFY_TOKEN"),
            fb_app_secret: optional("FB_APP_SECRET"),
            cron_secret: optional("CRON_SECRET"),
            platform_cron_header: std::env::var("PLATFORM_CRON_HEADER")
                .unwrap_or_else(|_| "x-vercel-cron".to_string()),
            admin_token: optional("ADMIN_TOKEN"),
            http_timeout_secs: parse_or("HTTP_TIMEOUT_SECS", 30),
            follow_up_batch_size: parse_or("FOLLOW_UP_BATCH_SIZE", 20),
            cooldown_hours: parse_or("COOLDOWN_HOURS", 4),
            default_delay_hours: parse_or("DEFAULT_DELAY_HOURS", 4),
            retry_backoff_hours: parse_or("RETRY_BACKOFF_HOURS", 1),
            takeover_minutes: parse_or("TAKEOVER_MINUTES", 60),
            cron_interval_secs: optional("CRON_INTERVAL_SECS").and_then(|s| s.parse().ok()),
            auto_follow_up: std::env::var("AUTO_FOLLOW_UP")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
        })
    }
}

/// Unset and blank variables both read as `None`.
fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn redact(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "[REDACTED]"
    } else {
        "None"
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &"[REDACTED]")
            .field("bind_addr", &self.bind_addr)
            .field("llm_api_key", &redact(&self.llm_api_key))
            .field("llm_base_url", &self.llm_base_url)
            .field("llm_model", &self.llm_model)
            .field("graph_api_base", &self.graph_api_base)
            .field("graph_api_version", &self.graph_api_version)
            .field("fb_verify_token", &redact(&self.fb_verify_token))
            .field("fb_app_secret", &redact(&self.fb_app_secret))
            .field("cron_secret", &redact(&self.cron_secret))
            .field("platform_cron_header", &self.platform_cron_header)
            .field("admin_token", &redact(&self.admin_token))
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("follow_up_batch_size", &self.follow_up_batch_size)
            .field("cooldown_hours", &self.cooldown_hours)
            .field("default_delay_hours", &self.default_delay_hours)
            .field("retry_backoff_hours", &self.retry_backoff_hours)
            .field("takeover_minutes", &self.takeover_minutes)
            .field("cron_interval_secs", &self.cron_interval_secs)
            .field("auto_follow_up", &self.auto_follow_up)
            .finish()
    }
}

#[cfg(test)]
impl AppConfig {
    /// Defaults matching an environment with only `DATABASE_URL` set.
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/campy_test".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            llm_api_key: None,
            llm_base_url: "http://localhost:9".to_string(),
            llm_model: "test".to_string(),
            graph_api_base: "http://localhost:9".to_string(),
            graph_api_version: "v19.0".to_string(),
            fb_verify_token: None,
            fb_app_secret: None,
            cron_secret: None,
            platform_cron_header: "x-vercel-cron".to_string(),
            admin_token: None,
            http_timeout_secs: 30,
            follow_up_batch_size: 20,
            cooldown_hours: 4,
            default_delay_hours: 4,
            retry_backoff_hours: 1,
            takeover_minutes: 60,
            cron_interval_secs: None,
            auto_follow_up: true,
        }
    }
}
