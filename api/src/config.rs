use std::time::Duration;

use trax_core::invitations::parse_expiry_days;

use crate::store::RetryPolicy;

const DEFAULT_APP_BASE_URL: &str = "https://trax-event.app";
const DEFAULT_HOST_PORTAL_URL: &str = "https://host.trax-event.app";
const DEFAULT_SALES_PORTAL_URL: &str = "https://trax-admin-portal.web.app";
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000";
const DEFAULT_EMAIL_FROM: &str = "Trax Events <developer@trax-event.com>";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl StoreKind {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "memory" => Self::Memory,
            _ => Self::Postgres,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostmarkConfig {
    pub server_token: String,
    pub message_stream: String,
    pub from: String,
}

/// Runtime settings, read once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub app_base_url: String,
    pub host_portal_url: String,
    pub sales_portal_url: String,
    pub invitation_expiry_days: i64,
    /// `None` when no provider token is configured
    pub postmark: Option<PostmarkConfig>,
    pub retry: RetryPolicy,
    /// Comma-separated browser origins allowed by CORS
    pub cors_origins: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let url = |key: &str, default: &str| {
            non_empty(key)
                .unwrap_or_else(|| default.to_string())
                .trim_end_matches('/')
                .to_string()
        };

        let postmark = non_empty("POSTMARK_SERVER_TOKEN").map(|server_token| PostmarkConfig {
            server_token,
            message_stream: non_empty("POSTMARK_MESSAGE_STREAM")
                .unwrap_or_else(|| "outbound".to_string()),
            from: non_empty("EMAIL_FROM").unwrap_or_else(|| DEFAULT_EMAIL_FROM.to_string()),
        });

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: non_empty("TRAX_TX_MAX_ATTEMPTS")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|n| *n >= 1)
                .unwrap_or(defaults.max_attempts),
            base_backoff: non_empty("TRAX_TX_BASE_BACKOFF_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_backoff),
        };

        Config {
            port: non_empty("PORT").and_then(|p| p.parse().ok()).unwrap_or(3000),
            store: StoreKind::parse(&non_empty("TRAX_STORE").unwrap_or_default()),
            database_url: non_empty("DATABASE_URL"),
            app_base_url: url("APP_BASE_URL", DEFAULT_APP_BASE_URL),
            host_portal_url: url("HOST_PORTAL_URL", DEFAULT_HOST_PORTAL_URL),
            sales_portal_url: url("SALES_PORTAL_URL", DEFAULT_SALES_PORTAL_URL),
            invitation_expiry_days: parse_expiry_days(non_empty("INV_EXPIRY_DAYS").as_deref()),
            postmark,
            retry,
            cors_origins: non_empty("TRAX_CORS_ORIGINS")
                .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string()),
        }
    }

    /// Settings used by handler tests.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            port: 0,
            store: StoreKind::Memory,
            database_url: None,
            app_base_url: DEFAULT_APP_BASE_URL.to_string(),
            host_portal_url: DEFAULT_HOST_PORTAL_URL.to_string(),
            sales_portal_url: DEFAULT_SALES_PORTAL_URL.to_string(),
            invitation_expiry_days: 14,
            postmark: None,
            retry: RetryPolicy {
                max_attempts: 5,
                base_backoff: Duration::from_millis(1),
            },
            cors_origins: DEFAULT_CORS_ORIGINS.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.store, StoreKind::Postgres);
        assert_eq!(cfg.app_base_url, "https://trax-event.app");
        assert_eq!(cfg.sales_portal_url, "https://trax-admin-portal.web.app");
        assert_eq!(cfg.invitation_expiry_days, 14);
        assert_eq!(cfg.postmark, None);
        assert_eq!(cfg.retry, RetryPolicy::default());
    }

    #[test]
    fn postmark_requires_a_token() {
        let cfg = config(&[("POSTMARK_SERVER_TOKEN", "  "), ("EMAIL_FROM", "x@y.z")]);
        assert_eq!(cfg.postmark, None);

        let cfg = config(&[("POSTMARK_SERVER_TOKEN", "pm-token")]);
        let postmark = cfg.postmark.unwrap();
        assert_eq!(postmark.message_stream, "outbound");
        assert_eq!(postmark.from, DEFAULT_EMAIL_FROM);
    }

    #[test]
    fn bad_numbers_fall_back() {
        let cfg = config(&[
            ("INV_EXPIRY_DAYS", "0"),
            ("TRAX_TX_MAX_ATTEMPTS", "0"),
            ("PORT", "http"),
            ("TRAX_STORE", "Memory"),
            ("APP_BASE_URL", "https://staging.trax-event.app/"),
        ]);
        assert_eq!(cfg.invitation_expiry_days, 14);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.store, StoreKind::Memory);
        assert_eq!(cfg.app_base_url, "https://staging.trax-event.app");
    }
}
