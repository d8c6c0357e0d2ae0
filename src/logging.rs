//! Logging and tracing configuration.
//!
//! Structured JSON output in production, human-readable output in
//! development, plus helpers for keeping phone numbers and provider
//! credentials out of the logs.

use std::env;
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Detect environment from the ENVIRONMENT (or ENV) variable
    pub fn from_env() -> Self {
        Self::parse(
            &env::var("ENVIRONMENT")
                .or_else(|_| env::var("ENV"))
                .unwrap_or_else(|_| "development".to_string()),
        )
    }

    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    pub fn default_log_level(&self) -> Level {
        match self {
            Self::Development => Level::DEBUG,
            Self::Staging => Level::INFO,
            Self::Production => Level::INFO,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Initialize the tracing subscriber.
///
/// # Environment Variables
/// - `ENVIRONMENT` or `ENV`: "production", "staging" or "development"
/// - `RUST_LOG`: override the filter (e.g. "info", "skuul_fees=debug")
/// - `LOG_FORMAT`: force "json" or "pretty"
pub fn init_tracing() {
    let environment = Environment::from_env();

    let use_json = env::var("LOG_FORMAT")
        .map(|f| f.to_lowercase() == "json")
        .unwrap_or_else(|_| environment.is_production());

    let default_directives = format!(
        "{}={},tower_http=debug,axum=debug,sqlx=warn,hyper=warn,reqwest=warn",
        env!("CARGO_PKG_NAME").replace('-', "_"),
        environment.default_log_level()
    );
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    if use_json {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_level(true)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).init();
    } else {
        let pretty_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(pretty_layer).init();
    }

    tracing::info!(
        environment = ?environment,
        format = if use_json { "json" } else { "pretty" },
        "Tracing initialized"
    );
}

/// Mask a phone number for logging, keeping the prefix and last 3 digits.
///
/// ```
/// use skuul_fees::logging::mask_phone;
/// assert_eq!(mask_phone("254712345678"), "2547*****678");
/// ```
pub fn mask_phone(phone: &str) -> String {
    let len = phone.chars().count();
    if len <= 7 {
        return "****".to_string();
    }
    let head: String = phone.chars().take(4).collect();
    let tail: String = phone.chars().skip(len - 3).collect();
    format!("{}{}{}", head, "*".repeat(len - 7), tail)
}

const SENSITIVE_KEYS: &[&str] = &[
    "Password",
    "SecurityCredential",
    "access_token",
    "token",
    "secret",
    "apiKey",
    "api_key",
    "authorization",
    "passkey",
];

fn sensitive_patterns() -> &'static [(regex::Regex, String)] {
    static PATTERNS: OnceLock<Vec<(regex::Regex, String)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        SENSITIVE_KEYS
            .iter()
            .filter_map(|key| {
                regex::Regex::new(&format!(r#"(?i)"{}"\s*:\s*"[^"]*""#, key))
                    .ok()
                    .map(|re| (re, format!(r#""{}": "[REDACTED]""#, key)))
            })
            .collect()
    })
}

/// Redact credential values from JSON-like provider payloads.
pub fn redact_sensitive_data(text: &str) -> String {
    let mut result = text.to_string();
    for (re, replacement) in sensitive_patterns() {
        result = re.replace_all(&result, replacement.as_str()).to_string();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse("PROD"), Environment::Production);
        assert_eq!(Environment::parse("stage"), Environment::Staging);
        assert_eq!(Environment::parse("anything"), Environment::Development);
        assert!(Environment::Production.is_production());
    }

    #[test]
    fn default_log_levels() {
        assert_eq!(Environment::Development.default_log_level(), Level::DEBUG);
        assert_eq!(Environment::Production.default_log_level(), Level::INFO);
        assert_eq!(Environment::Staging.default_log_level(), Level::INFO);
    }

    #[test]
    fn phone_masking() {
        assert_eq!(mask_phone("254712345678"), "2547*****678");
        assert_eq!(mask_phone("12345"), "****");
    }

    #[test]
    fn provider_credentials_are_redacted() {
        let payload = r#"{"BusinessShortCode":"174379","Password":"MTc0Mzc5YmZi","SecurityCredential": "abc==","Amount":"500"}"#;
        let redacted = redact_sensitive_data(payload);
        assert!(!redacted.contains("MTc0Mzc5YmZi"));
        assert!(!redacted.contains("abc=="));
        assert!(redacted.contains("[REDACTED]"));
        assert!(redacted.contains("174379"));
        assert!(redacted.contains("500"));
    }

    #[test]
    fn oauth_token_is_redacted() {
        let body = r#"{"access_token": "c9SQxWWhmdVRlyh0zh8gZDTkubVF", "expires_in": "3599"}"#;
        let redacted = redact_sensitive_data(body);
        assert!(!redacted.contains("c9SQxWWhmdVRlyh0zh8gZDTkubVF"));
        assert!(redacted.contains("3599"));
    }
}
