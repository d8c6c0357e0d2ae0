//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use crate::payments::types::MpesaEnvironment;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub mpesa: MpesaConfig,
    pub notifications: NotificationConfig,
    pub receipts: ReceiptConfig,
    pub polling: PollingConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub app_url: String,
    /// Exposes internal error detail in API responses.
    pub debug: bool,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Daraja credentials and endpoints
#[derive(Clone)]
pub struct MpesaConfig {
    pub environment: MpesaEnvironment,
    /// Overrides the environment's base URL (local stubs).
    pub base_url: Option<String>,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub initiator_name: String,
    pub initiator_password: String,
    pub cert_path: Option<PathBuf>,
    /// Precomputed security credential; skips certificate encryption.
    pub security_credential: Option<String>,
    /// Base callback URL; `/stk` and `/b2c` are appended per operation.
    pub callback_url: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpesaConfig")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("shortcode", &self.shortcode)
            .field("initiator_name", &self.initiator_name)
            .field("cert_path", &self.cert_path)
            .field("callback_url", &self.callback_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

/// Receipt delivery providers
#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    pub channels: Vec<String>,
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub mail_from: String,
    pub africastalking_username: Option<String>,
    pub africastalking_api_key: Option<String>,
    pub africastalking_sender_id: Option<String>,
    pub africastalking_base_url: String,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_whatsapp_from: Option<String>,
    pub twilio_base_url: String,
}

/// Receipt artifact settings
#[derive(Debug, Clone)]
pub struct ReceiptConfig {
    pub directory: PathBuf,
    pub school_name: String,
}

/// Bounded status polling after an accepted STK push
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 30,
            interval: Duration::from_secs(10),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// With `SKIP_EXTERNALS=true` the database section is optional and the
    /// service runs on in-memory stores.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        let database = match DatabaseConfig::from_env() {
            Ok(config) => Some(config),
            Err(ConfigError::MissingVariable(_)) if skip_externals() => None,
            Err(e) => return Err(e),
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            mpesa: MpesaConfig::from_env()?,
            notifications: NotificationConfig::from_env()?,
            receipts: ReceiptConfig::from_env()?,
            polling: PollingConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.mpesa.validate()?;
        self.notifications.validate()?;
        self.receipts.validate()?;
        self.polling.validate()?;

        Ok(())
    }
}

/// `SKIP_EXTERNALS=true` disables the database and uses in-memory stores.
pub fn skip_externals() -> bool {
    env::var("SKIP_EXTERNALS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_var(key) {
        None => Ok(default),
        Some(value) => match value.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        },
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?;

        Ok(ServerConfig {
            app_url: env::var("APP_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port)),
            debug: parse_bool("APP_DEBUG", false)?,
            host,
            port,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("MPESA_ENV")
            .unwrap_or_else(|_| "sandbox".to_string())
            .parse::<MpesaEnvironment>()
            .map_err(|_| ConfigError::InvalidValue("MPESA_ENV".to_string()))?;

        Ok(MpesaConfig {
            environment,
            base_url: optional_var("MPESA_BASE_URL"),
            consumer_key: env::var("MPESA_CONSUMER_KEY").unwrap_or_default(),
            consumer_secret: env::var("MPESA_CONSUMER_SECRET").unwrap_or_default(),
            shortcode: env::var("MPESA_SHORTCODE").unwrap_or_else(|_| "174379".to_string()),
            passkey: env::var("MPESA_PASSKEY").unwrap_or_default(),
            initiator_name: env::var("MPESA_INITIATOR_NAME")
                .unwrap_or_else(|_| "testapi".to_string()),
            initiator_password: env::var("MPESA_INITIATOR_PASSWORD").unwrap_or_default(),
            cert_path: optional_var("MPESA_CERT_PATH").map(PathBuf::from),
            security_credential: optional_var("MPESA_SECURITY_CREDENTIAL"),
            callback_url: optional_var("MPESA_CALLBACK_URL").unwrap_or_else(|| {
                format!(
                    "{}/api/mpesa/callback",
                    env::var("APP_URL")
                        .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string())
                        .trim_end_matches('/')
                )
            }),
            timeout_secs: env::var("MPESA_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MPESA_TIMEOUT".to_string()))?,
        })
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.environment.base_url().to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer_key.is_empty() || self.consumer_secret.is_empty() {
            return Err(ConfigError::MissingVariable(
                "MPESA_CONSUMER_KEY and MPESA_CONSUMER_SECRET".to_string(),
            ));
        }

        if self.passkey.is_empty() {
            return Err(ConfigError::MissingVariable("MPESA_PASSKEY".to_string()));
        }

        if self.shortcode.is_empty() || !self.shortcode.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidValue("MPESA_SHORTCODE".to_string()));
        }

        if !self.callback_url.starts_with("http://") && !self.callback_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "MPESA_CALLBACK_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("MPESA_TIMEOUT".to_string()));
        }

        Ok(())
    }
}

impl NotificationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(NotificationConfig {
            channels: env::var("RECEIPT_CHANNELS")
                .unwrap_or_else(|_| "email,sms".to_string())
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            mail_api_url: optional_var("MAIL_API_URL"),
            mail_api_key: optional_var("MAIL_API_KEY"),
            mail_from: env::var("MAIL_FROM_ADDRESS")
                .unwrap_or_else(|_| "accounts@school.example".to_string()),
            africastalking_username: optional_var("AFRICASTALKING_USERNAME"),
            africastalking_api_key: optional_var("AFRICASTALKING_API_KEY"),
            africastalking_sender_id: optional_var("AFRICASTALKING_SENDER_ID"),
            africastalking_base_url: env::var("AFRICASTALKING_BASE_URL")
                .unwrap_or_else(|_| "https://api.africastalking.com".to_string()),
            twilio_account_sid: optional_var("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: optional_var("TWILIO_AUTH_TOKEN"),
            twilio_whatsapp_from: optional_var("TWILIO_WHATSAPP_FROM"),
            twilio_base_url: env::var("TWILIO_BASE_URL")
                .unwrap_or_else(|_| "https://api.twilio.com".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let known = ["email", "sms", "whatsapp"];
        if let Some(unknown) = self.channels.iter().find(|c| !known.contains(&c.as_str())) {
            return Err(ConfigError::InvalidValue(format!(
                "RECEIPT_CHANNELS contains unknown channel '{}'",
                unknown
            )));
        }

        Ok(())
    }
}

impl ReceiptConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ReceiptConfig {
            directory: PathBuf::from(
                env::var("RECEIPT_DIR").unwrap_or_else(|_| "storage/receipts".to_string()),
            ),
            school_name: env::var("SCHOOL_NAME").unwrap_or_else(|_| "Skuul".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue("RECEIPT_DIR".to_string()));
        }

        Ok(())
    }
}

impl PollingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = PollingConfig::default();
        Ok(PollingConfig {
            enabled: parse_bool("MPESA_POLL_ENABLED", defaults.enabled)?,
            max_attempts: match optional_var("MPESA_POLL_MAX_ATTEMPTS") {
                Some(v) => v.parse().map_err(|_| {
                    ConfigError::InvalidValue("MPESA_POLL_MAX_ATTEMPTS".to_string())
                })?,
                None => defaults.max_attempts,
            },
            interval: match optional_var("MPESA_POLL_INTERVAL_SECONDS") {
                Some(v) => Duration::from_secs(v.parse().map_err(|_| {
                    ConfigError::InvalidValue("MPESA_POLL_INTERVAL_SECONDS".to_string())
                })?),
                None => defaults.interval,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MPESA_POLL_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
