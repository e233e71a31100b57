use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Run the scan strategy alongside the index on every pass
    pub always_scan: bool,
    /// `None` disables the quota
    pub scans_per_window: Option<u32>,
    pub window: Duration,
    pub premium_user_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub notification_topic: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub typing_ttl: Duration,
    pub typing_debounce: Duration,
    pub match_ttl: Duration,
    pub max_message_length: usize,
    pub discovery: DiscoveryConfig,
    pub retry: RetrySettings,
    pub kafka: Option<KafkaConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            typing_ttl: Duration::from_millis(5000),
            typing_debounce: Duration::from_millis(2000),
            match_ttl: Duration::from_secs(72 * 3600),
            max_message_length: 4000,
            discovery: DiscoveryConfig {
                always_scan: false,
                scans_per_window: None,
                window: Duration::from_secs(3600),
                premium_user_ids: Vec::new(),
            },
            retry: RetrySettings {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(50),
            },
            kafka: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let port = parse_or(&lookup, "PORT", defaults.port)?;
        let typing_ttl_ms = parse_or(&lookup, "TYPING_TTL_MS", 5000u64)?;
        let typing_debounce_ms = parse_or(&lookup, "TYPING_DEBOUNCE_MS", 2000u64)?;
        let match_ttl_hours = parse_or(&lookup, "MATCH_TTL_HOURS", 72u64)?;
        let max_message_length = parse_or(&lookup, "MAX_MESSAGE_LENGTH", defaults.max_message_length)?;

        if typing_ttl_ms == 0 {
            return Err(AppError::Config("TYPING_TTL_MS must be positive".into()));
        }
        if max_message_length == 0 {
            return Err(AppError::Config("MAX_MESSAGE_LENGTH must be positive".into()));
        }

        let always_scan = match lookup("DISCOVERY_ALWAYS_SCAN") {
            Some(v) => parse_bool("DISCOVERY_ALWAYS_SCAN", &v)?,
            None => false,
        };
        let scans_per_window = match lookup("DISCOVERY_SCANS_PER_WINDOW") {
            Some(v) if !v.trim().is_empty() => Some(parse_value("DISCOVERY_SCANS_PER_WINDOW", &v)?),
            _ => None,
        };
        let window_secs = parse_or(&lookup, "DISCOVERY_WINDOW_SECS", 3600u64)?;

        let premium_user_ids = lookup("PREMIUM_USER_IDS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        Uuid::parse_str(s).map_err(|e| {
                            AppError::Config(format!("PREMIUM_USER_IDS entry {s:?}: {e}"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let max_attempts = parse_or(&lookup, "RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        let initial_backoff_ms = parse_or(&lookup, "RETRY_INITIAL_BACKOFF_MS", 50u64)?;

        let kafka = lookup("KAFKA_BROKERS")
            .filter(|b| !b.trim().is_empty())
            .map(|brokers| KafkaConfig {
                brokers,
                notification_topic: lookup("KAFKA_NOTIFICATION_TOPIC")
                    .unwrap_or_else(|| "notifications".to_string()),
            });

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port,
            typing_ttl: Duration::from_millis(typing_ttl_ms),
            typing_debounce: Duration::from_millis(typing_debounce_ms),
            match_ttl: Duration::from_secs(match_ttl_hours.saturating_mul(3600)),
            max_message_length,
            discovery: DiscoveryConfig {
                always_scan,
                scans_per_window,
                window: Duration::from_secs(window_secs),
                premium_user_ids,
            },
            retry: RetrySettings {
                max_attempts,
                initial_backoff: Duration::from_millis(initial_backoff_ms),
            },
            kafka,
        })
    }

    pub fn retry_config(&self) -> resilience::RetryConfig {
        resilience::RetryConfig {
            max_retries: self.retry.max_attempts,
            initial_backoff: self.retry.initial_backoff,
            ..resilience::RetryConfig::default()
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::Config(format!("{key}={value:?}: {e}")))
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, AppError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        other => Err(AppError::Config(format!("{key}={other:?} is not a boolean"))),
    }
}
