use crate::error::SyncError;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PrimaryConfig {
    pub database_path: PathBuf,
    pub pool_size: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SecondaryConfig {
    pub url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub sessions_table: String,
    pub messages_table: String,
    pub activities_table: String,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub enabled: bool,
    pub drain_interval_seconds: u64,
    pub batch_size: u32,
    pub max_attempts: u32,
    pub base_backoff_seconds: u64,
    pub max_backoff_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub primary: PrimaryConfig,
    /// `None` disables mirroring.
    pub secondary: Option<SecondaryConfig>,
    pub outbox: OutboxConfig,
    pub history_limit: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let primary = PrimaryConfig {
            database_path: get("PRIMARY_DATABASE_PATH")
                .unwrap_or_else(|| "./data/conversations.db".into())
                .into(),
            pool_size: parse_or(&get, "PRIMARY_POOL_SIZE", 10)?,
            timeout_ms: parse_or(&get, "PRIMARY_TIMEOUT_MS", 5000)?,
        };

        let secondary = match (get("SECONDARY_URL"), get("SECONDARY_API_KEY")) {
            (Some(url), Some(api_key)) => Some(SecondaryConfig {
                url,
                api_key,
                timeout_ms: parse_or(&get, "SECONDARY_TIMEOUT_MS", 3000)?,
                sessions_table: get("SECONDARY_SESSIONS_TABLE").unwrap_or_else(|| "chat_sessions".into()),
                messages_table: get("SECONDARY_MESSAGES_TABLE").unwrap_or_else(|| "messages".into()),
                activities_table: get("SECONDARY_ACTIVITIES_TABLE").unwrap_or_else(|| "routine".into()),
            }),
            (None, None) => None,
            (Some(_), None) => anyhow::bail!("SECONDARY_URL is set but SECONDARY_API_KEY is missing"),
            (None, Some(_)) => anyhow::bail!("SECONDARY_API_KEY is set but SECONDARY_URL is missing"),
        };

        let outbox = OutboxConfig {
            enabled: parse_flag(&get, "OUTBOX_ENABLED", true)?,
            drain_interval_seconds: parse_or(&get, "OUTBOX_DRAIN_INTERVAL_SECONDS", 30)?,
            batch_size: parse_or(&get, "OUTBOX_BATCH_SIZE", 50)?,
            max_attempts: parse_or(&get, "OUTBOX_MAX_ATTEMPTS", 8)?,
            base_backoff_seconds: parse_or(&get, "OUTBOX_BASE_BACKOFF_SECONDS", 5)?,
            max_backoff_seconds: parse_or(&get, "OUTBOX_MAX_BACKOFF_SECONDS", 900)?,
        };

        Ok(Self {
            primary,
            secondary,
            outbox,
            history_limit: parse_or(&get, "HISTORY_LIMIT", 20)?,
        })
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid = |msg: &str| Err(SyncError::Configuration(msg.to_string()));

        if self.primary.pool_size == 0 {
            return invalid("PRIMARY_POOL_SIZE must be at least 1");
        }
        if self.primary.timeout_ms == 0 {
            return invalid("PRIMARY_TIMEOUT_MS must be positive");
        }
        if self.history_limit == 0 {
            return invalid("HISTORY_LIMIT must be at least 1");
        }
        if let Some(secondary) = &self.secondary {
            if !(secondary.url.starts_with("http://") || secondary.url.starts_with("https://")) {
                return invalid("SECONDARY_URL must start with http:// or https://");
            }
            if secondary.timeout_ms == 0 {
                return invalid("SECONDARY_TIMEOUT_MS must be positive");
            }
        }
        if self.outbox.enabled {
            if self.outbox.max_attempts == 0 {
                return invalid("OUTBOX_MAX_ATTEMPTS must be at least 1");
            }
            if self.outbox.batch_size == 0 {
                return invalid("OUTBOX_BATCH_SIZE must be at least 1");
            }
            if self.outbox.drain_interval_seconds == 0 {
                return invalid("OUTBOX_DRAIN_INTERVAL_SECONDS must be positive");
            }
            if self.outbox.max_backoff_seconds < self.outbox.base_backoff_seconds {
                return invalid("OUTBOX_MAX_BACKOFF_SECONDS must not be below OUTBOX_BASE_BACKOFF_SECONDS");
            }
        }
        Ok(())
    }

    pub fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.primary.timeout_ms)
    }

    pub fn secondary_timeout(&self) -> Duration {
        self.secondary
            .as_ref()
            .map(|s| Duration::from_millis(s.timeout_ms))
            .unwrap_or_default()
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Primary Database: {}", self.primary.database_path.display());
        info!("- Primary Pool Size: {}", self.primary.pool_size);
        info!("- Primary Timeout: {}ms", self.primary.timeout_ms);
        match &self.secondary {
            Some(secondary) => {
                info!("- Secondary URL: {}", secondary.url);
                info!("- Secondary API Key: {}", redact(&secondary.api_key));
                info!("- Secondary Timeout: {}ms", secondary.timeout_ms);
                info!(
                    "- Secondary Tables: {}, {}, {}",
                    secondary.sessions_table, secondary.messages_table, secondary.activities_table
                );
            }
            None => info!("- Secondary: disabled"),
        }
        info!("- Outbox Enabled: {}", self.outbox.enabled);
        info!("- Outbox Drain Interval: {}s", self.outbox.drain_interval_seconds);
        info!("- Outbox Batch Size: {}", self.outbox.batch_size);
        info!("- Outbox Max Attempts: {}", self.outbox.max_attempts);
        info!(
            "- Outbox Backoff: {}s..{}s",
            self.outbox.base_backoff_seconds, self.outbox.max_backoff_seconds
        );
        info!("- History Limit: {}", self.history_limit);
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn parse_flag<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => anyhow::bail!("invalid value for {}: {:?}", key, v),
    }
}

fn redact(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{}****", visible)
}
