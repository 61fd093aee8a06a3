//! Process configuration.
//!
//! Reads from environment variables (a `.env` file is loaded first if present):
//! - `DATABASE_URL`: task store location (required)
//! - `WORDPRESS_URL`, `WORDPRESS_USER`, `WORDPRESS_PASSWORD`: all three or
//!   publishing is skipped
//! - `OPENAI_API_KEY`: without it remote photos fail per item
//! - `OPENAI_BASE_URL`, `VISION_MODEL`, `HTTP_TIMEOUT_SECS`,
//!   `MAX_RECONNECT_ATTEMPTS`, `CHANGE_POLL_INTERVAL_MS`, `HANDLER_RETRY_LIMIT`:
//!   optional tuning, see the defaults below

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::impls::WordPressCredentials;
use crate::impls::openai_vision::{DEFAULT_BASE_URL, DEFAULT_MODEL};

use super::retry::RetryPolicy;
use super::supervisor::SupervisorConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub wordpress: Option<WordPressCredentials>,
    pub vision: Option<VisionConfig>,
    pub http_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub change_poll_interval: Duration,
    pub handler_retry_limit: u32,
}

impl Config {
    const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
    const DEFAULT_CHANGE_POLL_INTERVAL_MS: u64 = 500;
    const DEFAULT_HANDLER_RETRY_LIMIT: u32 = 3;

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any key -> value source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let wordpress = match (
            get("WORDPRESS_URL"),
            get("WORDPRESS_USER"),
            get("WORDPRESS_PASSWORD"),
        ) {
            (Some(url), Some(user), Some(password)) => {
                Some(WordPressCredentials::new(url, user, password))
            }
            _ => None,
        };

        let vision = get("OPENAI_API_KEY").map(|api_key| VisionConfig {
            api_key,
            base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: get("VISION_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        });

        Ok(Self {
            database_url,
            wordpress,
            vision,
            http_timeout: Duration::from_secs(parse_or(
                &get,
                "HTTP_TIMEOUT_SECS",
                Self::DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            max_reconnect_attempts: parse_or(
                &get,
                "MAX_RECONNECT_ATTEMPTS",
                Self::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            )?,
            change_poll_interval: Duration::from_millis(parse_or(
                &get,
                "CHANGE_POLL_INTERVAL_MS",
                Self::DEFAULT_CHANGE_POLL_INTERVAL_MS,
            )?),
            handler_retry_limit: parse_or(
                &get,
                "HANDLER_RETRY_LIMIT",
                Self::DEFAULT_HANDLER_RETRY_LIMIT,
            )?,
        })
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_policy: RetryPolicy::standard(),
            handler_retry_limit: self.handler_retry_limit,
            handler_retry_policy: RetryPolicy::standard(),
        }
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
        }),
    }
}
