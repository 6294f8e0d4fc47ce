#![forbid(unsafe_code)]

use std::env;
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_DB_PATH: &str = "SNOWOPS_DB_PATH";
pub const ENV_DB_BUSY_TIMEOUT_MS: &str = "SNOWOPS_DB_BUSY_TIMEOUT_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "SNOWOPS_REQUEST_TIMEOUT_MS";
pub const ENV_LOG: &str = "SNOWOPS_LOG";

pub const IN_MEMORY_DB_PATH: &str = ":memory:";
pub const DEFAULT_DB_PATH: &str = "snowops_contract.db";
pub const DEFAULT_DB_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_LOG_FILTER: &str = "info";

const DB_BUSY_TIMEOUT_RANGE_MS: RangeInclusive<u64> = 100..=60_000;
const REQUEST_TIMEOUT_RANGE_MS: RangeInclusive<u64> = 100..=120_000;

/// Effective process configuration. Unset, unparsable or out-of-range values
/// fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub db_path: String,
    pub db_busy_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub log_filter: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            db_busy_timeout_ms: DEFAULT_DB_BUSY_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AdapterConfig {
    pub fn from_env() -> Self {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    pub fn from_env_var_map<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            db_path: non_blank(var(ENV_DB_PATH)).unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            db_busy_timeout_ms: parse_ms(
                var(ENV_DB_BUSY_TIMEOUT_MS),
                DB_BUSY_TIMEOUT_RANGE_MS,
                DEFAULT_DB_BUSY_TIMEOUT_MS,
            ),
            request_timeout_ms: parse_ms(
                var(ENV_REQUEST_TIMEOUT_MS),
                REQUEST_TIMEOUT_RANGE_MS,
                DEFAULT_REQUEST_TIMEOUT_MS,
            ),
            log_filter: non_blank(var(ENV_LOG)).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path == IN_MEMORY_DB_PATH
    }

    pub fn db_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.db_busy_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn non_blank(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_ms(raw: Option<String>, range: RangeInclusive<u64>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| range.contains(v))
        .unwrap_or(default)
}
