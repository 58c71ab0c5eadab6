//! Ledger configuration, read from the environment.
//!
//! | variable | default | meaning |
//! |----------|---------|---------|
//! | `STOCKBOOK_LOCK_TIMEOUT_MS` | `5000` | wait for an item's ledger lock |
//! | `STOCKBOOK_FAST_PATH` | `true` | skip the replay for appends that cannot change earlier costs |
//! | `STOCKBOOK_LEGACY_COST_MODE` | `lpp` | `lpp` or `average`, for the legacy rebuild |
//! | `DATABASE_URL` | unset | Postgres connection string |

use std::time::Duration;

use stockbook_ledger::LegacyCostMode;

pub const LOCK_TIMEOUT_MS_VAR: &str = "STOCKBOOK_LOCK_TIMEOUT_MS";
pub const FAST_PATH_VAR: &str = "STOCKBOOK_FAST_PATH";
pub const LEGACY_COST_MODE_VAR: &str = "STOCKBOOK_LEGACY_COST_MODE";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub lock_timeout: Duration,
    pub fast_path: bool,
    pub legacy_cost_mode: LegacyCostMode,
    pub database_url: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            fast_path: true,
            legacy_cost_mode: LegacyCostMode::default(),
            database_url: None,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Invalid values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let lock_timeout = match lookup(LOCK_TIMEOUT_MS_VAR) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!(value = %raw, "invalid {LOCK_TIMEOUT_MS_VAR}, using default");
                    defaults.lock_timeout
                }
            },
            None => defaults.lock_timeout,
        };

        let fast_path = match lookup(FAST_PATH_VAR) {
            Some(raw) => raw.trim().to_ascii_lowercase().parse::<bool>().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "invalid {FAST_PATH_VAR}, using default");
                defaults.fast_path
            }),
            None => defaults.fast_path,
        };

        let legacy_cost_mode = match lookup(LEGACY_COST_MODE_VAR) {
            Some(raw) => LegacyCostMode::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "invalid {LEGACY_COST_MODE_VAR}, using default");
                defaults.legacy_cost_mode
            }),
            None => defaults.legacy_cost_mode,
        };

        let database_url = lookup(DATABASE_URL_VAR).filter(|url| !url.trim().is_empty());

        Self {
            lock_timeout,
            fast_path,
            legacy_cost_mode,
            database_url,
        }
    }

    pub fn with_legacy_cost_mode(mut self, mode: LegacyCostMode) -> Self {
        self.legacy_cost_mode = mode;
        self
    }

    pub fn with_fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }
}
