//! Runtime configuration for the ledger.

use std::env;
use std::time::Duration;

use tracing::warn;

const LOCK_TIMEOUT_VAR: &str = "WALLET_LEDGER_LOCK_TIMEOUT_MS";
const HISTORY_WINDOW_VAR: &str = "WALLET_LEDGER_HISTORY_WINDOW_DAYS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// How long a unit of work waits for each account row lock.
    pub lock_timeout: Duration,
    /// History range used when the caller gives no (or only one) date bound.
    pub history_window_days: u64,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            history_window_days: 30,
            default_page_size: 15,
            max_page_size: 100,
        }
    }
}

impl LedgerConfig {
    /// Read overrides from the environment, keeping defaults for anything
    /// unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = read_var::<u64>(LOCK_TIMEOUT_VAR) {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(days) = read_var::<u64>(HISTORY_WINDOW_VAR) {
            config.history_window_days = days;
        }
        config
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

fn read_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.history_window_days, 30);
        assert_eq!(config.default_page_size, 15);
        assert_eq!(config.max_page_size, 100);
    }

    #[test]
    fn with_lock_timeout_overrides_only_the_timeout() {
        let config = LedgerConfig::default().with_lock_timeout(Duration::from_millis(20));
        assert_eq!(config.lock_timeout, Duration::from_millis(20));
        assert_eq!(config.default_page_size, 15);
    }
}
