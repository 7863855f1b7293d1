//! Per-object requeue delays after failed reconciliations

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::Error;

const BASE_DELAY: Duration = Duration::from_secs(5);
const MAX_DELAY: Duration = Duration::from_secs(300);
const INVALID_DELAY: Duration = Duration::from_secs(300);
const FATAL_DELAY: Duration = Duration::from_secs(600);

/// Counts consecutive failures per object key
#[derive(Debug, Default)]
pub struct ErrorBackoff {
    failures: Mutex<HashMap<String, u32>>,
}

impl ErrorBackoff {
    /// Record a failure of `key` and return how long to wait before retrying.
    ///
    /// Invalid and fatal errors wait a fixed time; everything else doubles from
    /// five seconds up to five minutes.
    pub fn requeue_after(&self, key: &str, error: &Error) -> Duration {
        match error {
            Error::ValidationError(_) | Error::ConfigError(_) => return INVALID_DELAY,
            Error::FatalError(_) => return FATAL_DELAY,
            _ => {}
        }

        let attempt = match self.failures.lock() {
            Ok(mut failures) => {
                let count = failures.entry(key.to_string()).or_insert(0);
                let attempt = *count;
                *count = count.saturating_add(1);
                attempt
            }
            Err(_) => 0,
        };
        exponential(attempt)
    }

    /// Forget the failures of `key` after a successful reconciliation
    pub fn reset(&self, key: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(key);
        }
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .ok()
            .and_then(|failures| failures.get(key).copied())
            .unwrap_or_default()
    }
}

fn exponential(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    BASE_DELAY.saturating_mul(factor).min(MAX_DELAY)
}

