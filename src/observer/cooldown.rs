use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::Instant};

pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_secs(30);

/// Per-device retry suppression.
///
/// Attempts are kept in memory only and are forgotten on restart.
#[derive(Debug, Clone)]
pub struct Cooldown {
    period: Duration,
    last_attempt: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Cooldown {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_attempt: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Records an attempt for `key` unless one happened within the period.
    ///
    /// The check and the update happen under one lock, so of two concurrent
    /// callers at most one gets `true`.
    pub async fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut guard = self.last_attempt.lock().await;
        let cooling_down = guard
            .get(key)
            .is_some_and(|previous| now.duration_since(*previous) < self.period);
        if cooling_down {
            return false;
        }
        guard.insert(key.to_owned(), now);
        true
    }
}

impl Default for Cooldown {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_COOLDOWN)
    }
}
