//! Tunables for a [`Dict`](crate::Dict).

use std::time::Duration;

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DictConfig {
    /// Delay between bootstrap attempts while the log is unreachable, and
    /// before resubscribing when a watch stream ends.
    pub retry_interval: Duration,
}

impl DictConfig {
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

impl Default for DictConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}
