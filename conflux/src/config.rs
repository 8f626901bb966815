//! Broker-wide configuration.
use chrono::Duration;
use std::time::Duration as StdDuration;

/// Tunables for the event broker and its components.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Interval between subscription coordinator reconciliation attempts.
    pub coordinator_tick: StdDuration,
    /// Interval between subscription observer reconciliation attempts.
    pub observer_tick: StdDuration,
    /// Heartbeat age beyond which a subscriber is no longer considered healthy.
    pub staleness_threshold: Duration,
    /// Heartbeat age beyond which a liveness record is eligible for deletion.
    pub purge_threshold: Duration,
    /// Rows fetched per internal page during a scan.
    pub scan_page_size: usize,
    /// Timeout applied to individual network calls made by backends.
    pub io_timeout: StdDuration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            coordinator_tick: StdDuration::from_secs(1),
            observer_tick: StdDuration::from_millis(200),
            staleness_threshold: Duration::seconds(60),
            purge_threshold: Duration::seconds(300),
            scan_page_size: 100,
            io_timeout: StdDuration::from_secs(5),
        }
    }
}

impl BrokerConfig {
    pub fn with_coordinator_tick(mut self, tick: StdDuration) -> Self {
        self.coordinator_tick = tick;
        self
    }

    pub fn with_observer_tick(mut self, tick: StdDuration) -> Self {
        self.observer_tick = tick;
        self
    }

    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    pub fn with_purge_threshold(mut self, threshold: Duration) -> Self {
        self.purge_threshold = threshold;
        self
    }

    pub fn with_scan_page_size(mut self, size: usize) -> Self {
        self.scan_page_size = size;
        self
    }

    pub fn with_io_timeout(mut self, timeout: StdDuration) -> Self {
        self.io_timeout = timeout;
        self
    }
}
