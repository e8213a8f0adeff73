use std::time::Duration;

/// Tunables for the synchronisation engine.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Quiet period that coalesces a burst of events into one refresh.
    pub debounce_window: Duration,
    /// Minimum spacing between two executed refreshes.
    pub min_refresh_spacing: Duration,
    /// Period of the fallback poll transport.
    pub poll_interval: Duration,
    pub push_handshake_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub decrypt_retry_delay: Duration,
    pub decrypt_max_attempts: u32,
    /// Wait before fetching reveals that are still missing at showdown.
    pub showdown_grace: Duration,
    pub timeout_tick: Duration,
    pub skip_cooldown: Duration,
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(200),
            min_refresh_spacing: Duration::from_millis(500),
            poll_interval: Duration::from_secs(3),
            push_handshake_timeout: Duration::from_secs(10),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            decrypt_retry_delay: Duration::from_secs(3),
            decrypt_max_attempts: 10,
            showdown_grace: Duration::from_millis(1_500),
            timeout_tick: Duration::from_secs(1),
            skip_cooldown: Duration::from_secs(5),
            event_channel_capacity: 128,
        }
    }
}

impl SyncConfig {
    pub fn with_debounce(mut self, window: Duration, min_spacing: Duration) -> Self {
        self.debounce_window = window;
        self.min_refresh_spacing = min_spacing;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial = initial;
        self.reconnect_max = max;
        self
    }

    pub fn with_decrypt_retry(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.decrypt_retry_delay = delay;
        self.decrypt_max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_showdown_grace(mut self, grace: Duration) -> Self {
        self.showdown_grace = grace;
        self
    }

    pub fn with_skip_cooldown(mut self, cooldown: Duration) -> Self {
        self.skip_cooldown = cooldown;
        self
    }
}
