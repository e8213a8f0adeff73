use std::fmt;
use std::time::Duration;

use crate::events::TableEvent;

pub mod adapter;
pub mod poll;
pub mod push;

pub use adapter::{EventSourceAdapter, SubscriptionHandle};
pub use push::{WsPushConfig, WsPushProvider};

/// Delivery mechanism picked once per subscription by the capability probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventTransport {
    Push,
    Poll,
}

impl fmt::Display for EventTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTransport::Push => f.write_str("push"),
            EventTransport::Poll => f.write_str("poll"),
        }
    }
}

/// What the adapter hands downstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    /// A transport (re)connected. `first` is set only for the initial connection.
    Connected {
        transport: EventTransport,
        first: bool,
    },
    Event(TableEvent),
}

/// Doubling reconnect delay, capped, reset after a successful connection.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            failures: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        let delay = self.initial.saturating_mul(factor).min(self.max);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
