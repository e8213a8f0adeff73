use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const LOG_TARGET: &str = "table_sync::debounce";

/// Receives the coalesced refresh signal.
#[async_trait]
pub trait RefreshSink: Send + Sync {
    async fn refresh_now(&self);

    /// Start of the most recent refresh, whoever triggered it.
    fn last_refresh(&self) -> Option<Instant>;
}

/// Timer bookkeeping for coalescing a burst into one refresh.
#[derive(Clone, Debug)]
pub struct Debouncer {
    window: Duration,
    min_spacing: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration, min_spacing: Duration) -> Self {
        Self {
            window,
            min_spacing,
            deadline: None,
        }
    }

    /// (Re)arm the coalescing timer; a newer event always pushes it back.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the pending refresh may run, honouring the spacing since `last_refresh`.
    pub fn fire_at(&self, last_refresh: Option<Instant>) -> Option<Instant> {
        let deadline = self.deadline?;
        Some(match last_refresh {
            Some(last) => deadline.max(last + self.min_spacing),
            None => deadline,
        })
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }
}

/// Cheap handle used to signal "something changed".
#[derive(Clone)]
pub struct RefreshTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl RefreshTrigger {
    pub fn arm(&self) {
        if self.tx.send(()).is_err() {
            trace!(target: LOG_TARGET, "refresh coordinator stopped, trigger ignored");
        }
    }
}

/// Builds the debounce loop; the returned future runs until `cancel` fires or every
/// trigger is dropped.
pub fn refresh_coordinator(
    sink: Arc<dyn RefreshSink>,
    window: Duration,
    min_spacing: Duration,
    cancel: CancellationToken,
) -> (RefreshTrigger, impl std::future::Future<Output = ()> + Send + 'static) {
    let (tx, rx) = mpsc::unbounded_channel();
    let debouncer = Debouncer::new(window, min_spacing);
    (
        RefreshTrigger { tx },
        run_coordinator(sink, debouncer, rx, cancel),
    )
}

async fn run_coordinator(
    sink: Arc<dyn RefreshSink>,
    mut debouncer: Debouncer,
    mut rx: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
) {
    let mut coalesced = 0usize;
    loop {
        let fire_at = debouncer.fire_at(sink.last_refresh());
        tokio::select! {
            _ = cancel.cancelled() => break,
            signal = rx.recv() => match signal {
                Some(()) => {
                    coalesced += 1;
                    debouncer.arm(Instant::now());
                }
                None => break,
            },
            _ = sleep_until(fire_at.unwrap_or_else(Instant::now)), if fire_at.is_some() => {
                debouncer.disarm();
                debug!(target: LOG_TARGET, coalesced, "running coalesced refresh");
                coalesced = 0;
                sink.refresh_now().await;
            }
        }
    }
    debug!(target: LOG_TARGET, "refresh coordinator stopped");
}
