use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::poll::run_poll_loop;
use super::{Backoff, EventTransport, SourceEvent};
use crate::config::SyncConfig;
use crate::error::ProviderError;
use crate::providers::{EventStream, PollProvider, PushProvider};
use crate::tokio_tools::spawn_named_task;
use crate::types::TableId;

const LOG_TARGET: &str = "table_sync::transport::adapter";

#[derive(Clone, Debug)]
struct AdapterTimings {
    handshake_timeout: Duration,
    poll_interval: Duration,
    reconnect_initial: Duration,
    reconnect_max: Duration,
}

/// Normalises the push and poll transports into one stream of [`SourceEvent`]s.
pub struct EventSourceAdapter {
    push: Option<Arc<dyn PushProvider>>,
    poll: Arc<dyn PollProvider>,
    timings: AdapterTimings,
}

impl EventSourceAdapter {
    pub fn new(
        push: Option<Arc<dyn PushProvider>>,
        poll: Arc<dyn PollProvider>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            push,
            poll,
            timings: AdapterTimings {
                handshake_timeout: config.push_handshake_timeout,
                poll_interval: config.poll_interval,
                reconnect_initial: config.reconnect_initial,
                reconnect_max: config.reconnect_max,
            },
        }
    }

    /// Starts delivering events for `table_id` (or every table when `None`) into `sink`.
    ///
    /// Push is probed first; if its handshake fails the subscription settles on
    /// polling for its whole lifetime. Dropping the handle stops delivery.
    pub fn subscribe(
        &self,
        table_id: Option<TableId>,
        sink: mpsc::Sender<SourceEvent>,
    ) -> SubscriptionHandle {
        let cancel = CancellationToken::new();
        let transport = Arc::new(Mutex::new(None));
        let push = self.push.clone();
        let poll = Arc::clone(&self.poll);
        let timings = self.timings.clone();
        let task_cancel = cancel.clone();
        let task_transport = Arc::clone(&transport);

        let task = spawn_named_task(format!("event-source-{table_id:?}"), async move {
            let probed = match push {
                Some(push) => {
                    let stream = probe_push(push.as_ref(), table_id, &timings).await;
                    stream.map(|stream| (push, stream))
                }
                None => None,
            };

            match probed {
                Some((push, stream)) => {
                    *task_transport.lock() = Some(EventTransport::Push);
                    info!(target: LOG_TARGET, ?table_id, "subscribed via push transport");
                    run_push_loop(push, table_id, stream, timings, sink, task_cancel).await;
                }
                None => {
                    *task_transport.lock() = Some(EventTransport::Poll);
                    info!(target: LOG_TARGET, ?table_id, "falling back to poll transport");
                    run_poll_loop(poll, table_id, timings.poll_interval, sink, task_cancel).await;
                }
            }
        });

        SubscriptionHandle {
            table_id,
            cancel,
            transport,
            task: Some(task),
        }
    }
}

async fn probe_push(
    push: &dyn PushProvider,
    table_id: Option<TableId>,
    timings: &AdapterTimings,
) -> Option<EventStream> {
    match connect_with_timeout(push, table_id, timings.handshake_timeout).await {
        Ok(stream) => Some(stream),
        Err(err) => {
            warn!(target: LOG_TARGET, ?table_id, error = %err, "push handshake failed");
            None
        }
    }
}

async fn connect_with_timeout(
    push: &dyn PushProvider,
    table_id: Option<TableId>,
    limit: Duration,
) -> Result<EventStream, ProviderError> {
    timeout(limit, push.connect(table_id))
        .await
        .map_err(|_| ProviderError::Unavailable("push handshake timed out".into()))?
}

async fn run_push_loop(
    push: Arc<dyn PushProvider>,
    table_id: Option<TableId>,
    initial: EventStream,
    timings: AdapterTimings,
    sink: mpsc::Sender<SourceEvent>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(timings.reconnect_initial, timings.reconnect_max);
    let mut next_stream = Some(initial);
    let mut first = true;

    loop {
        if let Some(mut stream) = next_stream.take() {
            backoff.reset();
            let announce = SourceEvent::Connected {
                transport: EventTransport::Push,
                first,
            };
            first = false;
            if sink.send(announce).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    item = stream.next() => match item {
                        Some(Ok(event)) => {
                            if sink.send(SourceEvent::Event(event)).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(target: LOG_TARGET, ?table_id, error = %err, "push stream failed");
                            break;
                        }
                        None => {
                            debug!(target: LOG_TARGET, ?table_id, "push stream closed");
                            break;
                        }
                    }
                }
            }
        }

        let delay = backoff.next_delay();
        debug!(
            target: LOG_TARGET,
            ?table_id,
            attempt = backoff.failures(),
            delay_ms = delay.as_millis() as u64,
            "waiting before push reconnect"
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(delay) => {}
        }

        match connect_with_timeout(push.as_ref(), table_id, timings.handshake_timeout).await {
            Ok(stream) => {
                info!(target: LOG_TARGET, ?table_id, "push transport reconnected");
                next_stream = Some(stream);
            }
            Err(err) => {
                warn!(target: LOG_TARGET, ?table_id, error = %err, "push reconnect failed");
            }
        }
    }
}

/// Live subscription. Cancelled on drop.
pub struct SubscriptionHandle {
    table_id: Option<TableId>,
    cancel: CancellationToken,
    transport: Arc<Mutex<Option<EventTransport>>>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn table_id(&self) -> Option<TableId> {
        self.table_id
    }

    /// Transport chosen by the probe, `None` until the probe finished.
    pub fn transport(&self) -> Option<EventTransport> {
        *self.transport.lock()
    }

    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TableEvent;
    use crate::test_support::{MockPoll, MockPush};

    fn test_config() -> SyncConfig {
        SyncConfig::default()
            .with_poll_interval(Duration::from_secs(3))
            .with_reconnect_backoff(Duration::from_secs(1), Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn prefers_push_and_announces_first_connection() {
        let push = Arc::new(MockPush::default());
        let feed = push.queue_connection();
        let poll = Arc::new(MockPoll::default());
        let adapter = EventSourceAdapter::new(Some(push.clone()), poll.clone(), &test_config());

        let (tx, mut rx) = mpsc::channel(16);
        let handle = adapter.subscribe(Some(1), tx);

        assert_eq!(
            rx.recv().await,
            Some(SourceEvent::Connected {
                transport: EventTransport::Push,
                first: true
            })
        );
        assert_eq!(handle.transport(), Some(EventTransport::Push));

        feed.send(Ok(TableEvent::CardsDealt { table_id: 1, round: 1 }))
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(SourceEvent::Event(TableEvent::CardsDealt { table_id: 1, round: 1 }))
        );
        assert!(poll.cursors().is_empty(), "poll transport stays idle");
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_poll_when_handshake_fails() {
        let push = Arc::new(MockPush::default());
        let poll = Arc::new(MockPoll::default());
        poll.push_batch(vec![TableEvent::TableCreated { table_id: 4 }], Some(1));
        let adapter = EventSourceAdapter::new(Some(push.clone()), poll.clone(), &test_config());

        let (tx, mut rx) = mpsc::channel(16);
        let handle = adapter.subscribe(None, tx);

        assert_eq!(
            rx.recv().await,
            Some(SourceEvent::Connected {
                transport: EventTransport::Poll,
                first: true
            })
        );
        assert_eq!(handle.transport(), Some(EventTransport::Poll));
        assert_eq!(
            rx.recv().await,
            Some(SourceEvent::Event(TableEvent::TableCreated { table_id: 4 }))
        );
        assert_eq!(push.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_backoff_after_disconnect() {
        let push = Arc::new(MockPush::default());
        let first_feed = push.queue_connection();
        let poll = Arc::new(MockPoll::default());
        let adapter = EventSourceAdapter::new(Some(push.clone()), poll, &test_config());

        let (tx, mut rx) = mpsc::channel(16);
        let _handle = adapter.subscribe(Some(1), tx);
        assert!(matches!(
            rx.recv().await,
            Some(SourceEvent::Connected { first: true, .. })
        ));

        // Two failed reconnects (1s, 2s) before the third succeeds after 4s.
        push.queue_failure();
        push.queue_failure();
        let _second_feed = push.queue_connection();
        let dropped_at = tokio::time::Instant::now();
        drop(first_feed);

        assert_eq!(
            rx.recv().await,
            Some(SourceEvent::Connected {
                transport: EventTransport::Push,
                first: false
            })
        );
        assert_eq!(dropped_at.elapsed(), Duration::from_secs(1 + 2 + 4));
        assert_eq!(push.connect_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_delivery() {
        let push = Arc::new(MockPush::default());
        let feed = push.queue_connection();
        let adapter =
            EventSourceAdapter::new(Some(push), Arc::new(MockPoll::default()), &test_config());

        let (tx, mut rx) = mpsc::channel(16);
        let handle = adapter.subscribe(Some(1), tx);
        assert!(rx.recv().await.is_some());

        drop(handle);
        assert!(rx.recv().await.is_none(), "sink closes once the task is gone");
        assert!(feed.is_closed() || feed.send(Ok(TableEvent::Heartbeat)).await.is_err());
    }
}
