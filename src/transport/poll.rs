use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EventTransport, SourceEvent};
use crate::providers::PollProvider;
use crate::types::TableId;

const LOG_TARGET: &str = "table_sync::transport::poll";

/// Re-queries the provider every `period` until cancelled or the sink closes.
/// Reports `Connected` after the first poll that succeeds.
pub(crate) async fn run_poll_loop(
    provider: Arc<dyn PollProvider>,
    table_id: Option<TableId>,
    period: Duration,
    sink: mpsc::Sender<SourceEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cursor = None;
    let mut connected = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let batch = match provider.poll(table_id, cursor).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(target: LOG_TARGET, ?table_id, error = %err, "poll failed");
                continue;
            }
        };

        if !connected {
            connected = true;
            let announce = SourceEvent::Connected {
                transport: EventTransport::Poll,
                first: true,
            };
            if sink.send(announce).await.is_err() {
                break;
            }
        }

        if !batch.events.is_empty() {
            debug!(target: LOG_TARGET, count = batch.events.len(), ?cursor, "poll delivered events");
        }
        if batch.cursor.is_some() {
            cursor = batch.cursor;
        }
        for event in batch.events {
            if sink.send(SourceEvent::Event(event)).await.is_err() {
                return;
            }
        }
    }
    debug!(target: LOG_TARGET, ?table_id, "poll loop stopped");
}
