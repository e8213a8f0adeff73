use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::providers::{ActionSubmitter, Clock};
use crate::store::StateStore;
use crate::tokio_tools::spawn_named_task;
use crate::types::{GameState, Round, TableId, TableSnapshot, UnixSeconds};

const LOG_TARGET: &str = "table_sync::timeout";

/// Seconds left on the current turn, or `None` when no timer applies.
pub fn remaining_seconds(snapshot: &TableSnapshot, now: UnixSeconds) -> Option<u64> {
    if snapshot.game_state != GameState::Playing {
        return None;
    }
    let started = snapshot.turn_start_time?;
    let timeout = snapshot.action_timeout_seconds?;
    let elapsed = now.saturating_sub(started).max(0) as u64;
    Some(timeout.saturating_sub(elapsed))
}

/// Identifies one turn deadline; at most one skip attempt is made per key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeadlineKey {
    pub table_id: TableId,
    pub round: Round,
    pub turn_start: UnixSeconds,
}

#[derive(Debug, Default)]
struct SkipLatch {
    attempted: Option<DeadlineKey>,
    cooldown_until: Option<Instant>,
}

pub struct TurnTimeoutMonitor {
    store: StateStore,
    actions: Arc<dyn ActionSubmitter>,
    clock: Arc<dyn Clock>,
    tick: Duration,
    cooldown: Duration,
    latch: Mutex<SkipLatch>,
}

impl TurnTimeoutMonitor {
    pub fn new(
        store: StateStore,
        actions: Arc<dyn ActionSubmitter>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            actions,
            clock,
            tick: config.timeout_tick,
            cooldown: config.skip_cooldown,
            latch: Mutex::new(SkipLatch::default()),
        }
    }

    /// Publishes the countdown for `table_id` and returns the deadline to act
    /// on, if this client should submit a skip now.
    pub fn observe(&self, table_id: TableId) -> Option<DeadlineKey> {
        let state = self.store.get();
        if state.table_id != Some(table_id) {
            return None;
        }
        let snapshot = state.snapshot.as_ref();
        let remaining = snapshot.and_then(|snapshot| remaining_seconds(snapshot, self.clock.now()));
        self.store.update_for_table(table_id, |state| {
            state.turn_countdown = remaining;
        });

        if remaining != Some(0) {
            return None;
        }
        let snapshot = snapshot?;
        let key = DeadlineKey {
            table_id,
            round: snapshot.round,
            turn_start: snapshot.turn_start_time?,
        };

        let now = Instant::now();
        let mut latch = self.latch.lock();
        if latch.attempted == Some(key) {
            return None;
        }
        if latch.cooldown_until.is_some_and(|until| now < until) {
            return None;
        }
        latch.attempted = Some(key);
        latch.cooldown_until = Some(now + self.cooldown);
        Some(key)
    }

    /// One skip submission. Failures are logged; another observer may win the
    /// race or retry once the cool-down passes.
    pub async fn submit_skip(&self, key: DeadlineKey) {
        info!(
            target: LOG_TARGET,
            table_id = key.table_id,
            round = key.round,
            turn_start = key.turn_start,
            "turn timed out, submitting skip"
        );
        let _pending = self
            .store
            .begin_transaction(key.table_id, "Skipping timed-out player");
        match self.actions.skip_timed_out_player(key.table_id).await {
            Ok(()) => debug!(target: LOG_TARGET, table_id = key.table_id, "skip accepted"),
            Err(err) => warn!(
                target: LOG_TARGET,
                table_id = key.table_id,
                error = %err,
                "skip submission failed"
            ),
        }
    }

    /// Ticks until `cancel` fires, then clears the countdown.
    pub async fn run(self: Arc<Self>, table_id: TableId, cancel: CancellationToken) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Some(key) = self.observe(table_id) {
                let monitor = Arc::clone(&self);
                let cancel = cancel.clone();
                spawn_named_task(format!("skip-timed-out-{table_id}"), async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = monitor.submit_skip(key) => {}
                    }
                });
            }
        }
        self.store.update_for_table(table_id, |state| state.turn_countdown = None);
        debug!(target: LOG_TARGET, table_id, "timeout monitor stopped");
    }
}
