use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::SyncResult;
use crate::providers::LedgerReader;
use crate::store::{StateStore, TableState};
use crate::types::{Address, TableId, TableSnapshot};

const LOG_TARGET: &str = "table_sync::refresh";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Published {
        previous: Option<TableSnapshot>,
        current: TableSnapshot,
    },
    /// The table was deselected while the reads were in flight.
    Discarded,
}

/// Batched authoritative read followed by a single store swap.
///
/// Refreshes are not serialised: a call that overlaps another simply publishes
/// later, which is fine because every read pulls current truth.
pub struct RefreshExecutor {
    ledger: Arc<dyn LedgerReader>,
    store: StateStore,
    viewer: Address,
    last_started: Mutex<Option<Instant>>,
}

impl RefreshExecutor {
    pub fn new(ledger: Arc<dyn LedgerReader>, store: StateStore, viewer: Address) -> Self {
        Self {
            ledger,
            store,
            viewer,
            last_started: Mutex::new(None),
        }
    }

    pub fn last_started(&self) -> Option<Instant> {
        *self.last_started.lock()
    }

    pub async fn refresh_all(&self, table_id: TableId) -> SyncResult<RefreshOutcome> {
        self.refresh_with(table_id, |_| {}).await
    }

    /// Like [`RefreshExecutor::refresh_all`], with `apply` run on the fresh
    /// state inside the swap that publishes it. Not called when the refresh
    /// fails or is discarded.
    #[instrument(skip(self, apply), target = "table_sync::refresh", level = "debug")]
    pub async fn refresh_with<F>(&self, table_id: TableId, apply: F) -> SyncResult<RefreshOutcome>
    where
        F: FnOnce(&mut TableState),
    {
        *self.last_started.lock() = Some(Instant::now());

        let reads = tokio::try_join!(
            self.ledger.table(table_id, &self.viewer),
            self.ledger.betting(table_id),
            self.ledger.players(table_id),
            self.ledger.community_cards(table_id),
        );
        let (table, betting, players, community) = match reads {
            Ok(reads) => reads,
            Err(err) => {
                warn!(target: LOG_TARGET, table_id, error = %err, "refresh failed, keeping previous snapshot");
                return Err(err.into());
            }
        };

        let current = table.clone();
        let mut previous = None;
        let published = self.store.update_for_table(table_id, |state| {
            previous = state.snapshot.replace(table);
            state.betting = Some(betting);
            state.players = players;
            state.community = Some(community);
            apply(state);
        });

        if !published {
            debug!(target: LOG_TARGET, table_id, "table deselected during refresh, discarding");
            return Ok(RefreshOutcome::Discarded);
        }

        debug!(
            target: LOG_TARGET,
            table_id,
            round = current.round,
            state = ?current.game_state,
            "published table snapshot"
        );
        Ok(RefreshOutcome::Published { previous, current })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderError, SyncError};
    use crate::test_support::{sample_snapshot, MockLedger};
    use crate::types::{GameState, HoleCards, Round};

    fn executor(ledger: Arc<MockLedger>, table: Option<TableId>) -> (RefreshExecutor, StateStore) {
        let store = StateStore::new();
        store.replace(TableState::for_table(table));
        (
            RefreshExecutor::new(ledger, store.clone(), Address::new("0xme")),
            store,
        )
    }

    #[tokio::test]
    async fn publishes_all_reads_together() {
        let ledger = Arc::new(MockLedger::new(sample_snapshot(1, GameState::Playing, 3)));
        let (executor, store) = executor(ledger.clone(), Some(1));

        let outcome = executor.refresh_all(1).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Published { previous: None, .. }));

        let state = store.get();
        assert_eq!(state.round(), Some(3));
        assert!(state.betting.is_some());
        assert!(state.community.is_some());
        assert!(executor.last_started().is_some());
    }

    #[tokio::test]
    async fn failed_read_keeps_previous_snapshot() {
        let ledger = Arc::new(MockLedger::new(sample_snapshot(1, GameState::Playing, 3)));
        let (executor, store) = executor(ledger.clone(), Some(1));
        executor.refresh_all(1).await.unwrap();
        let before = store.get();

        ledger.set_snapshot(sample_snapshot(1, GameState::Finished, 3));
        ledger.fail_players_with(ProviderError::Unavailable("node down".into()));

        let err = executor.refresh_all(1).await.unwrap_err();
        assert!(matches!(err, SyncError::Provider(ProviderError::Unavailable(_))));
        assert_eq!(store.get(), before, "no partial snapshot is published");
    }

    #[tokio::test]
    async fn hook_sees_fresh_state_before_it_is_published() {
        let ledger = Arc::new(MockLedger::new(sample_snapshot(1, GameState::Playing, 3)));
        let (executor, store) = executor(ledger.clone(), Some(1));
        executor.refresh_all(1).await.unwrap();
        store.update(|state| {
            state
                .revealed_cards
                .insert(Address::new("0xme"), HoleCards { card1: 14, card2: 8 });
        });
        let mut rx = store.subscribe();
        rx.mark_unchanged();

        ledger.set_snapshot(sample_snapshot(1, GameState::Playing, 4));
        let mut seen: Option<(Option<Round>, usize)> = None;
        executor
            .refresh_with(1, |state| {
                seen = Some((state.round(), state.revealed_cards.len()));
                state.clear_hand_caches();
            })
            .await
            .unwrap();

        assert_eq!(seen, Some((Some(4), 1)));
        assert!(rx.has_changed().unwrap());
        let published = rx.borrow_and_update().clone();
        assert_eq!(published.round(), Some(4));
        assert!(published.revealed_cards.is_empty(), "new round never carries old cards");
    }

    #[tokio::test]
    async fn refresh_for_deselected_table_is_discarded() {
        let ledger = Arc::new(MockLedger::new(sample_snapshot(1, GameState::Playing, 3)));
        let (executor, store) = executor(ledger, Some(2));

        let mut ran = false;
        let outcome = executor.refresh_with(1, |_| ran = true).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Discarded);
        assert!(!ran);
        assert_eq!(store.get().snapshot, None);
    }
}
