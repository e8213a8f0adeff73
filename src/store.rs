use std::sync::Arc;

use tokio::sync::watch;

use crate::types::{
    BettingInfo, CommunityCardState, DecryptedCommunityCards, PendingTransaction, PlayerStates,
    RevealedCards, Round, ShowdownCache, TableId, TableSnapshot,
};

pub type Shared<T> = Arc<T>;

/// Read model consumed by the rendering layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableState {
    pub table_id: Option<TableId>,
    pub snapshot: Option<TableSnapshot>,
    pub betting: Option<BettingInfo>,
    pub players: PlayerStates,
    pub community: Option<CommunityCardState>,
    pub decrypted_community: DecryptedCommunityCards,
    pub revealed_cards: RevealedCards,
    pub showdown: Option<ShowdownCache>,
    pub pending_transaction: Option<PendingTransaction>,
    pub turn_countdown: Option<u64>,
    pub error_message: Option<String>,
}

impl TableState {
    pub fn for_table(table_id: Option<TableId>) -> Self {
        Self {
            table_id,
            ..Self::default()
        }
    }

    pub fn round(&self) -> Option<Round> {
        self.snapshot.as_ref().map(|snapshot| snapshot.round)
    }

    /// Clears everything scoped to a single hand, keeping the showdown capture.
    pub fn clear_hand_caches(&mut self) {
        self.decrypted_community = DecryptedCommunityCards::empty();
        self.revealed_cards.clear();
    }
}

/// Replace-only store: every write publishes a fresh `TableState`, so readers
/// never observe a half-applied update.
#[derive(Clone)]
pub struct StateStore {
    tx: Arc<watch::Sender<Shared<TableState>>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(TableState::default()));
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> Shared<TableState> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Shared<TableState>> {
        self.tx.subscribe()
    }

    pub fn replace(&self, state: TableState) {
        self.tx.send_replace(Arc::new(state));
    }

    /// Apply `f` to a copy of the current state and publish the copy.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut TableState),
    {
        self.tx.send_modify(|current| {
            let mut next = TableState::clone(current);
            f(&mut next);
            *current = Arc::new(next);
        });
    }

    /// Like [`StateStore::update`], but only while `table_id` is still the active table.
    /// Returns whether the table matched; readers are only notified on an actual change.
    pub fn update_for_table<F>(&self, table_id: TableId, f: F) -> bool
    where
        F: FnOnce(&mut TableState),
    {
        self.update_if(|state| state.table_id == Some(table_id), f)
    }

    /// Only publishes while `table_id` is active and its snapshot is still at `round`.
    pub fn update_for_hand<F>(&self, table_id: TableId, round: Round, f: F) -> bool
    where
        F: FnOnce(&mut TableState),
    {
        self.update_if(
            |state| state.table_id == Some(table_id) && state.round() == Some(round),
            f,
        )
    }

    /// Marks `label` as awaiting confirmation until the returned guard drops.
    pub fn begin_transaction(
        &self,
        table_id: TableId,
        label: impl Into<String>,
    ) -> PendingTransactionGuard {
        let label = label.into();
        self.update_for_table(table_id, |state| {
            state.pending_transaction = Some(PendingTransaction { label });
        });
        PendingTransactionGuard {
            store: self.clone(),
            table_id,
        }
    }

    fn update_if<P, F>(&self, predicate: P, f: F) -> bool
    where
        P: FnOnce(&TableState) -> bool,
        F: FnOnce(&mut TableState),
    {
        let mut matched = false;
        self.tx.send_if_modified(|current| {
            if !predicate(current) {
                return false;
            }
            matched = true;
            let mut next = TableState::clone(current);
            f(&mut next);
            if next == **current {
                return false;
            }
            *current = Arc::new(next);
            true
        });
        matched
    }
}

#[must_use]
pub struct PendingTransactionGuard {
    store: StateStore,
    table_id: TableId,
}

impl Drop for PendingTransactionGuard {
    fn drop(&mut self) {
        self.store.update_for_table(self.table_id, |state| {
            state.pending_transaction = None;
        });
    }
}
