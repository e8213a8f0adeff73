//! Disclosure workflows for per-hand confidential data.
//!
//! Hole cards go through the decryption service under a cached signature;
//! board cards are read once the ledger has opened them. Both retry transient
//! failures on a fixed delay and publish only while the hand they started in
//! is still the current one.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::{Operation, ProviderError, SyncError, SyncResult};
use crate::providers::Providers;
use crate::store::{StateStore, TableState};
use crate::types::{
    ClientIdentity, DecryptedCommunityCards, HoleCards, Round, Street, TableId, TableSnapshot,
};

pub mod community;
pub mod guard;
pub mod hole;
pub mod retry;
pub mod signature;

pub use community::CommunityCardReader;
pub use guard::{InFlightGuard, InFlightPermit};
pub use hole::HoleCardDecryptor;
pub use retry::{retry_transient, RetryPolicy};
pub use signature::{SignatureCache, SignatureScope};

const LOG_TARGET: &str = "table_sync::decryption";

pub struct DecryptionOrchestrator {
    store: StateStore,
    guard: InFlightGuard,
    policy: RetryPolicy,
    signatures: Arc<SignatureCache>,
    hole: HoleCardDecryptor,
    community: CommunityCardReader,
}

impl DecryptionOrchestrator {
    pub fn new(
        providers: &Providers,
        identity: ClientIdentity,
        store: StateStore,
        config: &SyncConfig,
    ) -> Self {
        let signatures = Arc::new(SignatureCache::new());
        Self {
            store,
            guard: InFlightGuard::new(),
            policy: RetryPolicy::from_config(config),
            hole: HoleCardDecryptor::new(
                Arc::clone(&providers.ledger),
                Arc::clone(&providers.decryption),
                Arc::clone(&providers.authority),
                Arc::clone(&providers.clock),
                identity,
                Arc::clone(&signatures),
            ),
            community: CommunityCardReader::new(Arc::clone(&providers.ledger)),
            signatures,
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        self.hole.identity()
    }

    pub fn invalidate_signature(&self) {
        self.signatures.invalidate();
    }

    pub fn is_in_flight(&self, operation: Operation) -> bool {
        self.guard.is_held(operation)
    }

    /// Decrypts and stores the local player's hole cards for the current hand.
    pub async fn decrypt_hole_cards(
        &self,
        table_id: TableId,
        cancel: &CancellationToken,
    ) -> SyncResult<HoleCards> {
        let state = self.store.get();
        let snapshot = self.current_snapshot(table_id, &state)?;
        if !snapshot.is_seated {
            return Err(ProviderError::NotSeated(table_id).into());
        }
        let round = snapshot.round;

        let _permit = self
            .guard
            .try_acquire(Operation::HoleCards)
            .ok_or(SyncError::AlreadyInFlight(Operation::HoleCards))?;

        let cards = retry_transient(Operation::HoleCards, self.policy, cancel, |_| async move {
            self.ensure_current_hand(table_id, round)?;
            self.hole.attempt(table_id, round).await
        })
        .await?;

        let principal = self.identity().principal.clone();
        let stored = self.store.update_for_hand(table_id, round, |state| {
            state.revealed_cards.insert(principal, cards);
        });
        if !stored {
            debug!(target: LOG_TARGET, table_id, round, "hand moved on, dropping hole cards");
            return Err(SyncError::Stale { table_id, round });
        }
        info!(target: LOG_TARGET, table_id, round, "hole cards available");
        Ok(cards)
    }

    /// Reads the opened board for the current street and stores it. Repeated
    /// calls without a state change leave the store untouched.
    pub async fn decrypt_community_cards(
        &self,
        table_id: TableId,
        cancel: &CancellationToken,
    ) -> SyncResult<DecryptedCommunityCards> {
        let state = self.store.get();
        let round = self.current_snapshot(table_id, &state)?.round;
        let street = state
            .community
            .as_ref()
            .map_or(Street::PreFlop, |community| community.street);

        let _permit = self
            .guard
            .try_acquire(Operation::CommunityCards)
            .ok_or(SyncError::AlreadyInFlight(Operation::CommunityCards))?;

        let board = retry_transient(Operation::CommunityCards, self.policy, cancel, |_| async move {
            self.ensure_current_hand(table_id, round)?;
            self.community.attempt(table_id, street).await
        })
        .await?;

        let mut published = board.clone();
        let stored = self.store.update_for_hand(table_id, round, |state| {
            // Never step back to a shorter board within one hand.
            if state.decrypted_community.revealed_count() > board.revealed_count() {
                published = state.decrypted_community.clone();
            } else {
                state.decrypted_community = board;
            }
        });
        if !stored {
            debug!(target: LOG_TARGET, table_id, round, "hand moved on, dropping board");
            return Err(SyncError::Stale { table_id, round });
        }
        Ok(published)
    }

    /// Fails with `Stale` once the store has moved past (`table_id`, `round`),
    /// so a retry loop never carries over into the next hand.
    fn ensure_current_hand(&self, table_id: TableId, round: Round) -> SyncResult<()> {
        let state = self.store.get();
        if state.table_id == Some(table_id) && state.round() == Some(round) {
            return Ok(());
        }
        debug!(target: LOG_TARGET, table_id, round, "hand moved on, abandoning retries");
        Err(SyncError::Stale { table_id, round })
    }

    fn current_snapshot<'a>(
        &self,
        table_id: TableId,
        state: &'a TableState,
    ) -> SyncResult<&'a TableSnapshot> {
        if state.table_id != Some(table_id) {
            return Err(SyncError::NoActiveTable);
        }
        state
            .snapshot
            .as_ref()
            .ok_or_else(|| ProviderError::NotYetAvailable("table snapshot".into()).into())
    }
}
