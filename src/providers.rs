use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::events::TableEvent;
use crate::storage::ClientStorage;
use crate::types::{
    Address, BettingInfo, CardHandle, CardValue, CommunityCardState, DecryptionSignature,
    PlayerStates, RevealedCards, TableId, TableSnapshot, UnixSeconds, BOARD_SIZE,
};

pub type EventStream = BoxStream<'static, Result<TableEvent, ProviderError>>;

/// Read-only view of authoritative ledger state.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn table(&self, table_id: TableId, viewer: &Address)
        -> Result<TableSnapshot, ProviderError>;

    async fn betting(&self, table_id: TableId) -> Result<BettingInfo, ProviderError>;

    async fn players(&self, table_id: TableId) -> Result<PlayerStates, ProviderError>;

    async fn community_cards(&self, table_id: TableId)
        -> Result<CommunityCardState, ProviderError>;

    /// Board values already published in plaintext by the on-ledger reveal process.
    async fn community_plaintext(
        &self,
        table_id: TableId,
    ) -> Result<[Option<CardValue>; BOARD_SIZE], ProviderError>;

    /// Encrypted hole card handles for `player`. `NotYetAvailable` before the deal.
    async fn hole_card_handles(
        &self,
        table_id: TableId,
        player: &Address,
    ) -> Result<[CardHandle; 2], ProviderError>;

    /// Hole cards that players have opened at showdown.
    async fn revealed_cards(&self, table_id: TableId) -> Result<RevealedCards, ProviderError>;
}

/// Persistent subscription. `None` subscribes to every table.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn connect(&self, table_id: Option<TableId>) -> Result<EventStream, ProviderError>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollBatch {
    pub events: Vec<TableEvent>,
    pub cursor: Option<u64>,
}

/// Periodic re-query of events newer than `cursor`.
#[async_trait]
pub trait PollProvider: Send + Sync {
    async fn poll(
        &self,
        table_id: Option<TableId>,
        cursor: Option<u64>,
    ) -> Result<PollBatch, ProviderError>;
}

#[async_trait]
pub trait DecryptionService: Send + Sync {
    async fn create_signature(
        &self,
        identity: &Address,
        contracts: &[Address],
    ) -> Result<DecryptionSignature, ProviderError>;

    async fn user_decrypt(
        &self,
        handles: &[CardHandle],
        signature: &DecryptionSignature,
    ) -> Result<Vec<CardValue>, ProviderError>;
}

/// Grants a delegated signer the right to decrypt on behalf of `principal`.
/// Returns `ProviderError::AlreadyGranted` when nothing had to change.
#[async_trait]
pub trait AuthorityProvider: Send + Sync {
    async fn grant_decryption_authority(
        &self,
        principal: &Address,
        delegate: &Address,
        contract: &Address,
    ) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait ActionSubmitter: Send + Sync {
    /// Must be a no-op on the ledger once the timed-out player was already skipped.
    async fn skip_timed_out_player(&self, table_id: TableId) -> Result<(), ProviderError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> UnixSeconds;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixSeconds {
        chrono::Utc::now().timestamp()
    }
}

/// External collaborators the engine is wired to.
#[derive(Clone)]
pub struct Providers {
    pub ledger: Arc<dyn LedgerReader>,
    pub push: Option<Arc<dyn PushProvider>>,
    pub poll: Arc<dyn PollProvider>,
    pub decryption: Arc<dyn DecryptionService>,
    pub authority: Arc<dyn AuthorityProvider>,
    pub actions: Arc<dyn ActionSubmitter>,
    pub storage: Arc<dyn ClientStorage>,
    pub clock: Arc<dyn Clock>,
}
