//! Fixtures and in-memory providers shared by the unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::ProviderError;
use crate::events::TableEvent;
use crate::providers::{
    ActionSubmitter, AuthorityProvider, Clock, DecryptionService, EventStream, LedgerReader,
    PollBatch, PollProvider, Providers, PushProvider,
};
use crate::storage::MemoryStorage;
use crate::types::{
    Address, BettingInfo, CardHandle, CardValue, CommunityCardState, DecryptionSignature,
    GameState, HoleCards, PlayerBettingState, PlayerStates, RevealedCards, Round, Street, TableId,
    TableSnapshot, UnixSeconds, BOARD_SIZE,
};

pub fn sample_snapshot(table_id: TableId, game_state: GameState, round: Round) -> TableSnapshot {
    TableSnapshot {
        table_id,
        game_state,
        round,
        dealer_index: 0,
        turn_start_time: None,
        action_timeout_seconds: Some(30),
        min_buy_in: 1_000,
        max_players: 6,
        num_players: 2,
        is_seated: true,
    }
}

// ---- Ledger ----------------------------------------------------------------------------------

pub struct MockLedger {
    snapshot: Mutex<TableSnapshot>,
    players: Mutex<PlayerStates>,
    street: Mutex<Street>,
    board: Mutex<[Option<CardValue>; BOARD_SIZE]>,
    hole_handles: Mutex<HashMap<Address, [CardHandle; 2]>>,
    hole_requests: Mutex<Vec<Address>>,
    revealed: Mutex<RevealedCards>,
    players_failure: Mutex<Option<ProviderError>>,
    revealed_failure: Mutex<Option<ProviderError>>,
    table_reads: AtomicUsize,
}

impl MockLedger {
    pub fn new(snapshot: TableSnapshot) -> Self {
        let mut players = BTreeMap::new();
        players.insert(Address::new("0xme"), PlayerBettingState::default());
        Self {
            snapshot: Mutex::new(snapshot),
            players: Mutex::new(players),
            street: Mutex::new(Street::PreFlop),
            board: Mutex::new([None; BOARD_SIZE]),
            hole_handles: Mutex::new(HashMap::new()),
            hole_requests: Mutex::new(Vec::new()),
            revealed: Mutex::new(BTreeMap::new()),
            players_failure: Mutex::new(None),
            revealed_failure: Mutex::new(None),
            table_reads: AtomicUsize::new(0),
        }
    }

    pub fn set_snapshot(&self, snapshot: TableSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    pub fn set_street(&self, street: Street) {
        *self.street.lock() = street;
    }

    pub fn set_board(&self, board: [Option<CardValue>; BOARD_SIZE]) {
        *self.board.lock() = board;
    }

    pub fn set_hole_handles(&self, player: &Address, handles: [CardHandle; 2]) {
        self.hole_handles.lock().insert(player.clone(), handles);
    }

    pub fn clear_hole_handles(&self) {
        self.hole_handles.lock().clear();
    }

    pub fn hole_requests(&self) -> Vec<Address> {
        self.hole_requests.lock().clone()
    }

    pub fn set_revealed(&self, player: Address, cards: HoleCards) {
        self.revealed.lock().insert(player, cards);
    }

    /// The next `players` read fails with `err`.
    pub fn fail_players_with(&self, err: ProviderError) {
        *self.players_failure.lock() = Some(err);
    }

    /// The next `revealed_cards` read fails with `err`.
    pub fn fail_revealed_with(&self, err: ProviderError) {
        *self.revealed_failure.lock() = Some(err);
    }

    pub fn table_reads(&self) -> usize {
        self.table_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerReader for MockLedger {
    async fn table(
        &self,
        table_id: TableId,
        _viewer: &Address,
    ) -> Result<TableSnapshot, ProviderError> {
        self.table_reads.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.snapshot.lock().clone();
        if snapshot.table_id != table_id {
            return Err(ProviderError::NotFound(format!("table {table_id}")));
        }
        Ok(snapshot)
    }

    async fn betting(&self, _table_id: TableId) -> Result<BettingInfo, ProviderError> {
        Ok(BettingInfo {
            pot: 30,
            current_bet: 20,
            current_player: Some(Address::new("0xme")),
        })
    }

    async fn players(&self, _table_id: TableId) -> Result<PlayerStates, ProviderError> {
        if let Some(err) = self.players_failure.lock().take() {
            return Err(err);
        }
        Ok(self.players.lock().clone())
    }

    async fn community_cards(
        &self,
        _table_id: TableId,
    ) -> Result<CommunityCardState, ProviderError> {
        Ok(CommunityCardState {
            handles: Vec::new(),
            street: *self.street.lock(),
        })
    }

    async fn community_plaintext(
        &self,
        _table_id: TableId,
    ) -> Result<[Option<CardValue>; BOARD_SIZE], ProviderError> {
        Ok(*self.board.lock())
    }

    async fn hole_card_handles(
        &self,
        _table_id: TableId,
        player: &Address,
    ) -> Result<[CardHandle; 2], ProviderError> {
        self.hole_requests.lock().push(player.clone());
        self.hole_handles
            .lock()
            .get(player)
            .cloned()
            .ok_or_else(|| ProviderError::NotYetAvailable("hole cards not dealt".into()))
    }

    async fn revealed_cards(&self, _table_id: TableId) -> Result<RevealedCards, ProviderError> {
        if let Some(err) = self.revealed_failure.lock().take() {
            return Err(err);
        }
        Ok(self.revealed.lock().clone())
    }
}

// ---- Decryption ------------------------------------------------------------------------------

pub struct MockDecryption {
    start: UnixSeconds,
    plaintext: Mutex<HashMap<String, CardValue>>,
    owners: Mutex<Vec<Address>>,
    used: Mutex<Vec<String>>,
    rejections: AtomicUsize,
}

impl MockDecryption {
    pub fn new(start: UnixSeconds) -> Self {
        Self {
            start,
            plaintext: Mutex::new(HashMap::new()),
            owners: Mutex::new(Vec::new()),
            used: Mutex::new(Vec::new()),
            rejections: AtomicUsize::new(0),
        }
    }

    pub fn set_plaintext(&self, handle: &str, value: CardValue) {
        self.plaintext.lock().insert(handle.to_string(), value);
    }

    /// The next `count` decrypt calls are refused as unauthorized.
    pub fn reject_next(&self, count: usize) {
        self.rejections.store(count, Ordering::SeqCst);
    }

    pub fn signatures_created(&self) -> usize {
        self.owners.lock().len()
    }

    pub fn signature_owners(&self) -> Vec<Address> {
        self.owners.lock().clone()
    }

    /// Signature strings presented to successful decrypt calls, in order.
    pub fn signatures_used(&self) -> Vec<String> {
        self.used.lock().clone()
    }
}

#[async_trait]
impl DecryptionService for MockDecryption {
    async fn create_signature(
        &self,
        identity: &Address,
        contracts: &[Address],
    ) -> Result<DecryptionSignature, ProviderError> {
        let mut owners = self.owners.lock();
        owners.push(identity.clone());
        Ok(DecryptionSignature {
            public_key: format!("pk-{}", owners.len()),
            private_key: format!("sk-{}", owners.len()),
            signature: format!("sig-{}", owners.len()),
            contract_addresses: contracts.to_vec(),
            user_address: identity.clone(),
            start_timestamp: self.start,
            duration_days: 1,
        })
    }

    async fn user_decrypt(
        &self,
        handles: &[CardHandle],
        signature: &DecryptionSignature,
    ) -> Result<Vec<CardValue>, ProviderError> {
        let pending = self.rejections.load(Ordering::SeqCst);
        if pending > 0 {
            self.rejections.store(pending - 1, Ordering::SeqCst);
            return Err(ProviderError::Unauthorized("signature rejected".into()));
        }
        let plaintext = self.plaintext.lock();
        let values = handles
            .iter()
            .map(|handle| {
                plaintext.get(handle.as_str()).copied().ok_or_else(|| {
                    ProviderError::Unavailable(format!("no plaintext for {}", handle.as_str()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.used.lock().push(signature.signature.clone());
        Ok(values)
    }
}

// ---- Authority and actions -------------------------------------------------------------------

#[derive(Default)]
pub struct MockAuthority {
    grants: AtomicUsize,
    already_granted: Mutex<bool>,
}

impl MockAuthority {
    pub fn respond_already_granted(&self) {
        *self.already_granted.lock() = true;
    }

    pub fn grants(&self) -> usize {
        self.grants.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorityProvider for MockAuthority {
    async fn grant_decryption_authority(
        &self,
        _principal: &Address,
        _delegate: &Address,
        _contract: &Address,
    ) -> Result<(), ProviderError> {
        self.grants.fetch_add(1, Ordering::SeqCst);
        if *self.already_granted.lock() {
            return Err(ProviderError::AlreadyGranted);
        }
        Ok(())
    }
}

pub struct MockActions {
    skips: Mutex<Vec<TableId>>,
    gate: watch::Sender<bool>,
    failure: Mutex<Option<ProviderError>>,
}

impl Default for MockActions {
    fn default() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            skips: Mutex::new(Vec::new()),
            gate,
            failure: Mutex::new(None),
        }
    }
}

impl MockActions {
    /// Submissions block until `release_submissions`.
    pub fn hold_submissions(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_submissions(&self) {
        self.gate.send_replace(true);
    }

    pub fn fail_with(&self, err: ProviderError) {
        *self.failure.lock() = Some(err);
    }

    pub fn skips(&self) -> Vec<TableId> {
        self.skips.lock().clone()
    }
}

#[async_trait]
impl ActionSubmitter for MockActions {
    async fn skip_timed_out_player(&self, table_id: TableId) -> Result<(), ProviderError> {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        self.skips.lock().push(table_id);
        match self.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ---- Transports ------------------------------------------------------------------------------

#[derive(Default)]
pub struct MockPoll {
    batches: Mutex<VecDeque<PollBatch>>,
    cursors: Mutex<Vec<Option<u64>>>,
}

impl MockPoll {
    pub fn push_batch(&self, events: Vec<TableEvent>, cursor: Option<u64>) {
        self.batches.lock().push_back(PollBatch { events, cursor });
    }

    /// Cursor passed to every poll so far.
    pub fn cursors(&self) -> Vec<Option<u64>> {
        self.cursors.lock().clone()
    }
}

#[async_trait]
impl PollProvider for MockPoll {
    async fn poll(
        &self,
        _table_id: Option<TableId>,
        cursor: Option<u64>,
    ) -> Result<PollBatch, ProviderError> {
        self.cursors.lock().push(cursor);
        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }
}

enum QueuedConnection {
    Open(mpsc::Receiver<Result<TableEvent, ProviderError>>),
    Refuse,
}

#[derive(Default)]
pub struct MockPush {
    queue: Mutex<VecDeque<QueuedConnection>>,
    attempts: AtomicUsize,
}

impl MockPush {
    /// The next connect succeeds; the returned sender feeds that connection
    /// and dropping it closes the stream.
    pub fn queue_connection(&self) -> mpsc::Sender<Result<TableEvent, ProviderError>> {
        let (tx, rx) = mpsc::channel(16);
        self.queue.lock().push_back(QueuedConnection::Open(rx));
        tx
    }

    pub fn queue_failure(&self) {
        self.queue.lock().push_back(QueuedConnection::Refuse);
    }

    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushProvider for MockPush {
    async fn connect(&self, _table_id: Option<TableId>) -> Result<EventStream, ProviderError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.queue.lock().pop_front() {
            Some(QueuedConnection::Open(rx)) => Ok(ReceiverStream::new(rx).boxed()),
            Some(QueuedConnection::Refuse) | None => {
                Err(ProviderError::Unavailable("push endpoint refused".into()))
            }
        }
    }
}

// ---- Clock and bundle ------------------------------------------------------------------------

pub struct ManualClock {
    now: Mutex<UnixSeconds>,
}

impl ManualClock {
    pub fn new(now: UnixSeconds) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: UnixSeconds) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixSeconds {
        *self.now.lock()
    }
}

pub struct MockProviders {
    pub ledger: Arc<MockLedger>,
    pub push: Arc<MockPush>,
    pub poll: Arc<MockPoll>,
    pub decryption: Arc<MockDecryption>,
    pub authority: Arc<MockAuthority>,
    pub actions: Arc<MockActions>,
    pub storage: Arc<MemoryStorage>,
    pub clock: Arc<ManualClock>,
}

impl MockProviders {
    pub fn new(snapshot: TableSnapshot) -> Self {
        Self {
            ledger: Arc::new(MockLedger::new(snapshot)),
            push: Arc::new(MockPush::default()),
            poll: Arc::new(MockPoll::default()),
            decryption: Arc::new(MockDecryption::new(1_000)),
            authority: Arc::new(MockAuthority::default()),
            actions: Arc::new(MockActions::default()),
            storage: Arc::new(MemoryStorage::new()),
            clock: Arc::new(ManualClock::new(1_000)),
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            ledger: self.ledger.clone(),
            push: Some(self.push.clone()),
            poll: self.poll.clone(),
            decryption: self.decryption.clone(),
            authority: self.authority.clone(),
            actions: self.actions.clone(),
            storage: self.storage.clone(),
            clock: self.clock.clone(),
        }
    }
}
