use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::debounce::{refresh_coordinator, RefreshSink, RefreshTrigger};
use crate::decryption::DecryptionOrchestrator;
use crate::error::{Operation, SyncError, SyncResult};
use crate::filter::{FilterDecision, TableFilter};
use crate::providers::Providers;
use crate::refresh::{RefreshExecutor, RefreshOutcome};
use crate::storage::{load_active_table, load_last_round, persist_active_table, persist_last_round};
use crate::store::{Shared, StateStore, TableState};
use crate::timeout::TurnTimeoutMonitor;
use crate::tokio_tools::SessionTasks;
use crate::transition::{
    capture_showdown, HandPosition, Transition, TransitionDetector, TransitionPlan,
};
use crate::transport::{EventSourceAdapter, EventTransport, SourceEvent, SubscriptionHandle};
use crate::types::{
    ClientIdentity, DecryptedCommunityCards, GameState, HoleCards, TableId, TableSnapshot,
};

const LOG_TARGET: &str = "table_sync::session";

/// Background machinery bound to one table selection.
struct ActiveSession {
    tasks: Arc<SessionTasks>,
    trigger: RefreshTrigger,
    subscription: SubscriptionHandle,
}

struct SyncCore {
    config: SyncConfig,
    providers: Providers,
    store: StateStore,
    filter: TableFilter,
    adapter: EventSourceAdapter,
    refresh: RefreshExecutor,
    decryption: DecryptionOrchestrator,
    timeout: Arc<TurnTimeoutMonitor>,
    detector: Mutex<TransitionDetector>,
    session: Mutex<Option<ActiveSession>>,
}

/// Client-side engine for one player: keeps the store in step with the
/// ledger for the selected table and drives card disclosure.
pub struct TableSync {
    core: Arc<SyncCore>,
}

impl TableSync {
    pub fn new(config: SyncConfig, identity: ClientIdentity, providers: Providers) -> Self {
        let store = StateStore::new();
        let core = SyncCore {
            filter: TableFilter::new(store.clone(), Arc::clone(&providers.storage)),
            adapter: EventSourceAdapter::new(
                providers.push.clone(),
                Arc::clone(&providers.poll),
                &config,
            ),
            refresh: RefreshExecutor::new(
                Arc::clone(&providers.ledger),
                store.clone(),
                identity.principal.clone(),
            ),
            decryption: DecryptionOrchestrator::new(&providers, identity, store.clone(), &config),
            timeout: Arc::new(TurnTimeoutMonitor::new(
                store.clone(),
                Arc::clone(&providers.actions),
                Arc::clone(&providers.clock),
                &config,
            )),
            detector: Mutex::new(TransitionDetector::default()),
            session: Mutex::new(None),
            store,
            providers,
            config,
        };
        Self {
            core: Arc::new(core),
        }
    }

    /// Resumes the table persisted by a previous run, or listens for one to
    /// adopt when none was saved.
    pub fn restore(&self) -> Option<TableId> {
        let table_id = load_active_table(self.core.providers.storage.as_ref());
        info!(target: LOG_TARGET, ?table_id, "restoring session");
        self.set_current_table_id(table_id);
        table_id
    }

    /// Tears down everything bound to the previous table and starts over for
    /// `table_id`. `None` subscribes to every table until one is adopted.
    pub fn set_current_table_id(&self, table_id: Option<TableId>) {
        self.core.set_current_table_id(table_id);
    }

    pub async fn refresh_all(&self, table_id: TableId) -> SyncResult<RefreshOutcome> {
        let result = self.core.refresh_and_react(table_id).await;
        self.core.settle(table_id, Operation::Refresh, &result);
        result
    }

    pub async fn decrypt_hole_cards(&self, table_id: TableId) -> SyncResult<HoleCards> {
        let cancel = self.core.session_token();
        let result = self.core.decryption.decrypt_hole_cards(table_id, &cancel).await;
        self.core.settle(table_id, Operation::HoleCards, &result);
        result
    }

    pub async fn decrypt_community_cards(
        &self,
        table_id: TableId,
    ) -> SyncResult<DecryptedCommunityCards> {
        let cancel = self.core.session_token();
        let result = self
            .core
            .decryption
            .decrypt_community_cards(table_id, &cancel)
            .await;
        self.core.settle(table_id, Operation::CommunityCards, &result);
        result
    }

    pub fn store(&self) -> &StateStore {
        &self.core.store
    }

    pub fn state(&self) -> Shared<TableState> {
        self.core.store.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<Shared<TableState>> {
        self.core.store.subscribe()
    }

    pub fn current_table_id(&self) -> Option<TableId> {
        self.core.store.get().table_id
    }

    pub fn snapshot(&self) -> Option<TableSnapshot> {
        self.core.store.get().snapshot.clone()
    }

    /// Transport the current subscription settled on, once probed.
    pub fn transport(&self) -> Option<EventTransport> {
        self.core
            .session
            .lock()
            .as_ref()
            .and_then(|session| session.subscription.transport())
    }

    pub fn shutdown(&self) {
        self.core.teardown();
    }
}

impl Drop for TableSync {
    fn drop(&mut self) {
        self.core.teardown();
    }
}

impl SyncCore {
    fn set_current_table_id(self: &Arc<Self>, table_id: Option<TableId>) {
        self.teardown();
        self.store.replace(TableState::for_table(table_id));
        self.decryption.invalidate_signature();
        if let Err(err) = persist_active_table(self.providers.storage.as_ref(), table_id) {
            warn!(target: LOG_TARGET, ?table_id, error = %err, "failed to persist active table");
        }
        self.reset_detector(table_id);
        self.start_session(table_id);
        info!(target: LOG_TARGET, ?table_id, "active table selected");
    }

    fn reset_detector(&self, table_id: Option<TableId>) {
        let persisted =
            table_id.and_then(|id| load_last_round(self.providers.storage.as_ref(), id));
        *self.detector.lock() = TransitionDetector::new(persisted);
    }

    fn start_session(self: &Arc<Self>, table_id: Option<TableId>) {
        let tasks = Arc::new(SessionTasks::new(CancellationToken::new()));
        let sink: Arc<dyn RefreshSink> = Arc::new(CoordinatorSink {
            core: Arc::clone(self),
        });
        let (trigger, coordinator) = refresh_coordinator(
            sink,
            self.config.debounce_window,
            self.config.min_refresh_spacing,
            tasks.token(),
        );
        let (tx, rx) = mpsc::channel(self.config.event_channel_capacity);
        let subscription = self.adapter.subscribe(table_id, tx);

        // Registered before any task runs so spawned work can find the session.
        *self.session.lock() = Some(ActiveSession {
            tasks: Arc::clone(&tasks),
            trigger: trigger.clone(),
            subscription,
        });

        tasks.spawn("refresh-coordinator", coordinator);
        tasks.spawn("event-pump", run_event_pump(Arc::clone(self), rx, trigger));
        if let Some(table_id) = table_id {
            self.start_timeout_monitor(&tasks, table_id);
        }
    }

    fn start_timeout_monitor(&self, tasks: &SessionTasks, table_id: TableId) {
        let monitor = Arc::clone(&self.timeout);
        tasks.spawn(
            format!("turn-timeout-{table_id}"),
            monitor.run(table_id, tasks.token()),
        );
    }

    fn teardown(&self) {
        if let Some(mut session) = self.session.lock().take() {
            session.tasks.shutdown();
            session.subscription.cancel();
            debug!(target: LOG_TARGET, "session torn down");
        }
    }

    fn session_token(&self) -> CancellationToken {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.tasks.token())
            .unwrap_or_else(CancellationToken::new)
    }

    fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(session) = self.session.lock().as_ref() {
            session.tasks.spawn(name, future);
        }
    }

    fn arm_refresh(&self) {
        if let Some(session) = self.session.lock().as_ref() {
            session.trigger.arm();
        }
    }

    /// Called when the filter adopted `table_id` from an event.
    fn on_adopted(&self, table_id: TableId) {
        self.reset_detector(Some(table_id));
        if let Some(session) = self.session.lock().as_ref() {
            self.start_timeout_monitor(&session.tasks, table_id);
        }
    }

    async fn refresh_current(self: &Arc<Self>) {
        let Some(table_id) = self.store.get().table_id else {
            return;
        };
        if let Err(err) = self.refresh_and_react(table_id).await {
            debug!(target: LOG_TARGET, table_id, error = %err, "background refresh failed");
        }
    }

    /// Refreshes `table_id`. Transitions are detected and their cache effects
    /// applied inside the publishing swap, so no reader sees a new hand next
    /// to the previous hand's cards.
    async fn refresh_and_react(self: &Arc<Self>, table_id: TableId) -> SyncResult<RefreshOutcome> {
        let mut transitions = Vec::new();
        let outcome = self
            .refresh
            .refresh_with(table_id, |state| {
                let Some(snapshot) = state.snapshot.as_ref() else {
                    return;
                };
                transitions = self.detector.lock().observe(HandPosition::from(snapshot));
                TransitionPlan::from_transitions(&transitions).apply_to(state);
            })
            .await?;
        if let RefreshOutcome::Published { current, .. } = &outcome {
            self.react(table_id, current, &transitions);
        }
        Ok(outcome)
    }

    /// Runs the remaining transition effects and schedules disclosure for a
    /// freshly published snapshot.
    fn react(
        self: &Arc<Self>,
        table_id: TableId,
        snapshot: &TableSnapshot,
        transitions: &[Transition],
    ) {
        let last_round = self.detector.lock().last_round().unwrap_or(snapshot.round);
        if let Err(err) = persist_last_round(self.providers.storage.as_ref(), table_id, last_round)
        {
            warn!(target: LOG_TARGET, table_id, error = %err, "failed to persist last round");
        }

        let plan = TransitionPlan::from_transitions(transitions);
        if !plan.is_empty() {
            info!(target: LOG_TARGET, table_id, ?transitions, "hand transition");
            if plan.invalidate_signature {
                self.decryption.invalidate_signature();
            }
            if let Some(round) = plan.capture_showdown {
                let core = Arc::clone(self);
                self.spawn(format!("showdown-capture-{table_id}-{round}"), async move {
                    capture_showdown(
                        core.providers.ledger.as_ref(),
                        &core.store,
                        table_id,
                        round,
                        core.config.showdown_grace,
                    )
                    .await;
                });
            }
            if plan.refresh {
                self.arm_refresh();
            }
        }

        self.schedule_disclosure(table_id);
    }

    fn schedule_disclosure(self: &Arc<Self>, table_id: TableId) {
        let state = self.store.get();
        let Some(snapshot) = state.snapshot.as_ref() else {
            return;
        };

        let own_cards_missing = !state
            .revealed_cards
            .contains_key(&self.decryption.identity().principal);
        if snapshot.game_state == GameState::Playing
            && snapshot.is_seated
            && own_cards_missing
            && !self.decryption.is_in_flight(Operation::HoleCards)
        {
            let core = Arc::clone(self);
            let cancel = self.session_token();
            self.spawn(format!("hole-cards-{table_id}"), async move {
                let result = core.decryption.decrypt_hole_cards(table_id, &cancel).await;
                core.settle(table_id, Operation::HoleCards, &result);
            });
        }

        let street = state.community.as_ref().map(|community| community.street);
        let revealed = state.decrypted_community.revealed_count();
        let board_short = street.is_some_and(|street| revealed < street.board_cards());
        if board_short && !self.decryption.is_in_flight(Operation::CommunityCards) {
            let core = Arc::clone(self);
            let cancel = self.session_token();
            self.spawn(format!("community-cards-{table_id}"), async move {
                let result = core.decryption.decrypt_community_cards(table_id, &cancel).await;
                core.settle(table_id, Operation::CommunityCards, &result);
            });
        }
    }

    /// Publishes the single user-facing message for a failed operation, or
    /// clears a previous one once the operation succeeds.
    fn settle<T>(
        self: &Arc<Self>,
        table_id: TableId,
        operation: Operation,
        result: &SyncResult<T>,
    ) {
        match result {
            Ok(_) => {
                self.store.update_for_table(table_id, |state| {
                    state.error_message = None;
                });
            }
            Err(err) if err.is_user_facing() => {
                warn!(target: LOG_TARGET, table_id, %operation, error = %err, "operation failed");
                let message = err.user_message();
                self.store.update_for_table(table_id, |state| {
                    state.error_message = Some(message);
                });
            }
            Err(SyncError::AlreadyInFlight(_)) => {}
            Err(SyncError::Stale { round, .. }) => {
                debug!(target: LOG_TARGET, table_id, %operation, round, "hand moved on");
                self.schedule_disclosure(table_id);
            }
            Err(err) => {
                debug!(target: LOG_TARGET, table_id, %operation, error = %err, "operation abandoned");
            }
        }
    }
}

struct CoordinatorSink {
    core: Arc<SyncCore>,
}

#[async_trait]
impl RefreshSink for CoordinatorSink {
    async fn refresh_now(&self) {
        self.core.refresh_current().await;
    }

    fn last_refresh(&self) -> Option<Instant> {
        self.core.refresh.last_started()
    }
}

async fn run_event_pump(
    core: Arc<SyncCore>,
    mut rx: mpsc::Receiver<SourceEvent>,
    trigger: RefreshTrigger,
) {
    while let Some(event) = rx.recv().await {
        match event {
            SourceEvent::Connected { transport, first } => {
                info!(target: LOG_TARGET, %transport, first, "event source connected");
                if first {
                    core.refresh_current().await;
                } else {
                    trigger.arm();
                }
            }
            SourceEvent::Event(event) => match core.filter.accept(&event) {
                FilterDecision::Accept(_) => trigger.arm(),
                FilterDecision::Adopted(table_id) => {
                    core.on_adopted(table_id);
                    trigger.arm();
                }
                FilterDecision::Drop => {}
            },
        }
    }
    debug!(target: LOG_TARGET, "event pump stopped");
}
