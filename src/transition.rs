use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::providers::LedgerReader;
use crate::store::{StateStore, TableState};
use crate::types::{GameState, Round, ShowdownCache, TableId, TableSnapshot};

const LOG_TARGET: &str = "table_sync::transition";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandPosition {
    pub round: Round,
    pub state: GameState,
}

impl From<&TableSnapshot> for HandPosition {
    fn from(snapshot: &TableSnapshot) -> Self {
        Self {
            round: snapshot.round,
            state: snapshot.game_state,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Round counter moved forward, including a boot against a stale persisted round.
    RoundAdvanced { from: Round, to: Round },
    /// Waiting or Playing to Finished.
    HandFinished { round: Round },
    /// Finished or Waiting to Playing.
    HandStarted { round: Round },
    /// Finished to Waiting. Caches stay put.
    ReturnedToWaiting { round: Round },
}

/// Tracks the last observed (round, state) pair of one table.
#[derive(Clone, Debug, Default)]
pub struct TransitionDetector {
    last_round: Option<Round>,
    last_state: Option<GameState>,
}

impl TransitionDetector {
    /// `persisted_round` is the last round seen before a restart, if any. The
    /// state is unknown after a restart, so only the round can transition.
    pub fn new(persisted_round: Option<Round>) -> Self {
        Self {
            last_round: persisted_round,
            last_state: None,
        }
    }

    pub fn last_round(&self) -> Option<Round> {
        self.last_round
    }

    pub fn observe(&mut self, next: HandPosition) -> Vec<Transition> {
        let mut transitions = Vec::new();

        if let Some(from) = self.last_round {
            // A late snapshot from an older round never rewinds the tracker.
            if next.round < from {
                return transitions;
            }
            if next.round > from {
                transitions.push(Transition::RoundAdvanced {
                    from,
                    to: next.round,
                });
            }
        }

        if let Some(previous) = self.last_state {
            let round = next.round;
            match (previous, next.state) {
                (GameState::Waiting | GameState::Playing, GameState::Finished) => {
                    transitions.push(Transition::HandFinished { round })
                }
                (GameState::Finished | GameState::Waiting, GameState::Playing) => {
                    transitions.push(Transition::HandStarted { round })
                }
                (GameState::Finished, GameState::Waiting) => {
                    transitions.push(Transition::ReturnedToWaiting { round })
                }
                _ => {}
            }
        }

        self.last_round = Some(next.round);
        self.last_state = Some(next.state);
        transitions
    }
}

/// Side effects of a batch of transitions, deduplicated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransitionPlan {
    pub clear_hand_caches: bool,
    pub invalidate_signature: bool,
    pub refresh: bool,
    pub capture_showdown: Option<Round>,
    /// Drop a showdown capture older than this round.
    pub release_showdown_before: Option<Round>,
}

impl TransitionPlan {
    pub fn from_transitions(transitions: &[Transition]) -> Self {
        let mut plan = Self::default();
        for transition in transitions {
            match *transition {
                Transition::RoundAdvanced { .. } => {
                    plan.clear_hand_caches = true;
                    plan.invalidate_signature = true;
                    plan.refresh = true;
                }
                Transition::HandStarted { round } => {
                    plan.clear_hand_caches = true;
                    plan.invalidate_signature = true;
                    plan.refresh = true;
                    plan.release_showdown_before = Some(round);
                }
                Transition::HandFinished { round } => plan.capture_showdown = Some(round),
                Transition::ReturnedToWaiting { .. } => {}
            }
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the cache-clearing half of the plan. Meant to run inside the
    /// swap that publishes the snapshot the transitions came from.
    pub fn apply_to(&self, state: &mut TableState) {
        if self.clear_hand_caches {
            state.clear_hand_caches();
        }
        if let Some(round) = self.release_showdown_before {
            if state.showdown.as_ref().is_some_and(|cache| cache.round < round) {
                state.showdown = None;
            }
        }
    }
}

/// Freezes the finished hand into the showdown cache.
///
/// Reveals missing at the transition are fetched once after `grace`; failures
/// there are logged and the capture goes ahead with what is cached. The cache
/// is written once per round and never replaces a capture of a later round.
pub async fn capture_showdown(
    ledger: &dyn LedgerReader,
    store: &StateStore,
    table_id: TableId,
    round: Round,
    grace: Duration,
) -> bool {
    let at_transition = store.get();
    if at_transition.table_id != Some(table_id) {
        return false;
    }
    let mut revealed = at_transition.revealed_cards.clone();
    let community = at_transition.decrypted_community.clone();

    let missing = at_transition
        .players
        .iter()
        .filter(|(address, player)| !player.has_folded && !revealed.contains_key(*address))
        .count();
    if missing > 0 {
        debug!(target: LOG_TARGET, table_id, round, missing, "waiting for showdown reveals");
        tokio::time::sleep(grace).await;
        match ledger.revealed_cards(table_id).await {
            Ok(fetched) => {
                for (address, cards) in fetched {
                    revealed.entry(address).or_insert(cards);
                }
            }
            Err(err) => {
                warn!(target: LOG_TARGET, table_id, round, error = %err, "showdown reveal fetch failed");
            }
        }
    }

    let mut written = false;
    store.update_for_hand(table_id, round, |state| {
        if state.showdown.as_ref().is_some_and(|cache| cache.round >= round) {
            return;
        }
        state.showdown = Some(ShowdownCache {
            round,
            revealed_cards: revealed,
            community_cards: community,
            captured_at: Utc::now(),
        });
        written = true;
    });
    if written {
        info!(target: LOG_TARGET, table_id, round, "captured showdown");
    }
    written
}
