use serde::{Deserialize, Serialize};

use crate::types::{Address, Chips, Round, Street, TableId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerAction {
    Fold,
    Check,
    Call,
    Raise { amount: Chips },
    AllIn,
}

/// Ledger notification, one variant per event kind. Each variant carries
/// exactly the fields its kind guarantees.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableEvent {
    TableCreated {
        table_id: TableId,
    },
    PlayerJoined {
        table_id: TableId,
        player: Address,
        seat: u8,
    },
    PlayerLeft {
        table_id: TableId,
        player: Address,
    },
    HandStarted {
        table_id: TableId,
        round: Round,
    },
    CardsDealt {
        table_id: TableId,
        round: Round,
    },
    ActionTaken {
        table_id: TableId,
        player: Address,
        action: PlayerAction,
    },
    StreetAdvanced {
        table_id: TableId,
        round: Round,
        street: Street,
    },
    CommunityCardsRevealed {
        table_id: TableId,
        round: Round,
        street: Street,
    },
    HandFinished {
        table_id: TableId,
        round: Round,
    },
    PlayerTimedOut {
        table_id: TableId,
        player: Address,
    },
    Heartbeat,
}

impl TableEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TableEvent::TableCreated { .. } => "table_created",
            TableEvent::PlayerJoined { .. } => "player_joined",
            TableEvent::PlayerLeft { .. } => "player_left",
            TableEvent::HandStarted { .. } => "hand_started",
            TableEvent::CardsDealt { .. } => "cards_dealt",
            TableEvent::ActionTaken { .. } => "action_taken",
            TableEvent::StreetAdvanced { .. } => "street_advanced",
            TableEvent::CommunityCardsRevealed { .. } => "community_cards_revealed",
            TableEvent::HandFinished { .. } => "hand_finished",
            TableEvent::PlayerTimedOut { .. } => "player_timed_out",
            TableEvent::Heartbeat => "heartbeat",
        }
    }

    pub fn table_id(&self) -> Option<TableId> {
        match self {
            TableEvent::TableCreated { table_id }
            | TableEvent::PlayerJoined { table_id, .. }
            | TableEvent::PlayerLeft { table_id, .. }
            | TableEvent::HandStarted { table_id, .. }
            | TableEvent::CardsDealt { table_id, .. }
            | TableEvent::ActionTaken { table_id, .. }
            | TableEvent::StreetAdvanced { table_id, .. }
            | TableEvent::CommunityCardsRevealed { table_id, .. }
            | TableEvent::HandFinished { table_id, .. }
            | TableEvent::PlayerTimedOut { table_id, .. } => Some(*table_id),
            TableEvent::Heartbeat => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_payloads() {
        let raw = r#"{"kind":"street_advanced","table_id":4,"round":9,"street":2}"#;
        let event: TableEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            TableEvent::StreetAdvanced {
                table_id: 4,
                round: 9,
                street: Street::Turn,
            }
        );
        assert_eq!(event.table_id(), Some(4));
        assert_eq!(event.kind(), "street_advanced");
    }

    #[test]
    fn heartbeat_has_no_table() {
        let event: TableEvent = serde_json::from_str(r#"{"kind":"heartbeat"}"#).unwrap();
        assert_eq!(event.table_id(), None);
    }

    #[test]
    fn rejects_missing_fields() {
        let raw = r#"{"kind":"hand_started","table_id":4}"#;
        assert!(serde_json::from_str::<TableEvent>(raw).is_err());
    }
}
