use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{ProviderError, SyncResult};
use crate::providers::LedgerReader;
use crate::types::{DecryptedCommunityCards, Street, TableId};

const LOG_TARGET: &str = "table_sync::decryption::community";

/// Reads the board values the ledger has already opened for the current street.
pub struct CommunityCardReader {
    ledger: Arc<dyn LedgerReader>,
}

impl CommunityCardReader {
    pub fn new(ledger: Arc<dyn LedgerReader>) -> Self {
        Self { ledger }
    }

    /// Fails with `NotYetAvailable` while the board is behind `street` or
    /// mid-way through a group, so the caller's retry loop waits it out.
    pub async fn attempt(
        &self,
        table_id: TableId,
        street: Street,
    ) -> SyncResult<DecryptedCommunityCards> {
        let slots = self.ledger.community_plaintext(table_id).await?;
        let board = DecryptedCommunityCards::from_slots(slots).map_err(|err| {
            trace!(target: LOG_TARGET, table_id, error = %err, "board is mid-reveal");
            ProviderError::NotYetAvailable(format!("board not settled: {err}"))
        })?;

        let expected = street.board_cards();
        if board.revealed_count() < expected {
            return Err(ProviderError::NotYetAvailable(format!(
                "{} of {expected} board cards revealed",
                board.revealed_count()
            ))
            .into());
        }

        debug!(
            target: LOG_TARGET,
            table_id,
            revealed = board.revealed_count(),
            "board values read"
        );
        Ok(board)
    }
}
