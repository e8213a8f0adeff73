use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::events::TableEvent;
use crate::storage::{persist_active_table, ClientStorage};
use crate::store::StateStore;
use crate::types::TableId;

const LOG_TARGET: &str = "table_sync::filter";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterDecision {
    /// Event concerns the active table.
    Accept(TableId),
    /// No table was active; the event's table was adopted and persisted.
    Adopted(TableId),
    Drop,
}

impl FilterDecision {
    pub fn table_id(self) -> Option<TableId> {
        match self {
            FilterDecision::Accept(id) | FilterDecision::Adopted(id) => Some(id),
            FilterDecision::Drop => None,
        }
    }
}

/// Discards events for tables the client is not looking at.
pub struct TableFilter {
    store: StateStore,
    storage: Arc<dyn ClientStorage>,
}

impl TableFilter {
    pub fn new(store: StateStore, storage: Arc<dyn ClientStorage>) -> Self {
        Self { store, storage }
    }

    pub fn accept(&self, event: &TableEvent) -> FilterDecision {
        let Some(event_table) = event.table_id() else {
            return FilterDecision::Drop;
        };

        match self.store.get().table_id {
            Some(active) if active == event_table => FilterDecision::Accept(active),
            Some(active) => {
                debug!(
                    target: LOG_TARGET,
                    active,
                    event_table,
                    kind = event.kind(),
                    "dropping event for another table"
                );
                FilterDecision::Drop
            }
            None => self.adopt(event_table),
        }
    }

    fn adopt(&self, table_id: TableId) -> FilterDecision {
        let mut adopted = false;
        self.store.update(|state| {
            if state.table_id.is_none() {
                state.table_id = Some(table_id);
                adopted = true;
            }
        });
        if !adopted {
            // Another writer selected a table in between; re-evaluate against it.
            return match self.store.get().table_id {
                Some(active) if active == table_id => FilterDecision::Accept(active),
                _ => FilterDecision::Drop,
            };
        }

        info!(target: LOG_TARGET, table_id, "adopted active table from event payload");
        if let Err(err) = persist_active_table(self.storage.as_ref(), Some(table_id)) {
            warn!(target: LOG_TARGET, table_id, error = %err, "failed to persist adopted table");
        }
        FilterDecision::Adopted(table_id)
    }
}
