use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::warn;

use crate::types::{Round, TableId};

const LOG_TARGET: &str = "table_sync::storage";

pub const ACTIVE_TABLE_KEY: &str = "poker.activeTableId";
const LAST_ROUND_PREFIX: &str = "poker.lastRound.";

/// Local key/value storage that survives client restarts.
pub trait ClientStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub fn last_round_key(table_id: TableId) -> String {
    format!("{LAST_ROUND_PREFIX}{table_id}")
}

/// Reads the persisted active table. Unreadable values are logged and ignored.
pub fn load_active_table(storage: &dyn ClientStorage) -> Option<TableId> {
    load_number(storage, ACTIVE_TABLE_KEY)
}

pub fn persist_active_table(storage: &dyn ClientStorage, table_id: Option<TableId>) -> Result<()> {
    match table_id {
        Some(id) => storage.set(ACTIVE_TABLE_KEY, &id.to_string()),
        None => storage.remove(ACTIVE_TABLE_KEY),
    }
}

pub fn load_last_round(storage: &dyn ClientStorage, table_id: TableId) -> Option<Round> {
    load_number(storage, &last_round_key(table_id))
}

pub fn persist_last_round(
    storage: &dyn ClientStorage,
    table_id: TableId,
    round: Round,
) -> Result<()> {
    storage.set(&last_round_key(table_id), &round.to_string())
}

fn load_number(storage: &dyn ClientStorage, key: &str) -> Option<u64> {
    let raw = match storage.get(key) {
        Ok(raw) => raw?,
        Err(err) => {
            warn!(target: LOG_TARGET, key, error = %err, "failed to read client storage");
            return None;
        }
    };
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(target: LOG_TARGET, key, value = %raw, error = %err, "ignoring malformed stored value");
            None
        }
    }
}

/// JSON object on disk, rewritten on every change.
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let encoded = serde_json::to_string_pretty(entries).context("failed to encode storage")?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))
    }
}

impl ClientStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
