use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use rxm_types::{Fields, MigrationId, MigrationLogEntry, Record, RecordCategory, RecordId, RxmError};

use crate::traits::{MigrationLogStore, RecordStore};

// ---------------------------------------------------------------------------
// MemRecordStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemRecordsInner {
    tables: HashMap<RecordCategory, BTreeMap<RecordId, Record>>,
    next_id: HashMap<RecordCategory, RecordId>,
}

/// In-memory `RecordStore`, one `BTreeMap` per category.
///
/// Intended for unit tests; not persisted across restarts.
pub struct MemRecordStore {
    inner: Arc<RwLock<MemRecordsInner>>,
}

impl MemRecordStore {
    pub fn new() -> Self {
        MemRecordStore { inner: Arc::new(RwLock::new(MemRecordsInner::default())) }
    }
}

impl Default for MemRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemRecordStore {
    async fn insert(
        &self,
        category: RecordCategory,
        migration_id: Option<MigrationId>,
        fields: Fields,
    ) -> Result<Record, RxmError> {
        let mut g = self.inner.write().await;
        let next = g.next_id.entry(category).or_insert(1);
        let id = *next;
        *next += 1;
        let record = Record { id, migration_id, fields };
        g.tables.entry(category).or_default().insert(id, record.clone());
        Ok(record)
    }

    async fn list(&self, category: RecordCategory) -> Result<Vec<Record>, RxmError> {
        let g = self.inner.read().await;
        Ok(g.tables
            .get(&category)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_by_migration(
        &self,
        category: RecordCategory,
        migration_id: &MigrationId,
    ) -> Result<usize, RxmError> {
        let mut g = self.inner.write().await;
        let Some(table) = g.tables.get_mut(&category) else {
            return Ok(0);
        };
        let before = table.len();
        table.retain(|_, r| r.migration_id.as_ref() != Some(migration_id));
        Ok(before - table.len())
    }
}

// ---------------------------------------------------------------------------
// MemMigrationLog
// ---------------------------------------------------------------------------

/// In-memory `MigrationLogStore` backed by a `Vec`; the index is the sequence.
pub struct MemMigrationLog {
    entries: Arc<RwLock<Vec<MigrationLogEntry>>>,
}

impl MemMigrationLog {
    pub fn new() -> Self {
        MemMigrationLog { entries: Arc::new(RwLock::new(Vec::new())) }
    }
}

impl Default for MemMigrationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationLogStore for MemMigrationLog {
    async fn append(&self, entry: MigrationLogEntry) -> Result<u64, RxmError> {
        let mut g = self.entries.write().await;
        g.push(entry);
        Ok(g.len() as u64)
    }

    async fn entries_for(
        &self,
        migration_id: &MigrationId,
    ) -> Result<Vec<MigrationLogEntry>, RxmError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| &e.migration_id == migration_id)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<MigrationLogEntry>, RxmError> {
        Ok(self.entries.read().await.clone())
    }
}
