use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rxm_types::{Fields, MigrationId, MigrationLogEntry, Record, RecordCategory, RxmError};

use crate::keys::{log_key, meta_key, record_key};
use crate::traits::{MigrationLogStore, RecordStore};

const LOG_TABLE: &str = "migration_log";

fn encode<T: serde::Serialize>(val: &T) -> Result<Vec<u8>, RxmError> {
    bincode::serde::encode_to_vec(val, bincode::config::standard())
        .map_err(|e| RxmError::Storage(e.to_string()))
}

fn decode<T: for<'de> serde::Deserialize<'de>>(bytes: &[u8]) -> Result<T, RxmError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(v, _)| v)
        .map_err(|e| RxmError::Storage(e.to_string()))
}

fn fjall_err(e: fjall::Error) -> RxmError {
    RxmError::Storage(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> RxmError {
    RxmError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// FjallStore — shared handle wrapping all keyspaces
// ---------------------------------------------------------------------------

/// Shared storage handle.
///
/// All keyspaces live in a single fjall `Database` so a record write and its
/// id counter bump commit in one batch.
pub struct FjallStore {
    pub db: fjall::Database,
    /// `id(8)` → bincode(Record)
    pub inventory: fjall::Keyspace,
    pub patients: fjall::Keyspace,
    pub prescriptions: fjall::Keyspace,
    /// `seq(8)` → bincode(MigrationLogEntry)
    pub migration_log: fjall::Keyspace,
    /// Id and sequence counters: `table ++ \x00 ++ label` → bincode(u64)
    pub meta: fjall::Keyspace,
    /// Held while allocating an id or log sequence number, and across a
    /// bulk delete's scan and commit.
    alloc: Mutex<()>,
}

impl FjallStore {
    /// Open (or create) a `FjallStore` at `path`.
    pub fn open(path: &Path) -> Result<Arc<Self>, RxmError> {
        let db = fjall::Database::builder(path).open().map_err(fjall_err)?;
        let inventory =
            db.keyspace("inventory", fjall::KeyspaceCreateOptions::default).map_err(fjall_err)?;
        let patients =
            db.keyspace("patients", fjall::KeyspaceCreateOptions::default).map_err(fjall_err)?;
        let prescriptions = db
            .keyspace("prescriptions", fjall::KeyspaceCreateOptions::default)
            .map_err(fjall_err)?;
        let migration_log =
            db.keyspace(LOG_TABLE, fjall::KeyspaceCreateOptions::default).map_err(fjall_err)?;
        let meta =
            db.keyspace("meta", fjall::KeyspaceCreateOptions::default).map_err(fjall_err)?;
        tracing::debug!(path = %path.display(), "fjall store opened");
        Ok(Arc::new(FjallStore {
            db,
            inventory,
            patients,
            prescriptions,
            migration_log,
            meta,
            alloc: Mutex::new(()),
        }))
    }

    pub fn table(&self, category: RecordCategory) -> &fjall::Keyspace {
        match category {
            RecordCategory::Inventory => &self.inventory,
            RecordCategory::Patients => &self.patients,
            RecordCategory::Prescriptions => &self.prescriptions,
        }
    }

    fn lock_alloc(&self) -> Result<MutexGuard<'_, ()>, RxmError> {
        self.alloc
            .lock()
            .map_err(|_| RxmError::Storage("id allocator lock poisoned".into()))
    }

    /// Current value of a counter in `meta`; counters start at 1.
    fn read_counter(&self, key: &[u8]) -> Result<u64, RxmError> {
        match self.meta.get(key).map_err(fjall_err)? {
            Some(b) => decode::<u64>(&b),
            None => Ok(1),
        }
    }

    fn scan_all<T: for<'de> serde::Deserialize<'de>>(
        keyspace: &fjall::Keyspace,
    ) -> Result<Vec<T>, RxmError> {
        let start = record_key(0).to_vec();
        let end = record_key(u64::MAX).to_vec();
        keyspace
            .range(start..=end)
            .map(|g| g.into_inner().map_err(fjall_err).and_then(|(_, v)| decode::<T>(&v)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// FjallRecordStore
// ---------------------------------------------------------------------------

/// `RecordStore` backed by fjall.
///
/// All blocking I/O is wrapped in `tokio::task::spawn_blocking`.
pub struct FjallRecordStore(pub Arc<FjallStore>);

impl RecordStore for FjallRecordStore {
    async fn insert(
        &self,
        category: RecordCategory,
        migration_id: Option<MigrationId>,
        fields: Fields,
    ) -> Result<Record, RxmError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || -> Result<Record, RxmError> {
            let _guard = store.lock_alloc()?;
            let counter = meta_key(category.table_name(), "next_id");
            let id = store.read_counter(&counter)?;
            let record = Record { id, migration_id, fields };

            let mut batch = store.db.batch();
            batch.insert(store.table(category), record_key(id).to_vec(), encode(&record)?);
            batch.insert(&store.meta, counter, encode(&(id + 1))?);
            batch.commit().map_err(fjall_err)?;
            Ok(record)
        })
        .await
        .map_err(join_err)?
    }

    async fn list(&self, category: RecordCategory) -> Result<Vec<Record>, RxmError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || FjallStore::scan_all::<Record>(store.table(category)))
            .await
            .map_err(join_err)?
    }

    async fn delete_by_migration(
        &self,
        category: RecordCategory,
        migration_id: &MigrationId,
    ) -> Result<usize, RxmError> {
        let store = self.0.clone();
        let migration_id = migration_id.clone();
        tokio::task::spawn_blocking(move || -> Result<usize, RxmError> {
            // No insert may land between the scan and the commit.
            let _guard = store.lock_alloc()?;
            let table = store.table(category);
            let doomed: Vec<u64> = FjallStore::scan_all::<Record>(table)?
                .into_iter()
                .filter(|r| r.migration_id.as_ref() == Some(&migration_id))
                .map(|r| r.id)
                .collect();

            if !doomed.is_empty() {
                // One batch so the delete lands all-or-nothing.
                let mut batch = store.db.batch();
                for id in &doomed {
                    batch.remove(table, record_key(*id).to_vec());
                }
                batch.commit().map_err(fjall_err)?;
            }
            Ok(doomed.len())
        })
        .await
        .map_err(join_err)?
    }
}

// ---------------------------------------------------------------------------
// FjallMigrationLog
// ---------------------------------------------------------------------------

/// `MigrationLogStore` backed by the `migration_log` keyspace.
pub struct FjallMigrationLog(pub Arc<FjallStore>);

impl MigrationLogStore for FjallMigrationLog {
    async fn append(&self, entry: MigrationLogEntry) -> Result<u64, RxmError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || -> Result<u64, RxmError> {
            let _guard = store.lock_alloc()?;
            let counter = meta_key(LOG_TABLE, "next_seq");
            let seq = store.read_counter(&counter)?;

            let mut batch = store.db.batch();
            batch.insert(&store.migration_log, log_key(seq).to_vec(), encode(&entry)?);
            batch.insert(&store.meta, counter, encode(&(seq + 1))?);
            batch.commit().map_err(fjall_err)?;
            Ok(seq)
        })
        .await
        .map_err(join_err)?
    }

    async fn entries_for(
        &self,
        migration_id: &MigrationId,
    ) -> Result<Vec<MigrationLogEntry>, RxmError> {
        let migration_id = migration_id.clone();
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|e| e.migration_id == migration_id)
            .collect())
    }

    async fn all(&self) -> Result<Vec<MigrationLogEntry>, RxmError> {
        let store = self.0.clone();
        tokio::task::spawn_blocking(move || {
            FjallStore::scan_all::<MigrationLogEntry>(&store.migration_log)
        })
        .await
        .map_err(join_err)?
    }
}
