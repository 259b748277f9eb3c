use std::future::Future;

use rxm_types::{Fields, MigrationId, MigrationLogEntry, Record, RecordCategory, RxmError};

/// Row storage for the pharmacy record tables.
///
/// Methods use RPITIT (`-> impl Future + Send`) so generic callers can hold
/// the futures across `.await` points on a multi-threaded runtime.
pub trait RecordStore: Send + Sync + 'static {
    /// Insert a row into `category`, stamping it with `migration_id`.
    /// The store assigns the record id.
    fn insert(
        &self,
        category: RecordCategory,
        migration_id: Option<MigrationId>,
        fields: Fields,
    ) -> impl Future<Output = Result<Record, RxmError>> + Send;

    /// All rows of `category`, ordered by id.
    fn list(&self, category: RecordCategory)
        -> impl Future<Output = Result<Vec<Record>, RxmError>> + Send;

    /// Delete every row of `category` whose migration id equals `migration_id`
    /// in a single bulk operation. Returns the number of rows removed.
    fn delete_by_migration(
        &self,
        category: RecordCategory,
        migration_id: &MigrationId,
    ) -> impl Future<Output = Result<usize, RxmError>> + Send;
}

/// Append-only audit trail of migration batches.
pub trait MigrationLogStore: Send + Sync + 'static {
    /// Append an entry. Returns the sequence number assigned to it.
    /// Duplicate migration ids are accepted.
    fn append(&self, entry: MigrationLogEntry)
        -> impl Future<Output = Result<u64, RxmError>> + Send;

    /// Entries recorded under `migration_id`, in append order.
    fn entries_for(&self, migration_id: &MigrationId)
        -> impl Future<Output = Result<Vec<MigrationLogEntry>, RxmError>> + Send;

    /// Every entry in append order.
    fn all(&self) -> impl Future<Output = Result<Vec<MigrationLogEntry>, RxmError>> + Send;
}
