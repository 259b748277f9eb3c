use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rxm_storage::{MigrationLogStore, RecordStore};
use rxm_types::{
    BatchState, ImportIssue, MigrationId, MigrationLogEntry, OperationResult, RecordCategory,
};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Per-category outcome of [`MigrationRollbackLog::rollback_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub migration_id: MigrationId,
    pub outcomes: Vec<(RecordCategory, bool)>,
}

impl RollbackReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|(_, ok)| *ok)
    }
}

/// Undo and audit support for bulk imports.
///
/// Records created by an import carry its migration id; rolling back deletes
/// them from one category with a single bulk delete. The log entry written
/// for the batch is left untouched by a rollback.
pub struct MigrationRollbackLog<R, L> {
    records: Arc<R>,
    log: Arc<L>,
}

impl<R, L> Clone for MigrationRollbackLog<R, L> {
    fn clone(&self) -> Self {
        MigrationRollbackLog { records: self.records.clone(), log: self.log.clone() }
    }
}

impl<R: RecordStore, L: MigrationLogStore> MigrationRollbackLog<R, L> {
    pub fn new(records: Arc<R>, log: Arc<L>) -> Self {
        MigrationRollbackLog { records, log }
    }

    pub fn records(&self) -> &R {
        &self.records
    }

    /// Append one immutable log entry for a finished batch.
    pub async fn record_batch(
        &self,
        migration_id: &MigrationId,
        category: RecordCategory,
        added_count: usize,
        skipped_count: usize,
        issues: Vec<ImportIssue>,
    ) -> OperationResult<MigrationLogEntry> {
        let entry = MigrationLogEntry {
            migration_id: migration_id.clone(),
            category,
            timestamp_ms: now_ms(),
            added_count,
            skipped_count,
            issues,
        };
        match self.log.append(entry.clone()).await {
            Ok(seq) => {
                tracing::info!(
                    %migration_id,
                    %category,
                    seq,
                    added_count,
                    skipped_count,
                    issues = entry.issues.len(),
                    "migration batch recorded"
                );
                OperationResult::Success(entry)
            }
            Err(e) => {
                tracing::error!(%migration_id, %category, error = %e, "failed to record migration batch");
                OperationResult::Failure(e.into())
            }
        }
    }

    /// Delete every `category` record stamped with `migration_id`.
    ///
    /// Returns `false` if the delete failed; the error is logged, not
    /// returned. A delete that matched nothing still returns `true`.
    pub async fn rollback(&self, migration_id: &MigrationId, category: RecordCategory) -> bool {
        match self.records.delete_by_migration(category, migration_id).await {
            Ok(deleted) => {
                tracing::info!(%migration_id, %category, deleted, "migration rolled back");
                true
            }
            Err(e) => {
                tracing::error!(%migration_id, %category, error = %e, "migration rollback failed");
                false
            }
        }
    }

    /// Roll back every category the log has an entry for under `migration_id`.
    ///
    /// Categories are processed in log order and each one independently;
    /// a failure does not restore categories already deleted.
    pub async fn rollback_all(&self, migration_id: &MigrationId) -> OperationResult<RollbackReport> {
        let entries = match self.log.entries_for(migration_id).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(%migration_id, error = %e, "failed to read migration log");
                return OperationResult::Failure(e.into());
            }
        };

        let mut categories: Vec<RecordCategory> = Vec::new();
        for entry in &entries {
            if !categories.contains(&entry.category) {
                categories.push(entry.category);
            }
        }

        let mut outcomes = Vec::with_capacity(categories.len());
        for category in categories {
            outcomes.push((category, self.rollback(migration_id, category).await));
        }
        OperationResult::Success(RollbackReport { migration_id: migration_id.clone(), outcomes })
    }

    /// Log entries recorded under `migration_id`, oldest first.
    pub async fn entries(&self, migration_id: &MigrationId) -> OperationResult<Vec<MigrationLogEntry>> {
        self.log.entries_for(migration_id).await.into()
    }

    /// The whole log, oldest first.
    pub async fn history(&self) -> OperationResult<Vec<MigrationLogEntry>> {
        self.log.all().await.into()
    }

    /// `Active` while any `category` record carries the id. `RolledBack` once
    /// none do but a logged batch added rows; a batch that never added a row
    /// has nothing to roll back and reports `None`, like an unknown batch.
    pub async fn batch_state(
        &self,
        migration_id: &MigrationId,
        category: RecordCategory,
    ) -> OperationResult<Option<BatchState>> {
        let records = match self.records.list(category).await {
            Ok(records) => records,
            Err(e) => return OperationResult::Failure(e.into()),
        };
        if records.iter().any(|r| r.migration_id.as_ref() == Some(migration_id)) {
            return OperationResult::Success(Some(BatchState::Active));
        }
        match self.log.entries_for(migration_id).await {
            Ok(entries) => {
                let rolled_back =
                    entries.iter().any(|e| e.category == category && e.added_count > 0);
                OperationResult::Success(rolled_back.then_some(BatchState::RolledBack))
            }
            Err(e) => OperationResult::Failure(e.into()),
        }
    }
}
