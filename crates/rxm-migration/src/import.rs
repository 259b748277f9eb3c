use rxm_retry::{RetryableQueryExecutor, Sleeper};
use rxm_storage::{MigrationLogStore, RecordStore};
use rxm_types::{
    Fields, ImportIssue, MigrationId, MigrationLogEntry, OperationResult, RecordCategory,
};

use crate::rollback::MigrationRollbackLog;

/// Columns a row must carry, non-blank, to be imported into `category`.
pub fn required_fields(category: RecordCategory) -> &'static [&'static str] {
    match category {
        RecordCategory::Inventory => &["name", "quantity"],
        RecordCategory::Patients => &["name"],
        RecordCategory::Prescriptions => &["patient_name", "medication"],
    }
}

fn validate(category: RecordCategory, row: &Fields) -> Result<(), String> {
    for field in required_fields(category) {
        if row.get(*field).map_or(true, |v| v.trim().is_empty()) {
            return Err(format!("missing {field}"));
        }
    }
    if category == RecordCategory::Inventory {
        let quantity = row.get("quantity").map(|v| v.trim()).unwrap_or_default();
        if quantity.parse::<u64>().is_err() {
            return Err(format!("quantity '{quantity}' is not a non-negative integer"));
        }
    }
    Ok(())
}

/// One bulk import into one category.
///
/// The run owns a freshly generated migration id; every row it writes is
/// stamped with that id so the whole batch can be rolled back later.
#[derive(Debug, Clone)]
pub struct ImportRun {
    migration_id: MigrationId,
    category: RecordCategory,
}

impl ImportRun {
    pub fn new(category: RecordCategory) -> Self {
        Self::with_id(MigrationId::generate(), category)
    }

    pub fn with_id(migration_id: MigrationId, category: RecordCategory) -> Self {
        ImportRun { migration_id, category }
    }

    pub fn migration_id(&self) -> &MigrationId {
        &self.migration_id
    }

    pub fn category(&self) -> RecordCategory {
        self.category
    }

    /// Validate and insert `rows`, then record the batch outcome.
    ///
    /// Invalid rows and rows whose insert still fails after retries are
    /// skipped and reported as issues (rows are 1-indexed). The returned
    /// entry is the one appended to the migration log.
    pub async fn execute<R, L, S>(
        self,
        rollback_log: &MigrationRollbackLog<R, L>,
        executor: &RetryableQueryExecutor<S>,
        rows: Vec<Fields>,
    ) -> OperationResult<MigrationLogEntry>
    where
        R: RecordStore,
        L: MigrationLogStore,
        S: Sleeper,
    {
        let ImportRun { migration_id, category } = self;
        tracing::info!(%migration_id, %category, rows = rows.len(), "import started");

        let mut added = 0usize;
        let mut issues = Vec::new();
        for (idx, fields) in rows.into_iter().enumerate() {
            let row = idx + 1;
            if let Err(reason) = validate(category, &fields) {
                tracing::debug!(%migration_id, row, %reason, "row skipped");
                issues.push(ImportIssue { row, reason });
                continue;
            }

            let records = rollback_log.records();
            let id = &migration_id;
            let inserted = executor
                .run_result(|| records.insert(category, Some(id.clone()), fields.clone()))
                .await;
            match inserted {
                OperationResult::Success(_) => added += 1,
                OperationResult::Failure(err) => {
                    issues.push(ImportIssue { row, reason: format!("insert failed: {err}") });
                }
            }
        }

        let skipped = issues.len();
        let outcome = rollback_log
            .record_batch(&migration_id, category, added, skipped, issues)
            .await;
        if outcome.is_success() {
            tracing::info!(%migration_id, %category, added, skipped, "import finished");
        }
        outcome
    }
}
