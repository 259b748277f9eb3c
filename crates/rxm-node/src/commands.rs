use std::path::Path;

use anyhow::{bail, Context};

use rxm_migration::{ImportRun, MigrationRollbackLog};
use rxm_retry::RetryableQueryExecutor;
use rxm_storage::fjall::{FjallMigrationLog, FjallRecordStore};
use rxm_storage::{MigrationLogStore, RecordStore};
use rxm_types::{BatchState, Fields, MigrationId, MigrationLogEntry, RecordCategory};

pub type NodeRollbackLog = MigrationRollbackLog<FjallRecordStore, FjallMigrationLog>;

/// Parse an import file: a JSON array of flat objects. Non-string scalars
/// are stored in their JSON text form; `null` columns are dropped.
pub fn parse_rows(json: &str) -> anyhow::Result<Vec<Fields>> {
    let raw: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_str(json).context("import file must be a JSON array of objects")?;
    Ok(raw
        .into_iter()
        .map(|obj| {
            obj.into_iter()
                .filter_map(|(k, v)| match v {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some((k, s)),
                    other => Some((k, other.to_string())),
                })
                .collect()
        })
        .collect())
}

/// Run one import of `rows` into `category` and return the logged entry.
///
/// On failure the error names the migration id: the rows may already be
/// stored even though no log entry points at them.
pub async fn import_rows<R: RecordStore, L: MigrationLogStore>(
    rollback_log: &MigrationRollbackLog<R, L>,
    executor: &RetryableQueryExecutor,
    category: RecordCategory,
    rows: Vec<Fields>,
) -> anyhow::Result<MigrationLogEntry> {
    let run = ImportRun::new(category);
    let migration_id = run.migration_id().clone();
    run.execute(rollback_log, executor, rows).await.into_result().with_context(|| {
        format!(
            "import {migration_id} could not be recorded; \
             roll back with `rollback {migration_id} --category {category}`"
        )
    })
}

pub async fn import(
    rollback_log: &NodeRollbackLog,
    executor: &RetryableQueryExecutor,
    category: RecordCategory,
    file: &Path,
) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let rows = parse_rows(&text)?;

    let entry = import_rows(rollback_log, executor, category, rows).await?;

    println!("migration {}", entry.migration_id);
    println!("added {} skipped {}", entry.added_count, entry.skipped_count);
    for issue in &entry.issues {
        println!("  row {}: {}", issue.row, issue.reason);
    }
    Ok(())
}

pub async fn rollback(
    rollback_log: &NodeRollbackLog,
    migration_id: MigrationId,
    category: Option<RecordCategory>,
) -> anyhow::Result<()> {
    match category {
        Some(category) => {
            if !rollback_log.rollback(&migration_id, category).await {
                bail!("rollback of {migration_id} in {category} failed");
            }
            println!("rolled back {migration_id} in {category}");
        }
        None => {
            let report = rollback_log
                .rollback_all(&migration_id)
                .await
                .into_result()
                .context("failed to read migration log")?;
            if report.outcomes.is_empty() {
                println!("no log entries for {migration_id}");
            }
            for (category, ok) in &report.outcomes {
                println!("{category}: {}", if *ok { "rolled back" } else { "FAILED" });
            }
            if !report.all_succeeded() {
                bail!("rollback of {migration_id} incomplete");
            }
        }
    }
    Ok(())
}

pub async fn history(
    rollback_log: &NodeRollbackLog,
    migration_id: Option<MigrationId>,
) -> anyhow::Result<()> {
    let entries = match migration_id {
        Some(id) => rollback_log.entries(&id).await,
        None => rollback_log.history().await,
    }
    .into_result()
    .context("failed to read migration log")?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

pub async fn list(rollback_log: &NodeRollbackLog, category: RecordCategory) -> anyhow::Result<()> {
    let records = rollback_log
        .records()
        .list(category)
        .await
        .with_context(|| format!("failed to list {category}"))?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

pub async fn status(
    rollback_log: &NodeRollbackLog,
    migration_id: MigrationId,
    category: RecordCategory,
) -> anyhow::Result<()> {
    let state = rollback_log
        .batch_state(&migration_id, category)
        .await
        .into_result()
        .context("failed to read batch state")?;
    let label = match state {
        Some(BatchState::Active) => "active",
        Some(BatchState::RolledBack) => "rolled back",
        None => "unknown",
    };
    println!("{migration_id} in {category}: {label}");
    Ok(())
}
