//! Bulk-import bookkeeping for the pharmacy record tables.
//!
//! [`ImportRun`] writes a batch of rows stamped with a fresh migration id,
//! [`MigrationRollbackLog`] records the outcome and can later delete the
//! batch again.

mod import;
mod rollback;

pub use import::{required_fields, ImportRun};
pub use rollback::{MigrationRollbackLog, RollbackReport};
