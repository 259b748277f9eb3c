use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type RecordId = u64;

/// Column values of a single pharmacy record, keyed by column name.
pub type Fields = BTreeMap<String, String>;

/// The record tables a migration batch can write into.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum RecordCategory {
    Inventory,
    Patients,
    Prescriptions,
}

impl RecordCategory {
    pub const ALL: [RecordCategory; 3] = [
        RecordCategory::Inventory,
        RecordCategory::Patients,
        RecordCategory::Prescriptions,
    ];

    /// Name of the backing table for this category.
    pub fn table_name(self) -> &'static str {
        match self {
            RecordCategory::Inventory => "inventory",
            RecordCategory::Patients => "patients",
            RecordCategory::Prescriptions => "prescriptions",
        }
    }
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for RecordCategory {
    type Err = RxmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inventory" => Ok(RecordCategory::Inventory),
            "patients" | "patient" => Ok(RecordCategory::Patients),
            "prescriptions" | "prescription" => Ok(RecordCategory::Prescriptions),
            other => Err(RxmError::InvalidArgument(format!("unknown record category '{other}'"))),
        }
    }
}

/// Opaque identifier stamped on every record created by one import run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct MigrationId(String);

impl MigrationId {
    /// Fresh UUID v4 id for a new import run.
    pub fn generate() -> Self {
        MigrationId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MigrationId {
    fn from(s: String) -> Self {
        MigrationId(s)
    }
}

impl From<&str> for MigrationId {
    fn from(s: &str) -> Self {
        MigrationId(s.to_string())
    }
}

/// A stored row in one of the record tables.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Record {
    pub id: RecordId,
    /// `None` for rows that were not created by an import.
    pub migration_id: Option<MigrationId>,
    pub fields: Fields,
}

/// A row an import skipped, with the reason. `row` is 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImportIssue {
    pub row: usize,
    pub reason: String,
}

/// Outcome of one migration batch for one category. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MigrationLogEntry {
    pub migration_id: MigrationId,
    pub category: RecordCategory,
    /// Unix milliseconds at which the entry was recorded.
    pub timestamp_ms: i64,
    pub added_count: usize,
    pub skipped_count: usize,
    pub issues: Vec<ImportIssue>,
}

/// Observable state of a migration batch within one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Active,
    RolledBack,
}

/// Flat error description carried by a failed [`OperationResult`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[error("{code}: {message}")]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorInfo { code: code.into(), message: message.into() }
    }
}

impl From<RxmError> for ErrorInfo {
    fn from(err: RxmError) -> Self {
        let code = match &err {
            RxmError::NotFound => "not_found".to_string(),
            RxmError::Storage(_) => "storage".to_string(),
            RxmError::InvalidArgument(_) => "invalid_argument".to_string(),
            RxmError::Validation { .. } => "validation".to_string(),
            RxmError::Remote { code, message } => {
                return ErrorInfo::new(code.clone(), message.clone());
            }
        };
        ErrorInfo { code, message: err.to_string() }
    }
}

/// Outcome of a remote data operation. Exactly one variant is populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult<T> {
    Success(T),
    Failure(ErrorInfo),
}

impl<T> OperationResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn success(self) -> Option<T> {
        match self {
            OperationResult::Success(data) => Some(data),
            OperationResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ErrorInfo> {
        match self {
            OperationResult::Success(_) => None,
            OperationResult::Failure(err) => Some(err),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        match self {
            OperationResult::Success(data) => OperationResult::Success(f(data)),
            OperationResult::Failure(err) => OperationResult::Failure(err),
        }
    }

    pub fn into_result(self) -> Result<T, ErrorInfo> {
        match self {
            OperationResult::Success(data) => Ok(data),
            OperationResult::Failure(err) => Err(err),
        }
    }
}

impl<T, E: Into<ErrorInfo>> From<Result<T, E>> for OperationResult<T> {
    fn from(res: Result<T, E>) -> Self {
        match res {
            Ok(data) => OperationResult::Success(data),
            Err(e) => OperationResult::Failure(e.into()),
        }
    }
}

/// The `{ data, error }` pair returned by the hosted backend's client calls.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemoteResponse<T> {
    pub data: Option<T>,
    pub error: Option<ErrorInfo>,
}

impl<T> From<RemoteResponse<T>> for OperationResult<T> {
    fn from(resp: RemoteResponse<T>) -> Self {
        match (resp.data, resp.error) {
            (_, Some(err)) => OperationResult::Failure(err),
            (Some(data), None) => OperationResult::Success(data),
            (None, None) => OperationResult::Failure(ErrorInfo::new(
                "empty_response",
                "response carried neither data nor error",
            )),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RxmError {
    #[error("record not found")]
    NotFound,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("row {row}: {reason}")]
    Validation { row: usize, reason: String },
    #[error("remote error {code}: {message}")]
    Remote { code: String, message: String },
}
