pub mod json;
pub mod memory;
pub mod postgres;

pub use json::JsonRepository;
pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RepositoryError;
use crate::identity::IdentityKey;
use crate::models::{ComplianceNewsRecord, NewRecord, Source};

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Result of an insert-if-absent write
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    /// False when a record with the same identity already existed
    pub inserted: bool,
    /// The new record, or the one already stored under the key
    pub record: ComplianceNewsRecord,
}

/// Record count for one publisher
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SourceCount {
    pub source: Source,
    pub count: u64,
}

/// Durable keyed store for compliance news
#[async_trait]
pub trait NewsRepository: Send + Sync {
    /// Look up the record stored under an identity key
    async fn find_by_identity(&self, key: &IdentityKey) -> Result<Option<ComplianceNewsRecord>>;

    /// Insert unless a record with the same identity exists.
    ///
    /// Atomic with respect to the identity: concurrent callers never produce
    /// two rows for one key.
    async fn insert_if_absent(&self, key: &IdentityKey, record: NewRecord) -> Result<InsertOutcome>;

    /// Records with `from <= issue_date <= to`, newest issue date first.
    /// Records without an issue date never match.
    async fn find_by_date_range(
        &self,
        source: Option<Source>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ComplianceNewsRecord>>;

    /// Number of stored records per source, ordered by source
    async fn count_by_source(&self) -> Result<Vec<SourceCount>>;
}

/// Shared ordering for range results: issue date descending, then id descending
pub(crate) fn sort_newest_first(records: &mut [ComplianceNewsRecord]) {
    records.sort_by(|a, b| b.issue_date.cmp(&a.issue_date).then(b.id.cmp(&a.id)));
}

pub(crate) fn in_range(
    record: &ComplianceNewsRecord,
    source: Option<Source>,
    from: &DateTime<Utc>,
    to: &DateTime<Utc>,
) -> bool {
    if source.is_some_and(|s| s != record.source) {
        return false;
    }
    match &record.issue_date {
        Some(date) => date >= from && date <= to,
        None => false,
    }
}
