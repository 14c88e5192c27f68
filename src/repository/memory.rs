//! In-memory [`NewsRepository`] for tests and dry runs.
//!
//! Records live in a `BTreeMap` keyed by id, with an identity index beside
//! it, both behind one `std::sync::RwLock` so insert-if-absent is atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{in_range, sort_newest_first, InsertOutcome, NewsRepository, Result, SourceCount};
use crate::error::RepositoryError;
use crate::identity::IdentityKey;
use crate::models::{ComplianceNewsRecord, NewRecord, Source};

#[derive(Default)]
struct Tables {
    next_id: i64,
    records: BTreeMap<i64, ComplianceNewsRecord>,
    identities: HashMap<(Source, String), i64>,
}

/// Volatile repository; contents vanish with the process
#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records
    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored record, ordered by id
    pub fn all(&self) -> Vec<ComplianceNewsRecord> {
        self.tables
            .read()
            .map(|t| t.records.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned() -> RepositoryError {
    RepositoryError::Corrupt("memory repository lock poisoned".to_string())
}

#[async_trait]
impl NewsRepository for MemoryRepository {
    async fn find_by_identity(&self, key: &IdentityKey) -> Result<Option<ComplianceNewsRecord>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .identities
            .get(&(key.source(), key.fingerprint()))
            .and_then(|id| tables.records.get(id))
            .cloned())
    }

    async fn insert_if_absent(&self, key: &IdentityKey, record: NewRecord) -> Result<InsertOutcome> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let ident = (key.source(), key.fingerprint());

        if let Some(existing) = tables.identities.get(&ident).and_then(|id| tables.records.get(id)) {
            return Ok(InsertOutcome {
                inserted: false,
                record: existing.clone(),
            });
        }

        tables.next_id += 1;
        let id = tables.next_id;
        let stored = record.into_record(id, Utc::now());
        tables.records.insert(id, stored.clone());
        tables.identities.insert(ident, id);

        Ok(InsertOutcome {
            inserted: true,
            record: stored,
        })
    }

    async fn find_by_date_range(
        &self,
        source: Option<Source>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ComplianceNewsRecord>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut records: Vec<ComplianceNewsRecord> = tables
            .records
            .values()
            .filter(|r| in_range(r, source, &from, &to))
            .cloned()
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn count_by_source(&self) -> Result<Vec<SourceCount>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let mut counts: BTreeMap<Source, u64> = BTreeMap::new();
        for record in tables.records.values() {
            *counts.entry(record.source).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(source, count)| SourceCount { source, count })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing::{exercise_contract, new_record};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_contract() {
        let repo = MemoryRepository::new();
        exercise_contract(&repo).await;
        assert_eq!(repo.len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_keep_one_row() {
        let repo = Arc::new(MemoryRepository::new());
        let mut handles = Vec::new();

        for i in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let (key, record) = new_record(Source::Sfc, &format!("Writer {i}"), Some("https://sfc.hk/same"), None);
                repo.insert_if_absent(&key, record).await.unwrap().inserted
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(repo.len(), 1);
    }
}
