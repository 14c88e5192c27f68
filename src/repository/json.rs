use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{in_range, sort_newest_first, InsertOutcome, NewsRepository, Result, SourceCount};
use crate::error::RepositoryError;
use crate::identity::IdentityKey;
use crate::models::{ComplianceNewsRecord, NewRecord, Source};

/// JSON file-based repository: one file per record plus an identity index.
///
/// Writers are serialized by an in-process mutex and by an exclusive lock on
/// `.lock` in the store directory, so separate processes (or separate
/// handles) sharing one directory never both insert the same identity.
pub struct JsonRepository {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordIndex {
    next_id: i64,
    records: Vec<RecordIndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordIndexEntry {
    id: i64,
    source: Source,
    identity_key: String,
    issue_date: Option<DateTime<Utc>>,
}

impl JsonRepository {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|e| RepositoryError::io(&base_path, e))?;

        info!(path = %base_path.display(), "Initialized JSON repository");

        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, id: i64) -> PathBuf {
        self.base_path.join(format!("{id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.base_path.join("index.json")
    }

    /// Blocks until this handle holds the store lock; dropping the file releases it
    fn lock_store(&self) -> Result<File> {
        let path = self.base_path.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| RepositoryError::io(&path, e))?;
        file.lock_exclusive().map_err(|e| RepositoryError::io(&path, e))?;
        Ok(file)
    }

    fn load_index(&self) -> Result<RecordIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(RecordIndex::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| RepositoryError::io(&path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save_index(&self, index: &RecordIndex) -> Result<()> {
        let path = self.index_path();
        let tmp = self.base_path.join("index.json.tmp");
        let content = serde_json::to_string_pretty(index)?;
        fs::write(&tmp, content).map_err(|e| RepositoryError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| RepositoryError::io(&path, e))?;
        Ok(())
    }

    fn load_record(&self, id: i64) -> Result<ComplianceNewsRecord> {
        let path = self.record_path(id);
        let content = fs::read_to_string(&path).map_err(|e| RepositoryError::io(&path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save_record(&self, record: &ComplianceNewsRecord) -> Result<()> {
        let path = self.record_path(record.id);
        let content = serde_json::to_string_pretty(record)?;
        fs::write(&path, content).map_err(|e| RepositoryError::io(&path, e))?;
        Ok(())
    }

    fn lookup(&self, index: &RecordIndex, key: &IdentityKey) -> Result<Option<ComplianceNewsRecord>> {
        let fingerprint = key.fingerprint();
        let entry = index
            .records
            .iter()
            .find(|e| e.source == key.source() && e.identity_key == fingerprint);

        match entry {
            Some(e) => self.load_record(e.id).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl NewsRepository for JsonRepository {
    async fn find_by_identity(&self, key: &IdentityKey) -> Result<Option<ComplianceNewsRecord>> {
        let index = self.load_index()?;
        self.lookup(&index, key)
    }

    async fn insert_if_absent(&self, key: &IdentityKey, record: NewRecord) -> Result<InsertOutcome> {
        let _guard = self.write_lock.lock().await;
        let _store_lock = self.lock_store()?;

        let mut index = self.load_index()?;
        if let Some(existing) = self.lookup(&index, key)? {
            debug!(id = existing.id, key = %key, "Record already stored");
            return Ok(InsertOutcome {
                inserted: false,
                record: existing,
            });
        }

        index.next_id += 1;
        let stored = record.into_record(index.next_id, Utc::now());

        // Record file first so the index never points at a missing file
        self.save_record(&stored)?;
        index.records.push(RecordIndexEntry {
            id: stored.id,
            source: stored.source,
            identity_key: key.fingerprint(),
            issue_date: stored.issue_date,
        });
        self.save_index(&index)?;

        debug!(id = stored.id, key = %key, "Saved record to repository");

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
        let index = self.load_index()?;

        let mut records = Vec::new();
        for entry in &index.records {
            let matches_source = source.map_or(true, |s| s == entry.source);
            let matches_date = entry
                .issue_date
                .is_some_and(|d| d >= from && d <= to);
            if matches_source && matches_date {
                let record = self.load_record(entry.id)?;
                if in_range(&record, source, &from, &to) {
                    records.push(record);
                }
            }
        }

        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn count_by_source(&self) -> Result<Vec<SourceCount>> {
        let index = self.load_index()?;
        let mut counts: std::collections::BTreeMap<Source, u64> = Default::default();
        for entry in &index.records {
            *counts.entry(entry.source).or_default() += 1;
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
    use crate::repository::testing::{day, exercise_contract, new_record};
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_contract() {
        let dir = tempdir().unwrap();
        let repo = JsonRepository::new(dir.path()).unwrap();
        exercise_contract(&repo).await;
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let (key, record) = new_record(Source::Hkma, "Press release", Some("https://hkma.gov.hk/p"), Some(day(2)));

        let id = {
            let repo = JsonRepository::new(dir.path()).unwrap();
            repo.insert_if_absent(&key, record.clone()).await.unwrap().record.id
        };

        let reopened = JsonRepository::new(dir.path()).unwrap();
        let found = reopened.find_by_identity(&key).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.creation_user, "test");

        let again = assert_ok!(reopened.insert_if_absent(&key, record).await);
        assert!(!again.inserted);

        let (other_key, other) = new_record(Source::Hkma, "Another", Some("https://hkma.gov.hk/q"), Some(day(2)));
        let next = reopened.insert_if_absent(&other_key, other).await.unwrap();
        assert_eq!(next.record.id, id + 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_keep_one_row() {
        let dir = tempdir().unwrap();
        let repo = Arc::new(JsonRepository::new(dir.path()).unwrap());
        let mut handles = Vec::new();

        for i in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let (key, record) = new_record(Source::Sfc, &format!("Copy {i}"), Some("https://sfc.hk/dup"), Some(day(5)));
                repo.insert_if_absent(&key, record).await.unwrap().inserted
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);

        let all = repo.find_by_date_range(None, day(1), day(31)).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_handles_on_one_store_keep_one_row_per_key() {
        for _ in 0..10 {
            let dir = tempdir().unwrap();
            let first = Arc::new(JsonRepository::new(dir.path()).unwrap());
            let second = Arc::new(JsonRepository::new(dir.path()).unwrap());
            let mut handles = Vec::new();

            for url in 0..4 {
                for repo in [first.clone(), second.clone()] {
                    handles.push(tokio::spawn(async move {
                        let link = format!("https://sfc.hk/notice/{url}");
                        let (key, record) =
                            new_record(Source::Sfc, &format!("Notice {url}"), Some(link.as_str()), Some(day(5)));
                        repo.insert_if_absent(&key, record).await.unwrap().inserted
                    }));
                }
            }

            let mut inserted = 0;
            for handle in handles {
                if handle.await.unwrap() {
                    inserted += 1;
                }
            }
            assert_eq!(inserted, 4);

            let reopened = JsonRepository::new(dir.path()).unwrap();
            let mut ids: Vec<i64> = reopened
                .find_by_date_range(None, day(1), day(31))
                .await
                .unwrap()
                .iter()
                .map(|r| r.id)
                .collect();
            ids.sort_unstable();
            assert_eq!(ids, vec![1, 2, 3, 4]);
        }
    }

    #[tokio::test]
    async fn test_corrupt_index_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.json"), "{ not json").unwrap();
        let repo = JsonRepository::new(dir.path()).unwrap();

        let (key, _) = new_record(Source::Sfc, "x", None, None);
        let err = assert_err!(repo.find_by_identity(&key).await);
        assert!(matches!(err, RepositoryError::Serialization(_)));
    }
}
