use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{InsertOutcome, NewsRepository, Result, SourceCount};
use crate::error::RepositoryError;
use crate::identity::IdentityKey;
use crate::models::{ComplianceNewsRecord, NewRecord, Source};

const RECORD_COLUMNS: &str =
    "id, source, issue_date, title, content, content_url, llm_summary, creation_date, creation_user";

/// PostgreSQL-backed repository for production persistence
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Connect with the given connection string
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "Connected to PostgreSQL");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;

        info!("Database migrations complete");

        Ok(())
    }

    async fn select_by_identity(&self, key: &IdentityKey) -> Result<Option<ComplianceNewsRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM compliance_news WHERE source = $1 AND identity_key = $2"
        ))
        .bind(key.source().as_str())
        .bind(key.fingerprint())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }
}

#[async_trait]
impl NewsRepository for PostgresRepository {
    async fn find_by_identity(&self, key: &IdentityKey) -> Result<Option<ComplianceNewsRecord>> {
        self.select_by_identity(key).await
    }

    async fn insert_if_absent(&self, key: &IdentityKey, record: NewRecord) -> Result<InsertOutcome> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO compliance_news (
                source, identity_key, issue_date, title, content,
                content_url, llm_summary, creation_user
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source, identity_key) DO NOTHING
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(record.source.as_str())
        .bind(key.fingerprint())
        .bind(record.issue_date)
        .bind(&record.title)
        .bind(&record.content)
        .bind(&record.content_url)
        .bind(&record.llm_summary)
        .bind(&record.creation_user)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            let stored = record_from_row(&row)?;
            debug!(id = stored.id, key = %key, "Saved record to database");
            return Ok(InsertOutcome {
                inserted: true,
                record: stored,
            });
        }

        // Lost the race or already present; the conflicting row is committed
        let existing = self.select_by_identity(key).await?.ok_or_else(|| {
            RepositoryError::Corrupt(format!("conflict on {key} but no row found"))
        })?;

        Ok(InsertOutcome {
            inserted: false,
            record: existing,
        })
    }

    async fn find_by_date_range(
        &self,
        source: Option<Source>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ComplianceNewsRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM compliance_news
            WHERE issue_date IS NOT NULL
              AND issue_date >= $1 AND issue_date <= $2
              AND ($3::TEXT IS NULL OR source = $3)
            ORDER BY issue_date DESC, id DESC
            "#
        ))
        .bind(from)
        .bind(to)
        .bind(source.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn count_by_source(&self) -> Result<Vec<SourceCount>> {
        let rows = sqlx::query("SELECT source, COUNT(*) AS total FROM compliance_news GROUP BY source")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = rows
            .iter()
            .map(|row| source_count(row.try_get("source")?, row.try_get("total")?))
            .collect::<Result<Vec<_>>>()?;
        counts.sort_by_key(|c| c.source);

        Ok(counts)
    }
}

fn source_count(source: &str, total: i64) -> Result<SourceCount> {
    Ok(SourceCount {
        source: str_to_source(source)?,
        count: u64::try_from(total).map_err(|_| RepositoryError::Corrupt(format!("negative count for {source}: {total}")))?,
    })
}

fn record_from_row(row: &PgRow) -> Result<ComplianceNewsRecord> {
    Ok(ComplianceNewsRecord {
        id: row.try_get("id")?,
        source: str_to_source(row.try_get("source")?)?,
        issue_date: row.try_get("issue_date")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        content_url: row.try_get("content_url")?,
        llm_summary: row.try_get("llm_summary")?,
        creation_date: row.try_get("creation_date")?,
        creation_user: row.try_get("creation_user")?,
    })
}

fn str_to_source(s: &str) -> Result<Source> {
    s.parse()
        .map_err(|_| RepositoryError::Corrupt(format!("unknown source in database: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing::exercise_contract;

    #[test]
    fn test_stored_source_names_parse() {
        for source in Source::ALL {
            assert_eq!(str_to_source(source.as_str()).unwrap(), source);
        }
        assert!(matches!(str_to_source("FCA"), Err(RepositoryError::Corrupt(_))));
    }

    #[test]
    fn test_source_count_rejects_bad_rows() {
        assert_eq!(
            source_count("SFC", 3).unwrap(),
            SourceCount { source: Source::Sfc, count: 3 }
        );
        assert!(matches!(source_count("SFC", -1), Err(RepositoryError::Corrupt(_))));
        assert!(matches!(source_count("FCA", 1), Err(RepositoryError::Corrupt(_))));
    }

    /// Needs a live database; run with `DATABASE_URL=... cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_contract_against_postgres() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let repo = PostgresRepository::new(&url, 2).await.unwrap();
        repo.migrate().await.unwrap();
        sqlx::query("TRUNCATE compliance_news RESTART IDENTITY")
            .execute(&repo.pool)
            .await
            .unwrap();
        exercise_contract(&repo).await;
    }
}
