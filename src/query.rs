//! Date-scoped read access to stored compliance news.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::error::RepositoryError;
use crate::models::{ComplianceNewsRecord, DateScope, Source};
use crate::repository::{NewsRepository, SourceCount};

/// Record counts across the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total: u64,
    pub by_source: Vec<SourceCount>,
}

pub struct QueryService<R: NewsRepository> {
    repository: Arc<R>,
}

impl<R: NewsRepository> QueryService<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Records issued today, Hong Kong time
    pub async fn today(&self, source: Option<Source>) -> Result<Vec<ComplianceNewsRecord>, RepositoryError> {
        self.in_scope(DateScope::today(), source).await
    }

    /// Records issued on one Hong Kong calendar day
    pub async fn on_date(
        &self,
        date: NaiveDate,
        source: Option<Source>,
    ) -> Result<Vec<ComplianceNewsRecord>, RepositoryError> {
        self.in_scope(DateScope::day(date), source).await
    }

    /// Records issued in the trailing `days * 24h` window ending now
    pub async fn last_days(
        &self,
        days: u32,
        source: Option<Source>,
    ) -> Result<Vec<ComplianceNewsRecord>, RepositoryError> {
        let to = Utc::now();
        let from = to - Duration::days(i64::from(days));
        self.repository.find_by_date_range(source, from, to).await
    }

    pub async fn in_scope(
        &self,
        scope: DateScope,
        source: Option<Source>,
    ) -> Result<Vec<ComplianceNewsRecord>, RepositoryError> {
        let (from, to) = scope.bounds();
        self.repository.find_by_date_range(source, from, to).await
    }

    /// Records in `[from, to]` split per source.
    ///
    /// Every requested source gets an entry, empty or not. Order within each
    /// source is the repository's newest-first order.
    pub async fn grouped_by_source(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        sources: Option<&[Source]>,
    ) -> Result<BTreeMap<Source, Vec<ComplianceNewsRecord>>, RepositoryError> {
        let wanted = sources.unwrap_or(&Source::ALL);
        let mut grouped: BTreeMap<Source, Vec<ComplianceNewsRecord>> =
            wanted.iter().map(|s| (*s, Vec::new())).collect();

        for record in self.repository.find_by_date_range(None, from, to).await? {
            if let Some(bucket) = grouped.get_mut(&record.source) {
                bucket.push(record);
            }
        }

        Ok(grouped)
    }

    pub async fn statistics(&self) -> Result<Statistics, RepositoryError> {
        let by_source = self.repository.count_by_source().await?;
        Ok(Statistics {
            total: by_source.iter().map(|c| c.count).sum(),
            by_source,
        })
    }
}

/// Generate a markdown digest of records
pub fn render_digest(records: &[ComplianceNewsRecord], title: &str) -> String {
    let mut md = String::new();

    md.push_str(&format!("## {title}\n\n"));

    if records.is_empty() {
        md.push_str("No compliance news found.\n");
        return md;
    }

    let mut counts: BTreeMap<Source, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.source).or_default() += 1;
    }

    md.push_str("| Source | Count |\n|--------|-------|\n");
    for (source, count) in &counts {
        md.push_str(&format!("| {source} | {count} |\n"));
    }
    md.push_str(&format!("| **Total** | {} |\n\n", records.len()));

    md.push_str("### Articles\n\n");

    for record in records {
        let issued = record
            .issue_date
            .map(|d| crate::models::hk_day(&d).to_string())
            .unwrap_or_else(|| "undated".to_string());

        md.push_str(&format!("#### [{}] {}\n", record.source, record.title));
        md.push_str(&format!("**Issued:** {issued}"));
        if let Some(url) = &record.content_url {
            md.push_str(&format!(" | [Source]({url})"));
        }
        md.push_str("\n\n");

        match &record.llm_summary {
            Some(summary) => md.push_str(&format!("{summary}\n\n")),
            None => md.push_str("_No summary available._\n\n"),
        }

        md.push_str("---\n\n");
    }

    md
}
