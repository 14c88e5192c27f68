use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds east of UTC for Hong Kong time (no daylight saving)
const HK_OFFSET_SECS: i32 = 8 * 3600;

/// Hong Kong fixed offset, the calendar publishers use for issue dates
pub fn hk_offset() -> FixedOffset {
    FixedOffset::east_opt(HK_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Current calendar day in Hong Kong
pub fn hk_today() -> NaiveDate {
    Utc::now().with_timezone(&hk_offset()).date_naive()
}

/// Calendar day of an instant, in Hong Kong time
pub fn hk_day(instant: &DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&hk_offset()).date_naive()
}

/// First instant of a Hong Kong calendar day, as UTC
pub fn hk_start_of_day(day: NaiveDate) -> DateTime<Utc> {
    let local = day.and_time(NaiveTime::MIN);
    hk_offset()
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

/// Last instant of a Hong Kong calendar day, as UTC
pub fn hk_end_of_day(day: NaiveDate) -> DateTime<Utc> {
    hk_start_of_day(day) + Duration::days(1) - Duration::microseconds(1)
}

/// Prefix of `s` holding at most `max` characters
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Regulatory publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    Hkma,
    Sfc,
    Hkex,
    Sec,
}

impl Source {
    pub const ALL: [Source; 4] = [Source::Hkma, Source::Sfc, Source::Hkex, Source::Sec];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Hkma => "HKMA",
            Source::Sfc => "SFC",
            Source::Hkex => "HKEX",
            Source::Sec => "SEC",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HKMA" => Ok(Source::Hkma),
            "SFC" => Ok(Source::Sfc),
            "HKEX" => Ok(Source::Hkex),
            "SEC" => Ok(Source::Sec),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// Article as returned by a source adapter, before identity resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArticle {
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub issue_date: Option<DateTime<Utc>>,
}

/// The persisted unit. Field names are the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceNewsRecord {
    pub id: i64,
    pub source: Source,
    pub issue_date: Option<DateTime<Utc>>,
    pub title: String,
    pub content: String,
    pub content_url: Option<String>,
    pub llm_summary: Option<String>,
    pub creation_date: DateTime<Utc>,
    pub creation_user: String,
}

/// A record before the store assigns `id` and `creation_date`
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub source: Source,
    pub issue_date: Option<DateTime<Utc>>,
    pub title: String,
    pub content: String,
    pub content_url: Option<String>,
    pub llm_summary: Option<String>,
    pub creation_user: String,
}

impl NewRecord {
    pub fn from_article(source: Source, article: RawArticle, actor: &str) -> Self {
        Self {
            source,
            issue_date: article.issue_date,
            title: article.title.trim().to_string(),
            content: article.body,
            content_url: article
                .url
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            llm_summary: None,
            creation_user: actor.to_string(),
        }
    }

    /// Attach a summary; blank summaries are treated as absent
    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.llm_summary = summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }

    pub fn into_record(self, id: i64, creation_date: DateTime<Utc>) -> ComplianceNewsRecord {
        ComplianceNewsRecord {
            id,
            source: self.source,
            issue_date: self.issue_date,
            title: self.title,
            content: self.content,
            content_url: self.content_url,
            llm_summary: self.llm_summary,
            creation_date,
            creation_user: self.creation_user,
        }
    }
}

/// Date scope of an ingestion call, in Hong Kong calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DateScope {
    Day { date: NaiveDate },
    Range { from: NaiveDate, to: NaiveDate },
}

impl DateScope {
    pub fn day(date: NaiveDate) -> Self {
        DateScope::Day { date }
    }

    /// Build a range scope, swapping the bounds if given in reverse
    pub fn range(from: NaiveDate, to: NaiveDate) -> Self {
        if from <= to {
            DateScope::Range { from, to }
        } else {
            DateScope::Range { from: to, to: from }
        }
    }

    pub fn today() -> Self {
        DateScope::day(hk_today())
    }

    pub fn first_day(&self) -> NaiveDate {
        match self {
            DateScope::Day { date } => *date,
            DateScope::Range { from, .. } => *from,
        }
    }

    pub fn last_day(&self) -> NaiveDate {
        match self {
            DateScope::Day { date } => *date,
            DateScope::Range { to, .. } => *to,
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.first_day() && day <= self.last_day()
    }

    /// Inclusive UTC bounds covering every instant of the scope's HK days
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (hk_start_of_day(self.first_day()), hk_end_of_day(self.last_day()))
    }
}

impl fmt::Display for DateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateScope::Day { date } => write!(f, "{date}"),
            DateScope::Range { from, to } => write!(f, "{from}..{to}"),
        }
    }
}

/// Why an article did not end up fully processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    SummarizationFailed,
    InvalidArticle,
}

/// A per-article failure; informational, never fatal to the call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleFailure {
    pub key: String,
    pub reason: FailureReason,
    pub detail: Option<String>,
}

/// Outcome of one ingestion call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionResult {
    pub run_id: Uuid,
    pub source: Source,
    pub scope: DateScope,
    pub persisted: Vec<ComplianceNewsRecord>,
    pub skipped: usize,
    pub failures: Vec<ArticleFailure>,
    pub cancelled: bool,
}

impl IngestionResult {
    pub fn new(source: Source, scope: DateScope) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source,
            scope,
            persisted: Vec::new(),
            skipped: 0,
            failures: Vec::new(),
            cancelled: false,
        }
    }

    /// Failures caused by the summarization step
    pub fn summarization_failures(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.reason == FailureReason::SummarizationFailed)
            .count()
    }
}
