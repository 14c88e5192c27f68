//! Ingestion pipeline: fetch, resolve identities, deduplicate, summarize and
//! persist.
//!
//! Identity resolution and the duplicate pre-check run sequentially. Each new
//! article then gets its own task. Summarization is bounded by a semaphore
//! and wrapped in the configured [`RetryPolicy`]. The repository's
//! insert-if-absent is the only arbiter of uniqueness, so two overlapping
//! runs can never store the same article twice.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::SummarizerGateway;
use crate::error::{IngestionError, RepositoryError, SummarizationError};
use crate::identity::{self, IdentityKey};
use crate::models::{
    truncate_chars, ArticleFailure, DateScope, FailureReason, IngestionResult, NewRecord, Source,
};
use crate::repository::{InsertOutcome, NewsRepository};
use crate::retry::RetryPolicy;
use crate::sources::SourceRegistry;

const CANCELLED: &str = "cancelled";
const EMPTY_CONTENT: &str = "empty content";

/// Coordinates source adapters, the summarizer and the repository
pub struct Orchestrator<R: NewsRepository + 'static> {
    repository: Arc<R>,
    sources: SourceRegistry,
    summarizer: Option<Arc<dyn SummarizerGateway>>,
    retry: RetryPolicy,
    max_concurrency: usize,
    max_input_chars: usize,
    max_summary_chars: Option<usize>,
}

impl<R: NewsRepository + 'static> Orchestrator<R> {
    pub fn new(repository: Arc<R>, sources: SourceRegistry) -> Self {
        Self {
            repository,
            sources,
            summarizer: None,
            retry: RetryPolicy::default(),
            max_concurrency: 3,
            max_input_chars: 12_000,
            max_summary_chars: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn SummarizerGateway>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Maximum summarizer calls in flight for one ingestion call
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Character budget for text sent to the summarizer
    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    pub fn with_max_summary_chars(mut self, max_summary_chars: Option<usize>) -> Self {
        self.max_summary_chars = max_summary_chars;
        self
    }

    /// Get the repository for direct access
    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Ingest one source's articles for a date scope
    pub async fn ingest(
        &self,
        source: Source,
        scope: DateScope,
        llm_enabled: bool,
        actor: &str,
    ) -> Result<IngestionResult, IngestionError> {
        self.ingest_with_cancel(source, scope, llm_enabled, actor, CancellationToken::new())
            .await
    }

    /// Like [`ingest`](Self::ingest), abandoning summarization once `cancel`
    /// fires. Articles still pending are persisted without a summary.
    #[instrument(skip(self, cancel), fields(source = %source, scope = %scope))]
    pub async fn ingest_with_cancel(
        &self,
        source: Source,
        scope: DateScope,
        llm_enabled: bool,
        actor: &str,
        cancel: CancellationToken,
    ) -> Result<IngestionResult, IngestionError> {
        let adapter = self
            .sources
            .get(source)
            .ok_or(IngestionError::UnknownSource(source))?;

        let mut result = IngestionResult::new(source, scope);
        info!(run_id = %result.run_id, llm_enabled, actor, "Starting ingestion");

        let articles = adapter
            .fetch(scope)
            .await
            .map_err(|error| IngestionError::Fetch { source_id: source, error })?;

        if articles.is_empty() {
            info!("No articles returned");
            result.cancelled = cancel.is_cancelled();
            return Ok(result);
        }

        info!(count = articles.len(), "Articles fetched");

        let summarizer = match (&self.summarizer, llm_enabled) {
            (Some(s), true) => Some(s.clone()),
            (None, true) => {
                warn!("Summarization requested but no summarizer is configured");
                None
            }
            _ => None,
        };

        let worker = ArticleWorker {
            repository: self.repository.clone(),
            summarizer,
            retry: self.retry,
            semaphore: Arc::new(Semaphore::new(self.max_concurrency)),
            max_input_chars: self.max_input_chars,
            max_summary_chars: self.max_summary_chars,
            cancel,
        };

        let mut seen: HashSet<IdentityKey> = HashSet::new();
        let mut tasks = JoinSet::new();

        for article in articles {
            let key = identity::resolve(&article, source);

            if article.title.trim().is_empty() {
                debug!(key = %key, "Rejecting article without title");
                result.failures.push(ArticleFailure {
                    key: key.to_string(),
                    reason: FailureReason::InvalidArticle,
                    detail: Some("blank title".to_string()),
                });
                continue;
            }

            if !seen.insert(key.clone()) {
                debug!(key = %key, "Duplicate within batch");
                result.skipped += 1;
                continue;
            }

            if self.repository.find_by_identity(&key).await?.is_some() {
                debug!(key = %key, "Already persisted");
                result.skipped += 1;
                continue;
            }

            let record = NewRecord::from_article(source, article, actor);
            tasks.spawn(worker.clone().process(key, record));
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    tasks.abort_all();
                    return Err(err.into());
                }
                Err(err) => {
                    tasks.abort_all();
                    return Err(IngestionError::Worker(err.to_string()));
                }
            };

            if outcome.stored.inserted {
                result.persisted.push(outcome.stored.record);
                result.failures.extend(outcome.failure);
            } else {
                // Another writer stored the same article first
                result.skipped += 1;
            }
        }

        result.persisted.sort_by_key(|r| r.id);
        result.cancelled = worker.cancel.is_cancelled();

        info!(
            run_id = %result.run_id,
            persisted = result.persisted.len(),
            skipped = result.skipped,
            failures = result.failures.len(),
            cancelled = result.cancelled,
            "Ingestion complete"
        );

        Ok(result)
    }
}

/// Per-call state shared by the article tasks
struct ArticleWorker<R: NewsRepository + 'static> {
    repository: Arc<R>,
    summarizer: Option<Arc<dyn SummarizerGateway>>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    max_input_chars: usize,
    max_summary_chars: Option<usize>,
    cancel: CancellationToken,
}

// Manual impl: `R` itself need not be Clone
impl<R: NewsRepository + 'static> Clone for ArticleWorker<R> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            summarizer: self.summarizer.clone(),
            retry: self.retry,
            semaphore: self.semaphore.clone(),
            max_input_chars: self.max_input_chars,
            max_summary_chars: self.max_summary_chars,
            cancel: self.cancel.clone(),
        }
    }
}

struct ArticleOutcome {
    stored: InsertOutcome,
    failure: Option<ArticleFailure>,
}

impl<R: NewsRepository + 'static> ArticleWorker<R> {
    async fn process(self, key: IdentityKey, record: NewRecord) -> Result<ArticleOutcome, RepositoryError> {
        let outcome = match &self.summarizer {
            // Nothing to send; recorded without a gateway call
            Some(_) if record.content.trim().is_empty() => Some(Err(EMPTY_CONTENT.to_string())),
            Some(summarizer) => Some(self.summarize(summarizer.clone(), &record.content).await),
            None => None,
        };

        let (summary, failure) = match outcome {
            Some(Ok(text)) => (Some(text), None),
            Some(Err(detail)) => {
                warn!(key = %key, detail = %detail, "Summarization failed, persisting without summary");
                let failure = ArticleFailure {
                    key: key.to_string(),
                    reason: FailureReason::SummarizationFailed,
                    detail: Some(detail),
                };
                (None, Some(failure))
            }
            None => (None, None),
        };

        let stored = self
            .repository
            .insert_if_absent(&key, record.with_summary(summary))
            .await?;

        if stored.inserted {
            debug!(key = %key, id = stored.record.id, "Record persisted");
        } else {
            debug!(key = %key, "Lost insert race");
        }

        Ok(ArticleOutcome { stored, failure })
    }

    /// Summary text, or a failure detail
    async fn summarize(&self, summarizer: Arc<dyn SummarizerGateway>, content: &str) -> Result<String, String> {
        if self.cancel.is_cancelled() {
            return Err(CANCELLED.to_string());
        }

        let input = truncate_chars(content, self.max_input_chars).to_string();
        let max_summary_chars = self.max_summary_chars;

        let call = async {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|_| SummarizationError::permanent("summarizer pool closed"))?;

            self.retry
                .run(|attempt| {
                    let summarizer = summarizer.clone();
                    let input = input.clone();
                    async move {
                        debug!(attempt, "Calling summarizer");
                        summarizer.summarize(&input, max_summary_chars).await
                    }
                })
                .await
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CANCELLED.to_string()),
            outcome = call => match outcome {
                Ok(summary) if !summary.text.trim().is_empty() => Ok(summary.text),
                Ok(_) => Err(SummarizationError::permanent("empty summary").to_string()),
                Err(err) => Err(err.to_string()),
            },
        }
    }
}
