pub mod adapters;
pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod repository;
pub mod retry;
pub mod sources;

pub use adapters::{OpenAiCompatibleSummarizer, Summary, SummarizerGateway};
pub use config::{Config, StorageBackend};
pub use error::{FetchError, IngestionError, RepositoryError, SummarizationError};
pub use identity::IdentityKey;
pub use models::*;
pub use orchestrator::Orchestrator;
pub use query::{render_digest, QueryService, Statistics};
pub use repository::{InsertOutcome, JsonRepository, MemoryRepository, NewsRepository, PostgresRepository, SourceCount};
pub use retry::RetryPolicy;
pub use sources::{HkexAdapter, HkmaAdapter, SecAdapter, SfcAdapter, SourceAdapter, SourceRegistry};
