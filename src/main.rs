use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use compliance_news::config::DEFAULT_CONFIG_PATH;
use compliance_news::sources::http_client;
use compliance_news::{
    render_digest, ComplianceNewsRecord, Config, DateScope, HkexAdapter, HkmaAdapter, JsonRepository,
    NewsRepository, OpenAiCompatibleSummarizer, Orchestrator, PostgresRepository, QueryService, SecAdapter,
    SfcAdapter, Source, SourceRegistry, StorageBackend,
};

#[derive(Parser)]
#[command(name = "compliance-news")]
#[command(about = "Ingest, deduplicate and summarize Hong Kong regulatory news")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the YAML config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory for the JSON store (overrides storage.path)
    #[arg(long, global = true)]
    store_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a publisher's news and persist new articles
    Ingest {
        /// Publisher (SFC, HKMA, HKEX or SEC)
        #[arg(long)]
        source: Source,

        /// Single Hong Kong calendar day (defaults to today)
        #[arg(long, conflicts_with_all = ["from", "to"])]
        date: Option<NaiveDate>,

        /// First day of a range
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Last day of a range
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        /// Skip summarization
        #[arg(long)]
        no_llm: bool,

        /// Actor recorded as creation user
        #[arg(long)]
        user: Option<String>,
    },

    /// Records issued today (Hong Kong time)
    Today {
        #[arg(long)]
        source: Option<Source>,

        /// Print a Markdown digest instead of JSON
        #[arg(long)]
        digest: bool,
    },

    /// Records issued on a given day
    Date {
        date: NaiveDate,

        #[arg(long)]
        source: Option<Source>,

        #[arg(long)]
        digest: bool,
    },

    /// Records issued in the last N days
    LastDays {
        #[arg(long, default_value_t = 7)]
        days: u32,

        #[arg(long)]
        source: Option<Source>,

        /// Group records by source
        #[arg(long)]
        grouped: bool,

        #[arg(long)]
        digest: bool,
    },

    /// Record counts per source
    Stats,

    /// Run PostgreSQL migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("compliance_news=info".parse()?))
        .init();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!(error = %e, "Failed to load .env");
        }
    }

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(path) = cli.store_path {
        config.storage.path = path;
    }

    match config.storage.backend {
        StorageBackend::Json => {
            if matches!(cli.command, Commands::Migrate) {
                anyhow::bail!("migrate requires the postgres storage backend");
            }
            let repo = JsonRepository::new(&config.storage.path)
                .with_context(|| format!("Failed to open store at {}", config.storage.path.display()))?;
            run(cli.command, Arc::new(repo), &config).await
        }
        StorageBackend::Postgres => {
            let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
            let repo = PostgresRepository::new(&database_url, config.storage.max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;

            if matches!(cli.command, Commands::Migrate) {
                repo.migrate().await.context("Failed to run database migrations")?;
                println!("Migrations applied.");
                return Ok(());
            }
            run(cli.command, Arc::new(repo), &config).await
        }
    }
}

async fn run<R: NewsRepository + 'static>(command: Commands, repo: Arc<R>, config: &Config) -> Result<()> {
    let queries = QueryService::new(repo.clone());

    match command {
        Commands::Ingest {
            source,
            date,
            from,
            to,
            no_llm,
            user,
        } => {
            let scope = match (date, from, to) {
                (Some(d), _, _) => DateScope::day(d),
                (None, Some(f), Some(t)) => DateScope::range(f, t),
                _ => DateScope::today(),
            };
            let actor = user.unwrap_or_else(|| config.ingest.default_actor.clone());
            let llm_enabled = config.ingest.llm_enabled && !no_llm;
            run_ingest(repo, config, source, scope, llm_enabled, &actor).await?;
        }
        Commands::Today { source, digest } => {
            let records = queries.today(source).await?;
            print_records(&records, digest, "Today's compliance news")?;
        }
        Commands::Date { date, source, digest } => {
            let records = queries.on_date(date, source).await?;
            print_records(&records, digest, &format!("Compliance news for {date}"))?;
        }
        Commands::LastDays {
            days,
            source,
            grouped,
            digest,
        } => {
            if grouped {
                let to = chrono::Utc::now();
                let from = to - chrono::Duration::days(i64::from(days));
                let wanted = source.map(|s| vec![s]);
                let groups = queries.grouped_by_source(from, to, wanted.as_deref()).await?;
                if digest {
                    for (source, records) in &groups {
                        println!("{}", render_digest(records, &format!("{source}: last {days} days")));
                    }
                } else {
                    println!("{}", serde_json::to_string_pretty(&groups)?);
                }
            } else {
                let records = queries.last_days(days, source).await?;
                print_records(&records, digest, &format!("Compliance news, last {days} days"))?;
            }
        }
        Commands::Stats => {
            let stats = queries.statistics().await?;
            println!("Total records: {}", stats.total);
            for count in &stats.by_source {
                println!("  {:<5} {}", count.source.as_str(), count.count);
            }
        }
        Commands::Migrate => {
            anyhow::bail!("migrate requires the postgres storage backend");
        }
    }

    Ok(())
}

async fn run_ingest<R: NewsRepository + 'static>(
    repo: Arc<R>,
    config: &Config,
    source: Source,
    scope: DateScope,
    llm_enabled: bool,
    actor: &str,
) -> Result<()> {
    let client = http_client(&config.sources.user_agent, config.source_timeout())?;
    let sources = SourceRegistry::new()
        .with(Arc::new(
            SfcAdapter::new(client.clone())
                .with_base_url(&config.sources.sfc.base_url)
                .with_lang(&config.sources.sfc.lang)
                .with_page_size(config.sources.sfc.page_size),
        ))
        .with(Arc::new(
            HkmaAdapter::new(client.clone())
                .with_base_url(&config.sources.hkma.base_url)
                .with_lang(&config.sources.hkma.lang),
        ))
        .with(Arc::new(
            HkexAdapter::new(client.clone()).with_listing_url(&config.sources.hkex.listing_url),
        ))
        .with(Arc::new(SecAdapter::new(client).with_feed_url(&config.sources.sec.feed_url)));

    let mut orchestrator = Orchestrator::new(repo, sources)
        .with_retry_policy(config.retry_policy())
        .with_max_concurrency(config.ingest.max_concurrency)
        .with_max_input_chars(config.summarizer.max_input_chars)
        .with_max_summary_chars(config.summarizer.max_summary_chars);

    if llm_enabled {
        let api_key = std::env::var("OPENROUTER_API_KEY").context("OPENROUTER_API_KEY not set (use --no-llm to skip)")?;
        let mut summarizer = OpenAiCompatibleSummarizer::new(api_key)
            .with_base_url(&config.summarizer.base_url)
            .with_model(&config.summarizer.model);
        if let Some(prompt) = &config.summarizer.system_prompt {
            summarizer = summarizer.with_system_prompt(prompt);
        }
        orchestrator = orchestrator.with_summarizer(Arc::new(summarizer));
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing without further summaries");
            trigger.cancel();
        }
    });

    let result = orchestrator
        .ingest_with_cancel(source, scope, llm_enabled, actor, cancel)
        .await
        .with_context(|| format!("Ingestion of {source} for {scope} failed"))?;

    info!(
        persisted = result.persisted.len(),
        skipped = result.skipped,
        failures = result.failures.len(),
        "Ingestion finished"
    );

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

fn print_records(records: &[ComplianceNewsRecord], digest: bool, title: &str) -> Result<()> {
    if digest {
        println!("{}", render_digest(records, title));
    } else {
        println!("{}", serde_json::to_string_pretty(records)?);
    }
    Ok(())
}
