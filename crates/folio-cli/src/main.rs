use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use folio_client::{ParserChain, ReqwestFetcher};
use folio_core::{
    Engine, EngineConfig, JobId, JobOutcome, JobRecord, MemoryResultStore, Query, QueryResult,
    ScrapeRequest, Source,
};

type CliEngine = Engine<ReqwestFetcher, ParserChain, MemoryResultStore>;

#[derive(Parser)]
#[command(name = "folio", version, about = "Polite, resilient book metadata scraper")]
struct Cli {
    /// Number of concurrent workers
    #[arg(long, global = true, env = "FOLIO_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Per-job deadline in seconds
    #[arg(long, global = true, env = "FOLIO_JOB_TIMEOUT_SECS")]
    job_timeout: Option<u64>,

    /// Attempts per URL, including the first
    #[arg(long, global = true, env = "FOLIO_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Minimum parse confidence (0-1)
    #[arg(long, global = true, env = "FOLIO_PARSE_THRESHOLD")]
    threshold: Option<f64>,

    /// Allow fetching private/loopback addresses
    #[arg(long, global = true, default_value_t = false)]
    allow_private: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape one or more book pages
    Scrape {
        /// Book page URLs
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Scrape every URL listed in a file (one per line, `#` starts a comment)
    Batch {
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List supported sources with their rate limits and strategy order
    Sources,
}

#[derive(clap::Args)]
struct OutputArgs {
    /// Source of the URLs; `unknown` detects it from each host
    #[arg(short, long, default_value = "unknown")]
    source: Source,

    /// Scheduling priority (higher runs first)
    #[arg(short, long, default_value_t = ScrapeRequest::DEFAULT_PRIORITY)]
    priority: i32,

    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Print engine statistics to stderr when done
    #[arg(long, default_value_t = false)]
    stats: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("folio=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    match cli.command {
        Commands::Scrape { ref urls, ref output } => {
            cmd_scrape(urls.clone(), output, config, cli.allow_private).await?;
        }
        Commands::Batch {
            ref file,
            ref output,
        } => {
            let urls = read_url_file(file)?;
            cmd_scrape(urls, output, config, cli.allow_private).await?;
        }
        Commands::Sources => cmd_sources(&config),
    }

    Ok(())
}

/// Environment first, then explicit flags on top.
fn build_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env().context("Invalid FOLIO_* configuration")?;
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(secs) = cli.job_timeout {
        config.job_timeout = Duration::from_secs(secs);
    }
    if let Some(attempts) = cli.max_attempts {
        config.retry.max_attempts = attempts;
    }
    if let Some(threshold) = cli.threshold {
        config.parse_confidence_threshold = threshold;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL file: {}", path.display()))?;
    let urls: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if urls.is_empty() {
        anyhow::bail!("No URLs found in {}", path.display());
    }
    Ok(urls)
}

async fn cmd_scrape(
    urls: Vec<String>,
    output: &OutputArgs,
    config: EngineConfig,
    allow_private: bool,
) -> Result<()> {
    let mut fetcher = ReqwestFetcher::from_config(&config).context("Failed to create HTTP client")?;
    if allow_private {
        fetcher = fetcher.allow_private_urls();
    }

    let engine: CliEngine = Engine::new(config, fetcher, ParserChain::new(), MemoryResultStore::new())
        .context("Failed to create engine")?;
    engine.start().context("Failed to start workers")?;

    let request = ScrapeRequest::batch(urls, output.source).with_priority(output.priority);
    let ids = engine.submit(request).context("Request rejected")?;
    tracing::info!(jobs = ids.len(), "Scraping");

    tokio::select! {
        _ = engine.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, dropping queued jobs");
        }
    }
    let dropped = engine.shutdown().await.context("Shutdown failed")?;
    if dropped > 0 {
        tracing::warn!(dropped, "Jobs dropped before completion");
    }

    let records = collect_records(&engine, &ids).await?;
    match output.format {
        Format::Json => print_json(&records)?,
        Format::Csv => print_csv(&records)?,
    }

    if output.stats {
        let stats = engine.stats().await.context("Failed to read stats")?;
        eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    }

    let failed = records
        .iter()
        .filter(|r| !matches!(r.outcome, JobOutcome::Succeeded { .. }))
        .count();
    tracing::info!(
        succeeded = records.len() - failed,
        failed,
        "Done"
    );
    Ok(())
}

/// Terminal records in submission order.
async fn collect_records(engine: &CliEngine, ids: &[JobId]) -> Result<Vec<JobRecord>> {
    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        match engine.query(Query::Job(*id)).await? {
            QueryResult::Finished(record) => records.push(record),
            other => tracing::warn!(job_id = %id, result = ?other, "Job did not finish"),
        }
    }
    Ok(records)
}

fn print_json(records: &[JobRecord]) -> Result<()> {
    let rows: Vec<serde_json::Value> = records
        .iter()
        .map(|record| match &record.outcome {
            JobOutcome::Succeeded { record: book } => serde_json::json!({
                "url": record.job.url,
                "status": record.status(),
                "attempts": record.job.attempts,
                "latency_ms": record.latency_ms,
                "book": book,
            }),
            JobOutcome::Failed { kind, message } => serde_json::json!({
                "url": record.job.url,
                "status": record.status(),
                "attempts": record.job.attempts,
                "latency_ms": record.latency_ms,
                "error": { "kind": kind, "message": message },
            }),
            JobOutcome::Dropped { reason } => serde_json::json!({
                "url": record.job.url,
                "status": record.status(),
                "error": { "kind": "dropped", "message": reason },
            }),
        })
        .collect();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &rows)?;
    writeln!(out)?;
    Ok(())
}

fn print_csv(records: &[JobRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record([
        "url",
        "status",
        "title",
        "authors",
        "isbn",
        "rating",
        "page_count",
        "publication_date",
        "source",
        "strategy",
        "confidence",
        "error",
    ])?;

    for record in records {
        let status = record.status().to_string();
        let row = match &record.outcome {
            JobOutcome::Succeeded { record: book } => [
                record.job.url.clone(),
                status,
                book.title.clone(),
                book.authors.join("; "),
                book.isbn.clone().unwrap_or_default(),
                book.rating.map(|r| r.to_string()).unwrap_or_default(),
                book.page_count.map(|p| p.to_string()).unwrap_or_default(),
                book.publication_date
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                book.source.to_string(),
                book.strategy.to_string(),
                format!("{:.2}", book.confidence),
                String::new(),
            ],
            JobOutcome::Failed { message, .. } | JobOutcome::Dropped { reason: message } => [
                record.job.url.clone(),
                status,
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                record.job.source.to_string(),
                String::new(),
                String::new(),
                message.clone(),
            ],
        };
        writer.write_record(&row)?;
    }

    writer.flush().context("Failed to write CSV")?;
    Ok(())
}

fn cmd_sources(config: &EngineConfig) {
    println!("{:<14} {:>8} {:>6}  STRATEGIES", "SOURCE", "RATE/S", "BURST");
    for source in Source::ALL {
        let rate = config.rate_for(source);
        let strategies: Vec<&str> = source
            .profile()
            .strategies
            .iter()
            .map(|s| s.as_str())
            .collect();
        println!(
            "{:<14} {:>8.2} {:>6}  {}",
            source.as_str(),
            rate.refill_rate,
            rate.burst,
            strategies.join(" > ")
        );
    }
}
