use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dragnet_client::{ClientConfig, HttpContinuationTrigger, HttpExtractorInvoker};
use dragnet_core::config::{RunConfig, RunRequest};
use dragnet_core::metrics::{RunSummary, StopReason};
use dragnet_core::store::WorkItemStore;
use dragnet_core::work_item::{NewWorkItem, WorkStatus};
use dragnet_core::{ExtractorRouter, Scheduler, SchedulerSettings, TracingSchedulerReporter};
use dragnet_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "dragnet", version, about = "Budget-aware listing queue processor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim and process queued listings until the queue drains or the budget runs out
    Run(RunArgs),

    /// Add listing URLs to the queue
    Enqueue {
        /// Listing URLs
        urls: Vec<String>,

        /// File with one URL per line ('#' starts a comment)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Higher priority items are claimed first
        #[arg(short, long, default_value_t = 0)]
        priority: i32,
    },

    /// Show item counts per status
    Stats,

    /// List the built-in sources and their extractors
    Sources,

    /// Apply database migrations
    Migrate,
}

#[derive(Args)]
struct RunArgs {
    /// Items claimed per source per round (1-50)
    #[arg(short, long)]
    batch_size: Option<u32>,

    /// Only process this source (see `dragnet sources`)
    #[arg(short, long)]
    source: Option<String>,

    /// Keep going round after round and chain a continuation if work remains
    #[arg(short, long, default_value_t = false)]
    continuous: bool,

    /// Wall-clock budget in seconds (1-130)
    #[arg(short = 't', long)]
    max_runtime: Option<u64>,

    /// Base URL of the extractor functions
    #[arg(long, env = "DRAGNET_FUNCTIONS_URL")]
    functions_url: Option<String>,

    /// Bearer key for extractor and processor calls
    #[arg(long, env = "DRAGNET_SERVICE_KEY", hide_env_values = true)]
    service_key: Option<String>,

    /// Endpoint that accepts continuation runs (continuations are off without it)
    #[arg(long, env = "DRAGNET_PROCESSOR_URL")]
    processor_url: Option<String>,

    /// Worker identity recorded on claimed items
    #[arg(short, long, env = "DRAGNET_WORKER_ID")]
    worker_id: Option<String>,

    /// Print the run summary as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl RunArgs {
    fn run_request(&self) -> RunRequest {
        RunRequest {
            batch_size: self.batch_size,
            source: self.source.clone(),
            continuous: Some(self.continuous),
            max_runtime_seconds: self.max_runtime,
            chain_depth: None,
        }
    }

    fn client_config(&self) -> Result<ClientConfig> {
        let config = ClientConfig::from_lookup(|key| match key {
            "DRAGNET_FUNCTIONS_URL" => self.functions_url.clone(),
            "DRAGNET_SERVICE_KEY" => self.service_key.clone(),
            "DRAGNET_PROCESSOR_URL" => self.processor_url.clone(),
            _ => None,
        })?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dragnet=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let db = connect_db().await?;
            cmd_run(&args, &db).await?;
        }
        Commands::Enqueue {
            urls,
            file,
            priority,
        } => {
            let mut urls = urls;
            if let Some(path) = file {
                urls.extend(read_url_file(&path)?);
            }
            if urls.is_empty() {
                anyhow::bail!("No URLs given. Pass them as arguments or with --file.");
            }
            let db = connect_db().await?;
            cmd_enqueue(&urls, priority, &db).await?;
        }
        Commands::Stats => {
            let db = connect_db().await?;
            cmd_stats(&db).await?;
        }
        Commands::Sources => cmd_sources(),
        Commands::Migrate => {
            let db = connect_db().await?;
            db.migrate().await?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    Ok(db)
}

async fn cmd_run(args: &RunArgs, db: &Database) -> Result<()> {
    let config = RunConfig::from_request(&args.run_request())?;

    let clients = args.client_config()?;
    let (functions_url, service_key) = clients.require_functions()?;
    let invoker = HttpExtractorInvoker::new(functions_url, service_key)?;
    let trigger = clients
        .processor_url
        .as_deref()
        .map(|url| HttpContinuationTrigger::new(url, service_key))
        .transpose()?;
    if config.continuous && trigger.is_none() {
        tracing::info!("No processor URL configured, the run will not chain");
    }

    let mut settings = SchedulerSettings::from_env()?;
    if let Some(worker_id) = &args.worker_id {
        settings = settings.with_worker_id(worker_id);
    }

    let scheduler = Scheduler::new(
        db.work_repo(),
        invoker,
        trigger,
        ExtractorRouter::with_default_sources(),
        settings,
    );
    let summary = scheduler.run(&config, &TracingSchedulerReporter).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if summary.stop_reason == StopReason::StoreUnavailable {
        anyhow::bail!("Run aborted: work store unavailable");
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Run {} stopped: {} after {:.1}s ({:.0} items/hour)",
        summary.worker_id, summary.stop_reason, summary.elapsed_seconds, summary.items_per_hour
    );
    println!(
        "  processed {}  succeeded {}  retried {}  failed {}  skipped {}",
        summary.total_processed,
        summary.succeeded,
        summary.retried,
        summary.failed,
        summary.skipped
    );
    for (source, stats) in &summary.per_source {
        if stats.processed + stats.skipped == 0 {
            continue;
        }
        println!(
            "  {:<16} {:>4} ok {:>4} retry {:>4} fail {:>4} skip",
            source, stats.succeeded, stats.retried, stats.failed, stats.skipped
        );
    }
    if summary.left_claimed > 0 || summary.lease_lost > 0 {
        println!(
            "  left claimed {}  leases lost {}",
            summary.left_claimed, summary.lease_lost
        );
    }
    if let Some(remaining) = summary.remaining_estimate {
        println!(
            "  remaining ~{} (continued: {})",
            remaining, summary.continued
        );
    }
    for sample in &summary.errors {
        println!("  ! [{}] {} - {}", sample.source, sample.url, sample.error);
    }
    if summary.errors_truncated > 0 {
        println!("  ! ... {} more errors", summary.errors_truncated);
    }
}

async fn cmd_enqueue(urls: &[String], priority: i32, db: &Database) -> Result<()> {
    let repo = db.work_repo();
    let router = ExtractorRouter::with_default_sources();
    let mut queued = 0usize;

    for url in urls {
        let item = match NewWorkItem::new(url.as_str()) {
            Ok(item) => item.with_priority(priority),
            Err(e) => {
                tracing::warn!(%url, error = %e, "Skipping invalid URL");
                continue;
            }
        };
        if router.resolve(url).is_none() {
            tracing::warn!(%url, "No source handles this URL; it will be failed when claimed");
        }
        let stored = repo.enqueue(item).await?;
        tracing::debug!(item_id = %stored.id, %url, status = %stored.status, "Enqueued");
        queued += 1;
    }

    println!("Queued {queued} of {} URLs.", urls.len());
    Ok(())
}

async fn cmd_stats(db: &Database) -> Result<()> {
    let repo = db.work_repo();
    let mut total = 0;
    for status in WorkStatus::ALL {
        let count = repo.count_by_status(status).await?;
        total += count;
        println!("{:<10} {count:>8}", status.to_string());
    }
    println!("{:<10} {total:>8}", "total");
    Ok(())
}

fn cmd_sources() {
    let router = ExtractorRouter::with_default_sources();
    for route in router.routes() {
        println!(
            "{:<16} {:<22} {:<30} {}-{}ms",
            route.name,
            route.pattern.as_str(),
            route.extractor,
            route.delay.min.as_millis(),
            route.delay.max.as_millis()
        );
    }
}

fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL file: {}", path.display()))?;
    Ok(parse_url_lines(&contents))
}

fn parse_url_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_become_a_run_request() {
        let cli = Cli::try_parse_from([
            "dragnet",
            "run",
            "--batch-size",
            "80",
            "--source",
            "bat",
            "--continuous",
            "-t",
            "500",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let request = args.run_request();
        assert_eq!(request.batch_size, Some(80));
        assert_eq!(request.continuous, Some(true));
        assert_eq!(request.chain_depth, None);

        // Out-of-range values are clamped, not rejected.
        let config = RunConfig::from_request(&request).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_runtime.as_secs(), 130);
    }

    #[test]
    fn url_file_skips_comments_and_blanks() {
        let urls = parse_url_lines(
            "# auctions\nhttps://bringatrailer.com/listing/a\n\n  https://mecum.com/lots/1  \n",
        );
        assert_eq!(
            urls,
            vec![
                "https://bringatrailer.com/listing/a".to_string(),
                "https://mecum.com/lots/1".to_string(),
            ]
        );
    }
}
