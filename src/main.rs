//! # Source Watcher CLI (`watcher`)
//!
//! The `watcher` binary drives the autopilot: database initialization,
//! policy inspection, consent ledger management, single-cycle runs, the
//! long-lived autopilot loop, similarity search over the local index, and
//! report generation.
//!
//! ## Usage
//!
//! ```bash
//! watcher --config ./watcher.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `watcher init` | Create the database, consent ledger, and a policy template |
//! | `watcher policy show` | Print the active policy document |
//! | `watcher policy check` | Evaluate the network gate right now |
//! | `watcher consent grant <domain>` | Record a signed consent grant |
//! | `watcher consent revoke <domain>` | Record a revocation |
//! | `watcher consent list` | List ledger entries |
//! | `watcher consent verify` | Re-check every ledger signature |
//! | `watcher run` | Run one Discover→Scrape→Verify→Ingest cycle |
//! | `watcher autopilot` | Run cycles on the policy's schedule until stopped |
//! | `watcher search "<query>"` | Similarity search over the vector index |
//! | `watcher report` | Re-render the weekly report artifacts |
//! | `watcher stats` | Index and run-state overview |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use source_watcher::config::{load_config, Config};
use source_watcher::consent::ConsentLedger;
use source_watcher::db;
use source_watcher::discover::{ScraperRouter, WebDiscovery};
use source_watcher::embedding;
use source_watcher::ingest::IngestPipeline;
use source_watcher::migrate;
use source_watcher::policy::PolicyStore;
use source_watcher::report::ReportGenerator;
use source_watcher::scheduler::{CycleOutcome, ProcProbe, RunState, Scheduler};
use source_watcher::scrape::{FetchCache, HttpScraper};
use source_watcher::store::VectorStore;
use source_watcher::verify::Verifier;

/// Source Watcher — a policy-gated autonomous web ingestion autopilot
/// with a local vector index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. The governance policy lives separately at
/// `<data_dir>/policy.toml` and is re-read at the start of every cycle.
#[derive(Parser)]
#[command(
    name = "watcher",
    about = "Source Watcher — a policy-gated autonomous web ingestion autopilot",
    version,
    long_about = "Source Watcher discovers candidate web sources, fetches them under strict \
    politeness and policy constraints, corroborates content across independent domains, chunks \
    and embeds the text, and stores it in a local vector index on a scheduled, budget-constrained, \
    network-windowed cadence."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./watcher.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory.
    ///
    /// Creates the SQLite database and schema, the signed consent ledger,
    /// and a policy template if none exists. Idempotent where possible;
    /// an existing ledger is never overwritten.
    Init,

    /// Inspect the governance policy.
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Manage the signed consent ledger.
    ///
    /// The ledger is append-only: grants and revocations are new signed
    /// records, never edits. A domain must hold a grant for the active
    /// policy version before the autopilot will fetch from it.
    Consent {
        #[command(subcommand)]
        action: ConsentAction,
    },

    /// Run one full autopilot cycle now.
    ///
    /// Honors the policy gate: outside a network window, or with the
    /// kill-switch present, the cycle ends immediately without fetching.
    Run,

    /// Run the autopilot loop until stopped.
    ///
    /// Sleeps until the next network window or the poll interval,
    /// whichever is sooner, and checks the kill-switch between cycles.
    Autopilot,

    /// Similarity search over the local vector index.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Re-render the weekly report artifacts from recorded history.
    Report,

    /// Index and run-state overview.
    Stats,
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Print the active policy file.
    Show,
    /// Evaluate the network gate for the current instant.
    Check,
}

#[derive(Subcommand)]
enum ConsentAction {
    /// Record a signed grant for a domain under the active policy version.
    Grant {
        /// Domain to authorize (e.g. `example.org`).
        domain: String,

        /// Scope of the grant: `web` or `git`.
        #[arg(long, default_value = "web")]
        scope: String,
    },
    /// Record a revocation for a domain. Shadows all earlier grants.
    Revoke {
        /// Domain to revoke.
        domain: String,
    },
    /// List all ledger entries in order.
    List,
    /// Re-check every ledger entry's HMAC signature.
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Policy { action } => run_policy(&config, action),
        Commands::Consent { action } => run_consent(&config, action).await,
        Commands::Run => run_once(&config).await,
        Commands::Autopilot => run_autopilot(&config).await,
        Commands::Search { query, limit } => run_search(&config, &query, limit).await,
        Commands::Report => run_report(&config),
        Commands::Stats => run_stats(&config).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;

    let ledger_path = config.ledger_path();
    if ledger_path.exists() {
        println!("consent ledger already present: {}", ledger_path.display());
    } else {
        ConsentLedger::init(&ledger_path)?;
        println!("consent ledger created: {}", ledger_path.display());
    }

    let policy_path = config.policy_path();
    if !policy_path.exists() {
        std::fs::write(&policy_path, POLICY_TEMPLATE)?;
        println!("policy template written: {}", policy_path.display());
        println!("edit it before enabling the autopilot");
    }

    println!("initialized");
    Ok(())
}

fn run_policy(config: &Config, action: PolicyAction) -> Result<()> {
    let store = PolicyStore::new(config.policy_path());
    match action {
        PolicyAction::Show => {
            print!("{}", std::fs::read_to_string(store.path())?);
        }
        PolicyAction::Check => {
            let policy = store.load()?;
            let now = Utc::now();
            println!("policy version:   {}", policy.version);
            println!("kill-switch:      {}", if policy.kill_switch_engaged() {
                "ENGAGED"
            } else {
                "absent"
            });
            println!(
                "network allowed:  {}",
                if policy.is_network_allowed(now) { "yes" } else { "no" }
            );
            println!("allowlist:        {} domain(s)", policy.allowlist_domains.len());
            for domain in &policy.allowlist_domains {
                println!("  - {}", domain);
            }
        }
    }
    Ok(())
}

async fn run_consent(config: &Config, action: ConsentAction) -> Result<()> {
    let ledger = ConsentLedger::open(&config.ledger_path())?;
    let policy_store = PolicyStore::new(config.policy_path());

    match action {
        ConsentAction::Grant { domain, scope } => {
            let policy = policy_store.load()?;
            let hash = policy_store.policy_hash()?;
            let record = ledger
                .record(&domain, &scope, &policy.version, &hash)
                .await?;
            println!(
                "granted {} scope={} policy_version={}",
                record.domain, record.scope, record.policy_version
            );
        }
        ConsentAction::Revoke { domain } => {
            let policy = policy_store.load()?;
            let hash = policy_store.policy_hash()?;
            let record = ledger.revoke(&domain, &policy.version, &hash).await?;
            println!("revoked {}", record.domain);
        }
        ConsentAction::List => {
            let entries = ledger.entries()?;
            println!(
                "{:<28} {:<10} {:<8} {}",
                "DOMAIN", "SCOPE", "POLICY", "TIMESTAMP"
            );
            for entry in entries {
                println!(
                    "{:<28} {:<10} {:<8} {}",
                    entry.domain,
                    entry.scope,
                    entry.policy_version,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        ConsentAction::Verify => {
            let checked = ledger.verify()?;
            println!("ok — {} entries verified", checked);
        }
    }
    Ok(())
}

async fn build_scheduler(config: &Config) -> Result<Scheduler> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let store = VectorStore::new(pool.clone());
    let cache = FetchCache::new(pool);
    let http = Arc::new(HttpScraper::new(config.scraper.clone(), cache)?);
    let scraper = Arc::new(ScraperRouter::new(
        http.clone(),
        config.scraper.code_host_api.clone(),
    ));
    let discovery = Arc::new(WebDiscovery::new(
        http,
        config.scraper.code_host_api.clone(),
    ));
    let pipeline = IngestPipeline::new(
        store,
        config.embedding.clone(),
        config.chunking.clone(),
    )?;

    Scheduler::new(
        config.scheduler.clone(),
        PolicyStore::new(config.policy_path()),
        Arc::new(ConsentLedger::open(&config.ledger_path())?),
        discovery,
        scraper,
        Verifier::new(config.verifier.clone()),
        pipeline,
        ReportGenerator::new(config.reports_dir()),
        Arc::new(ProcProbe::new()),
        config.run_state_path(),
    )
}

async fn run_once(config: &Config) -> Result<()> {
    let mut scheduler = build_scheduler(config).await?;
    match scheduler.run_cycle(Utc::now()).await? {
        CycleOutcome::Completed(summary) => {
            println!("cycle {}", summary.cycle);
            println!("  sources contacted: {}", summary.sources_contacted);
            println!("  fetched: {}", summary.fetched);
            println!("  not modified: {}", summary.not_modified);
            println!("  robots denied: {}", summary.robots_denied);
            println!("  blocked (consent): {}", summary.blocked_consent);
            println!("  rejected (license): {}", summary.rejected_license);
            println!(
                "  rejected (corroboration): {}",
                summary.rejected_corroboration
            );
            println!("  chunks ingested: {}", summary.chunks_ingested);
            println!("  deferred: {}", summary.deferred);
            println!("  bandwidth: {:.2} MB", summary.bandwidth_mb);
            println!("ok");
        }
        CycleOutcome::Offline(reason) => {
            println!("offline ({})", reason);
        }
    }
    Ok(())
}

async fn run_autopilot(config: &Config) -> Result<()> {
    let mut scheduler = build_scheduler(config).await?;
    println!("autopilot running — kill-switch and network windows apply");
    scheduler.run_forever().await
}

async fn run_search(config: &Config, query: &str, limit: usize) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let store = VectorStore::new(pool);

    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, query).await?;

    let hits = store.search(&query_vec, limit).await?;
    if hits.is_empty() {
        println!("no results");
        return Ok(());
    }
    for (rank, (chunk, score)) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({})",
            rank + 1,
            score,
            chunk.title,
            chunk.url
        );
        let snippet: String = chunk.text.chars().take(160).collect();
        println!("   {}", snippet);
    }
    Ok(())
}

fn run_report(config: &Config) -> Result<()> {
    let ledger = ConsentLedger::open(&config.ledger_path())?;
    let revoked = ledger.revocations_since(Utc::now() - chrono::Duration::days(7))?;
    let reports = ReportGenerator::new(config.reports_dir());
    let weekly = reports.refresh(&revoked, Utc::now())?;
    println!("weekly report — {} cycles in window", weekly.cycles);
    println!("  json: {}", reports.weekly_json_path().display());
    println!("  html: {}", reports.weekly_html_path().display());
    Ok(())
}

async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let store = VectorStore::new(pool.clone());

    let total_chunks = store.count().await?;
    let distinct_sources: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT url) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let cached_urls: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fetch_cache")
        .fetch_one(&pool)
        .await?;
    let db_size = std::fs::metadata(&config.db.path).map(|m| m.len()).unwrap_or(0);

    let state = RunState::load(&config.run_state_path())?;

    println!("Source Watcher — Stats");
    println!("======================");
    println!();
    println!("  Database:        {}", config.db.path.display());
    println!("  Size:            {}", format_bytes(db_size));
    println!("  Chunks:          {}", total_chunks);
    println!("  Source URLs:     {}", distinct_sources);
    println!("  Cached fetches:  {}", cached_urls);
    println!();
    println!("  Cycles done:     {}", state.cycles_completed);
    println!("  Phase:           {:?}", state.phase);
    println!(
        "  Last cycle:      {}",
        state
            .last_cycle_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Pending:         {}", state.pending_candidates.len());
    println!("  Bandwidth today: {:.2} MB", state.budget.bandwidth_mb());

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

const POLICY_TEMPLATE: &str = r#"# Source Watcher governance policy.
# Edit between runs; the autopilot re-reads this file every cycle.

version = "1"
offline_default = true
allowlist_domains = []
kill_switch_path = "~/.watcher/disable"

# Outbound network activity is only permitted inside these windows (UTC).
[[network_windows]]
days = ["mon-fri"]
start = "09:00"
end = "17:00"

[budgets]
cpu_percent_cap = 50.0
ram_mb_cap = 2048.0
bandwidth_mb_per_day = 100.0
"#;
