//! End-to-end scheduler tests with scripted discovery and scraper doubles.
//!
//! No test touches the network: the scraper double serves canned bodies
//! and counts every call, which is how the network-gating assertions work.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Utc};

use source_watcher::config::{ChunkingConfig, EmbeddingConfig, SchedulerConfig, VerifierConfig};
use source_watcher::consent::ConsentLedger;
use source_watcher::db;
use source_watcher::discover::Discovery;
use source_watcher::ingest::{normalize_text, IngestPipeline};
use source_watcher::migrate;
use source_watcher::models::{CrawlCandidate, FetchResult, SourceKind};
use source_watcher::policy::{PolicyDocument, PolicyStore};
use source_watcher::report::ReportGenerator;
use source_watcher::scheduler::{
    CycleOutcome, Phase, ResourceUsage, RunState, Scheduler, StaticProbe,
};
use source_watcher::scrape::{sha256_hex, FetchOutcome, ScrapeError, Scraper};
use source_watcher::store::VectorStore;
use source_watcher::verify::Verifier;

/// Scripted discovery returning a fixed candidate list.
struct ScriptedDiscovery {
    candidates: Vec<CrawlCandidate>,
}

#[async_trait]
impl Discovery for ScriptedDiscovery {
    async fn discover(&self, _policy: &PolicyDocument) -> anyhow::Result<Vec<CrawlCandidate>> {
        Ok(self.candidates.clone())
    }
}

/// Scraper double: serves canned `(body, license, raw_len)` per URL and
/// counts every fetch call.
struct ScriptedScraper {
    responses: HashMap<String, (String, Option<String>, u64)>,
    calls: AtomicUsize,
}

impl ScriptedScraper {
    fn new(responses: Vec<(&str, &str, Option<&str>, u64)>) -> Self {
        let responses = responses
            .into_iter()
            .map(|(url, body, license, raw_len)| {
                (
                    url.to_string(),
                    (body.to_string(), license.map(|s| s.to_string()), raw_len),
                )
            })
            .collect();
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scraper for ScriptedScraper {
    async fn fetch(&self, candidate: &CrawlCandidate) -> Result<FetchOutcome, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some((body, license, raw_len)) = self.responses.get(&candidate.url) else {
            return Err(ScrapeError::Status {
                url: candidate.url.clone(),
                status: 404,
            });
        };
        let body = normalize_text(body);
        Ok(FetchOutcome::Fetched(FetchResult {
            url: candidate.url.clone(),
            status: 200,
            etag: None,
            last_modified: None,
            content_hash: sha256_hex(&body),
            body,
            raw_len: *raw_len,
            license: license.clone(),
            fetched_at: Utc::now(),
        }))
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    data_dir: PathBuf,
    store: VectorStore,
    ledger: Arc<ConsentLedger>,
}

impl Harness {
    async fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().to_path_buf();

        let pool = db::connect(&data_dir.join("index.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let store = VectorStore::new(pool);

        let ledger_path = data_dir.join("consent-ledger.jsonl");
        ConsentLedger::init(&ledger_path).unwrap();
        let ledger = Arc::new(ConsentLedger::open(&ledger_path).unwrap());

        Self {
            _tmp: tmp,
            data_dir,
            store,
            ledger,
        }
    }

    /// Write a policy whose single window covers (or excludes) this instant.
    fn write_policy(&self, open_now: bool, bandwidth_mb: f64, domains: &[&str]) -> PolicyStore {
        let now = Utc::now();
        let day = if open_now {
            now.weekday()
        } else {
            now.weekday().succ()
        };
        let day = format!("{:?}", day).to_lowercase();
        let allowlist = domains
            .iter()
            .map(|d| format!("\"{}\"", d))
            .collect::<Vec<_>>()
            .join(", ");
        let body = format!(
            r#"
version = "1"
offline_default = true
allowlist_domains = [{allowlist}]
kill_switch_path = "{kill}"

[[network_windows]]
days = ["{day}"]
start = "00:00"
end = "23:59"

[budgets]
cpu_percent_cap = 90.0
ram_mb_cap = 65536.0
bandwidth_mb_per_day = {bandwidth_mb}
"#,
            kill = self.kill_switch_path().display(),
        );
        let path = self.data_dir.join("policy.toml");
        std::fs::write(&path, body).unwrap();
        PolicyStore::new(path)
    }

    fn kill_switch_path(&self) -> PathBuf {
        self.data_dir.join("disable")
    }

    async fn grant(&self, policy_store: &PolicyStore, domain: &str) {
        let hash = policy_store.policy_hash().unwrap();
        self.ledger.record(domain, "web", "1", &hash).await.unwrap();
    }

    fn scheduler(
        &self,
        policy_store: PolicyStore,
        discovery: Arc<dyn Discovery>,
        scraper: Arc<dyn Scraper>,
    ) -> Scheduler {
        let pipeline = IngestPipeline::new(
            self.store.clone(),
            EmbeddingConfig::default(),
            ChunkingConfig {
                chunk_words: 16,
                overlap_words: 4,
            },
        )
        .unwrap();

        Scheduler::new(
            SchedulerConfig::default(),
            policy_store,
            self.ledger.clone(),
            discovery,
            scraper,
            Verifier::new(VerifierConfig::default()),
            pipeline,
            ReportGenerator::new(self.data_dir.join("reports")),
            Arc::new(StaticProbe(ResourceUsage::default())),
            self.data_dir.join("run-state.json"),
        )
        .unwrap()
    }
}

const SHARED_BODY: &str =
    "The reference manual explains the build system and the release process in detail.";

fn candidates(urls: &[&str]) -> Vec<CrawlCandidate> {
    urls.iter()
        .map(|u| CrawlCandidate::new(*u, SourceKind::Http))
        .collect()
}

#[tokio::test]
async fn happy_path_two_corroborating_domains() {
    let harness = Harness::new().await;
    let policy_store = harness.write_policy(true, 100.0, &["example.org", "mirror.example.net"]);
    harness.grant(&policy_store, "example.org").await;
    harness.grant(&policy_store, "mirror.example.net").await;

    let scraper = Arc::new(ScriptedScraper::new(vec![
        ("https://example.org/a", SHARED_BODY, Some("Apache-2.0"), 4096),
        ("https://mirror.example.net/a", SHARED_BODY, None, 4096),
    ]));
    let discovery = Arc::new(ScriptedDiscovery {
        candidates: candidates(&["https://example.org/a", "https://mirror.example.net/a"]),
    });

    let mut scheduler = harness.scheduler(policy_store, discovery, scraper.clone());
    let outcome = scheduler.run_cycle(Utc::now()).await.unwrap();

    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected completed cycle, got {:?}", outcome);
    };
    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.documents_verified, 1);
    assert!(summary.chunks_ingested >= 1);
    assert_eq!(scraper.call_count(), 2);

    // Stored chunks carry the verified metadata.
    let hits = harness.store.search(&[0.0; 256], 10).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].0.license, "Apache-2.0");
    assert!(hits[0].0.score > 0.5);
}

#[tokio::test]
async fn license_rejection_stores_nothing() {
    let harness = Harness::new().await;
    let policy_store = harness.write_policy(true, 100.0, &["example.org", "mirror.example.net"]);
    harness.grant(&policy_store, "example.org").await;
    harness.grant(&policy_store, "mirror.example.net").await;

    let scraper = Arc::new(ScriptedScraper::new(vec![
        ("https://example.org/a", SHARED_BODY, Some("proprietary"), 1024),
        ("https://mirror.example.net/a", SHARED_BODY, Some("proprietary"), 1024),
    ]));
    let discovery = Arc::new(ScriptedDiscovery {
        candidates: candidates(&["https://example.org/a", "https://mirror.example.net/a"]),
    });

    let mut scheduler = harness.scheduler(policy_store, discovery, scraper);
    let outcome = scheduler.run_cycle(Utc::now()).await.unwrap();

    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected completed cycle");
    };
    assert_eq!(summary.rejected_license, 1);
    assert_eq!(summary.chunks_ingested, 0);
    assert_eq!(harness.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn single_source_rejected_by_corroboration() {
    let harness = Harness::new().await;
    let policy_store = harness.write_policy(true, 100.0, &["example.org"]);
    harness.grant(&policy_store, "example.org").await;

    let scraper = Arc::new(ScriptedScraper::new(vec![(
        "https://example.org/a",
        SHARED_BODY,
        Some("MIT"),
        1024,
    )]));
    let discovery = Arc::new(ScriptedDiscovery {
        candidates: candidates(&["https://example.org/a"]),
    });

    let mut scheduler = harness.scheduler(policy_store, discovery, scraper);
    let CycleOutcome::Completed(summary) = scheduler.run_cycle(Utc::now()).await.unwrap() else {
        panic!("expected completed cycle");
    };
    assert_eq!(summary.rejected_corroboration, 1);
    assert_eq!(harness.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn closed_window_never_invokes_scraper() {
    let harness = Harness::new().await;
    let policy_store = harness.write_policy(false, 100.0, &["example.org"]);
    harness.grant(&policy_store, "example.org").await;

    let scraper = Arc::new(ScriptedScraper::new(vec![(
        "https://example.org/a",
        SHARED_BODY,
        Some("MIT"),
        1024,
    )]));
    let discovery = Arc::new(ScriptedDiscovery {
        candidates: candidates(&["https://example.org/a"]),
    });

    let mut scheduler = harness.scheduler(policy_store, discovery, scraper.clone());
    let outcome = scheduler.run_cycle(Utc::now()).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Offline("outside network window"));
    assert_eq!(scraper.call_count(), 0);
}

#[tokio::test]
async fn kill_switch_never_invokes_scraper() {
    let harness = Harness::new().await;
    let policy_store = harness.write_policy(true, 100.0, &["example.org"]);
    harness.grant(&policy_store, "example.org").await;
    std::fs::write(harness.kill_switch_path(), "").unwrap();

    let scraper = Arc::new(ScriptedScraper::new(vec![(
        "https://example.org/a",
        SHARED_BODY,
        Some("MIT"),
        1024,
    )]));
    let discovery = Arc::new(ScriptedDiscovery {
        candidates: candidates(&["https://example.org/a"]),
    });

    let mut scheduler = harness.scheduler(policy_store, discovery, scraper.clone());
    let outcome = scheduler.run_cycle(Utc::now()).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Offline("kill-switch"));
    assert_eq!(scraper.call_count(), 0);
}

#[tokio::test]
async fn bandwidth_budget_defers_remaining_candidates() {
    let harness = Harness::new().await;
    // 2 MB cap; each fetch charges 1 MB.
    let policy_store = harness.write_policy(true, 2.0, &["example.org"]);
    harness.grant(&policy_store, "example.org").await;

    let mb = 1024 * 1024;
    let scraper = Arc::new(ScriptedScraper::new(vec![
        ("https://example.org/1", "body one", Some("MIT"), mb),
        ("https://example.org/2", "body two", Some("MIT"), mb),
        ("https://example.org/3", "body three", Some("MIT"), mb),
        ("https://example.org/4", "body four", Some("MIT"), mb),
    ]));
    let discovery = Arc::new(ScriptedDiscovery {
        candidates: candidates(&[
            "https://example.org/1",
            "https://example.org/2",
            "https://example.org/3",
            "https://example.org/4",
        ]),
    });

    let mut scheduler = harness.scheduler(policy_store, discovery, scraper.clone());
    let CycleOutcome::Completed(summary) = scheduler.run_cycle(Utc::now()).await.unwrap() else {
        panic!("expected completed cycle");
    };

    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.deferred, 2);
    assert_eq!(scraper.call_count(), 2);
    assert_eq!(scheduler.state().pending_candidates.len(), 2);
}

#[tokio::test]
async fn crash_recovery_resumes_verifying_without_refetch() {
    let harness = Harness::new().await;
    let policy_store = harness.write_policy(true, 100.0, &["example.org", "mirror.example.net"]);

    // Simulate a crash after Scraping: fetched results persisted, phase
    // recorded as Verifying.
    let body = normalize_text(SHARED_BODY);
    let hash = sha256_hex(&body);
    let mut state = RunState::default();
    state.cycle = 7;
    state.phase = Phase::Verifying;
    for url in ["https://example.org/a", "https://mirror.example.net/a"] {
        state.fetched.push(FetchResult {
            url: url.to_string(),
            status: 200,
            etag: None,
            last_modified: None,
            body: body.clone(),
            raw_len: 1024,
            content_hash: hash.clone(),
            license: Some("Apache-2.0".to_string()),
            fetched_at: Utc::now(),
        });
    }
    state.save(&harness.data_dir.join("run-state.json")).unwrap();

    let scraper = Arc::new(ScriptedScraper::new(vec![]));
    let discovery = Arc::new(ScriptedDiscovery { candidates: vec![] });

    let mut scheduler = harness.scheduler(policy_store, discovery, scraper.clone());
    let CycleOutcome::Completed(summary) = scheduler.run_cycle(Utc::now()).await.unwrap() else {
        panic!("expected completed cycle");
    };

    // Verification proceeded from persisted results; nothing re-fetched.
    assert_eq!(scraper.call_count(), 0);
    assert_eq!(summary.documents_verified, 1);
    assert!(harness.store.count().await.unwrap() >= 1);
    assert_eq!(scheduler.state().phase, Phase::Idle);
    assert_eq!(scheduler.state().cycles_completed, 1);
}

#[tokio::test]
async fn repeated_cycles_are_idempotent() {
    let harness = Harness::new().await;
    let policy_store = harness.write_policy(true, 100.0, &["example.org", "mirror.example.net"]);
    harness.grant(&policy_store, "example.org").await;
    harness.grant(&policy_store, "mirror.example.net").await;

    let scraper = Arc::new(ScriptedScraper::new(vec![
        ("https://example.org/a", SHARED_BODY, Some("Apache-2.0"), 4096),
        ("https://mirror.example.net/a", SHARED_BODY, None, 4096),
    ]));
    let urls = ["https://example.org/a", "https://mirror.example.net/a"];

    let mut scheduler = harness.scheduler(
        policy_store,
        Arc::new(ScriptedDiscovery {
            candidates: candidates(&urls),
        }),
        scraper,
    );

    scheduler.run_cycle(Utc::now()).await.unwrap();
    let count_after_first = harness.store.count().await.unwrap();
    assert!(count_after_first >= 1);

    // Second cycle re-fetches the same content; the duplicate hash is
    // dropped before verification and the row count stays put.
    let CycleOutcome::Completed(summary) = scheduler.run_cycle(Utc::now()).await.unwrap() else {
        panic!("expected completed cycle");
    };
    assert_eq!(summary.duplicate_content, 2);
    assert_eq!(summary.chunks_ingested, 0);
    assert_eq!(harness.store.count().await.unwrap(), count_after_first);
}

#[tokio::test]
async fn unauthorized_domain_is_blocked_before_fetch() {
    let harness = Harness::new().await;
    // Allowlisted but never granted in the consent ledger.
    let policy_store = harness.write_policy(true, 100.0, &["example.org"]);

    let scraper = Arc::new(ScriptedScraper::new(vec![(
        "https://example.org/a",
        SHARED_BODY,
        Some("MIT"),
        1024,
    )]));
    let discovery = Arc::new(ScriptedDiscovery {
        candidates: candidates(&["https://example.org/a"]),
    });

    let mut scheduler = harness.scheduler(policy_store, discovery, scraper.clone());
    let CycleOutcome::Completed(summary) = scheduler.run_cycle(Utc::now()).await.unwrap() else {
        panic!("expected completed cycle");
    };

    assert_eq!(summary.blocked_consent, 1);
    assert_eq!(scraper.call_count(), 0);
}

#[tokio::test]
async fn weekly_report_written_after_cycle() {
    let harness = Harness::new().await;
    let policy_store = harness.write_policy(true, 100.0, &["example.org", "mirror.example.net"]);
    harness.grant(&policy_store, "example.org").await;
    harness.grant(&policy_store, "mirror.example.net").await;

    let scraper = Arc::new(ScriptedScraper::new(vec![
        ("https://example.org/a", SHARED_BODY, Some("Apache-2.0"), 4096),
        ("https://mirror.example.net/a", SHARED_BODY, None, 4096),
    ]));
    let discovery = Arc::new(ScriptedDiscovery {
        candidates: candidates(&["https://example.org/a", "https://mirror.example.net/a"]),
    });

    let mut scheduler = harness.scheduler(policy_store, discovery, scraper);
    scheduler.run_cycle(Utc::now()).await.unwrap();

    let reports_dir = harness.data_dir.join("reports");
    assert!(reports_dir.join("weekly.json").exists());
    let html = std::fs::read_to_string(reports_dir.join("weekly.html")).unwrap();
    assert!(html.contains("https://example.org/a"));
}
