//! Autopilot scheduler: the single long-lived control loop.
//!
//! Drives Discover → Scrape → Verify → Ingest → Reindex → Report cycles,
//! gated by the policy's network windows, the kill-switch file, and the
//! resource budgets. The run state is an explicit serializable struct,
//! persisted after every phase transition, so a crashed process resumes
//! from the last completed phase instead of restarting the cycle — fetch
//! results pending verification survive a restart and are never re-fetched.
//!
//! Within the scraping phase, domains are fetched by a bounded worker pool
//! with one in-flight request per domain, preserving per-domain throttling
//! and conditional-request ordering. The kill-switch is cooperative:
//! checked between units of work, never aborting an in-flight fetch.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::SchedulerConfig;
use crate::consent::ConsentLedger;
use crate::discover::Discovery;
use crate::ingest::{IngestError, IngestPipeline};
use crate::models::{CrawlCandidate, FetchResult, SourceKind, VerifiedDocument};
use crate::policy::{PolicyDocument, PolicyStore};
use crate::report::{CycleSummary, ReportGenerator};
use crate::scrape::{FetchOutcome, Scraper};
use crate::verify::Verifier;

/// Phase of the per-cycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Discovering,
    Scraping,
    Verifying,
    Ingesting,
    Reindexing,
    Reporting,
}

/// Snapshot of host resource usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub ram_mb: f64,
}

/// Source of [`ResourceUsage`] snapshots; injectable so tests can force
/// budget verdicts.
pub trait ResourceProbe: Send + Sync {
    fn snapshot(&self) -> ResourceUsage;
}

/// Probe reading `/proc/self` on Linux; reports zeros elsewhere.
pub struct ProcProbe {
    last_cpu: std::sync::Mutex<Option<(std::time::Instant, u64)>>,
}

impl ProcProbe {
    pub fn new() -> Self {
        Self {
            last_cpu: std::sync::Mutex::new(None),
        }
    }
}

impl Default for ProcProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for ProcProbe {
    fn snapshot(&self) -> ResourceUsage {
        let ram_mb = read_rss_mb().unwrap_or(0.0);
        let cpu_percent = match read_cpu_ticks() {
            Some(ticks) => {
                let mut last = self.last_cpu.lock().expect("probe lock");
                let now = std::time::Instant::now();
                let percent = match *last {
                    Some((prev_at, prev_ticks)) => {
                        let elapsed = now.duration_since(prev_at).as_secs_f64();
                        if elapsed > 0.0 {
                            // Linux USER_HZ is 100 on every mainstream kernel.
                            let used = ticks.saturating_sub(prev_ticks) as f64 / 100.0;
                            (used / elapsed * 100.0).min(100.0)
                        } else {
                            0.0
                        }
                    }
                    None => 0.0,
                };
                *last = Some((now, ticks));
                percent
            }
            None => 0.0,
        };
        ResourceUsage {
            cpu_percent,
            ram_mb,
        }
    }
}

#[cfg(target_os = "linux")]
fn read_cpu_ticks() -> Option<u64> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    // Skip past the parenthesised comm field, which may contain spaces.
    let rest = stat.rsplit_once(')').map(|(_, r)| r)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_ticks() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn read_rss_mb() -> Option<f64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: f64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(rss_pages * 4096.0 / (1024.0 * 1024.0))
}

#[cfg(not(target_os = "linux"))]
fn read_rss_mb() -> Option<f64> {
    None
}

/// Fixed probe for tests and constrained platforms.
pub struct StaticProbe(pub ResourceUsage);

impl ResourceProbe for StaticProbe {
    fn snapshot(&self) -> ResourceUsage {
        self.0
    }
}

/// Resource consumption charged against the policy budgets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetLedger {
    pub bandwidth_bytes: u64,
    pub day: Option<chrono::NaiveDate>,
}

impl BudgetLedger {
    /// Bandwidth resets at UTC midnight (the cap is per day).
    pub fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.bandwidth_bytes = 0;
        }
    }

    pub fn bandwidth_mb(&self) -> f64 {
        self.bandwidth_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Persisted scheduler state. Saved after every phase transition; owning
/// the whole cycle's in-flight data makes crash recovery a pure reload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default)]
    pub phase: Phase,
    pub cycle: u64,
    pub cycles_completed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub budget: BudgetLedger,
    pub pending_candidates: VecDeque<CrawlCandidate>,
    /// Fetched this cycle, awaiting verification.
    pub fetched: Vec<FetchResult>,
    /// Verified this cycle, awaiting ingestion.
    pub verified: Vec<VerifiedDocument>,
    pub counters: CycleSummary,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Idle
    }
}

impl RunState {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading run state {}", path.display()))?;
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("writing run state {}", path.display()))?;
        Ok(())
    }
}

/// Why a cycle ended without doing network work.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(Box<CycleSummary>),
    /// Network gate was closed at the scraping boundary.
    Offline(&'static str),
}

pub struct Scheduler {
    config: SchedulerConfig,
    policy_store: PolicyStore,
    ledger: Arc<ConsentLedger>,
    discovery: Arc<dyn Discovery>,
    scraper: Arc<dyn Scraper>,
    verifier: Verifier,
    pipeline: IngestPipeline,
    reports: ReportGenerator,
    probe: Arc<dyn ResourceProbe>,
    state_path: PathBuf,
    state: RunState,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        policy_store: PolicyStore,
        ledger: Arc<ConsentLedger>,
        discovery: Arc<dyn Discovery>,
        scraper: Arc<dyn Scraper>,
        verifier: Verifier,
        pipeline: IngestPipeline,
        reports: ReportGenerator,
        probe: Arc<dyn ResourceProbe>,
        state_path: PathBuf,
    ) -> Result<Self> {
        let state = RunState::load(&state_path)?;
        Ok(Self {
            config,
            policy_store,
            ledger,
            discovery,
            scraper,
            verifier,
            pipeline,
            reports,
            probe,
            state_path,
            state,
        })
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    fn transition(&mut self, phase: Phase) -> Result<()> {
        tracing::info!(
            cycle = self.state.cycle,
            from = ?self.state.phase,
            to = ?phase,
            "phase transition"
        );
        self.state.phase = phase;
        self.state.save(&self.state_path)
    }

    /// Run one cycle (or resume the one a crash interrupted).
    ///
    /// Per-candidate and per-document failures never abort the cycle; only
    /// a malformed policy or a failed rollback propagate as errors.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let policy = self.policy_store.load()?;
        self.state.budget.roll_day(now);

        if self.state.phase == Phase::Idle {
            self.state.cycle += 1;
            self.state.counters = CycleSummary {
                cycle: self.state.cycle,
                started_at: Some(now),
                ..Default::default()
            };
            self.transition(Phase::Discovering)?;
        }

        loop {
            match self.state.phase {
                Phase::Idle => unreachable!("idle handled above"),
                Phase::Discovering => {
                    if policy.is_network_allowed(now) {
                        self.discover(&policy).await?;
                    }
                    self.transition(Phase::Scraping)?;
                }
                Phase::Scraping => {
                    if !policy.is_network_allowed(now) {
                        let reason = if policy.kill_switch_engaged() {
                            "kill-switch"
                        } else {
                            "outside network window"
                        };
                        tracing::warn!(reason, "network gate closed, cycle skipped");
                        self.transition(Phase::Idle)?;
                        return Ok(CycleOutcome::Offline(reason));
                    }
                    self.scrape(&policy).await?;
                    self.transition(Phase::Verifying)?;
                }
                Phase::Verifying => {
                    self.verify().await?;
                    self.transition(Phase::Ingesting)?;
                }
                Phase::Ingesting => {
                    self.ingest(&policy).await?;
                    self.transition(Phase::Reindexing)?;
                }
                Phase::Reindexing => {
                    let dropped = self
                        .pipeline
                        .store()
                        .reindex(self.config.retention_limit)
                        .await?;
                    if dropped > 0 {
                        tracing::info!(dropped, "pruned vector store");
                    }
                    self.transition(Phase::Reporting)?;
                }
                Phase::Reporting => {
                    let finished = Utc::now();
                    self.state.counters.finished_at = Some(finished);
                    self.state.counters.bandwidth_mb = self.state.budget.bandwidth_mb();
                    let revoked = self
                        .ledger
                        .revocations_since(finished - ChronoDuration::days(7))?;
                    self.reports
                        .record(&self.state.counters, &revoked, finished)?;
                    self.state.cycles_completed += 1;
                    self.state.last_cycle_at = Some(finished);
                    let summary = self.state.counters.clone();
                    self.transition(Phase::Idle)?;
                    return Ok(CycleOutcome::Completed(Box::new(summary)));
                }
            }
        }
    }

    async fn discover(&mut self, policy: &PolicyDocument) -> Result<()> {
        let discovered = match self.discovery.discover(policy).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "discovery failed, continuing with pending queue");
                Vec::new()
            }
        };

        let mut seen: HashSet<String> = self
            .state
            .pending_candidates
            .iter()
            .map(|c| c.url.clone())
            .collect();
        for candidate in discovered {
            if seen.insert(candidate.url.clone()) {
                self.state.pending_candidates.push_back(candidate);
            }
        }
        tracing::info!(
            queued = self.state.pending_candidates.len(),
            "discovery complete"
        );
        Ok(())
    }

    /// Fan fetches out over domains; one worker per domain preserves the
    /// per-domain throttle and conditional-request ordering.
    async fn scrape(&mut self, policy: &PolicyDocument) -> Result<()> {
        let candidates: Vec<CrawlCandidate> = self.state.pending_candidates.drain(..).collect();

        // Consent is consumed before every fetch: unauthorized candidates
        // never reach a scraper.
        let mut by_domain: BTreeMap<String, VecDeque<CrawlCandidate>> = BTreeMap::new();
        for candidate in candidates {
            let Some(domain) = candidate.domain() else {
                self.state.counters.dropped_errors += 1;
                continue;
            };
            let scope = consent_scope(candidate.source_kind);
            let authorized = policy.is_domain_allowed(&domain)
                && self
                    .ledger
                    .is_authorized(&domain, scope, &policy.version)?;
            if !authorized {
                tracing::warn!(domain = %domain, url = %candidate.url, "blocked: no consent grant");
                self.state.counters.blocked_consent += 1;
                continue;
            }
            by_domain.entry(domain).or_default().push_back(candidate);
        }

        self.state.counters.sources_contacted += by_domain.len() as u64;

        let bandwidth = Arc::new(AtomicU64::new(self.state.budget.bandwidth_bytes));
        let bandwidth_cap =
            (policy.budgets.bandwidth_mb_per_day * 1024.0 * 1024.0) as u64;
        let stop = Arc::new(AtomicBool::new(false));

        // Resource caps are sampled once per scraping phase entry; the
        // bandwidth cap is enforced between every fetch.
        let usage = self.probe.snapshot();
        if let Some(reason) = over_resource_caps(policy, &usage) {
            tracing::warn!(reason, "resource budget exhausted before scraping");
            stop.store(true, Ordering::SeqCst);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_domains));
        let mut join_set: JoinSet<DomainScrapeResult> = JoinSet::new();

        for (domain, queue) in by_domain {
            let semaphore = semaphore.clone();
            let scraper = self.scraper.clone();
            let bandwidth = bandwidth.clone();
            let stop = stop.clone();
            let kill_switch = policy.kill_switch_path.clone();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                let mut result = DomainScrapeResult::default();
                let mut queue = queue;

                while let Some(candidate) = queue.pop_front() {
                    // Cooperative cancellation and budget check before each
                    // unit of work; in-flight fetches always complete.
                    if stop.load(Ordering::SeqCst)
                        || kill_switch.exists()
                        || bandwidth.load(Ordering::SeqCst) >= bandwidth_cap
                    {
                        stop.store(true, Ordering::SeqCst);
                        result.deferred.push(candidate);
                        result.deferred.extend(queue.drain(..));
                        break;
                    }

                    match scraper.fetch(&candidate).await {
                        Ok(FetchOutcome::Fetched(fetch)) => {
                            bandwidth.fetch_add(fetch.raw_len, Ordering::SeqCst);
                            result.fetched.push(fetch);
                        }
                        Ok(FetchOutcome::NotModified) => result.not_modified += 1,
                        Ok(FetchOutcome::RobotsDenied) => result.robots_denied += 1,
                        Err(e) => {
                            tracing::warn!(url = %candidate.url, domain = %domain, error = %e, "fetch dropped");
                            result.dropped += 1;
                        }
                    }
                }
                result
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let result = joined.context("scrape worker panicked")?;
            self.state.counters.fetched += result.fetched.len() as u64;
            self.state.counters.not_modified += result.not_modified;
            self.state.counters.robots_denied += result.robots_denied;
            self.state.counters.dropped_errors += result.dropped;
            self.state.fetched.extend(result.fetched);
            self.state.pending_candidates.extend(result.deferred);
        }

        self.state.budget.bandwidth_bytes = bandwidth.load(Ordering::SeqCst);
        self.state.counters.deferred = self.state.pending_candidates.len() as u64;
        if self.state.counters.deferred > 0 {
            tracing::warn!(
                deferred = self.state.counters.deferred,
                "budget exhausted, candidates deferred to next cycle"
            );
        }
        Ok(())
    }

    async fn verify(&mut self) -> Result<()> {
        let fetched = std::mem::take(&mut self.state.fetched);

        // Drop content hashes that are already in the index; re-verifying
        // unchanged content would only redo work the store dedups anyway.
        let mut novel = Vec::with_capacity(fetched.len());
        for fetch in fetched {
            if self.pipeline.store().has_content(&fetch.content_hash).await? {
                self.state.counters.duplicate_content += 1;
            } else {
                novel.push(fetch);
            }
        }

        let (verified, rejected) = self.verifier.verify_all(&novel);
        for (url, reason) in &rejected {
            tracing::info!(url = %url, reason = %reason, "document rejected");
            match reason.counter_key() {
                "license" => self.state.counters.rejected_license += 1,
                _ => self.state.counters.rejected_corroboration += 1,
            }
        }
        self.state.counters.documents_verified += verified.len() as u64;
        self.state.verified.extend(verified);
        Ok(())
    }

    async fn ingest(&mut self, policy: &PolicyDocument) -> Result<()> {
        let mut documents: VecDeque<VerifiedDocument> =
            std::mem::take(&mut self.state.verified).into();
        while let Some(doc) = documents.pop_front() {
            // Budget check before each unit of work; remaining documents
            // stay in the run state for the next cycle.
            let usage = self.probe.snapshot();
            if let Some(reason) = over_resource_caps(policy, &usage) {
                tracing::warn!(reason, remaining = documents.len() + 1, "ingestion deferred");
                self.state.verified.push(doc);
                self.state.verified.extend(documents);
                break;
            }
            match self.pipeline.ingest(&doc).await {
                Ok(result) => {
                    self.state.counters.chunks_ingested += result.chunks_written as u64;
                    self.state.counters.ingested_urls.push(doc.url.clone());
                }
                Err(IngestError::RollbackFailed(e)) => {
                    return Err(e.context("vector store rollback failed"));
                }
                Err(e) => {
                    tracing::warn!(url = %doc.url, error = %e, "document skipped");
                    self.state.counters.ingest_failures += 1;
                }
            }
        }
        Ok(())
    }

    /// Long-running autopilot loop: poll-based, sleeping until the next
    /// window boundary or the poll interval, whichever is sooner.
    pub async fn run_forever(&mut self) -> Result<()> {
        loop {
            let now = Utc::now();
            match self.policy_store.load() {
                Ok(policy) => {
                    if policy.is_network_allowed(now) {
                        match self.run_cycle(now).await? {
                            CycleOutcome::Completed(summary) => {
                                tracing::info!(
                                    cycle = summary.cycle,
                                    chunks = summary.chunks_ingested,
                                    "cycle complete"
                                );
                            }
                            CycleOutcome::Offline(reason) => {
                                tracing::info!(reason, "cycle skipped");
                            }
                        }
                    }
                    let after = Utc::now();
                    let sleep_secs = if policy.is_network_allowed(after) {
                        self.config.poll_secs
                    } else {
                        self.config
                            .poll_secs
                            .min(seconds_until_window(&policy, after).unwrap_or(u64::MAX))
                            .max(self.config.kill_switch_poll_secs)
                    };
                    tokio::time::sleep(std::time::Duration::from_secs(sleep_secs)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[derive(Default)]
struct DomainScrapeResult {
    fetched: Vec<FetchResult>,
    deferred: Vec<CrawlCandidate>,
    not_modified: u64,
    robots_denied: u64,
    dropped: u64,
}

fn consent_scope(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Http | SourceKind::Sitemap => "web",
        SourceKind::CodeHost => "git",
    }
}

fn over_resource_caps(policy: &PolicyDocument, usage: &ResourceUsage) -> Option<&'static str> {
    if usage.cpu_percent > policy.budgets.cpu_percent_cap {
        return Some("cpu");
    }
    if usage.ram_mb > policy.budgets.ram_mb_cap {
        return Some("ram");
    }
    None
}

/// Seconds until the next window opens, or `None` when no window exists.
fn seconds_until_window(policy: &PolicyDocument, now: DateTime<Utc>) -> Option<u64> {
    if policy.is_network_allowed(now) {
        return Some(0);
    }
    // Scan forward in minute steps up to a week; windows repeat weekly.
    let mut cursor = now;
    for _ in 0..(7 * 24 * 60) {
        cursor += ChronoDuration::minutes(1);
        if policy.network_windows.iter().any(|w| w.contains(cursor)) {
            let delta = cursor - now;
            return Some(delta.num_seconds().max(0) as u64);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone, Weekday};

    fn policy(windows: Vec<crate::policy::NetworkWindow>) -> PolicyDocument {
        PolicyDocument {
            version: "1".into(),
            offline_default: true,
            network_windows: windows,
            allowlist_domains: Default::default(),
            budgets: crate::policy::Budgets {
                cpu_percent_cap: 80.0,
                ram_mb_cap: 4096.0,
                bandwidth_mb_per_day: 10.0,
            },
            kill_switch_path: PathBuf::from("/nonexistent/kill-switch"),
        }
    }

    fn window(days: Vec<Weekday>, start: &str, end: &str) -> crate::policy::NetworkWindow {
        crate::policy::NetworkWindow {
            days,
            start: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            end: NaiveTime::parse_from_str(end, "%H:%M").unwrap(),
        }
    }

    #[test]
    fn test_budget_ledger_rolls_daily() {
        let mut ledger = BudgetLedger::default();
        let day1 = Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
        ledger.roll_day(day1);
        ledger.bandwidth_bytes = 5 * 1024 * 1024;
        ledger.roll_day(day1);
        assert_eq!(ledger.bandwidth_bytes, 5 * 1024 * 1024);

        let day2 = Utc.with_ymd_and_hms(2024, 1, 4, 0, 5, 0).unwrap();
        ledger.roll_day(day2);
        assert_eq!(ledger.bandwidth_bytes, 0);
    }

    #[test]
    fn test_seconds_until_window() {
        // Wednesday 08:00, window opens 09:00 same day.
        let p = policy(vec![window(vec![Weekday::Wed], "09:00", "17:00")]);
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 8, 0, 0).unwrap();
        let secs = seconds_until_window(&p, now).unwrap();
        assert_eq!(secs, 3600);

        // Inside the window.
        let inside = Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
        assert_eq!(seconds_until_window(&p, inside), Some(0));
    }

    #[test]
    fn test_resource_caps() {
        let p = policy(vec![window(vec![Weekday::Wed], "09:00", "17:00")]);
        let ok = ResourceUsage {
            cpu_percent: 10.0,
            ram_mb: 100.0,
        };
        assert_eq!(over_resource_caps(&p, &ok), None);

        let hot = ResourceUsage {
            cpu_percent: 95.0,
            ram_mb: 100.0,
        };
        assert_eq!(over_resource_caps(&p, &hot), Some("cpu"));

        let fat = ResourceUsage {
            cpu_percent: 10.0,
            ram_mb: 9000.0,
        };
        assert_eq!(over_resource_caps(&p, &fat), Some("ram"));
    }

    #[test]
    fn test_run_state_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run-state.json");

        let mut state = RunState::default();
        state.cycle = 3;
        state.phase = Phase::Verifying;
        state
            .pending_candidates
            .push_back(CrawlCandidate::new("https://example.org/a", SourceKind::Http));
        state.save(&path).unwrap();

        let loaded = RunState::load(&path).unwrap();
        assert_eq!(loaded.phase, Phase::Verifying);
        assert_eq!(loaded.cycle, 3);
        assert_eq!(loaded.pending_candidates.len(), 1);
    }

    #[test]
    fn test_missing_run_state_defaults_to_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = RunState::load(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(loaded.phase, Phase::Idle);
        assert_eq!(loaded.cycles_completed, 0);
    }

    #[test]
    fn test_consent_scope_per_kind() {
        assert_eq!(consent_scope(SourceKind::Http), "web");
        assert_eq!(consent_scope(SourceKind::Sitemap), "web");
        assert_eq!(consent_scope(SourceKind::CodeHost), "git");
    }
}
