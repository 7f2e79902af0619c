//! Weekly report artifacts.
//!
//! Every cycle appends its counter summary to a JSON history file; the
//! weekly report aggregates the last seven days into `weekly.json` and a
//! small static `weekly.html` for the external dashboard. No rejection is
//! silent: every counted reason ends up here.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Counters accumulated over one scheduler cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CycleSummary {
    pub cycle: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub sources_contacted: u64,
    pub fetched: u64,
    pub not_modified: u64,
    pub robots_denied: u64,
    pub blocked_consent: u64,
    pub duplicate_content: u64,
    pub dropped_errors: u64,
    pub rejected_license: u64,
    pub rejected_corroboration: u64,
    pub documents_verified: u64,
    pub chunks_ingested: u64,
    pub ingest_failures: u64,
    pub deferred: u64,
    pub bandwidth_mb: f64,
    pub ingested_urls: Vec<String>,
}

/// Seven-day aggregate written as `weekly.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeeklySummary {
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub cycles: u64,
    pub sources_contacted: u64,
    pub chunks_ingested: u64,
    pub rejected_license: u64,
    pub rejected_corroboration: u64,
    pub dropped_errors: u64,
    pub bandwidth_mb: f64,
    pub ingested_urls: Vec<String>,
    pub revoked_domains: Vec<String>,
}

/// Persists cycle history and renders the weekly artifacts.
pub struct ReportGenerator {
    dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join("history.json")
    }

    pub fn weekly_json_path(&self) -> PathBuf {
        self.dir.join("weekly.json")
    }

    pub fn weekly_html_path(&self) -> PathBuf {
        self.dir.join("weekly.html")
    }

    /// Append a cycle summary and refresh the weekly artifacts.
    pub fn record(
        &self,
        summary: &CycleSummary,
        revoked: &[String],
        now: DateTime<Utc>,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating reports dir {}", self.dir.display()))?;

        let mut history = self.load_history()?;
        history.push(summary.clone());
        let serialized = serde_json::to_string_pretty(&history)?;
        std::fs::write(self.history_path(), serialized)?;

        let weekly = self.aggregate(&history, revoked, now);
        std::fs::write(
            self.weekly_json_path(),
            serde_json::to_string_pretty(&weekly)?,
        )?;
        std::fs::write(self.weekly_html_path(), render_html(&weekly))?;
        Ok(())
    }

    /// Re-render the weekly artifacts from history without appending.
    pub fn refresh(&self, revoked: &[String], now: DateTime<Utc>) -> Result<WeeklySummary> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating reports dir {}", self.dir.display()))?;
        let history = self.load_history()?;
        let weekly = self.aggregate(&history, revoked, now);
        std::fs::write(
            self.weekly_json_path(),
            serde_json::to_string_pretty(&weekly)?,
        )?;
        std::fs::write(self.weekly_html_path(), render_html(&weekly))?;
        Ok(weekly)
    }

    pub fn load_history(&self) -> Result<Vec<CycleSummary>> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    fn aggregate(
        &self,
        history: &[CycleSummary],
        revoked: &[String],
        now: DateTime<Utc>,
    ) -> WeeklySummary {
        let window_start = now - Duration::days(7);
        let mut weekly = WeeklySummary {
            window_start: Some(window_start),
            window_end: Some(now),
            revoked_domains: revoked.to_vec(),
            ..Default::default()
        };

        for entry in history {
            let in_window = entry
                .finished_at
                .map(|t| t >= window_start)
                .unwrap_or(false);
            if !in_window {
                continue;
            }
            weekly.cycles += 1;
            weekly.sources_contacted += entry.sources_contacted;
            weekly.chunks_ingested += entry.chunks_ingested;
            weekly.rejected_license += entry.rejected_license;
            weekly.rejected_corroboration += entry.rejected_corroboration;
            weekly.dropped_errors += entry.dropped_errors;
            weekly.bandwidth_mb += entry.bandwidth_mb;
            weekly.ingested_urls.extend(entry.ingested_urls.clone());
        }
        weekly.ingested_urls.sort();
        weekly.ingested_urls.dedup();
        weekly
    }
}

fn render_html(weekly: &WeeklySummary) -> String {
    let mut html = vec![
        "<html>".to_string(),
        "  <head>".to_string(),
        "    <meta charset='utf-8'>".to_string(),
        "    <title>Source Watcher — weekly report</title>".to_string(),
        "  </head>".to_string(),
        "  <body>".to_string(),
        format!(
            "    <h1>Weekly report — {} cycles</h1>",
            weekly.cycles
        ),
        "    <h2>Totals</h2>".to_string(),
        "    <ul>".to_string(),
        format!(
            "      <li>Sources contacted: {}</li>",
            weekly.sources_contacted
        ),
        format!("      <li>Chunks ingested: {}</li>", weekly.chunks_ingested),
        format!(
            "      <li>Rejected (license): {}</li>",
            weekly.rejected_license
        ),
        format!(
            "      <li>Rejected (corroboration): {}</li>",
            weekly.rejected_corroboration
        ),
        format!("      <li>Dropped (errors): {}</li>", weekly.dropped_errors),
        format!(
            "      <li>Bandwidth consumed: {:.2} MB</li>",
            weekly.bandwidth_mb
        ),
        "    </ul>".to_string(),
        "    <h2>Ingested sources</h2>".to_string(),
    ];

    if weekly.ingested_urls.is_empty() {
        html.push("    <p>No new sources.</p>".to_string());
    } else {
        html.push("    <ul>".to_string());
        for url in &weekly.ingested_urls {
            html.push(format!("      <li>{}</li>", url));
        }
        html.push("    </ul>".to_string());
    }

    html.push("    <h2>Revoked domains</h2>".to_string());
    if weekly.revoked_domains.is_empty() {
        html.push("    <p>No revocations recorded.</p>".to_string());
    } else {
        html.push("    <ul>".to_string());
        for domain in &weekly.revoked_domains {
            html.push(format!("      <li>{}</li>", domain));
        }
        html.push("    </ul>".to_string());
    }

    html.push("  </body>".to_string());
    html.push("</html>".to_string());
    html.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(cycle: u64, finished_at: DateTime<Utc>, chunks: u64) -> CycleSummary {
        CycleSummary {
            cycle,
            started_at: Some(finished_at),
            finished_at: Some(finished_at),
            chunks_ingested: chunks,
            sources_contacted: 2,
            ingested_urls: vec![format!("https://example.org/{cycle}")],
            ..Default::default()
        }
    }

    #[test]
    fn test_record_and_aggregate() {
        let tmp = tempfile::tempdir().unwrap();
        let reports = ReportGenerator::new(tmp.path().join("reports"));
        let now = Utc::now();

        reports
            .record(&summary(1, now - Duration::days(1), 5), &[], now)
            .unwrap();
        reports
            .record(&summary(2, now, 7), &["revoked.org".into()], now)
            .unwrap();

        let weekly: WeeklySummary = serde_json::from_str(
            &std::fs::read_to_string(reports.weekly_json_path()).unwrap(),
        )
        .unwrap();
        assert_eq!(weekly.cycles, 2);
        assert_eq!(weekly.chunks_ingested, 12);
        assert_eq!(weekly.revoked_domains, vec!["revoked.org".to_string()]);

        let html = std::fs::read_to_string(reports.weekly_html_path()).unwrap();
        assert!(html.contains("Chunks ingested: 12"));
        assert!(html.contains("revoked.org"));
    }

    #[test]
    fn test_old_cycles_fall_out_of_window() {
        let tmp = tempfile::tempdir().unwrap();
        let reports = ReportGenerator::new(tmp.path().join("reports"));
        let now = Utc::now();

        reports
            .record(&summary(1, now - Duration::days(30), 100), &[], now)
            .unwrap();
        reports.record(&summary(2, now, 3), &[], now).unwrap();

        let weekly: WeeklySummary = serde_json::from_str(
            &std::fs::read_to_string(reports.weekly_json_path()).unwrap(),
        )
        .unwrap();
        assert_eq!(weekly.cycles, 1);
        assert_eq!(weekly.chunks_ingested, 3);
    }
}
