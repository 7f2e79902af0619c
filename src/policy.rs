//! Governance policy: the operator-owned document gating all network activity.
//!
//! The policy file (`policy.toml`) is read-only to the pipeline and re-read
//! at the start of every cycle, so operators can edit allowlists, budgets,
//! and windows between runs without restarting the process. Network access
//! is only attempted when the current time falls inside a configured window
//! AND the kill-switch file is absent.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy file not found: {0} (run 'watcher init' first)")]
    Missing(PathBuf),

    #[error("failed to read policy file: {0}")]
    Io(#[from] std::io::Error),

    #[error("policy file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid policy: {0}")]
    Invalid(String),
}

/// Daily time range during which outbound network activity is permitted.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkWindow {
    pub days: Vec<Weekday>,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl NetworkWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let t = now.time();
        self.days.contains(&now.weekday()) && self.start <= t && t < self.end
    }
}

/// Resource caps enforced by the scheduler's budget tracker.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Budgets {
    pub cpu_percent_cap: f64,
    pub ram_mb_cap: f64,
    pub bandwidth_mb_per_day: f64,
}

/// Validated policy document.
#[derive(Debug, Clone)]
pub struct PolicyDocument {
    pub version: String,
    pub offline_default: bool,
    pub network_windows: Vec<NetworkWindow>,
    pub allowlist_domains: BTreeSet<String>,
    pub budgets: Budgets,
    pub kill_switch_path: PathBuf,
}

impl PolicyDocument {
    /// True iff `domain` (or a parent of it) is on the allowlist.
    pub fn is_domain_allowed(&self, domain: &str) -> bool {
        let host = domain.trim().to_ascii_lowercase();
        if host.is_empty() {
            return false;
        }
        self.allowlist_domains
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)))
    }

    pub fn kill_switch_engaged(&self) -> bool {
        self.kill_switch_path.exists()
    }

    /// True iff `now` falls in any window and the kill-switch file is absent.
    pub fn is_network_allowed(&self, now: DateTime<Utc>) -> bool {
        if self.kill_switch_engaged() {
            return false;
        }
        self.network_windows.iter().any(|w| w.contains(now))
    }
}

// Raw shapes as they appear on disk; converted and validated by `load`.
// Unknown keys are tolerated, missing required keys are fatal.

#[derive(Debug, Deserialize)]
struct RawPolicy {
    version: String,
    #[serde(default = "default_offline")]
    offline_default: bool,
    network_windows: Vec<RawWindow>,
    allowlist_domains: Vec<String>,
    budgets: Budgets,
    kill_switch_path: String,
}

fn default_offline() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawWindow {
    days: Vec<String>,
    start: String,
    end: String,
}

/// Read access to `policy.toml`, plus the hash recorded in consent grants.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    path: PathBuf,
}

impl PolicyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<PolicyDocument, PolicyError> {
        if !self.path.exists() {
            return Err(PolicyError::Missing(self.path.clone()));
        }
        let text = std::fs::read_to_string(&self.path)?;
        let raw: RawPolicy = toml::from_str(&text)?;

        if raw.network_windows.is_empty() {
            return Err(PolicyError::Invalid(
                "at least one network window must be defined".into(),
            ));
        }

        let mut windows = Vec::with_capacity(raw.network_windows.len());
        for w in &raw.network_windows {
            windows.push(parse_window(w)?);
        }

        let allowlist: BTreeSet<String> = raw
            .allowlist_domains
            .iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        Ok(PolicyDocument {
            version: raw.version,
            offline_default: raw.offline_default,
            network_windows: windows,
            allowlist_domains: allowlist,
            budgets: raw.budgets,
            kill_switch_path: expand_home(&raw.kill_switch_path),
        })
    }

    /// SHA-256 of the policy file bytes, recorded alongside consent grants.
    pub fn policy_hash(&self) -> Result<String, PolicyError> {
        let bytes = std::fs::read(&self.path)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn parse_window(raw: &RawWindow) -> Result<NetworkWindow, PolicyError> {
    let start = parse_time(&raw.start)?;
    let end = parse_time(&raw.end)?;
    if start >= end {
        return Err(PolicyError::Invalid(format!(
            "time window must end after it starts: {}-{}",
            raw.start, raw.end
        )));
    }

    let mut days = Vec::new();
    for spec in &raw.days {
        for day in expand_days(spec)? {
            if !days.contains(&day) {
                days.push(day);
            }
        }
    }
    if days.is_empty() {
        return Err(PolicyError::Invalid(
            "window must name at least one day".into(),
        ));
    }
    days.sort_by_key(|d| d.num_days_from_monday());

    Ok(NetworkWindow { days, start, end })
}

fn parse_time(value: &str) -> Result<NaiveTime, PolicyError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| PolicyError::Invalid(format!("invalid time specification: {:?}", value)))
}

/// Expand a day spec (`"wed"`, `"mon-fri"`) into concrete weekdays.
fn expand_days(spec: &str) -> Result<Vec<Weekday>, PolicyError> {
    let text = spec.trim().to_ascii_lowercase();
    if let Some((a, b)) = text.split_once('-') {
        let start = parse_day(a)?;
        let end = parse_day(b)?;
        let (s, e) = (
            start.num_days_from_monday(),
            end.num_days_from_monday(),
        );
        if s > e {
            return Err(PolicyError::Invalid(format!(
                "day ranges must be ascending: {:?}",
                spec
            )));
        }
        return Ok((s..=e).map(weekday_from_monday).collect());
    }
    Ok(vec![parse_day(&text)?])
}

fn parse_day(value: &str) -> Result<Weekday, PolicyError> {
    value
        .trim()
        .parse::<Weekday>()
        .map_err(|_| PolicyError::Invalid(format!("invalid day: {:?}", value)))
}

fn weekday_from_monday(n: u32) -> Weekday {
    match n {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

/// Resolve a leading `~` against `$HOME`; other paths pass through.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn sample_policy(dir: &Path, kill_switch: &Path) -> PolicyStore {
        let path = dir.join("policy.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
version = "3"
offline_default = true
allowlist_domains = ["example.org", "Mirror.example.net"]
kill_switch_path = "{}"

[[network_windows]]
days = ["mon-fri"]
start = "09:00"
end = "17:00"

[budgets]
cpu_percent_cap = 50.0
ram_mb_cap = 2048.0
bandwidth_mb_per_day = 100.0
"#,
            kill_switch.display()
        )
        .unwrap();
        PolicyStore::new(path)
    }

    #[test]
    fn test_load_and_window_expansion() {
        let tmp = tempfile::tempdir().unwrap();
        let store = sample_policy(tmp.path(), &tmp.path().join("disable"));
        let policy = store.load().unwrap();
        assert_eq!(policy.version, "3");
        assert_eq!(policy.network_windows[0].days.len(), 5);
        assert!(policy.allowlist_domains.contains("mirror.example.net"));
    }

    #[test]
    fn test_network_allowed_inside_window() {
        let tmp = tempfile::tempdir().unwrap();
        let store = sample_policy(tmp.path(), &tmp.path().join("disable"));
        let policy = store.load().unwrap();

        // Wednesday 2024-01-03, 10:00 UTC
        let inside = Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
        assert!(policy.is_network_allowed(inside));

        // Same day, 20:00 UTC
        let evening = Utc.with_ymd_and_hms(2024, 1, 3, 20, 0, 0).unwrap();
        assert!(!policy.is_network_allowed(evening));

        // Saturday 2024-01-06, 10:00 UTC
        let weekend = Utc.with_ymd_and_hms(2024, 1, 6, 10, 0, 0).unwrap();
        assert!(!policy.is_network_allowed(weekend));
    }

    #[test]
    fn test_kill_switch_blocks_network() {
        let tmp = tempfile::tempdir().unwrap();
        let kill_switch = tmp.path().join("disable");
        let store = sample_policy(tmp.path(), &kill_switch);
        let policy = store.load().unwrap();

        let inside = Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
        assert!(policy.is_network_allowed(inside));

        std::fs::write(&kill_switch, "").unwrap();
        assert!(!policy.is_network_allowed(inside));
    }

    #[test]
    fn test_domain_allowlist_with_subdomains() {
        let tmp = tempfile::tempdir().unwrap();
        let store = sample_policy(tmp.path(), &tmp.path().join("disable"));
        let policy = store.load().unwrap();

        assert!(policy.is_domain_allowed("example.org"));
        assert!(policy.is_domain_allowed("docs.example.org"));
        assert!(policy.is_domain_allowed("EXAMPLE.ORG"));
        assert!(!policy.is_domain_allowed("example.com"));
        assert!(!policy.is_domain_allowed("notexample.org"));
    }

    #[test]
    fn test_missing_windows_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("policy.toml");
        std::fs::write(
            &path,
            r#"
version = "1"
allowlist_domains = []
kill_switch_path = "/tmp/disable"
network_windows = []

[budgets]
cpu_percent_cap = 50.0
ram_mb_cap = 1024.0
bandwidth_mb_per_day = 10.0
"#,
        )
        .unwrap();
        let err = PolicyStore::new(path).load().unwrap_err();
        assert!(matches!(err, PolicyError::Invalid(_)));
    }

    #[test]
    fn test_unknown_keys_tolerated_missing_keys_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("policy.toml");
        std::fs::write(
            &path,
            r#"
version = "1"
future_field = "ignored"
allowlist_domains = ["example.org"]
kill_switch_path = "/tmp/disable"

[[network_windows]]
days = ["sun"]
start = "01:00"
end = "02:00"

[budgets]
cpu_percent_cap = 50.0
ram_mb_cap = 1024.0
bandwidth_mb_per_day = 10.0
"#,
        )
        .unwrap();
        assert!(PolicyStore::new(path.clone()).load().is_ok());

        std::fs::write(&path, "version = \"1\"\n").unwrap();
        assert!(matches!(
            PolicyStore::new(&path).load().unwrap_err(),
            PolicyError::Parse(_)
        ));
    }
}
