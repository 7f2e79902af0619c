//! Append-only consent ledger.
//!
//! One signed JSON record per line. The first line is a metadata record
//! carrying the HMAC secret; every subsequent line is a grant or revocation
//! signed with HMAC-SHA256 over its canonical JSON payload. Records are
//! never edited or deleted: revocation is a new record. All appends go
//! through a single guarded file handle so concurrent writers cannot
//! interleave partial lines.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Scope marker appended by [`ConsentLedger::revoke`].
pub const SCOPE_REVOKED: &str = "revoked";

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("consent ledger not initialised: {0} (run 'watcher init' first)")]
    NotInitialised(PathBuf),

    #[error("ledger already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("ledger metadata is invalid: {0}")]
    Metadata(String),

    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger line {line} failed signature verification")]
    BadSignature { line: usize },
}

#[derive(Debug, Deserialize)]
struct MetadataLine {
    #[serde(rename = "type")]
    kind: String,
    secret_hex: String,
}

/// A single signed grant or revocation.
///
/// Uniquely keyed by `(domain, scope, policy_version)`; the most recent
/// record for a key wins when authorization is evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub timestamp: DateTime<Utc>,
    pub domain: String,
    pub scope: String,
    pub policy_version: String,
    pub policy_hash: String,
    pub signature: String,
}

impl ConsentRecord {
    pub fn is_revocation(&self) -> bool {
        self.scope == SCOPE_REVOKED
    }
}

/// Append-only signed log of which domains/scopes are authorized for
/// ingestion under a specific policy version.
#[derive(Debug)]
pub struct ConsentLedger {
    path: PathBuf,
    secret: Vec<u8>,
    // Single-writer discipline: the append handle is owned here and every
    // write serializes through this lock.
    writer: Mutex<std::fs::File>,
}

impl ConsentLedger {
    /// Create a new ledger with a fresh random secret. Fails if one exists.
    pub fn init(path: &Path) -> Result<(), SigningError> {
        if path.exists() {
            return Err(SigningError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut secret = Vec::with_capacity(32);
        secret.extend_from_slice(Uuid::new_v4().as_bytes());
        secret.extend_from_slice(Uuid::new_v4().as_bytes());

        let metadata = serde_json::json!({
            "type": "metadata",
            "created_at": Utc::now().to_rfc3339(),
            "secret_hex": hex::encode(&secret),
        });
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "{}", metadata)?;
        Ok(())
    }

    /// Open an existing ledger, reading the secret from the metadata line.
    pub fn open(path: &Path) -> Result<Self, SigningError> {
        if !path.exists() {
            return Err(SigningError::NotInitialised(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let first = text
            .lines()
            .next()
            .ok_or_else(|| SigningError::Metadata("ledger file is empty".into()))?;
        let metadata: MetadataLine = serde_json::from_str(first)
            .map_err(|e| SigningError::Metadata(format!("metadata line is invalid JSON: {e}")))?;
        if metadata.kind != "metadata" {
            return Err(SigningError::Metadata(
                "first line is not a metadata record".into(),
            ));
        }
        let secret = hex::decode(&metadata.secret_hex)
            .map_err(|_| SigningError::Metadata("secret_hex is not valid hex".into()))?;

        let writer = std::fs::OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            secret,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a signed grant for `(domain, scope, policy_version)`.
    pub async fn record(
        &self,
        domain: &str,
        scope: &str,
        policy_version: &str,
        policy_hash: &str,
    ) -> Result<ConsentRecord, SigningError> {
        self.append(domain, scope, policy_version, policy_hash).await
    }

    /// Append a revocation record for `domain`. The ledger is never edited
    /// in place; the revocation shadows earlier grants for the domain.
    pub async fn revoke(
        &self,
        domain: &str,
        policy_version: &str,
        policy_hash: &str,
    ) -> Result<ConsentRecord, SigningError> {
        self.append(domain, SCOPE_REVOKED, policy_version, policy_hash)
            .await
    }

    async fn append(
        &self,
        domain: &str,
        scope: &str,
        policy_version: &str,
        policy_hash: &str,
    ) -> Result<ConsentRecord, SigningError> {
        let record = ConsentRecord {
            timestamp: Utc::now(),
            domain: domain.trim().to_ascii_lowercase(),
            scope: scope.to_string(),
            policy_version: policy_version.to_string(),
            policy_hash: policy_hash.to_string(),
            signature: String::new(),
        };
        let signature = self.sign(&record);
        let record = ConsentRecord { signature, ..record };

        let line = serde_json::to_string(&signed_payload(&record))
            .map_err(|e| SigningError::Metadata(format!("serialization failed: {e}")))?;

        let mut writer = self.writer.lock().await;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(record)
    }

    /// True iff the most recent record for `(domain, scope)` is a grant
    /// under `policy_version`. A revocation for the domain shadows grants
    /// for every scope.
    pub fn is_authorized(
        &self,
        domain: &str,
        scope: &str,
        policy_version: &str,
    ) -> Result<bool, SigningError> {
        let host = domain.trim().to_ascii_lowercase();
        let mut latest: Option<ConsentRecord> = None;
        for record in self.entries()? {
            if record.domain != host {
                continue;
            }
            if record.scope == scope || record.is_revocation() {
                latest = Some(record);
            }
        }
        Ok(match latest {
            Some(record) => !record.is_revocation() && record.policy_version == policy_version,
            None => false,
        })
    }

    /// All entry records in file order, skipping the metadata line.
    pub fn entries(&self) -> Result<Vec<ConsentRecord>, SigningError> {
        let text = std::fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        for line in text.lines().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<ConsentRecord>(line) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Domains revoked on or after `since`, for the weekly report.
    pub fn revocations_since(&self, since: DateTime<Utc>) -> Result<Vec<String>, SigningError> {
        let mut revoked = Vec::new();
        for record in self.entries()? {
            if record.is_revocation() && record.timestamp >= since {
                revoked.push(record.domain);
            }
        }
        Ok(revoked)
    }

    /// Re-check every entry's signature; returns the number of valid
    /// entries or the first line that fails verification.
    pub fn verify(&self) -> Result<usize, SigningError> {
        let mut checked = 0usize;
        for (idx, record) in self.entries()?.into_iter().enumerate() {
            if self.sign(&record) != record.signature {
                return Err(SigningError::BadSignature { line: idx + 2 });
            }
            checked += 1;
        }
        Ok(checked)
    }

    fn sign(&self, record: &ConsentRecord) -> String {
        // serde_json orders object keys, so this serialization is canonical.
        let unsigned = serde_json::json!({
            "type": "entry",
            "timestamp": record.timestamp.to_rfc3339(),
            "domain": record.domain,
            "scope": record.scope,
            "policy_version": record.policy_version,
            "policy_hash": record.policy_hash,
        });
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(unsigned.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn signed_payload(record: &ConsentRecord) -> serde_json::Value {
    let mut value = serde_json::to_value(record).expect("record serializes");
    value["type"] = serde_json::Value::String("entry".into());
    value
}

/// Grants currently in force, latest record per domain (for reporting).
pub fn approvals(records: &[ConsentRecord]) -> HashMap<String, DateTime<Utc>> {
    let mut map = HashMap::new();
    for record in records {
        if record.is_revocation() {
            map.remove(&record.domain);
        } else {
            map.insert(record.domain.clone(), record.timestamp);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (tempfile::TempDir, ConsentLedger) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("consent-ledger.jsonl");
        ConsentLedger::init(&path).unwrap();
        let ledger = ConsentLedger::open(&path).unwrap();
        (tmp, ledger)
    }

    #[tokio::test]
    async fn test_grant_then_authorized() {
        let (_tmp, ledger) = ledger();
        ledger.record("Example.org", "web", "3", "hash").await.unwrap();
        assert!(ledger.is_authorized("example.org", "web", "3").unwrap());
        assert!(!ledger.is_authorized("example.org", "git", "3").unwrap());
        assert!(!ledger.is_authorized("example.org", "web", "4").unwrap());
        assert!(!ledger.is_authorized("other.org", "web", "3").unwrap());
    }

    #[tokio::test]
    async fn test_revocation_shadows_grant() {
        let (_tmp, ledger) = ledger();
        ledger.record("example.org", "web", "3", "hash").await.unwrap();
        ledger.revoke("example.org", "3", "hash").await.unwrap();
        assert!(!ledger.is_authorized("example.org", "web", "3").unwrap());

        // A fresh grant after revocation wins again.
        ledger.record("example.org", "web", "3", "hash").await.unwrap();
        assert!(ledger.is_authorized("example.org", "web", "3").unwrap());
    }

    #[tokio::test]
    async fn test_append_only_and_signatures_verify() {
        let (_tmp, ledger) = ledger();
        ledger.record("a.org", "web", "1", "h1").await.unwrap();
        ledger.record("b.org", "web", "1", "h1").await.unwrap();
        ledger.revoke("a.org", "1", "h1").await.unwrap();

        assert_eq!(ledger.entries().unwrap().len(), 3);
        assert_eq!(ledger.verify().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_tampered_entry_detected() {
        let (_tmp, ledger) = ledger();
        ledger.record("a.org", "web", "1", "h1").await.unwrap();

        let path = ledger.path().to_path_buf();
        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("a.org", "evil.org");
        std::fs::write(&path, tampered).unwrap();

        let reopened = ConsentLedger::open(&path).unwrap();
        assert!(matches!(
            reopened.verify().unwrap_err(),
            SigningError::BadSignature { line: 2 }
        ));
    }

    #[test]
    fn test_open_uninitialised_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ConsentLedger::open(&tmp.path().join("missing.jsonl")).unwrap_err();
        assert!(matches!(err, SigningError::NotInitialised(_)));
    }

    #[tokio::test]
    async fn test_approvals_view() {
        let (_tmp, ledger) = ledger();
        ledger.record("a.org", "web", "1", "h").await.unwrap();
        ledger.record("b.org", "web", "1", "h").await.unwrap();
        ledger.revoke("a.org", "1", "h").await.unwrap();

        let map = approvals(&ledger.entries().unwrap());
        assert!(!map.contains_key("a.org"));
        assert!(map.contains_key("b.org"));
    }
}
