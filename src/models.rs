//! Core data models used throughout Source Watcher.
//!
//! These types represent the candidates, fetch results, verified documents,
//! and chunks that flow through the discovery, verification, and ingestion
//! pipeline. Everything the scheduler persists across a crash lives here,
//! so the flow types derive `Serialize`/`Deserialize`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of source a crawl candidate came from, selecting the scraper variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Plain HTTP page.
    Http,
    /// URL enumerated from an XML sitemap.
    Sitemap,
    /// Repository on a code-hosting platform, fetched via its REST API.
    CodeHost,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Http => "http",
            SourceKind::Sitemap => "sitemap",
            SourceKind::CodeHost => "code_host",
        }
    }
}

/// A URL selected for fetching during the current cycle.
///
/// Candidates are ephemeral: they are produced by discovery, consumed by
/// scrapers, and only outlive a cycle when deferred to the run state's
/// pending queue by the budget tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCandidate {
    pub url: String,
    pub source_kind: SourceKind,
    pub discovered_at: DateTime<Utc>,
}

impl CrawlCandidate {
    pub fn new(url: impl Into<String>, source_kind: SourceKind) -> Self {
        Self {
            url: url.into(),
            source_kind,
            discovered_at: Utc::now(),
        }
    }

    /// Lowercased host portion of the candidate URL, if it parses.
    pub fn domain(&self) -> Option<String> {
        domain_of(&self.url)
    }
}

/// Raw content returned by a scraper, plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub url: String,
    pub status: u16,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Extracted text body (markup stripped, encoding resolved).
    pub body: String,
    /// Size of the raw payload on the wire, for bandwidth accounting.
    pub raw_len: u64,
    /// SHA-256 of the normalized body.
    pub content_hash: String,
    /// License declared by the source, when one could be detected.
    pub license: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    pub fn domain(&self) -> Option<String> {
        domain_of(&self.url)
    }
}

/// A document that passed the license gate and the corroboration check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedDocument {
    pub url: String,
    pub title: String,
    pub license: String,
    /// Distinct URLs whose content corroborates this document (>= 2).
    pub corroborating_urls: BTreeSet<String>,
    /// Trust score in [0, 1], monotonic in corroborator count and reputation.
    pub trust_score: f64,
    pub content_hash: String,
    pub text: String,
    pub language: String,
    pub crawled_at: DateTime<Utc>,
}

/// A bounded segment of a verified document, the unit of embedding and storage.
///
/// Owned exclusively by the vector store once inserted. The id is derived
/// deterministically from `(content_hash, chunk_index)` so re-ingesting
/// identical content upserts instead of duplicating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
    pub url: String,
    pub title: String,
    pub license: String,
    pub language: String,
    pub crawled_at: DateTime<Utc>,
    pub content_hash: String,
    pub score: f64,
}

/// Deterministic chunk id for `(content_hash, chunk_index)`.
pub fn chunk_id(content_hash: &str, index: i64) -> String {
    let name = format!("{}:{}", content_hash, index);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// Lowercased host portion of a URL, if it parses.
pub fn domain_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_deterministic() {
        let a = chunk_id("abc123", 0);
        let b = chunk_id("abc123", 0);
        assert_eq!(a, b);
        assert_ne!(a, chunk_id("abc123", 1));
        assert_ne!(a, chunk_id("abc124", 0));
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(
            domain_of("https://Example.ORG/a/b?c=1"),
            Some("example.org".to_string())
        );
        assert_eq!(domain_of("not a url"), None);
    }
}
