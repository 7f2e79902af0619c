//! Scraper contract and the HTTP implementation.
//!
//! Every scraper honors the same politeness envelope: robots directives
//! are checked per domain (cached with a TTL), conditional request headers
//! are replayed from the fetch cache so unchanged content costs a 304,
//! requests to the same domain are spaced by the configured throttle, and
//! transient failures are retried with exponential backoff up to a bounded
//! attempt count. A candidate that still fails is dropped for the cycle —
//! never fatal to the scheduler.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::ScraperConfig;
use crate::ingest::normalize_text;
use crate::models::{CrawlCandidate, FetchResult};
use crate::robots::RobotsCache;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid url: {0}")]
    Url(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("fetch cache error: {0}")]
    Cache(#[from] sqlx::Error),
}

impl ScrapeError {
    /// Transient errors are worth retrying inside a cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ScrapeError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Outcome of a polite fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(FetchResult),
    /// Server answered 304; cached content is unchanged.
    NotModified,
    /// robots.txt forbids this URL for our user agent.
    RobotsDenied,
}

/// Common contract for all scraper variants, and the seam the scheduler's
/// tests use to count (or forbid) fetch calls.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn fetch(&self, candidate: &CrawlCandidate) -> Result<FetchOutcome, ScrapeError>;
}

/// Conditional-request state persisted per URL.
#[derive(Debug, Clone, Default)]
pub struct CachedFetch {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_hash: Option<String>,
}

/// SQLite-backed cache of validators from previous fetches.
#[derive(Clone)]
pub struct FetchCache {
    pool: SqlitePool,
}

impl FetchCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, url: &str) -> Result<Option<CachedFetch>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT etag, last_modified, content_hash FROM fetch_cache WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| CachedFetch {
            etag: row.get("etag"),
            last_modified: row.get("last_modified"),
            content_hash: row.get("content_hash"),
        }))
    }

    pub async fn put(&self, url: &str, entry: &CachedFetch) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO fetch_cache (url, etag, last_modified, content_hash, fetched_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                content_hash = excluded.content_hash,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(url)
        .bind(&entry.etag)
        .bind(&entry.last_modified)
        .bind(&entry.content_hash)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Polite HTTP scraper: robots, conditional requests, throttling, backoff.
pub struct HttpScraper {
    client: reqwest::Client,
    robots: RobotsCache,
    cache: FetchCache,
    config: ScraperConfig,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl HttpScraper {
    pub fn new(config: ScraperConfig, cache: FetchCache) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        let robots = RobotsCache::new(
            client.clone(),
            config.user_agent.clone(),
            Duration::from_secs(config.robots_ttl_secs),
        );
        Ok(Self {
            client,
            robots,
            cache,
            config,
            last_request: Mutex::new(HashMap::new()),
        })
    }

    /// Raw GET with throttling but no conditional caching, for sitemaps,
    /// feeds, and API endpoints.
    pub async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|_| ScrapeError::Url(url.to_string()))?;
        if let Some(host) = parsed.host_str() {
            self.throttle(host).await;
        }
        let response = self.request_with_retry(parsed, &CachedFetch::default()).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn throttle(&self, domain: &str) {
        let min_gap = Duration::from_millis(self.config.throttle_ms);
        if min_gap.is_zero() {
            return;
        }
        let wait_until = {
            let mut last = self.last_request.lock().await;
            let now = Instant::now();
            let next_allowed = match last.get(domain) {
                Some(prev) => (*prev + min_gap).max(now),
                None => now,
            };
            last.insert(domain.to_string(), next_allowed);
            next_allowed
        };
        tokio::time::sleep_until(wait_until).await;
    }

    async fn request_with_retry(
        &self,
        url: reqwest::Url,
        cached: &CachedFetch,
    ) -> Result<reqwest::Response, ScrapeError> {
        let mut last_err: Option<ScrapeError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * (1 << (attempt - 1).min(6)));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.get(url.clone());
            if let Some(etag) = cached.etag.as_deref() {
                request = request.header(reqwest::header::IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = cached.last_modified.as_deref() {
                request = request.header(reqwest::header::IF_MODIFIED_SINCE, last_modified);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status == 429 || status >= 500 {
                        last_err = Some(ScrapeError::Status {
                            url: url.to_string(),
                            status,
                        });
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let err = ScrapeError::Http(e);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or(ScrapeError::Url(url.to_string())))
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn fetch(&self, candidate: &CrawlCandidate) -> Result<FetchOutcome, ScrapeError> {
        let url = reqwest::Url::parse(&candidate.url)
            .map_err(|_| ScrapeError::Url(candidate.url.clone()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ScrapeError::Url(candidate.url.clone()))?
            .to_ascii_lowercase();

        if !self.robots.allows(&url).await {
            tracing::info!(url = %candidate.url, "blocked by robots.txt");
            return Ok(FetchOutcome::RobotsDenied);
        }

        let cached = self.cache.get(&candidate.url).await?.unwrap_or_default();

        self.throttle(&host).await;
        let response = self.request_with_retry(url, &cached).await?;

        let status = response.status();
        if status.as_u16() == 304 {
            tracing::debug!(url = %candidate.url, "not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(ScrapeError::Status {
                url: candidate.url.clone(),
                status: status.as_u16(),
            });
        }

        let etag = header_string(&response, reqwest::header::ETAG);
        let last_modified = header_string(&response, reqwest::header::LAST_MODIFIED);
        let content_type = header_string(&response, reqwest::header::CONTENT_TYPE);
        let headers = license_headers(&response);

        let raw = response.bytes().await?;
        let raw_len = raw.len() as u64;
        let decoded = String::from_utf8_lossy(&raw).into_owned();
        let text = if content_type.as_deref().is_some_and(|ct| ct.contains("html")) {
            strip_tags(&decoded)
        } else {
            decoded
        };
        let body = normalize_text(&text);
        let content_hash = sha256_hex(&body);
        let license = detect_license(&headers, &body);

        self.cache
            .put(
                &candidate.url,
                &CachedFetch {
                    etag: etag.clone(),
                    last_modified: last_modified.clone(),
                    content_hash: Some(content_hash.clone()),
                },
            )
            .await?;

        Ok(FetchOutcome::Fetched(FetchResult {
            url: candidate.url.clone(),
            status: status.as_u16(),
            etag,
            last_modified,
            body,
            raw_len,
            content_hash,
            license,
            fetched_at: Utc::now(),
        }))
    }
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn license_headers(response: &reqwest::Response) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for key in ["license", "x-license", "content-license"] {
        if let Some(value) = response.headers().get(key).and_then(|v| v.to_str().ok()) {
            map.insert(key.to_string(), value.trim().to_string());
        }
    }
    map
}

pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Infer a license identifier from response headers or page content.
pub fn detect_license(headers: &HashMap<String, String>, body: &str) -> Option<String> {
    for key in ["license", "x-license", "content-license"] {
        if let Some(value) = headers.get(key) {
            if !value.is_empty() {
                return Some(value.clone());
            }
        }
    }

    let lowered = body.to_lowercase();
    if let Some(pos) = lowered.find("spdx-license-identifier:") {
        let rest = &body[pos + "spdx-license-identifier:".len()..];
        let id = rest.split_whitespace().next().unwrap_or("").trim();
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }

    let markers = [
        ("apache license", "Apache-2.0"),
        ("mit license", "MIT"),
        ("creative commons attribution-sharealike", "CC-BY-SA-4.0"),
        ("creative commons attribution", "CC-BY-4.0"),
        ("gnu general public license", "GPL-3.0"),
    ];
    for (needle, id) in markers {
        if lowered.contains(needle) {
            return Some(id.to_string());
        }
    }
    None
}

/// Drop markup, keeping text content. Good enough for license sniffing and
/// normalization; this is not a general HTML parser.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_license_from_headers() {
        let mut headers = HashMap::new();
        headers.insert("x-license".to_string(), "CC-BY-4.0".to_string());
        assert_eq!(
            detect_license(&headers, "no markers here"),
            Some("CC-BY-4.0".to_string())
        );
    }

    #[test]
    fn test_detect_license_from_spdx_marker() {
        let body = "Header text\nSPDX-License-Identifier: Apache-2.0\nrest";
        assert_eq!(
            detect_license(&HashMap::new(), body),
            Some("Apache-2.0".to_string())
        );
    }

    #[test]
    fn test_detect_license_from_prose() {
        let body = "Distributed under the MIT License. See LICENSE for details.";
        assert_eq!(detect_license(&HashMap::new(), body), Some("MIT".to_string()));
        assert_eq!(detect_license(&HashMap::new(), "nothing declared"), None);
    }

    #[test]
    fn test_strip_tags() {
        let html = "<html><body><h1>Title</h1><p>Some <b>bold</b> text.</p></body></html>";
        let text = normalize_text(&strip_tags(html));
        assert_eq!(text, "Title Some bold text.");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ScrapeError::Status {
            url: "u".into(),
            status: 503
        }
        .is_transient());
        assert!(ScrapeError::Status {
            url: "u".into(),
            status: 429
        }
        .is_transient());
        assert!(!ScrapeError::Status {
            url: "u".into(),
            status: 404
        }
        .is_transient());
        assert!(!ScrapeError::Url("nope".into()).is_transient());
    }
}
