//! Candidate discovery: sitemaps, feeds, and code-host repositories.
//!
//! Discovery turns allowlisted domains into concrete [`CrawlCandidate`]s.
//! Web domains are probed through their conventional sitemap and feed
//! locations; allowlist entries that look like `host/owner/repo` are
//! treated as code-host repositories and resolved through the hosting
//! platform's REST API. Every discovered URL is re-checked against the
//! policy allowlist before it becomes a candidate.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::models::{domain_of, CrawlCandidate, FetchResult, SourceKind};
use crate::policy::PolicyDocument;
use crate::scrape::{sha256_hex, FetchOutcome, HttpScraper, ScrapeError, Scraper};

/// An entry parsed from an RSS or Atom feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Extract `<loc>` URLs from a sitemap or sitemap index document.
pub fn parse_sitemap(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    let mut urls = Vec::new();
    let mut in_loc = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => in_loc = e.local_name().as_ref() == b"loc",
            Ok(Event::End(_)) => in_loc = false,
            Ok(Event::Text(t)) if in_loc => {
                if let Ok(text) = t.unescape() {
                    let url = text.trim().to_string();
                    if !url.is_empty() {
                        urls.push(url);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }
    urls
}

/// Extract entries from an RSS `<item>` or Atom `<entry>` feed.
pub fn parse_feed(xml: &str) -> Vec<FeedEntry> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();

    let mut in_item = false;
    let mut field: Option<&'static str> = None;
    let mut url = String::new();
    let mut title = String::new();
    let mut published = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"item" | b"entry" => {
                    in_item = true;
                    url.clear();
                    title.clear();
                    published.clear();
                }
                b"title" if in_item => field = Some("title"),
                b"link" if in_item => field = Some("link"),
                b"pubDate" | b"published" | b"updated" if in_item => field = Some("published"),
                _ => field = None,
            },
            // Atom links are empty elements carrying an href attribute.
            Ok(Event::Empty(e)) if in_item && e.local_name().as_ref() == b"link" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"href" {
                        if let Ok(value) = attr.unescape_value() {
                            url = value.trim().to_string();
                        }
                    }
                }
            }
            Ok(Event::Text(t)) if in_item => {
                if let Ok(text) = t.unescape() {
                    let text = text.trim();
                    match field {
                        Some("title") if title.is_empty() => title = text.to_string(),
                        Some("link") if url.is_empty() => url = text.to_string(),
                        Some("published") if published.is_empty() => {
                            published = text.to_string()
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"item" | b"entry" => {
                    in_item = false;
                    if !url.is_empty() {
                        entries.push(FeedEntry {
                            url: std::mem::take(&mut url),
                            title: std::mem::take(&mut title),
                            published_at: parse_feed_date(&published),
                        });
                    }
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }
    entries
}

fn parse_feed_date(value: &str) -> Option<DateTime<Utc>> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Conventional sitemap locations for a domain.
pub fn candidate_sitemaps(domain: &str) -> Vec<String> {
    vec![
        format!("https://{}/sitemap.xml", domain),
        format!("https://{}/sitemap_index.xml", domain),
    ]
}

/// Conventional feed locations for a domain.
pub fn candidate_feeds(domain: &str) -> Vec<String> {
    ["/feed", "/rss.xml", "/atom.xml"]
        .iter()
        .map(|suffix| format!("https://{}{}", domain, suffix))
        .collect()
}

// ---------------------------------------------------------------------------
// Code-host API

/// Summary of a repository on a code-hosting platform.
#[derive(Debug, Clone)]
pub struct RepositoryInfo {
    pub repository: String,
    pub url: String,
    pub license: Option<String>,
    pub description: String,
}

/// Minimal client for a GitHub-style REST API.
pub struct CodeHostClient {
    http: Arc<HttpScraper>,
    api_base: String,
}

impl CodeHostClient {
    pub fn new(http: Arc<HttpScraper>, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch metadata for `owner/name` (or a repository URL).
    pub async fn repository(&self, repo: &str) -> Result<Option<RepositoryInfo>, ScrapeError> {
        let Some((owner, name)) = parse_repository(repo) else {
            return Ok(None);
        };
        let api_url = format!("{}/repos/{}/{}", self.api_base, owner, name);
        let raw = self.http.fetch_raw(&api_url).await?;
        let Ok(data) = serde_json::from_slice::<serde_json::Value>(&raw) else {
            return Ok(None);
        };

        let license = data
            .get("license")
            .and_then(|l| {
                l.get("spdx_id")
                    .or_else(|| l.get("name"))
                    .or_else(|| l.get("key"))
            })
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty() && *s != "NOASSERTION")
            .map(|s| s.to_string());
        let description = data
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let url = data
            .get("html_url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("https://github.com/{}/{}", owner, name));

        Ok(Some(RepositoryInfo {
            repository: format!("{}/{}", owner, name),
            url,
            license,
            description,
        }))
    }
}

/// Split `owner/name`, `host/owner/name`, or a repository URL into its parts.
pub fn parse_repository(repo: &str) -> Option<(String, String)> {
    let path = match reqwest::Url::parse(repo) {
        Ok(url) => url.path().trim_matches('/').to_string(),
        Err(_) => {
            let trimmed = repo.trim_matches('/');
            // host/owner/name → owner/name
            let parts: Vec<&str> = trimmed.split('/').collect();
            match parts.len() {
                2 => trimmed.to_string(),
                3 => parts[1..].join("/"),
                _ => return None,
            }
        }
    };
    let mut parts = path.split('/');
    let owner = parts.next()?.trim();
    let name = parts.next()?.trim();
    if owner.is_empty() || name.is_empty() {
        return None;
    }
    Some((owner.to_string(), name.to_string()))
}

// ---------------------------------------------------------------------------
// Discovery

/// Produces the cycle's crawl candidates. The seam the scheduler's tests
/// replace with a canned list.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self, policy: &PolicyDocument) -> Result<Vec<CrawlCandidate>>;
}

/// Default discovery over sitemaps, feeds, and code-host repositories.
pub struct WebDiscovery {
    http: Arc<HttpScraper>,
    codehost: CodeHostClient,
}

impl WebDiscovery {
    pub fn new(http: Arc<HttpScraper>, api_base: impl Into<String>) -> Self {
        let codehost = CodeHostClient::new(http.clone(), api_base);
        Self { http, codehost }
    }
}

#[async_trait]
impl Discovery for WebDiscovery {
    async fn discover(&self, policy: &PolicyDocument) -> Result<Vec<CrawlCandidate>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates = Vec::new();

        for entry in &policy.allowlist_domains {
            if entry.contains('/') {
                // Repository spec: resolve through the code-host API.
                match self.codehost.repository(entry).await {
                    Ok(Some(info)) => {
                        if seen.insert(info.url.clone()) {
                            candidates.push(CrawlCandidate::new(info.url, SourceKind::CodeHost));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(repo = entry.as_str(), error = %e, "code-host discovery failed");
                    }
                }
                continue;
            }

            for sitemap_url in candidate_sitemaps(entry) {
                let Ok(raw) = self.http.fetch_raw(&sitemap_url).await else {
                    continue;
                };
                for url in parse_sitemap(&String::from_utf8_lossy(&raw)) {
                    let allowed = domain_of(&url)
                        .map(|d| policy.is_domain_allowed(&d))
                        .unwrap_or(false);
                    if allowed && seen.insert(url.clone()) {
                        candidates.push(CrawlCandidate::new(url, SourceKind::Sitemap));
                    }
                }
            }

            for feed_url in candidate_feeds(entry) {
                let Ok(raw) = self.http.fetch_raw(&feed_url).await else {
                    continue;
                };
                for item in parse_feed(&String::from_utf8_lossy(&raw)) {
                    let allowed = domain_of(&item.url)
                        .map(|d| policy.is_domain_allowed(&d))
                        .unwrap_or(false);
                    if allowed && seen.insert(item.url.clone()) {
                        candidates.push(CrawlCandidate::new(item.url, SourceKind::Http));
                    }
                }
            }
        }

        Ok(candidates)
    }
}

// ---------------------------------------------------------------------------
// Scraper dispatch

/// Scraper for code-host candidates: the repository's API metadata stands
/// in for page content, with the platform-declared license attached.
pub struct CodeHostScraper {
    client: CodeHostClient,
}

impl CodeHostScraper {
    pub fn new(client: CodeHostClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Scraper for CodeHostScraper {
    async fn fetch(&self, candidate: &CrawlCandidate) -> Result<FetchOutcome, ScrapeError> {
        let Some(info) = self.client.repository(&candidate.url).await? else {
            return Err(ScrapeError::Url(candidate.url.clone()));
        };
        let body = format!("{} {}", info.repository, info.description);
        let body = body.trim().to_string();
        let content_hash = sha256_hex(&body);
        Ok(FetchOutcome::Fetched(FetchResult {
            url: info.url,
            status: 200,
            etag: None,
            last_modified: None,
            raw_len: body.len() as u64,
            body,
            content_hash,
            license: info.license,
            fetched_at: Utc::now(),
        }))
    }
}

/// Tagged dispatch over the scraper variants, selected by the candidate's
/// explicit [`SourceKind`].
pub struct ScraperRouter {
    http: Arc<HttpScraper>,
    codehost: CodeHostScraper,
}

impl ScraperRouter {
    pub fn new(http: Arc<HttpScraper>, api_base: impl Into<String>) -> Self {
        let codehost = CodeHostScraper::new(CodeHostClient::new(http.clone(), api_base));
        Self { http, codehost }
    }
}

#[async_trait]
impl Scraper for ScraperRouter {
    async fn fetch(&self, candidate: &CrawlCandidate) -> Result<FetchOutcome, ScrapeError> {
        match candidate.source_kind {
            SourceKind::Http | SourceKind::Sitemap => self.http.fetch(candidate).await,
            SourceKind::CodeHost => self.codehost.fetch(candidate).await,
        }
    }
}
