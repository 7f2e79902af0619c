//! Multi-source verification: license gate, corroboration, trust scoring.
//!
//! A document is only accepted when its license is in the allowed set and
//! its normalized content was fetched independently from at least two
//! distinct domains. The two-source minimum is a hard rule; the trust
//! score parameters (base, per-source bonus, domain reputation weights)
//! are operator-tunable.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::config::VerifierConfig;
use crate::ingest::detect_language;
use crate::models::{FetchResult, VerifiedDocument};

/// Why a candidate document was not accepted. Expected outcomes, counted
/// and reported, never retried within the cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("license not permitted: {}", license.as_deref().unwrap_or("none declared"))]
    LicenseRejected { license: Option<String> },

    #[error("insufficient corroboration: {domains} independent domain(s)")]
    CorroborationRejected { domains: usize },
}

impl RejectReason {
    pub fn counter_key(&self) -> &'static str {
        match self {
            RejectReason::LicenseRejected { .. } => "license",
            RejectReason::CorroborationRejected { .. } => "corroboration",
        }
    }
}

pub struct Verifier {
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Corroborate `primary` against independently fetched `alternates`.
    ///
    /// Alternates corroborate iff their normalized content hash matches and
    /// they come from a different domain than ones already counted.
    pub fn verify(
        &self,
        primary: &FetchResult,
        alternates: &[FetchResult],
    ) -> Result<VerifiedDocument, RejectReason> {
        let license = self.effective_license(primary)?;

        let mut domains = BTreeSet::new();
        let mut corroborating_urls = BTreeSet::new();
        if let Some(domain) = primary.domain() {
            domains.insert(domain);
            corroborating_urls.insert(primary.url.clone());
        }
        for alt in alternates {
            if alt.content_hash != primary.content_hash {
                continue;
            }
            if let Some(domain) = alt.domain() {
                if domains.insert(domain) {
                    corroborating_urls.insert(alt.url.clone());
                }
            }
        }

        if domains.len() < self.config.min_sources {
            return Err(RejectReason::CorroborationRejected {
                domains: domains.len(),
            });
        }

        let trust_score = self.trust_score(domains.len(), &domains);

        Ok(VerifiedDocument {
            url: primary.url.clone(),
            title: guess_title(&primary.body),
            license,
            corroborating_urls,
            trust_score,
            content_hash: primary.content_hash.clone(),
            text: primary.body.clone(),
            language: detect_language(&primary.body),
            crawled_at: primary.fetched_at,
        })
    }

    /// Verify every distinct content hash in a cycle's fetch results.
    ///
    /// Returns one verified document per corroborated hash, plus the
    /// per-URL rejection reasons.
    pub fn verify_all(
        &self,
        fetched: &[FetchResult],
    ) -> (Vec<VerifiedDocument>, Vec<(String, RejectReason)>) {
        let mut groups: BTreeMap<&str, Vec<&FetchResult>> = BTreeMap::new();
        for result in fetched {
            groups.entry(&result.content_hash).or_default().push(result);
        }

        let mut verified = Vec::new();
        let mut rejected = Vec::new();
        for (_hash, group) in groups {
            // Representative: stable choice so re-runs verify the same URL.
            let primary = group
                .iter()
                .min_by_key(|r| r.url.clone())
                .expect("group is non-empty");
            match self.verify(primary, fetched) {
                Ok(doc) => verified.push(doc),
                Err(reason) => rejected.push((primary.url.clone(), reason)),
            }
        }
        (verified, rejected)
    }

    fn effective_license(&self, primary: &FetchResult) -> Result<String, RejectReason> {
        let declared = primary.license.clone().or_else(|| {
            primary
                .domain()
                .and_then(|d| self.config.domain_license_defaults.get(&d).cloned())
        });
        match declared {
            Some(license) if self.config.allowed_licenses.contains(&license) => Ok(license),
            other => Err(RejectReason::LicenseRejected { license: other }),
        }
    }

    /// Monotonic in corroborator count and reputation, capped at 1.0.
    fn trust_score(&self, corroborators: usize, domains: &BTreeSet<String>) -> f64 {
        let extra = corroborators.saturating_sub(self.config.min_sources) as f64;
        let reputation = domains
            .iter()
            .filter_map(|d| self.config.reputation.get(d))
            .fold(0.0f64, |acc, w| acc.max(*w));
        (self.config.base_score + extra * self.config.per_source_bonus + reputation).min(1.0)
    }
}

fn guess_title(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let title: String = first_line.chars().take(120).collect();
    let title = title.trim().to_string();
    if title.is_empty() {
        "Document".to_string()
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fetch(url: &str, body: &str, license: Option<&str>) -> FetchResult {
        FetchResult {
            url: url.to_string(),
            status: 200,
            etag: None,
            last_modified: None,
            body: body.to_string(),
            raw_len: body.len() as u64,
            content_hash: crate::scrape::sha256_hex(body),
            license: license.map(|s| s.to_string()),
            fetched_at: Utc::now(),
        }
    }

    fn verifier() -> Verifier {
        Verifier::new(VerifierConfig::default())
    }

    #[test]
    fn test_two_independent_domains_accepted() {
        let a = fetch("https://example.org/a", "shared content", Some("Apache-2.0"));
        let b = fetch("https://mirror.example.net/a", "shared content", None);
        let doc = verifier().verify(&a, &[b]).unwrap();
        assert!(doc.trust_score > 0.5);
        assert_eq!(doc.license, "Apache-2.0");
        assert_eq!(doc.corroborating_urls.len(), 2);
    }

    #[test]
    fn test_single_source_always_rejected() {
        let a = fetch("https://example.org/a", "lone content", Some("MIT"));
        let err = verifier().verify(&a, &[]).unwrap_err();
        assert!(matches!(err, RejectReason::CorroborationRejected { domains: 1 }));
    }

    #[test]
    fn test_same_domain_does_not_corroborate() {
        let a = fetch("https://example.org/a", "dup content", Some("MIT"));
        let b = fetch("https://example.org/b", "dup content", Some("MIT"));
        let err = verifier().verify(&a, &[b]).unwrap_err();
        assert!(matches!(err, RejectReason::CorroborationRejected { .. }));
    }

    #[test]
    fn test_mismatched_content_does_not_corroborate() {
        let a = fetch("https://example.org/a", "content one", Some("MIT"));
        let b = fetch("https://other.net/a", "content two", Some("MIT"));
        let err = verifier().verify(&a, &[b]).unwrap_err();
        assert!(matches!(err, RejectReason::CorroborationRejected { .. }));
    }

    #[test]
    fn test_license_rejection() {
        let a = fetch("https://example.org/a", "text", Some("proprietary"));
        let b = fetch("https://other.net/a", "text", Some("proprietary"));
        let err = verifier().verify(&a, &[b]).unwrap_err();
        assert!(matches!(err, RejectReason::LicenseRejected { .. }));
    }

    #[test]
    fn test_domain_default_license_applies() {
        let mut config = VerifierConfig::default();
        config
            .domain_license_defaults
            .insert("example.org".into(), "CC-BY-4.0".into());
        let verifier = Verifier::new(config);

        let a = fetch("https://example.org/a", "text", None);
        let b = fetch("https://other.net/a", "text", Some("CC-BY-4.0"));
        let doc = verifier.verify(&a, &[b]).unwrap();
        assert_eq!(doc.license, "CC-BY-4.0");
    }

    #[test]
    fn test_trust_score_monotonic_in_corroborators() {
        let v = verifier();
        let a = fetch("https://a.org/x", "text", Some("MIT"));
        let b = fetch("https://b.org/x", "text", None);
        let c = fetch("https://c.org/x", "text", None);

        let two = v.verify(&a, std::slice::from_ref(&b)).unwrap().trust_score;
        let three = v.verify(&a, &[b, c]).unwrap().trust_score;
        assert!(three > two);
        assert!(three <= 1.0);
    }

    #[test]
    fn test_reputation_raises_score() {
        let a = fetch("https://a.org/x", "text", Some("MIT"));
        let b = fetch("https://b.org/x", "text", None);

        let plain = verifier()
            .verify(&a, std::slice::from_ref(&b))
            .unwrap()
            .trust_score;

        let mut config = VerifierConfig::default();
        config.reputation.insert("a.org".into(), 0.2);
        let reputed = Verifier::new(config)
            .verify(&a, std::slice::from_ref(&b))
            .unwrap()
            .trust_score;
        assert!(reputed > plain);
    }

    #[test]
    fn test_verify_all_groups_by_hash() {
        let v = verifier();
        let fetched = vec![
            fetch("https://a.org/x", "agreed", Some("MIT")),
            fetch("https://b.org/x", "agreed", None),
            fetch("https://c.org/only", "unique", Some("MIT")),
        ];
        let (verified, rejected) = v.verify_all(&fetched);
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].url, "https://a.org/x");
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].1.counter_key(), "corroboration");
    }
}
