//! Per-domain robots.txt policy with a TTL'd cache.
//!
//! The parser covers the subset the scrapers need: user-agent groups with
//! Allow/Disallow rules, longest-prefix-match precedence. A robots file
//! that cannot be fetched or parsed fails open (everything allowed), the
//! conventional behavior for missing robots policies.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
enum Rule {
    Allow(String),
    Disallow(String),
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed robots policy for one host.
#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    groups: Vec<Group>,
}

impl RobotsPolicy {
    /// Permissive policy used when robots.txt is absent or unreadable.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(body: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        let mut in_rules = false;

        for raw in body.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim().to_string();

            match field.as_str() {
                "user-agent" => {
                    if in_rules {
                        groups.push(std::mem::take(&mut current));
                        in_rules = false;
                    }
                    current.agents.push(value.to_ascii_lowercase());
                }
                "disallow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        current.rules.push(Rule::Disallow(value));
                    }
                }
                "allow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        current.rules.push(Rule::Allow(value));
                    }
                }
                _ => {}
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }

        Self { groups }
    }

    /// True iff `user_agent` may fetch `path` under this policy.
    pub fn allows(&self, user_agent: &str, path: &str) -> bool {
        let ua = user_agent.to_ascii_lowercase();
        let group = self
            .groups
            .iter()
            .find(|g| g.agents.iter().any(|a| a != "*" && ua.contains(a.as_str())))
            .or_else(|| self.groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));

        let Some(group) = group else {
            return true;
        };

        // Longest matching rule wins; Allow beats Disallow on equal length.
        let mut verdict = true;
        let mut longest = 0usize;
        for rule in &group.rules {
            let (prefix, allowed) = match rule {
                Rule::Allow(p) => (p, true),
                Rule::Disallow(p) => (p, false),
            };
            if path.starts_with(prefix.as_str()) {
                let len = prefix.len();
                if len > longest || (len == longest && allowed) {
                    longest = len;
                    verdict = allowed;
                }
            }
        }
        verdict
    }
}

/// Cache of robots policies keyed by host, refreshed after `ttl`.
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, RobotsPolicy)>>,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client, user_agent: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// True iff robots policy for the URL's host permits fetching it.
    pub async fn allows(&self, url: &reqwest::Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let policy = self.policy_for(url.scheme(), host).await;
        policy.allows(&self.user_agent, url.path())
    }

    async fn policy_for(&self, scheme: &str, host: &str) -> RobotsPolicy {
        let key = host.to_ascii_lowercase();
        {
            let entries = self.entries.lock().await;
            if let Some((fetched_at, policy)) = entries.get(&key) {
                if fetched_at.elapsed() < self.ttl {
                    return policy.clone();
                }
            }
        }

        let policy = self.fetch_policy(scheme, host).await;
        let mut entries = self.entries.lock().await;
        entries.insert(key, (Instant::now(), policy.clone()));
        policy
    }

    async fn fetch_policy(&self, scheme: &str, host: &str) -> RobotsPolicy {
        let robots_url = format!("{}://{}/robots.txt", scheme, host);
        let response = self
            .client
            .get(&robots_url)
            .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => RobotsPolicy::parse(&body),
                Err(_) => RobotsPolicy::allow_all(),
            },
            _ => {
                tracing::debug!(host, "robots.txt unavailable, failing open");
                RobotsPolicy::allow_all()
            }
        }
    }
}
