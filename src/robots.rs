//! robots.txt exclusion policy.
//!
//! Implements the widely supported subset of the robots exclusion protocol:
//!
//! - records are groups of `User-agent` lines followed by `Allow`,
//!   `Disallow` and `Crawl-delay` lines;
//! - the group whose agent token best matches our product token wins, the
//!   `*` group is the fallback, and no matching group means allow-all;
//! - the longest matching rule decides, `Allow` wins ties;
//! - `*` matches any run of characters and a trailing `$` anchors the end;
//! - an empty `Disallow:` allows everything.

use std::time::Duration;

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

/// Parsed robots.txt rules that apply to one user agent.
#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

impl RobotsPolicy {
    /// A policy that allows every URL (missing or unreadable robots.txt).
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse a robots.txt body for `user_agent` (e.g. `sitechat/0.1.0`).
    pub fn parse(body: &str, user_agent: &str) -> Self {
        let token = product_token(user_agent);
        let groups = parse_groups(body);

        let mut best: Option<(usize, Vec<&Group>)> = None;
        let mut wildcard: Vec<&Group> = Vec::new();
        for group in &groups {
            for agent in &group.agents {
                if agent == "*" {
                    wildcard.push(group);
                    continue;
                }
                if !token.is_empty() && token.contains(agent.as_str()) {
                    match &mut best {
                        Some((len, list)) if agent.len() == *len => list.push(group),
                        Some((len, _)) if agent.len() < *len => {}
                        _ => best = Some((agent.len(), vec![group])),
                    }
                }
            }
        }

        let chosen = match best {
            Some((_, list)) => list,
            None => wildcard,
        };

        let mut policy = Self::default();
        for group in chosen {
            policy.rules.extend(group.rules.iter().cloned());
            if group.crawl_delay > policy.crawl_delay {
                policy.crawl_delay = group.crawl_delay;
            }
        }
        policy
    }

    /// Whether `url` may be fetched.
    pub fn is_allowed(&self, url: &Url) -> bool {
        let mut target = url.path().to_string();
        if let Some(q) = url.query() {
            target.push('?');
            target.push_str(q);
        }

        let mut verdict: Option<(usize, bool)> = None;
        for rule in &self.rules {
            if !pattern_matches(&rule.pattern, &target) {
                continue;
            }
            let len = rule.pattern.len();
            verdict = match verdict {
                None => Some((len, rule.allow)),
                Some((best, _)) if len > best => Some((len, rule.allow)),
                Some((best, allow)) if len == best => Some((best, allow || rule.allow)),
                keep => keep,
            };
        }
        verdict.map(|(_, allow)| allow).unwrap_or(true)
    }

    /// `Crawl-delay` requested by the site, if any.
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }
}

/// Lower-cased product name from a user-agent string (`sitechat/0.1` → `sitechat`).
fn product_token(user_agent: &str) -> String {
    user_agent
        .split(['/', ' '])
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

fn parse_groups(body: &str) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut current = Group::default();
    let mut in_agent_lines = false;

    for raw in body.lines() {
        let line = raw.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if !in_agent_lines && !current.agents.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
                current.agents.push(value.to_lowercase());
                in_agent_lines = true;
            }
            "allow" | "disallow" => {
                in_agent_lines = false;
                if current.agents.is_empty() || value.is_empty() {
                    continue;
                }
                current.rules.push(Rule {
                    allow: key == "allow",
                    pattern: value.to_string(),
                });
            }
            "crawl-delay" => {
                in_agent_lines = false;
                if let Ok(secs) = value.parse::<f64>() {
                    if secs.is_finite() && secs >= 0.0 {
                        current.crawl_delay = Some(Duration::from_secs_f64(secs));
                    }
                }
            }
            _ => {}
        }
    }

    if !current.agents.is_empty() {
        groups.push(current);
    }
    groups
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pat, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let parts: Vec<&str> = pat.split('*').collect();

    let first = parts[0];
    if !path.starts_with(first) {
        return false;
    }
    let mut pos = first.len();

    for (i, part) in parts.iter().enumerate().skip(1) {
        if anchored && i == parts.len() - 1 {
            return path.len() >= pos + part.len() && path.ends_with(part);
        }
        match path[pos..].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }

    !anchored || pos == path.len()
}
