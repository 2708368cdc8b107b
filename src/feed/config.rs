// src/feed/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::feed::types::SourceId;

const ENV_PATH: &str = "FEED_CONFIG_PATH";
const ENV_BEARER_TOKEN: &str = "FEED_BEARER_TOKEN";
const ENV_STALENESS_SECS: &str = "FEED_STALENESS_SECS";
const ENV_PULL_TIMEOUT_SECS: &str = "FEED_PULL_TIMEOUT_SECS";

pub const DEFAULT_CONFIG_TOML: &str = "config/feed.toml";
pub const DEFAULT_CONFIG_JSON: &str = "config/feed.json";

/// Accounts followed when nothing else is configured.
const DEFAULT_TRACKED: [&str; 3] = ["724478906829426688", "146569971", "141379865"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Followed upstream identities; order is the pull order.
    pub tracked_sources: Vec<String>,
    /// Items kept per source per refresh.
    pub pull_limit: usize,
    /// Freshness window of the recency cache.
    pub staleness_secs: u64,
    pub pull_timeout_secs: u64,
    /// Hard cap on cached items across all merges.
    pub cache_max_items: usize,
    /// Per-viewer outbound queue length.
    pub viewer_buffer: usize,
    /// Name of the event carried by every outbound frame.
    pub event_name: String,
    pub api_base: String,
    pub stream_rule_tag: String,
    /// "ENV" means: read from FEED_BEARER_TOKEN.
    pub bearer_token: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            tracked_sources: DEFAULT_TRACKED.iter().map(|s| s.to_string()).collect(),
            pull_limit: 4,
            staleness_secs: 15 * 60,
            pull_timeout_secs: 8,
            cache_max_items: 200,
            viewer_buffer: 64,
            event_name: "tweets".to_string(),
            api_base: "https://api.twitter.com".to_string(),
            stream_rule_tag: "supplymap-tracked".to_string(),
            bearer_token: "ENV".to_string(),
        }
    }
}

impl FeedConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading feed config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing feed config {}", path.display()))?;
        cfg.finalize()
    }

    /// Load using env var + fallbacks:
    /// 1) $FEED_CONFIG_PATH
    /// 2) config/feed.toml
    /// 3) config/feed.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        for candidate in [DEFAULT_CONFIG_TOML, DEFAULT_CONFIG_JSON] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        Self::default().finalize()
    }

    /// Clean the tracked list, apply env overrides and validate.
    fn finalize(mut self) -> Result<Self> {
        self.tracked_sources = clean_sources(self.tracked_sources);
        if self.tracked_sources.is_empty() {
            bail!("feed config has no tracked sources");
        }

        if let Some(v) = parse_secs_env(std::env::var(ENV_STALENESS_SECS).ok()) {
            self.staleness_secs = v;
        }
        if let Some(v) = parse_secs_env(std::env::var(ENV_PULL_TIMEOUT_SECS).ok()) {
            self.pull_timeout_secs = v;
        }

        if self.pull_limit == 0 {
            bail!("pull_limit must be at least 1");
        }
        if self.pull_timeout_secs == 0 {
            self.pull_timeout_secs = Self::default().pull_timeout_secs;
        }
        if self.viewer_buffer == 0 {
            self.viewer_buffer = Self::default().viewer_buffer;
        }
        // The cap must hold at least one full refresh.
        let one_cycle = self.pull_limit * self.tracked_sources.len();
        if self.cache_max_items < one_cycle {
            self.cache_max_items = one_cycle;
        }
        Ok(self)
    }

    pub fn tracked(&self) -> Vec<SourceId> {
        self.tracked_sources.iter().cloned().map(SourceId::from).collect()
    }

    pub fn staleness(&self) -> chrono::Duration {
        // chrono caps durations at i64::MAX milliseconds
        let secs = self.staleness_secs.min((i64::MAX / 1000) as u64);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    /// Resolve the provider credential; "ENV" reads FEED_BEARER_TOKEN.
    pub fn resolve_bearer_token(&self) -> Result<String> {
        let raw = self.bearer_token.trim();
        if raw.eq_ignore_ascii_case("env") {
            let token = std::env::var(ENV_BEARER_TOKEN)
                .map_err(|_| anyhow!("Missing {ENV_BEARER_TOKEN} env var"))?;
            if token.trim().is_empty() {
                bail!("{ENV_BEARER_TOKEN} is empty");
            }
            return Ok(token.trim().to_string());
        }
        if raw.is_empty() {
            bail!("feed config has an empty bearer_token");
        }
        Ok(raw.to_string())
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<FeedConfig> {
    let try_json = hint_ext == "json" || s.trim_start().starts_with('{');
    if try_json {
        if let Ok(v) = serde_json::from_str::<FeedConfig>(s) {
            return Ok(v);
        }
    }
    match toml::from_str::<FeedConfig>(s) {
        Ok(v) => Ok(v),
        Err(toml_err) if !try_json => {
            serde_json::from_str::<FeedConfig>(s).map_err(|_| anyhow!(toml_err))
        }
        Err(_) => Err(anyhow!("unsupported feed config format")),
    }
}

// parse optional seconds env; invalid values are ignored
fn parse_secs_env(raw: Option<String>) -> Option<u64> {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
}

/// Trim, drop empties and duplicates, keep first-seen order.
fn clean_sources(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_sources_keeps_first_seen_order() {
        let raw = vec![" s2 ".into(), "".into(), "s1".into(), "s2".into()];
        assert_eq!(clean_sources(raw), vec!["s2".to_string(), "s1".to_string()]);
    }

    #[test]
    fn toml_and_json_both_parse() {
        let toml = r#"
tracked_sources = ["a", "b"]
pull_limit = 3
"#;
        let t = parse_config(toml, "toml").unwrap();
        assert_eq!(t.tracked_sources, vec!["a", "b"]);
        assert_eq!(t.pull_limit, 3);
        assert_eq!(t.staleness_secs, 900);

        let json = r#"{ "tracked_sources": ["c"], "event_name": "feed" }"#;
        let j = parse_config(json, "").unwrap();
        assert_eq!(j.tracked_sources, vec!["c"]);
        assert_eq!(j.event_name, "feed");
        assert_eq!(j.pull_limit, 4);
    }

    #[test]
    fn empty_tracked_set_is_rejected() {
        let cfg = FeedConfig {
            tracked_sources: vec![" ".into()],
            ..Default::default()
        };
        assert!(cfg.finalize().is_err());
    }

    #[test]
    fn cache_cap_covers_one_refresh() {
        let cfg = FeedConfig {
            tracked_sources: vec!["a".into(), "b".into(), "c".into()],
            cache_max_items: 2,
            ..Default::default()
        }
        .finalize()
        .unwrap();
        assert_eq!(cfg.cache_max_items, 12);
    }

    #[test]
    fn literal_token_is_used_verbatim() {
        let cfg = FeedConfig {
            bearer_token: " abc ".into(),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_bearer_token().unwrap(), "abc");
    }
}
