// src/config/mod.rs
//! Relay configuration: model, validation, seed loading and surface matching.

pub mod store;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const ENV_CONFIG_PATH: &str = "FEED_RELAY_CONFIG_PATH";

pub const MAX_MESSAGES_RANGE: (u64, u64) = (1, 20);
pub const CHECK_INTERVAL_RANGE_MS: (u64, u64) = (1_000, 60_000);
pub const REFRESH_INTERVAL_RANGE_MS: (u64, u64) = (10_000, 3_600_000);

fn default_servers() -> Vec<String> {
    vec!["ws://localhost:4222".to_string()]
}
fn default_subject() -> String {
    "twitter.messages".to_string()
}
fn default_max_messages() -> u32 {
    5
}
fn default_check_interval() -> u64 {
    5_000
}
fn default_refresh_interval() -> u64 {
    300_000
}

/// Persisted relay configuration. Field names match the stored JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_servers")]
    pub nats_servers: Vec<String>,
    #[serde(default = "default_subject")]
    pub nats_subject: String,
    #[serde(default)]
    pub monitored_lists: Vec<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
    /// Poll interval in milliseconds.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default)]
    pub auto_refresh: bool,
    /// Auto-refresh interval in milliseconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nats_servers: default_servers(),
            nats_subject: default_subject(),
            monitored_lists: Vec::new(),
            enabled: false,
            max_messages: default_max_messages(),
            check_interval: default_check_interval(),
            auto_refresh: false,
            refresh_interval: default_refresh_interval(),
        }
    }
}

impl Config {
    /// Reject out-of-range or unusable values. Called before every save.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("maxMessages", self.max_messages as u64, MAX_MESSAGES_RANGE)?;
        check_range("checkInterval", self.check_interval, CHECK_INTERVAL_RANGE_MS)?;
        check_range(
            "refreshInterval",
            self.refresh_interval,
            REFRESH_INTERVAL_RANGE_MS,
        )?;

        let subject = self.nats_subject.trim();
        if subject.is_empty() {
            return Err(ConfigError::Empty {
                field: "natsSubject",
            });
        }
        if subject.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidSubject(self.nats_subject.clone()));
        }
        if self.enabled && self.nats_servers.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::Empty {
                field: "natsServers",
            });
        }
        Ok(())
    }

    /// Trim entries and drop blanks from the list fields.
    pub fn normalized(mut self) -> Self {
        self.nats_servers = clean_list(self.nats_servers);
        self.monitored_lists = clean_list(self.monitored_lists);
        self.nats_subject = self.nats_subject.trim().to_string();
        self
    }

    pub fn check_every(&self) -> Duration {
        Duration::from_millis(self.check_interval)
    }

    pub fn refresh_every(&self) -> Duration {
        Duration::from_millis(self.refresh_interval)
    }

    /// A surface is monitored when it contains one of the configured list
    /// URLs, or a configured entry contains the surface minus its query string.
    pub fn is_monitored(&self, surface: &str) -> bool {
        let bare = surface.split('?').next().unwrap_or(surface);
        if bare.is_empty() {
            return false;
        }
        self.monitored_lists
            .iter()
            .any(|l| !l.is_empty() && (surface.contains(l.as_str()) || l.contains(bare)))
    }
}

fn check_range(field: &'static str, value: u64, (min, max): (u64, u64)) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

/// Load a seed config from an explicit path (TOML or JSON).
pub fn load_seed_from(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading seed config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = parse_seed(&content, &ext)?.normalized();
    cfg.validate()
        .with_context(|| format!("seed config {} is invalid", path.display()))?;
    Ok(cfg)
}

/// Seed config used on first start:
/// 1) $FEED_RELAY_CONFIG_PATH
/// 2) config/feed_relay.toml
/// 3) config/feed_relay.json
/// 4) built-in defaults
pub fn load_seed_default() -> Result<Config> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_seed_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    for candidate in ["config/feed_relay.toml", "config/feed_relay.json"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return load_seed_from(&p);
        }
    }
    Ok(Config::default())
}

fn parse_seed(s: &str, hint_ext: &str) -> Result<Config> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing JSON seed config");
    }
    if hint_ext == "toml" {
        return toml::from_str(s).context("parsing TOML seed config");
    }
    serde_json::from_str(s)
        .or_else(|_| toml::from_str(s))
        .map_err(|_| anyhow!("unsupported seed config format"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn defaults_are_valid() {
        let c = Config::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.max_messages, 5);
        assert_eq!(c.check_interval, 5_000);
        assert_eq!(c.refresh_interval, 300_000);
        assert_eq!(c.nats_subject, "twitter.messages");
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let mut c = Config::default();
        c.max_messages = 20;
        c.check_interval = 1_000;
        c.refresh_interval = 3_600_000;
        assert!(c.validate().is_ok());

        c.max_messages = 21;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::OutOfRange {
                field: "maxMessages",
                ..
            })
        ));

        c.max_messages = 1;
        c.check_interval = 999;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::OutOfRange {
                field: "checkInterval",
                ..
            })
        ));

        c.check_interval = 60_000;
        c.refresh_interval = 9_999;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::OutOfRange {
                field: "refreshInterval",
                ..
            })
        ));
    }

    #[test]
    fn subject_must_be_single_token() {
        let mut c = Config::default();
        c.nats_subject = "a b".into();
        assert!(matches!(c.validate(), Err(ConfigError::InvalidSubject(_))));
        c.nats_subject = "  ".into();
        assert!(matches!(c.validate(), Err(ConfigError::Empty { .. })));
    }

    #[test]
    fn camel_case_json_round_trips_with_defaults() {
        let c: Config = serde_json::from_str(r#"{"natsSubject":"feed.x","maxMessages":3}"#).unwrap();
        assert_eq!(c.nats_subject, "feed.x");
        assert_eq!(c.max_messages, 3);
        assert_eq!(c.nats_servers, vec!["ws://localhost:4222".to_string()]);
        let out = serde_json::to_value(&c).unwrap();
        assert!(out.get("checkInterval").is_some());
        assert!(out.get("monitoredLists").is_some());
    }

    #[test]
    fn surface_matching_follows_list_urls() {
        let mut c = Config::default();
        c.monitored_lists = vec!["https://x.com/i/lists/123".into()];
        assert!(c.is_monitored("https://x.com/i/lists/123"));
        assert!(c.is_monitored("https://x.com/i/lists/123?s=20"));
        assert!(!c.is_monitored("https://x.com/home"));
        c.monitored_lists.clear();
        assert!(!c.is_monitored("https://x.com/i/lists/123"));
    }

    #[test]
    fn normalized_trims_and_dedups() {
        let mut c = Config::default();
        c.monitored_lists = vec![" a ".into(), "".into(), "a".into(), "b".into()];
        let c = c.normalized();
        assert_eq!(c.monitored_lists, vec!["a".to_string(), "b".to_string()]);
    }

    #[serial_test::serial]
    #[test]
    fn seed_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);

        // nothing on disk -> defaults
        assert_eq!(load_seed_default().unwrap(), Config::default());

        // TOML fallback in ./config/
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(
            tmp.path().join("config/feed_relay.toml"),
            "natsSubject = \"seed.toml\"\nmaxMessages = 7\n",
        )
        .unwrap();
        let t = load_seed_default().unwrap();
        assert_eq!(t.nats_subject, "seed.toml");
        assert_eq!(t.max_messages, 7);

        // env wins
        let p = tmp.path().join("seed.json");
        fs::write(&p, r#"{"natsSubject":"seed.env"}"#).unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        assert_eq!(load_seed_default().unwrap().nats_subject, "seed.env");
        env::remove_var(ENV_CONFIG_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
