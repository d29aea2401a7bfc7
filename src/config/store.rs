// src/config/store.rs
//! Key/value persistence for the relay config and per-surface watermarks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;

use super::Config;

/// Persisted per-surface state. The surface identifier is stored alongside
/// the watermark and checked on load, so two surfaces never share state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceState {
    pub surface: String,
    pub last_timestamp: i64,
}

/// Storage key for a surface: full SHA-256 of the identifier.
pub fn surface_key(surface: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(surface.as_bytes());
    let mut out = String::with_capacity(14 + 64);
    out.push_str("lastTimestamp_");
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// `None` when nothing has been saved yet.
    async fn load_config(&self) -> Result<Option<Config>>;
    async fn save_config(&self, cfg: &Config) -> Result<()>;

    async fn load_surface(&self, key: &str) -> Result<Option<SurfaceState>>;
    async fn save_surface(&self, key: &str, state: &SurfaceState) -> Result<()>;
}

/// Last persisted watermark for `surface`, 0 when absent. A record stored
/// under the key but belonging to another surface is ignored.
pub async fn load_watermark(store: &dyn ConfigStore, surface: &str) -> Result<i64> {
    let key = surface_key(surface);
    match store.load_surface(&key).await? {
        Some(st) if st.surface == surface => Ok(st.last_timestamp),
        Some(st) => {
            tracing::warn!(
                %key,
                stored = %st.surface,
                requested = %surface,
                "surface state key collision; ignoring stored watermark"
            );
            Ok(0)
        }
        None => Ok(0),
    }
}

pub async fn save_watermark(store: &dyn ConfigStore, surface: &str, ts: i64) -> Result<()> {
    let state = SurfaceState {
        surface: surface.to_string(),
        last_timestamp: ts,
    };
    store.save_surface(&surface_key(surface), &state).await
}

/// JSON files under a directory: `config.json` plus one file per surface key.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn config_path(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    fn surface_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    async fn write_json<T: Serialize + Sync>(&self, path: PathBuf, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating state dir {}", self.dir.display()))?;
        let body = serde_json::to_vec_pretty(value)?;
        // write-then-rename so a crash never leaves a half-written file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(&self, path: PathBuf) -> Result<Option<T>> {
        match fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s)
                .map(Some)
                .with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn load_config(&self) -> Result<Option<Config>> {
        self.read_json(self.config_path()).await
    }

    async fn save_config(&self, cfg: &Config) -> Result<()> {
        self.write_json(self.config_path(), cfg).await
    }

    async fn load_surface(&self, key: &str) -> Result<Option<SurfaceState>> {
        self.read_json(self.surface_path(key)).await
    }

    async fn save_surface(&self, key: &str, state: &SurfaceState) -> Result<()> {
        self.write_json(self.surface_path(key), state).await
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: Mutex<Option<Config>>,
    surfaces: Mutex<HashMap<String, SurfaceState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(cfg: Config) -> Self {
        Self {
            config: Mutex::new(Some(cfg)),
            surfaces: Mutex::new(HashMap::new()),
        }
    }

    /// Raw access to a stored record, by key.
    pub fn surface_record(&self, key: &str) -> Option<SurfaceState> {
        self.surfaces
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load_config(&self) -> Result<Option<Config>> {
        Ok(self
            .config
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }

    async fn save_config(&self, cfg: &Config) -> Result<()> {
        *self.config.lock().unwrap_or_else(|p| p.into_inner()) = Some(cfg.clone());
        Ok(())
    }

    async fn load_surface(&self, key: &str) -> Result<Option<SurfaceState>> {
        Ok(self.surface_record(key))
    }

    async fn save_surface(&self, key: &str, state: &SurfaceState) -> Result<()> {
        self.surfaces
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_keys_are_distinct_and_stable() {
        let a = surface_key("https://x.com/i/lists/1");
        let b = surface_key("https://x.com/i/lists/2");
        assert_ne!(a, b);
        assert_eq!(a, surface_key("https://x.com/i/lists/1"));
        assert!(a.starts_with("lastTimestamp_"));
        assert_eq!(a.len(), "lastTimestamp_".len() + 64);
    }

    #[tokio::test]
    async fn mismatched_record_is_ignored() {
        let store = MemoryStore::new();
        let key = surface_key("surface-a");
        store
            .save_surface(
                &key,
                &SurfaceState {
                    surface: "surface-b".into(),
                    last_timestamp: 99,
                },
            )
            .await
            .unwrap();
        assert_eq!(load_watermark(&store, "surface-a").await.unwrap(), 0);

        save_watermark(&store, "surface-a", 42).await.unwrap();
        assert_eq!(load_watermark(&store, "surface-a").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state"));
        assert!(store.load_config().await.unwrap().is_none());

        let mut cfg = Config::default();
        cfg.nats_subject = "feed.file".into();
        store.save_config(&cfg).await.unwrap();
        assert_eq!(store.load_config().await.unwrap(), Some(cfg));

        save_watermark(&store, "s1", 1_700_000_000_000).await.unwrap();
        assert_eq!(load_watermark(&store, "s1").await.unwrap(), 1_700_000_000_000);
        assert_eq!(load_watermark(&store, "s2").await.unwrap(), 0);
    }
}
