//! Content-addressable cache for generated artifacts.
//!
//! The fingerprint is a pure function of the canonicalized generation
//! parameters, so equivalent requests collide to the same key and the
//! expensive pipeline runs at most once per fingerprint. Blobs are
//! written through to disk next to a JSON metadata index.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::Result;

const INDEX_FILE: &str = "cache_metadata.json";

/// Canonicalized generation parameters hashed into a cache key.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyParams {
    pub prompt: String,
    pub steps: u32,
    pub guidance: f32,
    pub width: u32,
    pub height: u32,
    /// Any further parameters that affect output bytes. A BTreeMap
    /// keeps the hash independent of insertion order.
    pub extra: BTreeMap<String, String>,
}

/// Per-entry bookkeeping persisted in the metadata index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub created_at: u64,
    pub last_accessed: u64,
    pub access_count: u64,
    pub size_bytes: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub total_accesses: u64,
}

pub struct ContentCache {
    dir: PathBuf,
    index: RwLock<HashMap<String, CacheEntryMeta>>,
}

impl ContentCache {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let index = load_index(&dir.join(INDEX_FILE));
        Ok(Self {
            dir,
            index: RwLock::new(index),
        })
    }

    /// Deterministic fingerprint over generation parameters.
    pub fn key_for(params: &CacheKeyParams) -> String {
        let mut canonical = format!(
            "{}\n{}\n{}\n{}x{}",
            params.prompt, params.steps, params.guidance, params.width, params.height
        );
        for (key, value) in &params.extra {
            canonical.push('\n');
            canonical.push_str(key);
            canonical.push('=');
            canonical.push_str(value);
        }

        let digest = Sha256::digest(canonical.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Fetch a cached blob, bumping its access statistics on hit.
    pub fn lookup(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.blob_path(key);
        let Ok(blob) = fs::read(&path) else {
            debug!(key, "cache miss");
            return None;
        };

        {
            let mut index = self.index.write().expect("cache index lock poisoned");
            if let Some(meta) = index.get_mut(key) {
                meta.last_accessed = unix_now();
                meta.access_count += 1;
            }
            self.persist_index(&index);
        }

        debug!(key, "cache hit");
        Some(blob)
    }

    /// Write a blob through to disk and record it in the index. Two
    /// racing computations of the same fingerprint produce identical
    /// bytes, so last-writer-wins is safe.
    pub fn store(&self, key: &str, blob: &[u8], metadata: serde_json::Value) -> Result<()> {
        fs::write(self.blob_path(key), blob)?;

        let now = unix_now();
        let mut index = self.index.write().expect("cache index lock poisoned");
        index.insert(
            key.to_string(),
            CacheEntryMeta {
                created_at: now,
                last_accessed: now,
                access_count: 1,
                size_bytes: blob.len() as u64,
                metadata,
            },
        );
        self.persist_index(&index);
        debug!(key, size = blob.len(), "cached artifact");
        Ok(())
    }

    /// Remove entries older than `max_age`, deleting blob and metadata
    /// together. Returns how many entries were removed.
    pub fn sweep(&self, max_age: Duration) -> Result<usize> {
        let cutoff = unix_now().saturating_sub(max_age.as_secs());
        let mut index = self.index.write().expect("cache index lock poisoned");

        let expired: Vec<String> = index
            .iter()
            .filter(|(_, meta)| meta.created_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            let path = self.blob_path(key);
            if path.exists() {
                fs::remove_file(&path)?;
            }
            index.remove(key);
        }

        if !expired.is_empty() {
            self.persist_index(&index);
            info!(removed = expired.len(), "swept old cache entries");
        }
        Ok(expired.len())
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.index.read().expect("cache index lock poisoned");
        CacheStats {
            total_entries: index.len(),
            total_size_bytes: index.values().map(|m| m.size_bytes).sum(),
            total_accesses: index.values().map(|m| m.access_count).sum(),
        }
    }

    pub fn entry_meta(&self, key: &str) -> Option<CacheEntryMeta> {
        self.index
            .read()
            .expect("cache index lock poisoned")
            .get(key)
            .cloned()
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.png"))
    }

    fn persist_index(&self, index: &HashMap<String, CacheEntryMeta>) {
        let path = self.dir.join(INDEX_FILE);
        match serde_json::to_vec_pretty(index) {
            Ok(bytes) => {
                if let Err(e) = fs::write(&path, bytes) {
                    warn!(error = %e, "failed to persist cache index");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize cache index"),
        }
    }
}

fn load_index(path: &PathBuf) -> HashMap<String, CacheEntryMeta> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(error = %e, "cache index corrupt, starting empty");
            HashMap::new()
        }),
        Err(_) => HashMap::new(),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_cache() -> ContentCache {
        let dir = std::env::temp_dir().join(format!("reverie-cache-{}", Uuid::new_v4()));
        ContentCache::new(dir).unwrap()
    }

    fn params(prompt: &str, steps: u32) -> CacheKeyParams {
        CacheKeyParams {
            prompt: prompt.to_string(),
            steps,
            guidance: 0.0,
            width: 1024,
            height: 1024,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn key_is_stable_and_order_independent() {
        let mut a = params("a castle at dusk", 4);
        a.extra.insert("style".to_string(), "cinematic".to_string());
        a.extra.insert("seed".to_string(), "42".to_string());

        let mut b = params("a castle at dusk", 4);
        b.extra.insert("seed".to_string(), "42".to_string());
        b.extra.insert("style".to_string(), "cinematic".to_string());

        assert_eq!(ContentCache::key_for(&a), ContentCache::key_for(&b));
    }

    #[test]
    fn changing_one_parameter_changes_the_key() {
        let base = params("a castle at dusk", 4);
        let more_steps = params("a castle at dusk", 8);
        assert_ne!(
            ContentCache::key_for(&base),
            ContentCache::key_for(&more_steps)
        );
    }

    #[test]
    fn store_then_lookup_round_trips() {
        let cache = temp_cache();
        let key = ContentCache::key_for(&params("round trip", 4));
        let blob = b"png-bytes".to_vec();

        cache
            .store(&key, &blob, serde_json::json!({"prompt": "round trip"}))
            .unwrap();
        assert_eq!(cache.lookup(&key).unwrap(), blob);
    }

    #[test]
    fn hits_advance_access_statistics() {
        let cache = temp_cache();
        let key = ContentCache::key_for(&params("stats", 4));
        cache.store(&key, b"blob", serde_json::Value::Null).unwrap();

        cache.lookup(&key);
        cache.lookup(&key);

        let meta = cache.entry_meta(&key).unwrap();
        assert_eq!(meta.access_count, 3);
    }

    #[test]
    fn miss_returns_none() {
        let cache = temp_cache();
        assert!(cache.lookup("no-such-key").is_none());
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let cache = temp_cache();
        let old_key = "old".to_string();
        let new_key = "new".to_string();
        cache.store(&old_key, b"old", serde_json::Value::Null).unwrap();
        cache.store(&new_key, b"new", serde_json::Value::Null).unwrap();

        // Age the first entry artificially.
        {
            let mut index = cache.index.write().unwrap();
            index.get_mut(&old_key).unwrap().created_at = 0;
        }

        let removed = cache.sweep(Duration::from_secs(60)).unwrap();
        assert_eq!(removed, 1);
        assert!(cache.lookup(&old_key).is_none());
        assert!(cache.lookup(&new_key).is_some());
    }

    #[test]
    fn index_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("reverie-cache-{}", Uuid::new_v4()));
        let key = ContentCache::key_for(&params("persist", 4));
        {
            let cache = ContentCache::new(dir.clone()).unwrap();
            cache.store(&key, b"blob", serde_json::Value::Null).unwrap();
        }
        let reopened = ContentCache::new(dir).unwrap();
        assert_eq!(reopened.stats().total_entries, 1);
        assert_eq!(reopened.lookup(&key).unwrap(), b"blob".to_vec());
    }
}
