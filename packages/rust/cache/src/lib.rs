//! Durable key→artifact cache store.
//!
//! One [`CacheStore`] wraps one namespace: a sorted JSON object file on disk
//! (e.g. `reports.json`, `tickers.json`). Fetch-heavy collaborators consult
//! it before any network or LLM lookup so the same (entity, source, query)
//! is never resolved twice.
//!
//! **Durability rules:**
//! - every write goes to a temp file in the same directory, then an atomic
//!   rename — a crash mid-write never corrupts committed entries
//! - an unreadable backing file degrades to an empty cache with a warning,
//!   never a pipeline failure
//! - no TTL is enforced; callers inspect [`CacheEntry::fetched_at`] and
//!   decide staleness themselves
//!
//! Keys carry no machine-local components, so a store written on one machine
//! stays loadable on another.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use mneprofiler_shared::{ProfilerError, Result};

/// Separator between key components in the backing file. Unit-separator is
/// not expected in entity names, source names, or hex digests.
const KEY_SEP: char = '\u{1f}';

// ---------------------------------------------------------------------------
// CacheKey
// ---------------------------------------------------------------------------

/// Identifies one cached artifact: which entity, which source capability,
/// and a digest of the exact query that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Entity key (enterprise name or id).
    pub entity: String,
    /// Source/collaborator name (e.g. `web_search`, `ticker_lookup`).
    pub source: String,
    /// Hex SHA-256 of the query text.
    pub query_signature: String,
}

impl CacheKey {
    /// Build a key, hashing `query` into a machine-independent signature.
    pub fn new(entity: impl Into<String>, source: impl Into<String>, query: &str) -> Self {
        Self {
            entity: entity.into(),
            source: source.into(),
            query_signature: query_signature(query),
        }
    }

    /// Flat string form used as the JSON object key.
    fn storage_key(&self) -> String {
        format!(
            "{}{KEY_SEP}{}{KEY_SEP}{}",
            self.entity, self.source, self.query_signature
        )
    }

    /// Parse a flat storage key back into its components.
    fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, KEY_SEP);
        Some(Self {
            entity: parts.next()?.to_string(),
            source: parts.next()?.to_string(),
            query_signature: parts.next()?.to_string(),
        })
    }
}

/// Hex SHA-256 digest of a query string.
pub fn query_signature(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

/// One cached artifact. Entries are never mutated in place, only replaced
/// wholesale on explicit refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Opaque artifact: resolved URL, ticker symbol, extracted page text, ...
    pub artifact: serde_json::Value,
    /// When the artifact was fetched. Staleness is the caller's decision.
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Durable cache for one namespace, safe for concurrent fetch workers.
pub struct CacheStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, CacheEntry>>,
}

impl CacheStore {
    /// Open (or create) the store backed by the JSON file at `path`.
    ///
    /// A missing file starts empty; an unreadable or unparsable file is
    /// logged and also starts empty (corruption must not fail the pipeline).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProfilerError::io(parent, e))?;
        }

        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, CacheEntry>>(&content) {
                Ok(map) => {
                    debug!(path = %path.display(), entries = map.len(), "cache loaded");
                    map
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "cache file corrupted, degrading to empty cache"
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "cache file unreadable, degrading to empty cache"
                );
                BTreeMap::new()
            }
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Open the store for `namespace` under `dir` (file `<namespace>.json`).
    pub fn open_namespace(dir: &Path, namespace: &str) -> Result<Self> {
        Self::open(dir.join(format!("{namespace}.json")))
    }

    /// Look up one artifact. Absent keys return `None`.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().await.get(&key.storage_key()).cloned()
    }

    /// Insert or replace one artifact and persist the store.
    ///
    /// An existing key is overwritten wholesale; the atomic-rename write
    /// guarantees no partial entry is ever visible to a concurrent reader.
    pub async fn put(&self, key: &CacheKey, artifact: serde_json::Value) -> Result<()> {
        let entry = CacheEntry {
            artifact,
            fetched_at: Utc::now(),
        };

        let mut entries = self.entries.write().await;
        entries.insert(key.storage_key(), entry);
        self.persist(&entries)
    }

    /// Remove one entry (explicit refresh) and persist the store.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(&key.storage_key()).is_some() {
            info!(entity = %key.entity, source = %key.source, "cache entry invalidated");
            self.persist(&entries)?;
        }
        Ok(())
    }

    /// Number of committed entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Snapshot of all entries, for inspection tooling.
    pub async fn snapshot(&self) -> Vec<(CacheKey, CacheEntry)> {
        self.entries
            .read()
            .await
            .iter()
            .filter_map(|(raw, entry)| Some((CacheKey::parse(raw)?, entry.clone())))
            .collect()
    }

    /// Write the full sorted map to a temp file, then atomically rename it
    /// over the backing file. Called with the write lock held so persisted
    /// snapshots are totally ordered.
    fn persist(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<()> {
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| ProfilerError::Storage(format!("cache serialization failed: {e}")))?;

        let tmp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| ProfilerError::io(&parent, e))?;
        std::fs::write(tmp.path(), content).map_err(|e| ProfilerError::io(tmp.path(), e))?;

        tmp.persist(&self.path)
            .map_err(|e| ProfilerError::Storage(format!("cache rename failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> CacheStore {
        CacheStore::open_namespace(dir, "reports").expect("open store")
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());

        let key = CacheKey::new("Acme Corp", "web_search", "acme annual report 2024");
        assert!(store.get(&key).await.is_none());

        store
            .put(&key, serde_json::json!({"url": "https://acme.example.com/ar.pdf"}))
            .await
            .expect("put");

        let entry = store.get(&key).await.expect("entry present");
        assert_eq!(entry.artifact["url"], "https://acme.example.com/ar.pdf");
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key = CacheKey::new("Acme Corp", "ticker_lookup", "ACME");

        {
            let store = store_in(dir.path());
            store
                .put(&key, serde_json::json!("ACME.PA"))
                .await
                .expect("put");
        }

        let reopened = store_in(dir.path());
        let entry = reopened.get(&key).await.expect("entry survives reopen");
        assert_eq!(entry.artifact, serde_json::json!("ACME.PA"));
    }

    #[tokio::test]
    async fn overwrite_replaces_wholesale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let key = CacheKey::new("Acme Corp", "web_search", "q");

        store.put(&key, serde_json::json!("old")).await.expect("put");
        store.put(&key, serde_json::json!("new")).await.expect("put");

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&key).await.expect("entry").artifact, serde_json::json!("new"));
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let key = CacheKey::new("Acme Corp", "web_search", "q");

        store.put(&key, serde_json::json!(1)).await.expect("put");
        store.invalidate(&key).await.expect("invalidate");
        assert!(store.get(&key).await.is_none());

        let reopened = store_in(dir.path());
        assert!(reopened.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn corrupted_file_degrades_to_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reports.json");
        std::fs::write(&path, "{ this is not json").expect("write garbage");

        let store = CacheStore::open(&path).expect("open despite corruption");
        assert!(store.is_empty().await);

        // The store remains writable after degrading.
        let key = CacheKey::new("Acme Corp", "web_search", "q");
        store.put(&key, serde_json::json!(1)).await.expect("put");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_to_distinct_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = std::sync::Arc::new(store_in(dir.path()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let key = CacheKey::new(format!("Enterprise {i}"), "web_search", "q");
                store.put(&key, serde_json::json!(i)).await.expect("put");
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(store.len().await, 16);

        // Every committed entry is intact on a fresh load.
        let reopened = store_in(dir.path());
        for i in 0..16 {
            let key = CacheKey::new(format!("Enterprise {i}"), "web_search", "q");
            assert_eq!(
                reopened.get(&key).await.expect("entry").artifact,
                serde_json::json!(i)
            );
        }
    }

    #[test]
    fn query_signature_is_stable() {
        let a = query_signature("acme annual report");
        let b = query_signature("acme annual report");
        let c = query_signature("acme annual report 2024");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn storage_key_parses_back() {
        let key = CacheKey::new("Acme Corp", "web_search", "q");
        let parsed = CacheKey::parse(&key.storage_key()).expect("parse");
        assert_eq!(parsed, key);
    }
}
