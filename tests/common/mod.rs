#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use vault_memory::config::Config;
use vault_memory::error::Result;
use vault_memory::search::cascade::EmptySemanticPolicy;
use vault_memory::search::semantic::{SimilarityFilters, SimilarityResponse, VectorSimilarity};
use vault_memory::store::locks::CancelFlag;
use vault_memory::store::vault::{FsVault, Vault};
use vault_memory::store::Store;

pub const DATA_DIR: &str = ".vault-memory";

pub fn config(dir: &TempDir) -> Config {
    Config {
        vault_path: dir.path().to_path_buf(),
        data_dir: DATA_DIR.into(),
        legacy_dir: "legacy".into(),
        semantic_enabled: false,
        empty_semantic: EmptySemanticPolicy::FallBack,
        threshold: 0.7,
    }
}

pub fn fs_vault(dir: &TempDir) -> Arc<dyn Vault> {
    Arc::new(FsVault::new(dir.path()).hiding(DATA_DIR))
}

pub fn store(dir: &TempDir) -> Store {
    Store::open(fs_vault(dir), &config(dir), None)
}

pub fn store_with(dir: &TempDir, backend: Arc<dyn VectorSimilarity>) -> Store {
    Store::open(fs_vault(dir), &config(dir), Some(backend))
}

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

pub async fn write_note(vault: &Arc<dyn Vault>, path: &str, text: &str) {
    vault.write(path, text.as_bytes()).await.unwrap();
}

/// Parse a vault JSON file and drop `lastUpdated`.
pub async fn read_index(vault: &Arc<dyn Vault>, path: &str) -> serde_json::Value {
    let bytes = vault.read(path).await.unwrap().expect("index file present");
    let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    if let Some(map) = value.as_object_mut() {
        map.remove("lastUpdated");
    }
    value
}

/// Vector backend that always reports an outage.
pub struct BrokenBackend;

#[async_trait]
impl VectorSimilarity for BrokenBackend {
    async fn similarity_search(
        &self,
        _query: &str,
        _filters: &SimilarityFilters,
        _limit: usize,
        _threshold: f32,
    ) -> SimilarityResponse {
        SimilarityResponse::failed("connection refused")
    }
}

/// Forwards to a real vault and counts writes. Optionally cancels a flag
/// once a number of entity documents have been written.
pub struct CountingVault {
    inner: FsVault,
    pub writes: AtomicUsize,
    entity_writes: AtomicUsize,
    trip: Option<(CancelFlag, usize)>,
}

impl CountingVault {
    pub fn new(dir: &TempDir) -> Arc<Self> {
        Arc::new(Self {
            inner: FsVault::new(dir.path()).hiding(DATA_DIR),
            writes: AtomicUsize::new(0),
            entity_writes: AtomicUsize::new(0),
            trip: None,
        })
    }

    pub fn cancelling_after(dir: &TempDir, cancel: CancelFlag, entity_writes: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: FsVault::new(dir.path()).hiding(DATA_DIR),
            writes: AtomicUsize::new(0),
            entity_writes: AtomicUsize::new(0),
            trip: Some((cancel, entity_writes)),
        })
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Vault for CountingVault {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(path, data).await?;
        let entity = path.starts_with(&format!("{}/conversations/", DATA_DIR))
            || path.starts_with(&format!("{}/workspaces/", DATA_DIR));
        if entity && !path.ends_with("/index.json") {
            let n = self.entity_writes.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((cancel, after)) = &self.trip {
                if n >= *after {
                    cancel.cancel();
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        self.inner.delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        self.inner.list(dir).await
    }

    async fn walk(&self, dir: &str) -> Result<Vec<String>> {
        self.inner.walk(dir).await
    }
}
