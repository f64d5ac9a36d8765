use std::io::Write;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Result, StoreError};

/// Blob storage the rest of the crate is written against. Paths are
/// `/`-separated and relative to the vault root.
#[async_trait]
pub trait Vault: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the whole blob. Readers never observe a half-written file.
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Returns whether something was removed.
    async fn delete(&self, path: &str) -> Result<bool>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// File names directly inside `dir`, sorted. A missing directory is empty.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;

    /// Every file below `dir` as vault-relative paths, sorted.
    async fn walk(&self, dir: &str) -> Result<Vec<String>>;
}

pub struct FsVault {
    root: PathBuf,
    /// Directories under the root that `walk("")` skips (the store's own data).
    hidden: Vec<String>,
}

impl FsVault {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            hidden: Vec::new(),
        }
    }

    pub fn hiding(mut self, dir: impl Into<String>) -> Self {
        self.hidden.push(dir.into());
        self
    }

    /// Map a vault path onto the filesystem. Every segment must be a plain
    /// name, so nothing resolves outside the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut out = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let mut components = Path::new(part).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(name)), None) if !part.contains('\\') => out.push(name),
                _ => return Err(StoreError::InvalidPath(path.to_string())),
            }
        }
        Ok(out)
    }
}

/// Write through a temp file in the target's directory, synced before the
/// rename. Concurrent writers each get their own temp file.
fn write_atomic(target: &Path, data: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| StoreError::InvalidPath(target.display().to_string()))?;
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn join_error(e: tokio::task::JoinError) -> StoreError {
    std::io::Error::new(std::io::ErrorKind::Other, e).into()
}

#[async_trait]
impl Vault for FsVault {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.resolve(path)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || write_atomic(&target, &data))
            .await
            .map_err(join_error)?
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.resolve(path)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)?).await?)
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(self.resolve(dir)?).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn walk(&self, dir: &str) -> Result<Vec<String>> {
        let base = self.resolve(dir)?;
        let root = self.root.clone();
        let hidden = self.hidden.clone();
        // walkdir is blocking; keep it off the async workers
        let paths = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            let walker = walkdir::WalkDir::new(&base)
                .into_iter()
                .filter_entry(|e| {
                    let name = e.file_name().to_string_lossy();
                    let skipped = name.starts_with('.')
                        || hidden.iter().any(|h| h.as_str() == name.as_ref());
                    e.depth() == 0 || !skipped
                });
            for entry in walker.filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Ok(rel) = entry.path().strip_prefix(&root) {
                    let parts: Vec<String> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().to_string())
                        .collect();
                    out.push(parts.join("/"));
                }
            }
            out.sort();
            out
        })
        .await
        .map_err(join_error)?;
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new(dir.path());

        assert_eq!(vault.read("a/b.json").await.unwrap(), None);
        vault.write("a/b.json", b"{}").await.unwrap();
        assert!(vault.exists("a/b.json").await.unwrap());
        assert_eq!(vault.read("a/b.json").await.unwrap(), Some(b"{}".to_vec()));
        assert_eq!(vault.list("a").await.unwrap(), vec!["b.json".to_string()]);

        assert!(vault.delete("a/b.json").await.unwrap());
        assert!(!vault.delete("a/b.json").await.unwrap());
        assert!(vault.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn walk_skips_dot_and_hidden_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new(dir.path()).hiding("data");
        vault.write("notes/one.md", b"# one").await.unwrap();
        vault.write(".obsidian/config", b"x").await.unwrap();
        vault.write("data/conversations/c1.json", b"{}").await.unwrap();
        vault.write("two.md", b"# two").await.unwrap();

        let files = vault.walk("").await.unwrap();
        assert_eq!(files, vec!["notes/one.md".to_string(), "two.md".to_string()]);
    }

    #[tokio::test]
    async fn paths_cannot_leave_the_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("outside.md"), "secret").unwrap();
        let root = dir.path().join("vault");
        let vault = FsVault::new(&root);
        vault.write("inside.md", b"ok").await.unwrap();

        for path in ["../outside.md", "notes/../../outside.md", "..", "a\\..\\b.md"] {
            assert!(
                matches!(vault.read(path).await, Err(StoreError::InvalidPath(_))),
                "{path}"
            );
        }
        assert!(vault.write("../escape.md", b"x").await.is_err());
        assert!(!dir.path().join("escape.md").exists());
        // a leading slash is still vault-relative
        assert_eq!(vault.read("/inside.md").await.unwrap(), Some(b"ok".to_vec()));
    }

    #[tokio::test]
    async fn concurrent_writes_leave_one_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let vault = std::sync::Arc::new(FsVault::new(dir.path()));
        let bodies: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'a' + i; 4096]).collect();

        let tasks: Vec<_> = bodies
            .iter()
            .cloned()
            .map(|body| {
                let vault = vault.clone();
                tokio::spawn(async move { vault.write("data/c1.json", &body).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = vault.read("data/c1.json").await.unwrap().unwrap();
        assert!(bodies.contains(&stored));
        assert_eq!(vault.list("data").await.unwrap(), vec!["c1.json".to_string()]);
    }
}
