use anyhow::{bail, Result};
use serde_json::json;

use crate::search::notes::Note;
use crate::server::VaultServer;
use crate::store::family::{Conversations, Family, Workspaces};
use crate::store::locks::CancelFlag;

#[derive(Clone, Copy)]
struct Families {
    conversations: bool,
    workspaces: bool,
}

fn families(name: Option<&str>) -> Result<Families> {
    Ok(match name.map(str::to_lowercase).as_deref() {
        None | Some("") | Some("all") => Families { conversations: true, workspaces: true },
        Some("conversations") => Families { conversations: true, workspaces: false },
        Some("workspaces") => Families { conversations: false, workspaces: true },
        Some(other) => bail!("unknown entity family: {}", other),
    })
}

impl VaultServer {
    pub async fn do_verify(&self, family: Option<&str>) -> Result<serde_json::Value> {
        let which = families(family)?;
        let mut out = serde_json::Map::new();
        let mut total = 0;

        if which.conversations {
            let found = self.store.conversation_index.verify().await?;
            total += found.len();
            out.insert(Conversations::DIR.into(), serde_json::to_value(found)?);
        }
        if which.workspaces {
            let found = self.store.workspace_index.verify().await?;
            total += found.len();
            out.insert(Workspaces::DIR.into(), serde_json::to_value(found)?);
        }
        Ok(json!({ "consistent": total == 0, "discrepancies": out }))
    }

    pub async fn do_repair(
        &self,
        family: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<serde_json::Value> {
        let which = families(family)?;
        let mut reports = Vec::new();
        if which.conversations {
            reports.push(self.store.conversation_index.repair(cancel).await?);
        }
        if which.workspaces {
            reports.push(self.store.workspace_index.repair(cancel).await?);
        }
        Ok(json!({ "repairs": reports }))
    }

    pub async fn do_migrate(
        &self,
        status_only: bool,
        cancel: &CancelFlag,
    ) -> Result<serde_json::Value> {
        if status_only {
            return Ok(json!({ "state": self.store.migration.status().await? }));
        }
        let outcome = self.store.migration.run(cancel).await?;
        Ok(json!({ "migration": outcome }))
    }

    /// Push every markdown note into the vector collection.
    pub async fn do_embed(&self, cancel: &CancelFlag) -> Result<serde_json::Value> {
        let Some(vectors) = self.store.vectors.as_ref() else {
            bail!("semantic backend is not configured (set QDRANT_URL)");
        };

        let mut embedded = 0;
        let mut failed = Vec::new();
        for path in self.store.vault.walk("").await? {
            if cancel.is_cancelled() {
                break;
            }
            if !path.ends_with(".md") {
                continue;
            }
            let Some(bytes) = self.store.vault.read(&path).await? else {
                continue;
            };
            let note = Note::parse(&path, &String::from_utf8_lossy(&bytes));
            if note.body.trim().is_empty() {
                continue;
            }
            let tags: Vec<String> = note.tags.iter().cloned().collect();
            match vectors.upsert_note(&path, &note.body, &tags, &note.properties).await {
                Ok(()) => embedded += 1,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "embedding failed");
                    failed.push(path);
                }
            }
        }
        tracing::info!(embedded, failed = failed.len(), "vault notes embedded");
        Ok(json!({ "embedded": embedded, "failed": failed }))
    }
}
