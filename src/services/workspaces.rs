use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::store::family::Workspaces;
use crate::store::index::WorkspaceMetadata;
use crate::store::manager::IndexManager;
use crate::types::{MemoryTrace, Session, StateSnapshot, Workspace};

/// Field changes for [`WorkspaceService::update`]; `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub root_folder: Option<String>,
    pub is_active: Option<bool>,
    pub context: Option<serde_json::Value>,
}

/// Writes workspace documents and everything nested in them, under the
/// index manager's per-id locks.
pub struct WorkspaceService {
    index: Arc<IndexManager<Workspaces>>,
}

impl WorkspaceService {
    pub fn new(index: Arc<IndexManager<Workspaces>>) -> Self {
        Self { index }
    }

    pub fn new_id(prefix: &str) -> String {
        format!(
            "{}_{}_{}",
            prefix,
            Utc::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        )
    }

    pub async fn get(&self, id: &str) -> Result<Workspace> {
        self.index.entities().get(id).await
    }

    pub async fn create(&self, ws: Workspace) -> Result<Workspace> {
        let id = ws.id.clone();
        let ws = self
            .index
            .with_lock(&id, || async move {
                if self.index.entities().exists(&ws.id).await? {
                    return Err(StoreError::AlreadyExists {
                        kind: "workspace",
                        id: ws.id,
                    });
                }
                self.index.entities().put(&ws).await?;
                self.index.record_create_or_update(&ws).await?;
                Ok(ws)
            })
            .await?;
        info!(id = %ws.id, name = %ws.name, "workspace created");
        Ok(ws)
    }

    pub async fn start(
        &self,
        name: &str,
        root_folder: &str,
        description: Option<String>,
    ) -> Result<Workspace> {
        let now = Utc::now();
        self.create(Workspace {
            id: Self::new_id("ws"),
            name: name.to_string(),
            description,
            root_folder: root_folder.to_string(),
            created: now,
            last_accessed: now,
            is_active: true,
            context: None,
            sessions: BTreeMap::new(),
        })
        .await
    }

    pub async fn update(&self, id: &str, update: WorkspaceUpdate) -> Result<Workspace> {
        self.mutate(id, |ws| {
            if let Some(name) = update.name {
                ws.name = name;
            }
            if let Some(description) = update.description {
                ws.description = Some(description).filter(|d| !d.is_empty());
            }
            if let Some(root) = update.root_folder {
                ws.root_folder = root;
            }
            if let Some(active) = update.is_active {
                ws.is_active = active;
            }
            if let Some(context) = update.context {
                ws.context = Some(context);
            }
            Ok(())
        })
        .await
    }

    pub async fn touch(&self, id: &str) -> Result<Workspace> {
        self.mutate(id, |_| Ok(())).await
    }

    pub async fn add_session(&self, workspace_id: &str, session: Session) -> Result<Session> {
        self.mutate(workspace_id, |ws| {
            if ws.sessions.contains_key(&session.id) {
                return Err(StoreError::AlreadyExists {
                    kind: "session",
                    id: session.id.clone(),
                });
            }
            ws.sessions.insert(session.id.clone(), session.clone());
            Ok(())
        })
        .await?;
        Ok(session)
    }

    pub async fn end_session(&self, workspace_id: &str, session_id: &str) -> Result<Session> {
        let ws = self
            .mutate(workspace_id, |ws| {
                let session = session_mut(ws, session_id)?;
                session.is_active = false;
                session.end_time.get_or_insert_with(Utc::now);
                Ok(())
            })
            .await?;
        Ok(ws.sessions[session_id].clone())
    }

    /// Append a trace to a session. Existing traces are never replaced.
    pub async fn add_memory_trace(
        &self,
        workspace_id: &str,
        session_id: &str,
        trace: MemoryTrace,
    ) -> Result<MemoryTrace> {
        self.mutate(workspace_id, |ws| {
            let session = session_mut(ws, session_id)?;
            if session.memory_traces.contains_key(&trace.id) {
                return Err(StoreError::AlreadyExists {
                    kind: "memory trace",
                    id: trace.id.clone(),
                });
            }
            session.memory_traces.insert(trace.id.clone(), trace.clone());
            Ok(())
        })
        .await?;
        Ok(trace)
    }

    /// Snapshots are write-once per id.
    pub async fn add_state_snapshot(
        &self,
        workspace_id: &str,
        session_id: &str,
        state: StateSnapshot,
    ) -> Result<StateSnapshot> {
        self.mutate(workspace_id, |ws| {
            let session = session_mut(ws, session_id)?;
            if session.states.contains_key(&state.id) {
                return Err(StoreError::AlreadyExists {
                    kind: "state",
                    id: state.id.clone(),
                });
            }
            session.states.insert(state.id.clone(), state.clone());
            Ok(())
        })
        .await?;
        Ok(state)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let existed = self
            .index
            .with_lock(id, || async {
                let existed = self.index.entities().delete(id).await?;
                self.index.record_delete(id).await?;
                Ok::<_, StoreError>(existed)
            })
            .await?;
        if existed {
            info!(id, "workspace deleted");
        }
        Ok(existed)
    }

    /// Metadata rows, most recently accessed first.
    pub async fn list(&self) -> Result<Vec<WorkspaceMetadata>> {
        let index = self.index.load().await?;
        let mut rows: Vec<WorkspaceMetadata> = index.workspaces.into_values().collect();
        rows.sort_by(|a, b| {
            b.last_accessed
                .cmp(&a.last_accessed)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rows)
    }

    pub async fn find_by_name(&self, query: &str) -> Result<Vec<WorkspaceMetadata>> {
        let index = self.index.load().await?;
        Ok(rows(&index.workspaces, index.find_by_name(query)))
    }

    pub async fn find_by_description(&self, query: &str) -> Result<Vec<WorkspaceMetadata>> {
        let index = self.index.load().await?;
        Ok(rows(&index.workspaces, index.find_by_description(query)))
    }

    pub async fn find_by_folder(&self, folder: &str) -> Result<Vec<WorkspaceMetadata>> {
        let index = self.index.load().await?;
        Ok(rows(&index.workspaces, index.find_by_folder(folder)))
    }

    pub async fn sessions_of(&self, workspace_id: &str) -> Result<Vec<String>> {
        Ok(self.index.load().await?.sessions_of(workspace_id))
    }

    /// Read-modify-write under the workspace's lock; also bumps `lastAccessed`.
    async fn mutate<F>(&self, id: &str, apply: F) -> Result<Workspace>
    where
        F: FnOnce(&mut Workspace) -> Result<()>,
    {
        self.index
            .with_lock(id, || async move {
                let mut ws = self.index.entities().get(id).await?;
                apply(&mut ws)?;
                ws.last_accessed = Utc::now().max(ws.last_accessed);
                self.index.entities().put(&ws).await?;
                self.index.record_create_or_update(&ws).await?;
                Ok::<_, StoreError>(ws)
            })
            .await
    }
}

fn session_mut<'a>(ws: &'a mut Workspace, session_id: &str) -> Result<&'a mut Session> {
    ws.sessions
        .get_mut(session_id)
        .ok_or_else(|| StoreError::not_found("session", session_id))
}

fn rows(
    mirror: &BTreeMap<String, WorkspaceMetadata>,
    ids: Vec<String>,
) -> Vec<WorkspaceMetadata> {
    ids.iter().filter_map(|id| mirror.get(id).cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entity::EntityStore;
    use crate::store::index::IndexStore;
    use crate::store::vault::{FsVault, Vault};

    fn service(dir: &tempfile::TempDir) -> WorkspaceService {
        let vault: Arc<dyn Vault> = Arc::new(FsVault::new(dir.path()));
        let manager = IndexManager::new(
            EntityStore::new(vault.clone(), "data"),
            IndexStore::new(vault, "data"),
        );
        WorkspaceService::new(Arc::new(manager))
    }

    fn snapshot(id: &str) -> StateSnapshot {
        StateSnapshot {
            id: id.into(),
            name: "before refactor".into(),
            created: Utc::now(),
            snapshot: serde_json::json!({"openFiles": ["a.md"]}),
        }
    }

    #[tokio::test]
    async fn snapshots_are_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let ws = svc.start("Novel", "writing/novel", None).await.unwrap();
        svc.add_session(&ws.id, Session::new("s1", None)).await.unwrap();

        svc.add_state_snapshot(&ws.id, "s1", snapshot("st1")).await.unwrap();
        let second = svc.add_state_snapshot(&ws.id, "s1", snapshot("st1")).await;
        assert!(matches!(second, Err(StoreError::AlreadyExists { .. })));

        let missing = svc.add_state_snapshot(&ws.id, "nope", snapshot("st2")).await;
        assert!(missing.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn update_and_end_session() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let ws = svc.start("Novel", "writing/novel", None).await.unwrap();
        svc.add_session(&ws.id, Session::new("s1", Some("drafting".into())))
            .await
            .unwrap();

        let ended = svc.end_session(&ws.id, "s1").await.unwrap();
        assert!(!ended.is_active);
        assert!(ended.end_time.is_some());

        svc.update(
            &ws.id,
            WorkspaceUpdate {
                description: Some("Second draft of the novel".into()),
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let found = svc.find_by_description("second draft").await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(!found[0].is_active);
        assert_eq!(svc.find_by_folder("writing").await.unwrap().len(), 1);
        assert_eq!(svc.sessions_of(&ws.id).await.unwrap(), vec!["s1".to_string()]);
        assert_eq!(svc.index.lock_count(), 0);
    }

    #[tokio::test]
    async fn delete_clears_index() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let ws = svc.start("Temp", "tmp", None).await.unwrap();
        svc.add_session(&ws.id, Session::new("s1", None)).await.unwrap();
        assert!(svc.delete(&ws.id).await.unwrap());
        assert!(svc.list().await.unwrap().is_empty());
        assert!(svc.sessions_of(&ws.id).await.unwrap().is_empty());
        assert!(svc.find_by_name("temp").await.unwrap().is_empty());
    }
}
