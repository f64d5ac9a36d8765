use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{Result, StoreError};
use crate::store::family::Conversations;
use crate::store::index::ConversationMetadata;
use crate::store::manager::IndexManager;
use crate::types::{Conversation, Message};

/// Writes conversation documents under the index manager's per-id locks.
pub struct ConversationService {
    index: Arc<IndexManager<Conversations>>,
}

impl ConversationService {
    pub fn new(index: Arc<IndexManager<Conversations>>) -> Self {
        Self { index }
    }

    pub fn new_id() -> String {
        format!(
            "conv_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        )
    }

    pub async fn get(&self, id: &str) -> Result<Conversation> {
        self.index.entities().get(id).await
    }

    /// Store a new conversation. `message_count` is derived from `messages`.
    pub async fn create(&self, mut conv: Conversation) -> Result<Conversation> {
        let id = conv.id.clone();
        let conv = self
            .index
            .with_lock(&id, || async move {
                if self.index.entities().exists(&conv.id).await? {
                    return Err(StoreError::AlreadyExists {
                        kind: "conversation",
                        id: conv.id,
                    });
                }
                conv.message_count = conv.messages.len();
                self.index.entities().put(&conv).await?;
                self.index.record_create_or_update(&conv).await?;
                Ok(conv)
            })
            .await?;
        info!(id = %conv.id, messages = conv.message_count, "conversation created");
        Ok(conv)
    }

    pub async fn start(&self, title: &str, vault_name: &str) -> Result<Conversation> {
        let now = Utc::now();
        self.create(Conversation {
            id: Self::new_id(),
            title: title.to_string(),
            created: now,
            updated: now,
            vault_name: vault_name.to_string(),
            message_count: 0,
            messages: Vec::new(),
        })
        .await
    }

    /// Append one message. Past messages are never edited.
    pub async fn add_message(&self, id: &str, message: Message) -> Result<Conversation> {
        self.mutate(id, |conv| {
            if conv.messages.iter().any(|m| m.id == message.id) {
                return Err(StoreError::AlreadyExists {
                    kind: "message",
                    id: message.id.clone(),
                });
            }
            conv.messages.push(message);
            Ok(())
        })
        .await
    }

    pub async fn rename(&self, id: &str, title: &str) -> Result<Conversation> {
        self.mutate(id, |conv| {
            conv.title = title.to_string();
            Ok(())
        })
        .await
    }

    /// Removes the file and every index reference. Returns whether the file existed.
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
            info!(id, "conversation deleted");
        }
        Ok(existed)
    }

    /// Metadata rows, most recently updated first.
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<ConversationMetadata>> {
        let index = self.index.load().await?;
        let mut rows: Vec<ConversationMetadata> = index.conversations.into_values().collect();
        rows.sort_by(|a, b| b.updated.cmp(&a.updated).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    pub async fn find_by_title(&self, query: &str) -> Result<Vec<ConversationMetadata>> {
        let index = self.index.load().await?;
        Ok(rows(&index.conversations, index.find_by_title(query)))
    }

    pub async fn find_by_content(&self, query: &str) -> Result<Vec<ConversationMetadata>> {
        let index = self.index.load().await?;
        Ok(rows(&index.conversations, index.find_by_content(query)))
    }

    pub async fn find_by_vault(&self, vault_name: &str) -> Result<Vec<ConversationMetadata>> {
        let index = self.index.load().await?;
        Ok(rows(&index.conversations, index.find_by_vault(vault_name)))
    }

    pub async fn find_by_tool(&self, tool: &str) -> Result<Vec<ConversationMetadata>> {
        let index = self.index.load().await?;
        Ok(rows(&index.conversations, index.find_by_tool(tool)))
    }

    pub async fn find_in_range(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConversationMetadata>> {
        let index = self.index.load().await?;
        Ok(rows(&index.conversations, index.find_in_range(since, until)))
    }

    async fn mutate<F>(&self, id: &str, apply: F) -> Result<Conversation>
    where
        F: FnOnce(&mut Conversation) -> Result<()>,
    {
        self.index
            .with_lock(id, || async move {
                let mut conv = self.index.entities().get(id).await?;
                apply(&mut conv)?;
                conv.message_count = conv.messages.len();
                conv.updated = Utc::now().max(conv.updated);
                self.index.entities().put(&conv).await?;
                self.index.record_create_or_update(&conv).await?;
                Ok::<_, StoreError>(conv)
            })
            .await
    }
}

fn rows(
    mirror: &std::collections::BTreeMap<String, ConversationMetadata>,
    ids: Vec<String>,
) -> Vec<ConversationMetadata> {
    ids.iter().filter_map(|id| mirror.get(id).cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entity::EntityStore;
    use crate::store::index::IndexStore;
    use crate::store::vault::{FsVault, Vault};
    use crate::types::Role;

    fn service(dir: &tempfile::TempDir) -> ConversationService {
        let vault: Arc<dyn Vault> = Arc::new(FsVault::new(dir.path()));
        let manager = IndexManager::new(
            EntityStore::new(vault.clone(), "data"),
            IndexStore::new(vault, "data"),
        );
        ConversationService::new(Arc::new(manager))
    }

    #[tokio::test]
    async fn start_append_rename_delete() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);

        let conv = svc.start("Trip planning", "main").await.unwrap();
        assert!(conv.id.starts_with("conv_"));
        svc.add_message(&conv.id, Message::new("m1", Role::User, "Book the train"))
            .await
            .unwrap();
        let dup = svc
            .add_message(&conv.id, Message::new("m1", Role::User, "again"))
            .await;
        assert!(matches!(dup, Err(StoreError::AlreadyExists { .. })));

        svc.rename(&conv.id, "Lisbon trip").await.unwrap();
        let found = svc.find_by_title("lisbon").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message_count, 1);
        assert!(svc.find_by_title("planning").await.unwrap().is_empty());
        assert_eq!(svc.find_by_content("train").await.unwrap().len(), 1);
        // creating and mutating leave no idle per-id mutexes behind
        assert_eq!(svc.index.lock_count(), 0);

        assert!(svc.delete(&conv.id).await.unwrap());
        assert!(!svc.delete(&conv.id).await.unwrap());
        assert!(svc.list(None).await.unwrap().is_empty());
        assert!(svc.get(&conv.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let svc = Arc::new(service(&dir));
        let conv = svc.start("busy", "main").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let svc = svc.clone();
            let id = conv.id.clone();
            tasks.push(tokio::spawn(async move {
                svc.add_message(&id, Message::new(format!("m{}", i), Role::Assistant, "ok"))
                    .await
                    .unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let stored = svc.get(&conv.id).await.unwrap();
        assert_eq!(stored.messages.len(), 16);
        assert_eq!(svc.index.lock_count(), 0);
        assert_eq!(svc.list(None).await.unwrap()[0].message_count, 16);
    }

    #[tokio::test]
    async fn create_rejects_existing_id() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let conv = svc.start("one", "main").await.unwrap();
        let again = svc.create(conv.clone()).await;
        assert!(matches!(again, Err(StoreError::AlreadyExists { .. })));
    }
}
