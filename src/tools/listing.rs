use std::collections::BTreeSet;

use anyhow::Result;
use serde_json::json;

use crate::server::{ListConversationsRequest, VaultServer};

impl VaultServer {
    pub async fn do_list_conversations(&self, req: ListConversationsRequest) -> Result<serde_json::Value> {
        let svc = &self.store.conversations;
        let mut rows = svc.list(None).await?;

        if let Some(vault) = req.vault_name.as_deref() {
            let ids: BTreeSet<String> = svc.find_by_vault(vault).await?.into_iter().map(|m| m.id).collect();
            rows.retain(|m| ids.contains(&m.id));
        }
        if let Some(tool) = req.tool.as_deref() {
            let ids: BTreeSet<String> = svc.find_by_tool(tool).await?.into_iter().map(|m| m.id).collect();
            rows.retain(|m| ids.contains(&m.id));
        }
        if let Some(limit) = req.limit {
            rows.truncate(limit);
        }
        Ok(json!({ "total": rows.len(), "conversations": rows }))
    }

    pub async fn do_list_workspaces(&self, folder: Option<&str>) -> Result<serde_json::Value> {
        let svc = &self.store.workspaces;
        let rows = match folder {
            Some(f) => svc.find_by_folder(f).await?,
            None => svc.list().await?,
        };
        Ok(json!({ "total": rows.len(), "workspaces": rows }))
    }
}
