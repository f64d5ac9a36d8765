use std::collections::BTreeMap;
use std::sync::Arc;

use rmcp::{
    ServerHandler,
    model::{ServerCapabilities, ServerInfo},
    tool,
    schemars,
};

use crate::store::locks::CancelFlag;
use crate::store::Store;

#[derive(Clone)]
pub struct VaultServer {
    pub store: Arc<Store>,
}

impl VaultServer {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

// MCP request types

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SearchToolRequest {
    #[schemars(description = "Search text. Empty matches everything in filtered collection searches")]
    pub query: String,
    #[schemars(description = "What to search: content, files, folders, properties, tags, conversations, workspaces, sessions, states, or memory_traces (default content)")]
    pub kind: Option<String>,
    #[schemars(description = "Maximum results (default 10 for files, 50 for collections)")]
    pub limit: Option<usize>,
    #[schemars(description = "Only search below these folders")]
    pub paths: Option<Vec<String>>,
    #[schemars(description = "Notes must carry every one of these tags")]
    pub tags: Option<Vec<String>>,
    #[schemars(description = "Frontmatter properties that must contain the given values")]
    pub properties: Option<BTreeMap<String, String>>,
    #[schemars(description = "Restrict session, state and trace searches to one workspace")]
    pub workspace_id: Option<String>,
    #[schemars(description = "Restrict state and trace searches to one session")]
    pub session_id: Option<String>,
    #[schemars(description = "Memory trace type to match")]
    pub trace_type: Option<String>,
    #[schemars(description = "RFC 3339 lower time bound")]
    pub since: Option<String>,
    #[schemars(description = "RFC 3339 upper time bound")]
    pub until: Option<String>,
    #[schemars(description = "Skip semantic search")]
    pub traditional_only: Option<bool>,
    #[schemars(description = "Minimum semantic similarity, 0 to 1")]
    pub threshold: Option<f32>,
    #[schemars(description = "Return full content with each result")]
    pub include_content: Option<bool>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ListConversationsRequest {
    #[schemars(description = "Only conversations from this vault (optional)")]
    pub vault_name: Option<String>,
    #[schemars(description = "Only conversations that used this tool (optional)")]
    pub tool: Option<String>,
    #[schemars(description = "Maximum rows, newest first (optional)")]
    pub limit: Option<usize>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ListWorkspacesRequest {
    #[schemars(description = "Only workspaces rooted in this folder or below it (optional)")]
    pub folder: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct FamilyRequest {
    #[schemars(description = "conversations, workspaces, or omit for both")]
    pub family: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct MigrateRequest {
    #[schemars(description = "Only report the persisted migration state")]
    pub status_only: Option<bool>,
}

#[tool(tool_box)]
impl VaultServer {
    #[tool(description = "Search the vault and stored conversations and workspaces. Content searches try semantic similarity first and fall back to fuzzy, tag, property and index matching. Returns JSON with ranked results.")]
    async fn search(
        &self, #[tool(aggr)] req: SearchToolRequest,
    ) -> String {
        respond(self.do_search(req).await)
    }

    #[tool(description = "List stored conversations from the index, newest first, optionally by vault or tool used.")]
    async fn list_conversations(
        &self, #[tool(aggr)] req: ListConversationsRequest,
    ) -> String {
        respond(self.do_list_conversations(req).await)
    }

    #[tool(description = "List workspaces from the index with their session counts, optionally under one folder.")]
    async fn list_workspaces(
        &self, #[tool(aggr)] req: ListWorkspacesRequest,
    ) -> String {
        respond(self.do_list_workspaces(req.folder.as_deref()).await)
    }

    #[tool(description = "Compare the indices with the entity files and report every discrepancy. Changes nothing.")]
    async fn verify_index(
        &self, #[tool(aggr)] req: FamilyRequest,
    ) -> String {
        respond(self.do_verify(req.family.as_deref()).await)
    }

    #[tool(description = "Rebuild indices from the entity files. Unreadable entities are skipped and reported.")]
    async fn repair_index(
        &self, #[tool(aggr)] req: FamilyRequest,
    ) -> String {
        // per call, so an interrupted CLI run never leaks into tool calls
        respond(self.do_repair(req.family.as_deref(), &CancelFlag::new()).await)
    }

    #[tool(description = "Convert the legacy collection store into per-entity files. Safe to repeat: a completed migration is a no-op.")]
    async fn migrate(
        &self, #[tool(aggr)] req: MigrateRequest,
    ) -> String {
        respond(self.do_migrate(req.status_only.unwrap_or(false), &CancelFlag::new()).await)
    }
}

/// Tool results are JSON objects carrying `success`, plus `error` on failure.
fn respond(result: anyhow::Result<serde_json::Value>) -> String {
    let body = match result {
        Ok(serde_json::Value::Object(mut map)) => {
            map.insert("success".into(), true.into());
            serde_json::Value::Object(map)
        }
        Ok(other) => serde_json::json!({ "success": true, "data": other }),
        Err(e) => serde_json::json!({ "success": false, "error": e.to_string() }),
    };
    serde_json::to_string_pretty(&body).unwrap_or_else(|e| format!("{{\"success\":false,\"error\":\"{}\"}}", e))
}

#[tool(tool_box)]
impl ServerHandler for VaultServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Vault memory: conversations and workspaces stored one file per entity \
                 with rebuildable indices. 6 tools: \
                 search (semantic first, traditional fallback), \
                 list_conversations, list_workspaces, \
                 verify_index (report drift), repair_index (rebuild from files), \
                 migrate (convert the legacy store, idempotent)."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
