//! The collection-shaped store that predates per-entity files.
//!
//! Each collection is `<root>/collections/<name>/items.json` holding
//! `{ "items": [ { id, document?, metadata, embedding? } ] }`. Metadata values
//! are flat scalars, so nested structures arrive as JSON-encoded strings.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Result, StoreError};
use crate::store::vault::Vault;
use crate::types::{
    Conversation, Message, MemoryTrace, Role, Session, StateSnapshot, ToolCall, TraceMetadata,
    Workspace,
};

pub const WORKSPACES: &str = "workspaces";
pub const SESSIONS: &str = "sessions";
pub const MEMORY_TRACES: &str = "memory_traces";
pub const SNAPSHOTS: &str = "snapshots";
pub const CONVERSATIONS: &str = "chat_conversations";

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyItem {
    pub id: String,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Deserialize)]
struct CollectionFile {
    #[serde(default)]
    items: Vec<LegacyItem>,
}

#[async_trait]
pub trait LegacySource: Send + Sync {
    /// All items of one collection; `None` when the collection does not exist.
    async fn collection(&self, name: &str) -> Result<Option<Vec<LegacyItem>>>;
}

pub struct FileLegacySource {
    vault: Arc<dyn Vault>,
    root: String,
}

impl FileLegacySource {
    pub fn new(vault: Arc<dyn Vault>, root: impl Into<String>) -> Self {
        Self {
            vault,
            root: root.into(),
        }
    }
}

#[async_trait]
impl LegacySource for FileLegacySource {
    async fn collection(&self, name: &str) -> Result<Option<Vec<LegacyItem>>> {
        let path = format!("{}/collections/{}/items.json", self.root, name);
        let Some(bytes) = self.vault.read(&path).await? else {
            return Ok(None);
        };
        let file: CollectionFile = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::corrupt("legacy collection", name, e))?;
        Ok(Some(file.items))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("metadata does not match the expected shape: {0}")]
    Metadata(#[source] serde_json::Error),

    #[error("document is not valid JSON: {0}")]
    Document(#[source] serde_json::Error),

    #[error("missing {0}")]
    Missing(&'static str),

    #[error("timestamp out of range: {0}")]
    Timestamp(i64),

    #[error("unknown role {0:?}")]
    Role(String),

    #[error("{kind} {id} references session {session} which the workspace does not have")]
    UnknownSession {
        kind: &'static str,
        id: String,
        session: String,
    },
}

pub type Converted<T> = std::result::Result<T, ConversionError>;

/// Legacy timestamps are epoch milliseconds; a few rows carry RFC 3339 text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LegacyTime {
    Millis(i64),
    Text(String),
}

impl LegacyTime {
    fn resolve(&self) -> Converted<DateTime<Utc>> {
        match self {
            LegacyTime::Millis(ms) => {
                DateTime::from_timestamp_millis(*ms).ok_or(ConversionError::Timestamp(*ms))
            }
            LegacyTime::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| ConversionError::Missing("a readable timestamp")),
        }
    }
}

fn time(t: &Option<LegacyTime>, field: &'static str) -> Converted<DateTime<Utc>> {
    t.as_ref().ok_or(ConversionError::Missing(field))?.resolve()
}

fn optional_time(t: &Option<LegacyTime>) -> Converted<Option<DateTime<Utc>>> {
    t.as_ref().map(LegacyTime::resolve).transpose()
}

/// Nested values are stored as JSON text; anything unparsable is kept as a string.
fn embedded_json(value: Option<serde_json::Value>) -> Option<serde_json::Value> {
    match value? {
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => {
            Some(serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s)))
        }
        serde_json::Value::Null => None,
        other => Some(other),
    }
}

fn metadata<T: for<'de> Deserialize<'de>>(item: &LegacyItem) -> Converted<T> {
    let value = if item.metadata.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        item.metadata.clone()
    };
    serde_json::from_value(value).map_err(ConversionError::Metadata)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceMeta {
    name: Option<String>,
    description: Option<String>,
    #[serde(alias = "path")]
    root_folder: Option<String>,
    created: Option<LegacyTime>,
    last_accessed: Option<LegacyTime>,
    #[serde(default)]
    is_active: Option<bool>,
    context: Option<serde_json::Value>,
}

/// Child rows (sessions, traces, snapshots) name their owner.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub workspace_id: Option<String>,
    pub session_id: Option<String>,
}

pub fn owner(item: &LegacyItem) -> Owner {
    metadata(item).unwrap_or(Owner {
        workspace_id: None,
        session_id: None,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionMeta {
    name: Option<String>,
    description: Option<String>,
    start_time: Option<LegacyTime>,
    end_time: Option<LegacyTime>,
    is_active: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TraceMeta {
    session_id: Option<String>,
    timestamp: Option<LegacyTime>,
    #[serde(rename = "type", alias = "activityType")]
    trace_type: Option<String>,
    tool: Option<String>,
    params: Option<serde_json::Value>,
    result: Option<serde_json::Value>,
    related_files: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotMeta {
    session_id: Option<String>,
    name: Option<String>,
    created: Option<LegacyTime>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationMeta {
    title: Option<String>,
    created: Option<LegacyTime>,
    updated: Option<LegacyTime>,
    vault_name: Option<String>,
}

#[derive(Deserialize)]
struct ConversationDocument {
    #[serde(default)]
    messages: Vec<LegacyMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMessage {
    id: String,
    role: String,
    #[serde(default)]
    content: String,
    timestamp: Option<LegacyTime>,
    tool_calls: Option<Vec<ToolCall>>,
    tool_name: Option<String>,
    tool_params: Option<serde_json::Value>,
    tool_result: Option<serde_json::Value>,
}

/// The legacy rows belonging to one workspace.
#[derive(Default)]
pub struct WorkspaceRows<'a> {
    pub sessions: Vec<&'a LegacyItem>,
    pub traces: Vec<&'a LegacyItem>,
    pub snapshots: Vec<&'a LegacyItem>,
}

/// Rebuild a workspace with its sessions, traces and snapshots. Any child that
/// fails to convert fails the whole workspace.
pub fn convert_workspace(
    item: &LegacyItem,
    rows: &WorkspaceRows<'_>,
) -> Converted<Workspace> {
    let meta: WorkspaceMeta = metadata(item)?;
    let created = time(&meta.created, "created")?;

    let mut ws = Workspace {
        id: item.id.clone(),
        name: meta.name.unwrap_or_else(|| item.id.clone()),
        description: meta.description.filter(|d| !d.is_empty()),
        root_folder: meta.root_folder.unwrap_or_default(),
        created,
        last_accessed: optional_time(&meta.last_accessed)?.unwrap_or(created),
        is_active: meta.is_active.unwrap_or(true),
        context: embedded_json(meta.context),
        sessions: BTreeMap::new(),
    };

    for row in &rows.sessions {
        let meta: SessionMeta = metadata(row)?;
        let session = Session {
            id: row.id.clone(),
            name: meta.name,
            description: meta.description.or_else(|| row.document.clone()).filter(|d| !d.is_empty()),
            start_time: time(&meta.start_time, "startTime")?,
            end_time: optional_time(&meta.end_time)?,
            is_active: meta.is_active.unwrap_or(false),
            memory_traces: BTreeMap::new(),
            states: BTreeMap::new(),
        };
        ws.sessions.insert(session.id.clone(), session);
    }

    for row in &rows.traces {
        let meta: TraceMeta = metadata(row)?;
        let session_id = meta.session_id.ok_or(ConversionError::Missing("sessionId"))?;
        let related_files = match embedded_json(meta.related_files) {
            Some(serde_json::Value::Array(files)) => files
                .into_iter()
                .filter_map(|f| f.as_str().map(str::to_string))
                .collect(),
            Some(serde_json::Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        let trace_metadata = TraceMetadata {
            tool: meta.tool,
            params: embedded_json(meta.params),
            result: embedded_json(meta.result),
            related_files,
        };
        let has_metadata = trace_metadata.tool.is_some()
            || trace_metadata.params.is_some()
            || trace_metadata.result.is_some()
            || !trace_metadata.related_files.is_empty();
        let trace = MemoryTrace {
            id: row.id.clone(),
            timestamp: time(&meta.timestamp, "timestamp")?,
            trace_type: meta.trace_type.unwrap_or_else(|| "generic".to_string()),
            content: row.document.clone().unwrap_or_default(),
            metadata: has_metadata.then_some(trace_metadata),
        };
        ws.sessions
            .get_mut(&session_id)
            .ok_or_else(|| ConversionError::UnknownSession {
                kind: "memory trace",
                id: row.id.clone(),
                session: session_id.clone(),
            })?
            .memory_traces
            .insert(trace.id.clone(), trace);
    }

    for row in &rows.snapshots {
        let meta: SnapshotMeta = metadata(row)?;
        let session_id = meta.session_id.ok_or(ConversionError::Missing("sessionId"))?;
        let document = row.document.as_deref().ok_or(ConversionError::Missing("snapshot document"))?;
        let state = StateSnapshot {
            id: row.id.clone(),
            name: meta.name.unwrap_or_else(|| row.id.clone()),
            created: time(&meta.created, "created")?,
            snapshot: serde_json::from_str(document).map_err(ConversionError::Document)?,
        };
        ws.sessions
            .get_mut(&session_id)
            .ok_or_else(|| ConversionError::UnknownSession {
                kind: "state",
                id: row.id.clone(),
                session: session_id.clone(),
            })?
            .states
            .insert(state.id.clone(), state);
    }

    Ok(ws)
}

pub fn convert_conversation(item: &LegacyItem) -> Converted<Conversation> {
    let meta: ConversationMeta = metadata(item)?;
    let created = time(&meta.created, "created")?;
    let document: ConversationDocument = match item.document.as_deref() {
        Some(doc) if !doc.trim().is_empty() => {
            serde_json::from_str(doc).map_err(ConversionError::Document)?
        }
        _ => ConversationDocument {
            messages: Vec::new(),
        },
    };

    let mut messages = Vec::with_capacity(document.messages.len());
    for m in document.messages {
        let role = Role::from_str(&m.role).ok_or_else(|| ConversionError::Role(m.role.clone()))?;
        messages.push(Message {
            id: m.id,
            role,
            content: m.content,
            timestamp: optional_time(&m.timestamp)?.unwrap_or(created),
            tool_calls: m.tool_calls,
            tool_name: m.tool_name,
            tool_params: m.tool_params,
            tool_result: m.tool_result,
        });
    }

    Ok(Conversation {
        id: item.id.clone(),
        title: meta.title.unwrap_or_else(|| "Untitled conversation".to_string()),
        created,
        updated: optional_time(&meta.updated)?.unwrap_or(created),
        vault_name: meta.vault_name.unwrap_or_default(),
        message_count: messages.len(),
        messages,
    })
}
