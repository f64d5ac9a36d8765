//! Denormalized per-family indices and their single-file persistence.
//!
//! Indices are caches over the entity files: every id list is kept sorted and
//! deduplicated, and empty keys are dropped, so an index is determined by the
//! set of entities alone and not by the order they were written in.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::store::family::Family;
use crate::store::vault::Vault;
use crate::types::{Conversation, Workspace};

pub const INDEX_FILE: &str = "index.json";

/// One entry of a lookup dimension, used by consistency checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRef {
    pub dimension: &'static str,
    pub key: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMetadata {
    pub id: String,
    pub title: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub vault_name: String,
    pub message_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub conversation_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationIndex {
    #[serde(default)]
    pub conversations: BTreeMap<String, ConversationMetadata>,
    #[serde(default)]
    pub by_title: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub by_content: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub by_vault: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub by_tool: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub by_date_range: Vec<DateRangeBucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ConversationIndex {
    pub fn insert(&mut self, conv: &Conversation) {
        self.remove(&conv.id);
        let id = conv.id.as_str();

        for term in words(&conv.title, 2) {
            add_id(&mut self.by_title, term, id);
        }
        let mut content_terms = BTreeSet::new();
        let mut tools = BTreeSet::new();
        for msg in &conv.messages {
            content_terms.extend(words(&msg.content, 3));
            tools.extend(msg.tool_names().map(str::to_string));
        }
        for term in content_terms {
            add_id(&mut self.by_content, term, id);
        }
        for tool in tools {
            add_id(&mut self.by_tool, tool, id);
        }
        add_id(&mut self.by_vault, conv.vault_name.clone(), id);

        let (start, end) = month_bounds(conv.created);
        let pos = match self.by_date_range.binary_search_by(|b| b.start.cmp(&start)) {
            Ok(pos) => pos,
            Err(pos) => {
                self.by_date_range.insert(
                    pos,
                    DateRangeBucket {
                        start,
                        end,
                        conversation_ids: Vec::new(),
                    },
                );
                pos
            }
        };
        insert_sorted(&mut self.by_date_range[pos].conversation_ids, id);

        self.conversations.insert(
            conv.id.clone(),
            ConversationMetadata {
                id: conv.id.clone(),
                title: conv.title.clone(),
                created: conv.created,
                updated: conv.updated,
                vault_name: conv.vault_name.clone(),
                message_count: conv.messages.len(),
            },
        );
    }

    /// Idempotent: removing an absent id is a no-op.
    pub fn remove(&mut self, id: &str) {
        self.conversations.remove(id);
        for dim in [
            &mut self.by_title,
            &mut self.by_content,
            &mut self.by_vault,
            &mut self.by_tool,
        ] {
            remove_id(dim, id);
        }
        for bucket in &mut self.by_date_range {
            bucket.conversation_ids.retain(|c| c != id);
        }
        self.by_date_range.retain(|b| !b.conversation_ids.is_empty());
    }

    /// Title candidates: case-insensitive containment against whole titles and title terms.
    pub fn find_by_title(&self, query: &str) -> Vec<String> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Vec::new();
        }
        let mut ids: BTreeSet<String> = self
            .conversations
            .values()
            .filter(|m| m.title.to_lowercase().contains(&q))
            .map(|m| m.id.clone())
            .collect();
        ids.extend(lookup_containing(&self.by_title, &q));
        ids.into_iter().collect()
    }

    /// Every query word must be contained in some content term of the conversation.
    pub fn find_by_content(&self, query: &str) -> Vec<String> {
        let mut result: Option<BTreeSet<String>> = None;
        for word in words(query, 1) {
            let hits = lookup_containing(&self.by_content, &word);
            result = Some(match result {
                None => hits,
                Some(acc) => acc.intersection(&hits).cloned().collect(),
            });
        }
        result.unwrap_or_default().into_iter().collect()
    }

    pub fn find_by_vault(&self, vault_name: &str) -> Vec<String> {
        self.by_vault.get(vault_name).cloned().unwrap_or_default()
    }

    pub fn find_by_tool(&self, tool: &str) -> Vec<String> {
        self.by_tool.get(tool).cloned().unwrap_or_default()
    }

    /// Conversations created within `[since, until]`; either bound may be open.
    pub fn find_in_range(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<String> {
        let mut ids = BTreeSet::new();
        for bucket in &self.by_date_range {
            if since.is_some_and(|s| bucket.end <= s) || until.is_some_and(|u| bucket.start > u) {
                continue;
            }
            for id in &bucket.conversation_ids {
                let Some(meta) = self.conversations.get(id) else {
                    continue;
                };
                if since.map_or(true, |s| meta.created >= s) && until.map_or(true, |u| meta.created <= u) {
                    ids.insert(id.clone());
                }
            }
        }
        ids.into_iter().collect()
    }

    pub fn references(&self) -> Vec<IndexRef> {
        let mut refs = Vec::new();
        collect_refs(&mut refs, "byTitle", &self.by_title);
        collect_refs(&mut refs, "byContent", &self.by_content);
        collect_refs(&mut refs, "byVault", &self.by_vault);
        collect_refs(&mut refs, "byTool", &self.by_tool);
        for bucket in &self.by_date_range {
            for id in &bucket.conversation_ids {
                refs.push(IndexRef {
                    dimension: "byDateRange",
                    key: bucket.start.to_rfc3339(),
                    id: id.clone(),
                });
            }
        }
        refs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMetadata {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub root_folder: String,
    pub created: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub is_active: bool,
    pub session_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceIndex {
    #[serde(default)]
    pub workspaces: BTreeMap<String, WorkspaceMetadata>,
    #[serde(default)]
    pub by_name: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub by_description: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub by_folder: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub sessions_by_workspace: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl WorkspaceIndex {
    pub fn insert(&mut self, ws: &Workspace) {
        self.remove(&ws.id);
        let id = ws.id.as_str();

        for term in words(&ws.name, 2) {
            add_id(&mut self.by_name, term, id);
        }
        if let Some(desc) = &ws.description {
            for term in words(desc, 2) {
                add_id(&mut self.by_description, term, id);
            }
        }
        add_id(&mut self.by_folder, ws.root_folder.clone(), id);
        if !ws.sessions.is_empty() {
            // BTreeMap keys are already sorted
            self.sessions_by_workspace
                .insert(ws.id.clone(), ws.sessions.keys().cloned().collect());
        }

        self.workspaces.insert(
            ws.id.clone(),
            WorkspaceMetadata {
                id: ws.id.clone(),
                name: ws.name.clone(),
                description: ws.description.clone(),
                root_folder: ws.root_folder.clone(),
                created: ws.created,
                last_accessed: ws.last_accessed,
                is_active: ws.is_active,
                session_count: ws.sessions.len(),
            },
        );
    }

    pub fn remove(&mut self, id: &str) {
        self.workspaces.remove(id);
        self.sessions_by_workspace.remove(id);
        for dim in [&mut self.by_name, &mut self.by_description, &mut self.by_folder] {
            remove_id(dim, id);
        }
    }

    pub fn find_by_name(&self, query: &str) -> Vec<String> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Vec::new();
        }
        let mut ids: BTreeSet<String> = self
            .workspaces
            .values()
            .filter(|m| m.name.to_lowercase().contains(&q))
            .map(|m| m.id.clone())
            .collect();
        ids.extend(lookup_containing(&self.by_name, &q));
        ids.into_iter().collect()
    }

    pub fn find_by_description(&self, query: &str) -> Vec<String> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Vec::new();
        }
        let mut ids: BTreeSet<String> = self
            .workspaces
            .values()
            .filter(|m| {
                m.description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&q))
            })
            .map(|m| m.id.clone())
            .collect();
        ids.extend(lookup_containing(&self.by_description, &q));
        ids.into_iter().collect()
    }

    /// Workspaces rooted at `folder` or anywhere beneath it. The vault root
    /// (`""` or `"/"`) contains every workspace.
    pub fn find_by_folder(&self, folder: &str) -> Vec<String> {
        let folder = folder.trim_matches('/');
        let mut ids = BTreeSet::new();
        for (root, ws_ids) in &self.by_folder {
            let root_trimmed = root.trim_matches('/');
            if folder.is_empty()
                || root_trimmed == folder
                || root_trimmed.starts_with(&format!("{}/", folder))
            {
                ids.extend(ws_ids.iter().cloned());
            }
        }
        ids.into_iter().collect()
    }

    pub fn sessions_of(&self, workspace_id: &str) -> Vec<String> {
        self.sessions_by_workspace
            .get(workspace_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn references(&self) -> Vec<IndexRef> {
        let mut refs = Vec::new();
        collect_refs(&mut refs, "byName", &self.by_name);
        collect_refs(&mut refs, "byDescription", &self.by_description);
        collect_refs(&mut refs, "byFolder", &self.by_folder);
        for ws_id in self.sessions_by_workspace.keys() {
            refs.push(IndexRef {
                dimension: "sessionsByWorkspace",
                key: ws_id.clone(),
                id: ws_id.clone(),
            });
        }
        refs
    }
}

/// Loads and saves one family's index as a single document.
pub struct IndexStore<F: Family> {
    vault: Arc<dyn Vault>,
    path: String,
    _family: PhantomData<F>,
}

impl<F: Family> IndexStore<F> {
    pub fn new(vault: Arc<dyn Vault>, data_dir: &str) -> Self {
        Self {
            vault,
            path: format!("{}/{}/{}", data_dir, F::DIR, INDEX_FILE),
            _family: PhantomData,
        }
    }

    /// Absent file yields an empty index; unparseable content is `CorruptEntity`.
    pub async fn load(&self) -> Result<F::Index> {
        match self.vault.read(&self.path).await? {
            None => Ok(F::Index::default()),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::corrupt("index", F::DIR, e)),
        }
    }

    /// Stamps `lastUpdated` and replaces the whole file.
    pub async fn save(&self, index: &mut F::Index) -> Result<()> {
        F::stamp(index, Utc::now());
        let bytes = serde_json::to_vec_pretty(index)?;
        self.vault.write(&self.path, &bytes).await
    }
}

pub(crate) fn words(text: &str, min_len: usize) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= min_len)
        .map(|w| w.to_lowercase())
        .collect()
}

fn month_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let (y, m) = (at.year(), at.month());
    let (ny, nm) = if m == 12 { (y + 1, 1) } else { (y, m + 1) };
    let first = |year: i32, month: u32| {
        Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
            .single()
            .unwrap_or(at)
    };
    (first(y, m), first(ny, nm))
}

fn insert_sorted(ids: &mut Vec<String>, id: &str) {
    if let Err(pos) = ids.binary_search_by(|probe| probe.as_str().cmp(id)) {
        ids.insert(pos, id.to_string());
    }
}

fn add_id(dim: &mut BTreeMap<String, Vec<String>>, key: String, id: &str) {
    insert_sorted(dim.entry(key).or_default(), id);
}

fn remove_id(dim: &mut BTreeMap<String, Vec<String>>, id: &str) {
    for ids in dim.values_mut() {
        ids.retain(|i| i != id);
    }
    dim.retain(|_, ids| !ids.is_empty());
}

fn lookup_containing(dim: &BTreeMap<String, Vec<String>>, needle: &str) -> BTreeSet<String> {
    dim.iter()
        .filter(|(term, _)| term.contains(needle))
        .flat_map(|(_, ids)| ids.iter().cloned())
        .collect()
}

fn collect_refs(out: &mut Vec<IndexRef>, dimension: &'static str, dim: &BTreeMap<String, Vec<String>>) {
    for (key, ids) in dim {
        for id in ids {
            out.push(IndexRef {
                dimension,
                key: key.clone(),
                id: id.clone(),
            });
        }
    }
}
