//! Search without embeddings: fuzzy names, frontmatter filters, index lookups.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::search::fuzzy::{best_of_name_and_path, display_name, FuzzyMatcher};
use crate::search::notes::Note;
use crate::search::{
    rank, snippet, SearchKind, SearchMethod, SearchRequest, SearchResult, SearchStrategy,
    StrategyOutcome, FILTER_SCORE,
};
use crate::store::family::{Conversations, Workspaces};
use crate::store::manager::IndexManager;
use crate::store::vault::Vault;
use crate::types::Workspace;

pub struct TraditionalStrategy {
    vault: Arc<dyn Vault>,
    matcher: Arc<dyn FuzzyMatcher>,
    conversations: Arc<IndexManager<Conversations>>,
    workspaces: Arc<IndexManager<Workspaces>>,
}

impl TraditionalStrategy {
    pub fn new(
        vault: Arc<dyn Vault>,
        matcher: Arc<dyn FuzzyMatcher>,
        conversations: Arc<IndexManager<Conversations>>,
        workspaces: Arc<IndexManager<Workspaces>>,
    ) -> Self {
        Self {
            vault,
            matcher,
            conversations,
            workspaces,
        }
    }

    pub async fn run(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let results = match request.kind {
            SearchKind::Content => self.search_files(request, true).await?,
            SearchKind::Files => self.search_files(request, false).await?,
            SearchKind::Folders => self.search_folders(request).await?,
            SearchKind::Properties => self.search_properties(request).await?,
            SearchKind::Tags => self.search_tags(request).await?,
            SearchKind::Conversations => self.search_conversations(request).await?,
            SearchKind::Workspaces => self.search_workspaces(request).await?,
            SearchKind::Sessions | SearchKind::States | SearchKind::MemoryTraces => {
                self.search_collections(request).await?
            }
        };
        Ok(rank(results, request.limit()))
    }

    async fn read_note(&self, path: &str) -> Result<Option<Note>> {
        Ok(self
            .vault
            .read(path)
            .await?
            .map(|bytes| Note::parse(path, &String::from_utf8_lossy(&bytes))))
    }

    async fn notes(&self, request: &SearchRequest) -> Result<Vec<Note>> {
        let mut notes = Vec::new();
        for path in self.vault.walk("").await? {
            if !path.ends_with(".md") || !request.filters.path_allowed(&path) {
                continue;
            }
            if let Some(note) = self.read_note(&path).await? {
                notes.push(note);
            }
        }
        Ok(notes)
    }

    /// Fuzzy match on display name and full path, keeping the better score.
    async fn search_files(&self, request: &SearchRequest, notes_only: bool) -> Result<Vec<SearchResult>> {
        let f = &request.filters;
        let needs_note = !f.tags.is_empty() || !f.properties.is_empty();
        let mut results = Vec::new();

        for path in self.vault.walk("").await? {
            if (notes_only && !path.ends_with(".md")) || !f.path_allowed(&path) {
                continue;
            }
            let Some(m) = best_of_name_and_path(self.matcher.as_ref(), &request.query, &path) else {
                continue;
            };

            let note = if needs_note || request.include_content {
                self.read_note(&path).await?
            } else {
                None
            };
            if needs_note && !note.as_ref().is_some_and(|n| note_passes_filters(n, request)) {
                continue;
            }

            results.push(SearchResult {
                id: path.clone(),
                title: display_name(&path).to_string(),
                snippet: path.clone(),
                score: m.score,
                search_method: SearchMethod::Fuzzy,
                metadata: json!({ "path": path, "matchPositions": m.positions }),
                content: if request.include_content {
                    note.map(|n| n.body)
                } else {
                    None
                },
            });
        }
        Ok(results)
    }

    async fn search_folders(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let mut folders = BTreeSet::new();
        for path in self.vault.walk("").await? {
            let mut parts: Vec<&str> = path.split('/').collect();
            parts.pop();
            for depth in 1..=parts.len() {
                folders.insert(parts[..depth].join("/"));
            }
        }

        let mut results = Vec::new();
        for folder in folders {
            if !request.filters.path_allowed(&folder) {
                continue;
            }
            let Some(m) = best_of_name_and_path(self.matcher.as_ref(), &request.query, &folder) else {
                continue;
            };
            results.push(SearchResult {
                id: folder.clone(),
                title: display_name(&folder).to_string(),
                snippet: folder.clone(),
                score: m.score,
                search_method: SearchMethod::Fuzzy,
                metadata: json!({ "path": folder, "matchPositions": m.positions }),
                content: None,
            });
        }
        Ok(results)
    }

    async fn search_properties(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let q = request.query.trim().to_lowercase();
        let mut results = Vec::new();
        for note in self.notes(request).await? {
            if !note_passes_filters(&note, request) {
                continue;
            }
            let matched: Vec<String> = note
                .properties
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .filter(|line| q.is_empty() || line.to_lowercase().contains(&q))
                .collect();
            if matched.is_empty() {
                continue;
            }
            results.push(note_result(note, matched.join("; "), SearchMethod::Property, request));
        }
        Ok(results)
    }

    async fn search_tags(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let q = request.query.trim().trim_start_matches('#').to_lowercase();
        let mut results = Vec::new();
        for note in self.notes(request).await? {
            if !note_passes_filters(&note, request) {
                continue;
            }
            if note.tags.is_empty() || !(q.is_empty() || note.tags.iter().any(|t| t.contains(&q))) {
                continue;
            }
            let tags = note
                .tags
                .iter()
                .map(|t| format!("#{}", t))
                .collect::<Vec<_>>()
                .join(" ");
            results.push(note_result(note, tags, SearchMethod::Tag, request));
        }
        Ok(results)
    }

    async fn search_conversations(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let index = self.conversations.load().await?;
        let f = &request.filters;
        let query = request.query.trim();

        let mut ids: BTreeSet<String> = if query.is_empty() {
            index.conversations.keys().cloned().collect()
        } else {
            let mut hits: BTreeSet<String> = index.find_by_title(query).into_iter().collect();
            hits.extend(index.find_by_content(query));
            hits
        };
        if f.since.is_some() || f.until.is_some() {
            let in_range: BTreeSet<String> = index.find_in_range(f.since, f.until).into_iter().collect();
            ids.retain(|id| in_range.contains(id));
        }

        let mut results = Vec::new();
        for id in ids {
            let Some(meta) = index.conversations.get(&id) else {
                continue;
            };
            let content = if request.include_content {
                match self.conversations.entities().get(&id).await {
                    Ok(conv) => Some(
                        conv.messages
                            .iter()
                            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    ),
                    Err(e) => {
                        debug!(id = %id, error = %e, "conversation unreadable");
                        None
                    }
                }
            } else {
                None
            };
            results.push(SearchResult {
                id: id.clone(),
                title: meta.title.clone(),
                snippet: format!("{} messages, updated {}", meta.message_count, meta.updated.format("%Y-%m-%d")),
                score: FILTER_SCORE,
                search_method: SearchMethod::Index,
                metadata: serde_json::to_value(meta)?,
                content,
            });
        }
        Ok(results)
    }

    async fn search_workspaces(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let index = self.workspaces.load().await?;
        let query = request.query.trim();

        let mut ids: BTreeSet<String> = if query.is_empty() {
            index.workspaces.keys().cloned().collect()
        } else {
            let mut hits: BTreeSet<String> = index.find_by_name(query).into_iter().collect();
            hits.extend(index.find_by_description(query));
            hits
        };
        if !request.filters.paths.is_empty() {
            let in_folders: BTreeSet<String> = request
                .filters
                .paths
                .iter()
                .flat_map(|p| index.find_by_folder(p))
                .collect();
            ids.retain(|id| in_folders.contains(id));
        }

        let mut results = Vec::new();
        for id in ids {
            let Some(meta) = index.workspaces.get(&id) else {
                continue;
            };
            if !request.filters.time_allowed(meta.last_accessed) {
                continue;
            }
            results.push(SearchResult {
                id: id.clone(),
                title: meta.name.clone(),
                snippet: meta.description.clone().unwrap_or_else(|| meta.root_folder.clone()),
                score: FILTER_SCORE,
                search_method: SearchMethod::Index,
                metadata: serde_json::to_value(meta)?,
                content: None,
            });
        }
        Ok(results)
    }

    /// Workspaces that own at least one session, restricted by `workspace_id`.
    async fn session_owners(&self, request: &SearchRequest) -> Result<Vec<Workspace>> {
        let index = self.workspaces.load().await?;
        let ids: Vec<String> = match &request.filters.workspace_id {
            Some(id) => index.sessions_by_workspace.get(id).map(|_| vec![id.clone()]).unwrap_or_default(),
            None => index.sessions_by_workspace.keys().cloned().collect(),
        };

        let mut owners = Vec::with_capacity(ids.len());
        for id in ids {
            match self.workspaces.entities().get(&id).await {
                Ok(ws) => owners.push(ws),
                Err(StoreError::NotFound { .. }) => debug!(id = %id, "indexed workspace missing; index drift"),
                Err(e @ StoreError::CorruptEntity { .. }) => warn!(id = %id, error = %e, "skipping workspace"),
                Err(e) => return Err(e),
            }
        }
        Ok(owners)
    }

    async fn search_collections(&self, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let f = &request.filters;
        let q = request.query.trim().to_lowercase();
        let contains = |text: &str| q.is_empty() || text.to_lowercase().contains(&q);
        let mut results = Vec::new();

        for ws in self.session_owners(request).await? {
            for session in ws.sessions.values() {
                if f.session_id.as_ref().is_some_and(|s| s != &session.id) {
                    continue;
                }
                match request.kind {
                    SearchKind::Sessions => {
                        let name = session.name.clone().unwrap_or_else(|| session.id.clone());
                        let desc = session.description.clone().unwrap_or_default();
                        if !f.time_allowed(session.start_time) || !(contains(&name) || contains(&desc)) {
                            continue;
                        }
                        results.push(SearchResult {
                            id: session.id.clone(),
                            title: name,
                            snippet: snippet(&desc, 200),
                            score: FILTER_SCORE,
                            search_method: SearchMethod::Index,
                            metadata: json!({
                                "workspaceId": ws.id,
                                "isActive": session.is_active,
                                "startTime": session.start_time,
                                "traceCount": session.memory_traces.len(),
                                "stateCount": session.states.len(),
                            }),
                            content: None,
                        });
                    }
                    SearchKind::States => {
                        for state in session.states.values() {
                            if !f.time_allowed(state.created) || !contains(&state.name) {
                                continue;
                            }
                            results.push(SearchResult {
                                id: state.id.clone(),
                                title: state.name.clone(),
                                snippet: format!("snapshot of {} at {}", ws.name, state.created.format("%Y-%m-%d %H:%M")),
                                score: FILTER_SCORE,
                                search_method: SearchMethod::Index,
                                metadata: json!({
                                    "workspaceId": ws.id,
                                    "sessionId": session.id,
                                    "created": state.created,
                                }),
                                content: request
                                    .include_content
                                    .then(|| state.snapshot.to_string()),
                            });
                        }
                    }
                    _ => {
                        for trace in session.memory_traces.values() {
                            if f.trace_type.as_ref().is_some_and(|t| t != &trace.trace_type)
                                || !f.time_allowed(trace.timestamp)
                                || !contains(&trace.content)
                            {
                                continue;
                            }
                            results.push(SearchResult {
                                id: trace.id.clone(),
                                title: trace.trace_type.clone(),
                                snippet: snippet(&trace.content, 200),
                                score: FILTER_SCORE,
                                search_method: SearchMethod::Index,
                                metadata: json!({
                                    "workspaceId": ws.id,
                                    "sessionId": session.id,
                                    "timestamp": trace.timestamp,
                                    "tool": trace.metadata.as_ref().and_then(|m| m.tool.clone()),
                                }),
                                content: request.include_content.then(|| trace.content.clone()),
                            });
                        }
                    }
                }
            }
        }
        Ok(results)
    }
}

fn note_passes_filters(note: &Note, request: &SearchRequest) -> bool {
    let f = &request.filters;
    let tags_ok = f.tags.iter().all(|t| {
        let t = t.trim_start_matches('#').to_lowercase();
        note.tags.contains(&t)
    });
    let props_ok = f.properties.iter().all(|(k, v)| {
        note.properties
            .get(k)
            .is_some_and(|actual| actual.to_lowercase().contains(&v.to_lowercase()))
    });
    tags_ok && props_ok
}

fn note_result(note: Note, snippet_text: String, method: SearchMethod, request: &SearchRequest) -> SearchResult {
    SearchResult {
        id: note.path.clone(),
        title: display_name(&note.path).to_string(),
        snippet: snippet_text,
        score: FILTER_SCORE,
        search_method: method,
        metadata: json!({
            "path": note.path,
            "tags": note.tags,
            "properties": note.properties,
        }),
        content: request.include_content.then_some(note.body),
    }
}

#[async_trait]
impl SearchStrategy for TraditionalStrategy {
    fn name(&self) -> &'static str {
        "traditional"
    }

    fn eligible(&self, _request: &SearchRequest) -> bool {
        true
    }

    async fn search(&self, request: &SearchRequest) -> StrategyOutcome {
        match self.run(request).await {
            Ok(results) => StrategyOutcome::Found(results),
            Err(e) => StrategyOutcome::Failed(e.to_string()),
        }
    }
}
