//! Search over vault notes and stored entities.
//!
//! A [`cascade::SearchCascade`] runs an ordered chain of strategies (semantic
//! first, traditional second) and returns the first usable result set in one
//! normalized shape.

pub mod cascade;
pub mod fuzzy;
pub mod notes;
pub mod semantic;
pub mod traditional;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FILE_LIMIT: usize = 10;
pub const DEFAULT_COLLECTION_LIMIT: usize = 50;

/// Score assigned when filtering, not ranking, selected the result.
pub const FILTER_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SearchKind {
    Content,
    Files,
    Folders,
    Properties,
    Tags,
    Conversations,
    Workspaces,
    Sessions,
    States,
    MemoryTraces,
}

impl SearchKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "content" => Some(SearchKind::Content),
            "files" | "file" => Some(SearchKind::Files),
            "folders" | "folder" => Some(SearchKind::Folders),
            "properties" | "property" => Some(SearchKind::Properties),
            "tags" | "tag" => Some(SearchKind::Tags),
            "conversations" => Some(SearchKind::Conversations),
            "workspaces" => Some(SearchKind::Workspaces),
            "sessions" => Some(SearchKind::Sessions),
            "states" | "snapshots" => Some(SearchKind::States),
            "memorytraces" | "traces" => Some(SearchKind::MemoryTraces),
            _ => None,
        }
    }

    pub fn default_limit(&self) -> usize {
        match self {
            SearchKind::Content | SearchKind::Files | SearchKind::Folders => DEFAULT_FILE_LIMIT,
            _ => DEFAULT_COLLECTION_LIMIT,
        }
    }
}

/// How a result was produced. Scores are only comparable within one method.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Semantic,
    Fuzzy,
    Property,
    Tag,
    Index,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    /// Path prefixes a result must live under.
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub trace_type: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn path_allowed(&self, path: &str) -> bool {
        self.paths.is_empty()
            || self.paths.iter().any(|p| {
                let p = p.trim_matches('/');
                p.is_empty() || path == p || path.starts_with(&format!("{}/", p))
            })
    }

    pub fn time_allowed(&self, at: DateTime<Utc>) -> bool {
        self.since.map_or(true, |s| at >= s) && self.until.map_or(true, |u| at <= u)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub kind: SearchKind,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Skip the semantic backend even when one is configured.
    #[serde(default)]
    pub traditional_only: bool,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub include_content: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, kind: SearchKind) -> Self {
        Self {
            query: query.into(),
            kind,
            filters: SearchFilters::default(),
            limit: None,
            traditional_only: false,
            threshold: None,
            include_content: false,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or_else(|| self.kind.default_limit())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub search_method: SearchMethod,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<SearchResult>,
    pub total: usize,
    /// Strategy that produced `results`, absent when none did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// Why earlier strategies were skipped or failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

impl SearchResponse {
    pub fn empty(diagnostics: Vec<String>) -> Self {
        Self {
            success: true,
            results: Vec::new(),
            total: 0,
            strategy: None,
            diagnostics,
        }
    }
}

/// Typed result of one strategy attempt; the cascade decides what happens next.
#[derive(Debug, Clone)]
pub enum StrategyOutcome {
    Found(Vec<SearchResult>),
    Unavailable(String),
    Failed(String),
}

#[async_trait]
pub trait SearchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn eligible(&self, request: &SearchRequest) -> bool;

    async fn search(&self, request: &SearchRequest) -> StrategyOutcome;
}

/// Sort by descending score (ties by id) and cut to `limit`.
pub fn rank(mut results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);
    results
}

pub fn snippet(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, score: f64) -> SearchResult {
        SearchResult {
            id: id.into(),
            title: id.into(),
            snippet: String::new(),
            score,
            search_method: SearchMethod::Fuzzy,
            metadata: serde_json::Value::Null,
            content: None,
        }
    }

    #[test]
    fn rank_orders_and_truncates() {
        let ranked = rank(
            vec![result("b", 0.2), result("a", 0.9), result("c", 0.9), result("d", 0.1)],
            3,
        );
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn default_limits_by_kind() {
        assert_eq!(SearchRequest::new("x", SearchKind::Files).limit(), 10);
        assert_eq!(SearchRequest::new("x", SearchKind::Sessions).limit(), 50);
        assert_eq!(SearchKind::from_str("memory_traces"), Some(SearchKind::MemoryTraces));
    }

    #[test]
    fn path_filter_matches_prefix_folders_only() {
        let filters = SearchFilters {
            paths: vec!["work/".into()],
            ..Default::default()
        };
        assert!(filters.path_allowed("work/a.md"));
        assert!(!filters.path_allowed("workshop/a.md"));
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        assert_eq!(snippet("  héllo wörld  ", 5), "héllo...");
        assert_eq!(snippet("short", 50), "short");
    }
}
