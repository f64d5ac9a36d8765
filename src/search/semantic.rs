use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::search::fuzzy::display_name;
use crate::search::notes::Note;
use crate::search::{
    rank, snippet, SearchKind, SearchMethod, SearchRequest, SearchResult, SearchStrategy,
    StrategyOutcome,
};
use crate::store::vault::Vault;

pub const DEFAULT_THRESHOLD: f32 = 0.7;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SimilarityFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityMatch {
    pub file_path: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SimilarityResponse {
    pub success: bool,
    #[serde(default)]
    pub matches: Vec<SimilarityMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SimilarityResponse {
    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            matches: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Ranked-candidate source over vector embeddings of vault content.
#[async_trait]
pub trait VectorSimilarity: Send + Sync {
    async fn similarity_search(
        &self,
        query: &str,
        filters: &SimilarityFilters,
        limit: usize,
        threshold: f32,
    ) -> SimilarityResponse;
}

pub struct SemanticStrategy {
    backend: Option<Arc<dyn VectorSimilarity>>,
    vault: Arc<dyn Vault>,
    threshold: f32,
}

impl SemanticStrategy {
    pub fn new(
        backend: Option<Arc<dyn VectorSimilarity>>,
        vault: Arc<dyn Vault>,
        threshold: f32,
    ) -> Self {
        Self {
            backend,
            vault,
            threshold,
        }
    }

    async fn to_result(&self, m: SimilarityMatch, include_content: bool) -> SearchResult {
        let stored_snippet = m
            .metadata
            .get("snippet")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let content = if include_content || stored_snippet.is_none() {
            match self.vault.read(&m.file_path).await {
                Ok(Some(bytes)) => Some(Note::parse(&m.file_path, &String::from_utf8_lossy(&bytes)).body),
                Ok(None) => None,
                Err(e) => {
                    tracing::debug!(path = %m.file_path, error = %e, "could not read matched note");
                    None
                }
            }
        } else {
            None
        };

        let snippet_text = stored_snippet
            .or_else(|| content.as_deref().map(|c| snippet(c, 200)))
            .unwrap_or_default();

        SearchResult {
            id: m.file_path.clone(),
            title: display_name(&m.file_path).to_string(),
            snippet: snippet_text,
            score: m.score as f64,
            search_method: SearchMethod::Semantic,
            metadata: m.metadata,
            content: if include_content { content } else { None },
        }
    }
}

#[async_trait]
impl SearchStrategy for SemanticStrategy {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn eligible(&self, request: &SearchRequest) -> bool {
        request.kind == SearchKind::Content && !request.traditional_only
    }

    async fn search(&self, request: &SearchRequest) -> StrategyOutcome {
        let Some(backend) = &self.backend else {
            return StrategyOutcome::Unavailable("no vector backend configured".into());
        };

        let f = &request.filters;
        let filters = SimilarityFilters {
            paths: (!f.paths.is_empty()).then(|| f.paths.clone()),
            tags: (!f.tags.is_empty()).then(|| f.tags.clone()),
            properties: (!f.properties.is_empty()).then(|| f.properties.clone()),
        };
        let threshold = request.threshold.unwrap_or(self.threshold);
        let limit = request.limit();

        let response = backend
            .similarity_search(&request.query, &filters, limit, threshold)
            .await;
        if !response.success {
            return StrategyOutcome::Failed(
                response
                    .error
                    .unwrap_or_else(|| "similarity search failed".into()),
            );
        }

        let mut results = Vec::with_capacity(response.matches.len());
        for m in response.matches {
            if m.score < threshold || !f.path_allowed(&m.file_path) {
                continue;
            }
            results.push(self.to_result(m, request.include_content).await);
        }
        StrategyOutcome::Found(rank(results, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::vault::FsVault;

    struct Fixed(SimilarityResponse);

    #[async_trait]
    impl VectorSimilarity for Fixed {
        async fn similarity_search(
            &self,
            _query: &str,
            _filters: &SimilarityFilters,
            _limit: usize,
            _threshold: f32,
        ) -> SimilarityResponse {
            self.0.clone()
        }
    }

    fn strategy(dir: &tempfile::TempDir, response: Option<SimilarityResponse>) -> SemanticStrategy {
        let backend = response.map(|r| Arc::new(Fixed(r)) as Arc<dyn VectorSimilarity>);
        SemanticStrategy::new(backend, Arc::new(FsVault::new(dir.path())), 0.5)
    }

    #[tokio::test]
    async fn unconfigured_backend_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let s = strategy(&dir, None);
        let outcome = s.search(&SearchRequest::new("q", SearchKind::Content)).await;
        assert!(matches!(outcome, StrategyOutcome::Unavailable(_)));
    }

    #[tokio::test]
    async fn failed_response_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let s = strategy(&dir, Some(SimilarityResponse::failed("timeout")));
        let outcome = s.search(&SearchRequest::new("q", SearchKind::Content)).await;
        assert!(matches!(outcome, StrategyOutcome::Failed(e) if e == "timeout"));
    }

    #[tokio::test]
    async fn matches_below_threshold_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        vault.write("ideas/garden.md", b"---\ntags: [home]\n---\nTomatoes need sun.").await.unwrap();

        let response = SimilarityResponse {
            success: true,
            matches: vec![
                SimilarityMatch {
                    file_path: "ideas/garden.md".into(),
                    score: 0.9,
                    metadata: serde_json::Value::Null,
                },
                SimilarityMatch {
                    file_path: "ideas/other.md".into(),
                    score: 0.2,
                    metadata: serde_json::Value::Null,
                },
            ],
            error: None,
        };
        let s = strategy(&dir, Some(response));
        let mut req = SearchRequest::new("plants", SearchKind::Content);
        req.include_content = true;

        let StrategyOutcome::Found(results) = s.search(&req).await else {
            panic!("expected results");
        };
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "garden");
        assert_eq!(results[0].search_method, SearchMethod::Semantic);
        assert_eq!(results[0].content.as_deref(), Some("Tomatoes need sun."));
        assert_eq!(results[0].snippet, "Tomatoes need sun.");
    }

    #[test]
    fn only_content_searches_are_eligible() {
        let dir = tempfile::tempdir().unwrap();
        let s = strategy(&dir, None);
        assert!(s.eligible(&SearchRequest::new("q", SearchKind::Content)));
        assert!(!s.eligible(&SearchRequest::new("q", SearchKind::Files)));
        let mut req = SearchRequest::new("q", SearchKind::Content);
        req.traditional_only = true;
        assert!(!s.eligible(&req));
    }
}
