use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::search::{rank, SearchRequest, SearchResponse, SearchStrategy, StrategyOutcome};

/// What to do when a strategy that is not last in the chain finds nothing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum EmptySemanticPolicy {
    /// Treat zero matches like an outage and try the next strategy.
    #[default]
    FallBack,
    /// Zero matches is an answer; return it.
    Accept,
}

pub struct SearchCascade {
    strategies: Vec<Arc<dyn SearchStrategy>>,
    policy: EmptySemanticPolicy,
}

impl SearchCascade {
    pub fn new(strategies: Vec<Arc<dyn SearchStrategy>>, policy: EmptySemanticPolicy) -> Self {
        Self { strategies, policy }
    }

    /// Never fails: an exhausted chain yields an empty successful response
    /// whose diagnostics say what went wrong.
    pub async fn search(&self, request: &SearchRequest) -> SearchResponse {
        let chain: Vec<&Arc<dyn SearchStrategy>> = self
            .strategies
            .iter()
            .filter(|s| s.eligible(request))
            .collect();
        let mut diagnostics = Vec::new();

        for (i, strategy) in chain.iter().enumerate() {
            let last = i + 1 == chain.len();
            match strategy.search(request).await {
                StrategyOutcome::Found(results)
                    if results.is_empty() && !last && self.policy == EmptySemanticPolicy::FallBack =>
                {
                    debug!(strategy = strategy.name(), "no matches, falling back");
                    diagnostics.push(format!("{}: no matches", strategy.name()));
                }
                StrategyOutcome::Found(results) => {
                    let results = rank(results, request.limit());
                    return SearchResponse {
                        success: true,
                        total: results.len(),
                        results,
                        strategy: Some(strategy.name().to_string()),
                        diagnostics,
                    };
                }
                StrategyOutcome::Unavailable(reason) => {
                    debug!(strategy = strategy.name(), %reason, "strategy unavailable");
                    diagnostics.push(format!("{}: unavailable: {}", strategy.name(), reason));
                }
                StrategyOutcome::Failed(error) => {
                    warn!(strategy = strategy.name(), %error, "search strategy failed");
                    diagnostics.push(format!("{}: failed: {}", strategy.name(), error));
                }
            }
        }

        SearchResponse::empty(diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SearchKind, SearchMethod, SearchResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        outcome: StrategyOutcome,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, outcome: StrategyOutcome) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SearchStrategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn eligible(&self, _request: &SearchRequest) -> bool {
            true
        }

        async fn search(&self, _request: &SearchRequest) -> StrategyOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn hit(id: &str, score: f64) -> SearchResult {
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

    fn chain(strategies: &[&Arc<Scripted>]) -> Vec<Arc<dyn SearchStrategy>> {
        strategies
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn SearchStrategy>)
            .collect()
    }

    fn request() -> SearchRequest {
        SearchRequest::new("q", SearchKind::Content)
    }

    #[tokio::test]
    async fn failure_falls_through_to_next() {
        let first = Scripted::new("semantic", StrategyOutcome::Failed("boom".into()));
        let second = Scripted::new("traditional", StrategyOutcome::Found(vec![hit("a", 0.3)]));
        let cascade = SearchCascade::new(chain(&[&first, &second]), EmptySemanticPolicy::FallBack);

        let response = cascade.search(&request()).await;
        assert!(response.success);
        assert_eq!(response.total, 1);
        assert_eq!(response.strategy.as_deref(), Some("traditional"));
        assert_eq!(response.diagnostics, vec!["semantic: failed: boom".to_string()]);
    }

    #[tokio::test]
    async fn empty_result_policy() {
        let first = Scripted::new("semantic", StrategyOutcome::Found(Vec::new()));
        let second = Scripted::new("traditional", StrategyOutcome::Found(vec![hit("a", 0.3)]));

        let fallback = SearchCascade::new(chain(&[&first, &second]), EmptySemanticPolicy::FallBack);
        assert_eq!(fallback.search(&request()).await.total, 1);

        let accept = SearchCascade::new(chain(&[&first, &second]), EmptySemanticPolicy::Accept);
        let response = accept.search(&request()).await;
        assert_eq!(response.total, 0);
        assert_eq!(response.strategy.as_deref(), Some("semantic"));
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_chain_is_empty_success() {
        let first = Scripted::new("semantic", StrategyOutcome::Unavailable("offline".into()));
        let second = Scripted::new("traditional", StrategyOutcome::Failed("disk".into()));
        let cascade = SearchCascade::new(chain(&[&first, &second]), EmptySemanticPolicy::FallBack);

        let response = cascade.search(&request()).await;
        assert!(response.success);
        assert_eq!(response.total, 0);
        assert!(response.strategy.is_none());
        assert_eq!(response.diagnostics.len(), 2);
    }

    #[tokio::test]
    async fn results_are_ranked_and_limited() {
        let only = Scripted::new(
            "traditional",
            StrategyOutcome::Found(vec![hit("low", 0.1), hit("high", 0.9), hit("mid", 0.5)]),
        );
        let cascade = SearchCascade::new(chain(&[&only]), EmptySemanticPolicy::FallBack);
        let mut req = request();
        req.limit = Some(2);
        let response = cascade.search(&req).await;
        let ids: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }
}
