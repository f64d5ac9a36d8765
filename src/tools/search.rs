use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::search::{SearchFilters, SearchKind, SearchRequest};
use crate::server::{SearchToolRequest, VaultServer};

impl VaultServer {
    pub async fn do_search(&self, req: SearchToolRequest) -> Result<serde_json::Value> {
        let request = build_request(req)?;
        let response = self.store.search.search(&request).await;
        tracing::debug!(
            kind = ?request.kind,
            total = response.total,
            strategy = response.strategy.as_deref().unwrap_or("none"),
            "search served"
        );
        Ok(serde_json::to_value(response)?)
    }
}

fn build_request(req: SearchToolRequest) -> Result<SearchRequest> {
    let kind = match req.kind.as_deref() {
        None => SearchKind::Content,
        Some(k) => SearchKind::from_str(k).with_context(|| format!("unknown search kind: {}", k))?,
    };
    let filters = SearchFilters {
        paths: req.paths.unwrap_or_default(),
        tags: req.tags.unwrap_or_default(),
        properties: req.properties.unwrap_or_default(),
        workspace_id: req.workspace_id,
        session_id: req.session_id,
        trace_type: req.trace_type,
        since: parse_time(req.since.as_deref(), "since")?,
        until: parse_time(req.until.as_deref(), "until")?,
    };
    Ok(SearchRequest {
        query: req.query,
        kind,
        filters,
        limit: req.limit.filter(|l| *l > 0),
        traditional_only: req.traditional_only.unwrap_or(false),
        threshold: req.threshold,
        include_content: req.include_content.unwrap_or(false),
    })
}

fn parse_time(value: Option<&str>, field: &str) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("{} is not an RFC 3339 timestamp: {}", field, v))
        })
        .transpose()
}
