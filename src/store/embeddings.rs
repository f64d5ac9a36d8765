use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use qdrant_client::qdrant::{
    value::Kind, Condition, ListValue, CreateCollectionBuilder, Distance, Filter, PointStruct,
    SearchPointsBuilder, Struct, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;

use crate::search::semantic::{
    SimilarityFilters, SimilarityMatch, SimilarityResponse, VectorSimilarity,
};

const COLLECTION: &str = "vault_notes";
const VECTOR_SIZE: u64 = 384;
const SNIPPET_CHARS: usize = 300;
const PROPERTIES: &str = "properties";

/// Payload stored with a note's vector. Frontmatter properties sit in one
/// nested struct so `properties.<name>` filter keys resolve.
fn note_payload(
    path: &str,
    content: &str,
    tags: &[String],
    properties: &BTreeMap<String, String>,
) -> HashMap<String, Value> {
    let mut payload = HashMap::<String, Value>::new();
    payload.insert("path".into(), path.to_string().into());
    let snippet: String = content.chars().take(SNIPPET_CHARS).collect();
    payload.insert("snippet".into(), snippet.into());
    payload.insert("tags".into(), Value {
        kind: Some(Kind::ListValue(ListValue {
            values: tags.iter().map(|t| t.clone().into()).collect(),
        })),
    });
    let fields: HashMap<String, Value> = properties
        .iter()
        .map(|(k, v)| (k.clone(), v.clone().into()))
        .collect();
    payload.insert(PROPERTIES.into(), Value {
        kind: Some(Kind::StructValue(Struct { fields })),
    });
    payload
}

fn property_key(name: &str) -> String {
    format!("{}.{}", PROPERTIES, name)
}

pub struct QdrantSimilarity {
    client: Qdrant,
    model: Mutex<fastembed::TextEmbedding>,
}

impl QdrantSimilarity {
    pub async fn connect() -> Result<Self> {
        let url = std::env::var("QDRANT_URL")
            .map_err(|_| anyhow::anyhow!("QDRANT_URL not set"))?;
        if url.is_empty() || url.starts_with('<') {
            anyhow::bail!("QDRANT_URL is not configured");
        }
        let api_key = std::env::var("QDRANT_API_KEY").unwrap_or_default();

        let mut builder = Qdrant::from_url(&url);
        if !api_key.is_empty() && !api_key.starts_with('<') {
            builder = builder.api_key(api_key);
        }
        let client = builder.build()?;

        if !client.collection_exists(COLLECTION).await? {
            client.create_collection(
                CreateCollectionBuilder::new(COLLECTION)
                    .vectors_config(
                        VectorParamsBuilder::new(VECTOR_SIZE, Distance::Cosine),
                    ),
            ).await?;
            tracing::info!("created qdrant collection: {}", COLLECTION);
        }

        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
                .with_show_download_progress(false),
        )?;

        Ok(Self { client, model: Mutex::new(model) })
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.lock()
            .map_err(|_| anyhow::anyhow!("embedding model lock poisoned"))?;
        let embeddings = model.embed(vec![text], None)?;
        embeddings.into_iter().next()
            .ok_or_else(|| anyhow::anyhow!("embedding failed"))
    }

    /// Embed one note. The point id derives from the path, so re-embedding replaces it.
    pub async fn upsert_note(
        &self,
        path: &str,
        content: &str,
        tags: &[String],
        properties: &BTreeMap<String, String>,
    ) -> Result<()> {
        let vector = self.embed(content)?;
        let payload = note_payload(path, content, tags, properties);

        let point_id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, path.as_bytes()).to_string();
        let point = PointStruct::new(point_id, vector, payload);

        self.client.upsert_points(
            UpsertPointsBuilder::new(COLLECTION, vec![point])
        ).await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        filters: &SimilarityFilters,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityMatch>> {
        let vector = self.embed(query)?;

        let mut conditions = Vec::new();
        if let Some(tags) = &filters.tags {
            conditions.push(Condition::matches("tags", tags.clone()));
        }
        if let Some(properties) = &filters.properties {
            for (k, v) in properties {
                conditions.push(Condition::matches(property_key(k), v.clone()));
            }
        }

        let mut request = SearchPointsBuilder::new(COLLECTION, vector, limit as u64)
            .with_payload(true)
            .score_threshold(threshold);
        if !conditions.is_empty() {
            request = request.filter(Filter::must(conditions));
        }
        let results = self.client.search_points(request).await?;

        let mut out = Vec::new();
        for point in results.result {
            let text = |key: &str| point.payload.get(key)
                .and_then(|v| match &v.kind {
                    Some(Kind::StringValue(s)) => Some(s.clone()),
                    _ => None,
                });
            let Some(path) = text("path") else { continue };
            // qdrant has no prefix match on keywords, so folder filters apply here
            if let Some(prefixes) = &filters.paths {
                if !prefixes.iter().any(|p| path.starts_with(p.trim_start_matches('/'))) {
                    continue;
                }
            }
            out.push(SimilarityMatch {
                metadata: serde_json::json!({
                    "path": path,
                    "snippet": text("snippet").unwrap_or_default(),
                }),
                file_path: path,
                score: point.score,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl VectorSimilarity for QdrantSimilarity {
    async fn similarity_search(
        &self,
        query: &str,
        filters: &SimilarityFilters,
        limit: usize,
        threshold: f32,
    ) -> SimilarityResponse {
        match self.search(query, filters, limit, threshold).await {
            Ok(matches) => SimilarityResponse { success: true, matches, error: None },
            Err(e) => SimilarityResponse::failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Follow a dotted filter key through nested payload structs.
    fn resolve<'a>(payload: &'a HashMap<String, Value>, key: &str) -> Option<&'a Value> {
        let mut parts = key.split('.');
        let mut current = payload.get(parts.next()?)?;
        for part in parts {
            match &current.kind {
                Some(Kind::StructValue(s)) => current = s.fields.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }

    #[test]
    fn property_filter_keys_resolve_in_payload() {
        let properties = BTreeMap::from([
            ("status".to_string(), "draft".to_string()),
            ("area".to_string(), "garden".to_string()),
        ]);
        let payload = note_payload("work/plan.md", "Seeds and soil.", &["summer".into()], &properties);

        assert!(payload.keys().all(|k| !k.contains('.')));
        for (name, expected) in &properties {
            let found = resolve(&payload, &property_key(name)).expect("nested property");
            assert_eq!(found.kind, Some(Kind::StringValue(expected.clone())));
        }
        assert!(resolve(&payload, &property_key("missing")).is_none());
    }
}
