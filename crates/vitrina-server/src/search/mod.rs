// crates/vitrina-server/src/search/mod.rs
// Search engine client: kNN, BM25, hybrid fusion, multi-vector fan-out

pub mod fusion;

use crate::config::{FusionStrategy, Settings};
use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Raw hit as returned by the engine (`_id` / `_score` / `_source` / `highlight`).
pub type RawHit = Value;

/// Aggregate index statistics for /health and /stats.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub documents_count: u64,
    pub index_size_bytes: u64,
    pub health: String,
}

/// HTTP client for the product index.
pub struct SearchEngineClient {
    http_client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    index: String,
    vector_field: String,
    vector_fallback_field: String,
    knn_num_candidates: usize,
    bm25_min_score: f64,
    hybrid_alpha: f64,
    hybrid_fusion: FusionStrategy,
}

impl SearchEngineClient {
    pub fn new(http_client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            http_client,
            base_url: settings.elastic_url.trim_end_matches('/').to_string(),
            username: settings.elastic_user.clone(),
            password: settings.elastic_password.clone(),
            index: settings.index_name.clone(),
            vector_field: settings.vector_field_name.clone(),
            vector_fallback_field: settings.vector_fallback_field.clone(),
            knn_num_candidates: settings.knn_num_candidates,
            bm25_min_score: settings.bm25_min_score,
            hybrid_alpha: settings.hybrid_alpha,
            hybrid_fusion: settings.hybrid_fusion,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    async fn search_raw(&self, body: Value) -> Result<Vec<RawHit>> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await
            .context("search request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("search engine error {}: {}", status, text));
        }

        let json: Value = response.json().await.context("search response not JSON")?;
        Ok(json["hits"]["hits"]
            .as_array()
            .cloned()
            .unwrap_or_default())
    }

    fn knn_body(&self, field: &str, query_vector: &[f32], k: usize) -> Value {
        let num_candidates = (k * 20).clamp(100, self.knn_num_candidates.max(100));
        json!({
            "size": k,
            "knn": {
                "field": field,
                "query_vector": query_vector,
                "k": k,
                "num_candidates": num_candidates
            }
        })
    }

    /// Semantic (kNN) search. A failed or empty query against a non-default
    /// vector field is retried once against the fallback field. Errors
    /// degrade to an empty list.
    pub async fn semantic_search(&self, query_vector: &[f32], k: usize) -> Vec<RawHit> {
        let hits = match self
            .search_raw(self.knn_body(&self.vector_field, query_vector, k))
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(field = %self.vector_field, error = %e, "Semantic search error");
                Vec::new()
            }
        };

        if hits.is_empty() && self.vector_field != self.vector_fallback_field {
            debug!(
                fallback = %self.vector_fallback_field,
                "No hits from configured vector field, trying fallback"
            );
            return match self
                .search_raw(self.knn_body(&self.vector_fallback_field, query_vector, k))
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(error = %e, "Semantic search fallback also failed");
                    Vec::new()
                }
            };
        }

        hits
    }

    fn bm25_body(&self, query_text: &str, k: usize) -> Value {
        json!({
            "size": k,
            "min_score": self.bm25_min_score,
            "query": {
                "bool": {
                    "should": [
                        { "multi_match": { "query": query_text, "fields": ["title_ua^6", "title_ru^6"], "type": "phrase", "boost": 5.0 } },
                        { "multi_match": { "query": query_text, "fields": ["title_ua^5", "title_ru^5"], "type": "best_fields", "fuzziness": "AUTO", "boost": 4.0 } },
                        { "multi_match": { "query": query_text, "fields": ["description_ua^2", "description_ru^2"], "type": "best_fields", "fuzziness": "AUTO", "boost": 2.0 } },
                        { "multi_match": { "query": query_text, "fields": ["sku^3", "good_code^2", "uktzed^1"], "type": "best_fields", "boost": 3.0 } }
                    ],
                    "minimum_should_match": 1
                }
            },
            "highlight": {
                "fields": {
                    "title_ua": {},
                    "title_ru": {},
                    "description_ua": {},
                    "description_ru": {}
                }
            }
        })
    }

    /// Lexical (BM25) search: phrase and fuzzy title clauses, description
    /// clause and exact-code clause, with highlighting.
    pub async fn bm25_search(&self, query_text: &str, k: usize) -> Vec<RawHit> {
        match self.search_raw(self.bm25_body(query_text, k)).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "BM25 search error");
                Vec::new()
            }
        }
    }

    /// Hybrid search: semantic and lexical branches in parallel, fused with
    /// the configured strategy. Requires a vector.
    pub async fn hybrid_search(
        &self,
        query_vector: &[f32],
        query_text: &str,
        k: usize,
    ) -> Result<Vec<RawHit>> {
        if query_vector.is_empty() {
            return Err(anyhow!("query vector is required for hybrid search"));
        }

        // Over-fetch both branches so the merge has enough overlap to work with.
        let candidates = (k * 2).max(50);
        let (sem, bm) = tokio::join!(
            self.semantic_search(query_vector, candidates),
            self.bm25_search(query_text, candidates)
        );
        debug!(semantic = sem.len(), bm25 = bm.len(), "Hybrid candidates");

        Ok(match self.hybrid_fusion {
            FusionStrategy::Weighted => fusion::weighted_merge(sem, bm, k, self.hybrid_alpha),
            FusionStrategy::Rrf => fusion::rrf_merge(sem, bm, k),
        })
    }

    /// Parallel kNN fan-out for the chat pipeline's subqueries. Per-subquery
    /// failures become empty lists and never abort the batch.
    pub async fn multi_semantic_search(
        &self,
        query_vectors: &[(String, Vec<f32>)],
        k_per_query: usize,
    ) -> Vec<(String, Vec<RawHit>)> {
        if query_vectors.is_empty() {
            return Vec::new();
        }

        let futures: Vec<_> = query_vectors
            .iter()
            .map(|(subquery, vector)| async move {
                let hits = self.semantic_search(vector, k_per_query).await;
                debug!(subquery = %subquery, hits = hits.len(), "Subquery done");
                (subquery.clone(), hits)
            })
            .collect();

        futures::future::join_all(futures).await
    }

    /// Document count, on-disk size and cluster health for the index.
    pub async fn index_stats(&self) -> IndexStats {
        let stats_url = format!("{}/{}/_stats", self.base_url, self.index);
        let health_url = format!("{}/_cluster/health/{}", self.base_url, self.index);

        let stats_req = self
            .http_client
            .get(&stats_url)
            .basic_auth(&self.username, Some(&self.password))
            .send();
        let health_req = self
            .http_client
            .get(&health_url)
            .basic_auth(&self.username, Some(&self.password))
            .send();

        let (stats_res, health_res) = tokio::join!(stats_req, health_req);

        let mut out = IndexStats {
            health: "unknown".into(),
            ..Default::default()
        };

        if let Ok(response) = stats_res
            && let Ok(body) = response.json::<Value>().await
        {
            let total = &body["indices"][&self.index]["total"];
            out.documents_count = total["docs"]["count"].as_u64().unwrap_or(0);
            out.index_size_bytes = total["store"]["size_in_bytes"].as_u64().unwrap_or(0);
        }
        if let Ok(response) = health_res
            && let Ok(body) = response.json::<Value>().await
            && let Some(status) = body["status"].as_str()
        {
            out.health = status.to_string();
        }

        out
    }

    /// Cheap reachability probe for /ready.
    pub async fn ping(&self) -> bool {
        self.http_client
            .get(&self.base_url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
