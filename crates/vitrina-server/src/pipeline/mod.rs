// crates/vitrina-server/src/pipeline/mod.rs
// The chat search pipeline: classify -> plan -> embed -> fan-out -> merge ->
// threshold -> categorize -> re-rank -> compose -> persist

use crate::assistant::{Assistant, AssistantAction};
use crate::categories::{self, CategoryBuckets, RECOMMENDED_CODE};
use crate::config::Settings;
use crate::search::RawHit;
use crate::search_log::{LoggedProduct, SearchLogRecord, SearchLogger};
use crate::session::{SearchHistory, SessionStore};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vitrina_types::{
    ActionButton, CategoryFacet, ChatStreamEvent, DialogContext, Product, ProductRecommendation,
    SearchHistoryItem, StatusKind,
};

/// Combined candidate budget split across subqueries.
const FANOUT_BUDGET: usize = 50;
/// Per-subquery floor.
const MIN_K_PER_SUBQUERY: usize = 10;
/// Bonus added when a product surfaces under more than one subquery.
const CO_OCCURRENCE_BONUS: f64 = 0.05;
/// Survivor cap of the relaxed (half-threshold) pass.
const RELAXED_PASS_CAP: usize = 30;
/// Slice sizes for the downstream stages.
const CATEGORIZE_TOP: usize = 30;
const RERANK_TOP: usize = 25;
/// How many facet buttons are offered.
const MAX_CATEGORY_ACTIONS: usize = 10;

const MSG_NO_RESULTS: &str =
    "На жаль, за вашим запитом нічого не знайдено. Спробуйте інше формулювання або оберіть категорію.";
const MSG_RELAXED_PREAMBLE: &str = "Точних збігів не знайшлося, але ось схожі товари. ";
const MSG_CATEGORY_NOT_FOUND: &str =
    " На жаль, обрана категорія недоступна, тому показую всі знайдені товари.";

/// Embedding seam of the pipeline. Mocked in tests.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Order-preserving; failed texts come back as `None`.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>>;
}

#[async_trait]
impl Embedder for crate::embeddings::EmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        crate::embeddings::EmbeddingClient::embed_batch(self, texts).await
    }
}

/// Search-engine seam of the pipeline. Mocked in tests.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn multi_semantic_search(
        &self,
        query_vectors: &[(String, Vec<f32>)],
        k_per_query: usize,
    ) -> Vec<(String, Vec<RawHit>)>;
}

#[async_trait]
impl SearchBackend for crate::search::SearchEngineClient {
    async fn multi_semantic_search(
        &self,
        query_vectors: &[(String, Vec<f32>)],
        k_per_query: usize,
    ) -> Vec<(String, Vec<RawHit>)> {
        crate::search::SearchEngineClient::multi_semantic_search(self, query_vectors, k_per_query)
            .await
    }
}

/// Everything a product search produces.
#[derive(Debug, Clone)]
pub struct ProductOutcome {
    pub results: Vec<Product>,
    pub recommendations: Vec<ProductRecommendation>,
    pub facets: Vec<CategoryFacet>,
    pub buckets: CategoryBuckets,
    pub assistant_message: String,
    pub dialog_state: String,
    pub actions: Vec<ActionButton>,
    pub subqueries: Vec<String>,
}

/// What one pipeline run decided.
#[derive(Debug, Clone)]
pub enum Outcome {
    Greeting { message: String },
    Invalid { message: String },
    Clarification { message: String, categories: Vec<String> },
    NoResults { message: String },
    Error { message: String },
    ProductResults(Box<ProductOutcome>),
}

/// Validate and normalize the raw query. Returns the trimmed query; the
/// error carries the user-facing message for the violated rule. Idempotent:
/// a query that passed once passes again unchanged.
pub fn validate_query(query: &str) -> Result<String, String> {
    let query = query.trim();
    if query.chars().count() < 2 {
        return Err("Запит занадто короткий. Напишіть хоча б 2 символи.".to_string());
    }
    if query.chars().count() > 500 {
        return Err("Запит занадто довгий. Максимум 500 символів.".to_string());
    }
    if !query.chars().any(char::is_alphabetic) {
        return Err("Будь ласка, напишіть текстовий запит.".to_string());
    }

    let mut run_char = ' ';
    let mut run_len = 0usize;
    for ch in query.chars() {
        if ch == run_char {
            run_len += 1;
            if run_len >= 8 {
                return Err("Будь ласка, напишіть коректний запит.".to_string());
            }
        } else {
            run_char = ch;
            run_len = 1;
        }
    }

    Ok(query.to_string())
}

/// Merge per-subquery hit lists into one ranking. Subquery `i` carries
/// weight `decay^i`; a product seen under several subqueries keeps the max
/// weighted score plus a small co-occurrence bonus per extra occurrence.
/// The combined value overwrites `_score`. Output is sorted descending.
pub fn merge_weighted(results: &[(String, Vec<RawHit>)], decay: f64) -> Vec<RawHit> {
    let mut combined: HashMap<String, (RawHit, f64)> = HashMap::new();

    for (idx, (subquery, hits)) in results.iter().enumerate() {
        let weight = decay.powi(idx as i32);
        debug!(subquery = %subquery, hits = hits.len(), weight, "Merging subquery hits");
        for hit in hits {
            let id = hit
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let weighted = hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0) * weight;
            combined
                .entry(id)
                .and_modify(|(_, score)| *score = score.max(weighted) + CO_OCCURRENCE_BONUS)
                .or_insert_with(|| (hit.clone(), weighted));
        }
    }

    let mut merged: Vec<RawHit> = combined
        .into_values()
        .map(|(mut hit, score)| {
            if let Some(obj) = hit.as_object_mut() {
                obj.insert("_score".into(), Value::from(score));
            }
            hit
        })
        .collect();
    // Ties break on id so reruns stay deterministic.
    merged.sort_by(|a, b| {
        let sa = a.get("_score").and_then(Value::as_f64).unwrap_or(0.0);
        let sb = b.get("_score").and_then(Value::as_f64).unwrap_or(0.0);
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.get("_id")
                    .and_then(Value::as_str)
                    .cmp(&b.get("_id").and_then(Value::as_str))
            })
    });
    merged
}

/// Score cutoff derived jointly from the maximum combined score and the
/// hit-count regime: sparser result sets get softer floors, so a bigger
/// hit count never lowers the threshold.
pub fn adaptive_threshold(max_score: f64, hit_count: usize, settings: &Settings) -> f64 {
    if max_score <= 0.0 {
        return 0.0;
    }
    let (ratio_mult, abs_mult) = match hit_count {
        0..=4 => (0.625, 0.50),
        5..=14 => (0.75, 0.70),
        15..=49 => (0.875, 0.85),
        _ => (1.0, 1.0),
    };
    let ratio = settings.chat_search_score_threshold_ratio * ratio_mult;
    let abs_floor = settings.chat_search_min_score_absolute * abs_mult;
    abs_floor.max(ratio * max_score)
}

/// The conversational search pipeline over its upstream seams.
pub struct SearchPipeline {
    settings: Arc<Settings>,
    embedder: Arc<dyn Embedder>,
    search: Arc<dyn SearchBackend>,
    assistant: Arc<dyn Assistant>,
    sessions: Arc<SessionStore>,
    history: Arc<SearchHistory>,
    search_log: Option<Arc<SearchLogger>>,
}

impl SearchPipeline {
    pub fn new(
        settings: Arc<Settings>,
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn SearchBackend>,
        assistant: Arc<dyn Assistant>,
        sessions: Arc<SessionStore>,
        history: Arc<SearchHistory>,
        search_log: Option<Arc<SearchLogger>>,
    ) -> Self {
        Self {
            settings,
            embedder,
            search,
            assistant,
            sessions,
            history,
            search_log,
        }
    }

    /// Run the whole pipeline for one utterance.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        query: &str,
        session_id: &str,
        k: usize,
        selected_category: Option<&str>,
        dialog_context: Option<&DialogContext>,
        history: &[SearchHistoryItem],
        sink: Option<&mpsc::Sender<ChatStreamEvent>>,
    ) -> Outcome {
        let started = Instant::now();

        // 1. Validation is cheap and local; no LLM call for garbage input.
        let query = match validate_query(query) {
            Ok(query) => query,
            Err(message) => return Outcome::Invalid { message },
        };

        // 2. Classify.
        let classification = match self
            .assistant
            .classify(&query, history, dialog_context)
            .await
        {
            Ok(classification) => classification,
            Err(e) => {
                warn!(error = %e, "Classifier failed");
                return Outcome::Error {
                    message: e.user_message(),
                };
            }
        };
        info!(
            action = ?classification.action,
            confidence = classification.confidence,
            "Assistant classified query"
        );

        let subqueries = match classification.action {
            AssistantAction::Greeting => {
                return Outcome::Greeting {
                    message: classification.message,
                };
            }
            AssistantAction::Invalid => {
                return Outcome::Invalid {
                    message: classification.message,
                };
            }
            AssistantAction::Clarification { categories } => {
                return Outcome::Clarification {
                    message: classification.message,
                    categories,
                };
            }
            AssistantAction::ProductSearch { subqueries } => {
                // 3. Plan: fall back to the raw query when the model gave none.
                if subqueries.is_empty() {
                    vec![query.clone()]
                } else {
                    subqueries
                }
            }
        };
        self.emit(
            sink,
            ChatStreamEvent::Status {
                message: "Шукаю товари...".into(),
                kind: StatusKind::Searching,
            },
        )
        .await;

        // 4. Embed the fan-out plan; drop subqueries without a vector.
        let embeddings = self.embedder.embed_batch(&subqueries).await;
        let valid: Vec<(String, Vec<f32>)> = subqueries
            .iter()
            .zip(embeddings)
            .filter_map(|(sq, emb)| emb.map(|e| (sq.clone(), e)))
            .collect();
        if valid.is_empty() {
            warn!(query = %query, "No subquery could be embedded");
            return Outcome::Error {
                message: "Не вдалося обробити запит. Спробуйте ще раз пізніше.".to_string(),
            };
        }

        // 5. Fan out.
        let k_per_subquery = (FANOUT_BUDGET / valid.len())
            .clamp(MIN_K_PER_SUBQUERY, self.settings.chat_search_max_k_per_subquery);
        let per_subquery = self.search.multi_semantic_search(&valid, k_per_subquery).await;

        // 6. Merge with weighted ranks.
        let merged = merge_weighted(&per_subquery, self.settings.chat_search_subquery_weight_decay);
        let total_found = merged.len();
        let max_score = merged
            .first()
            .and_then(|h| h.get("_score").and_then(Value::as_f64))
            .unwrap_or(0.0);

        // 7. Adaptive thresholding, with one relaxed retry at half cutoff.
        let threshold = adaptive_threshold(max_score, total_found, &self.settings);
        let above = |cutoff: f64| {
            merged
                .iter()
                .filter(move |h| h.get("_score").and_then(Value::as_f64).unwrap_or(0.0) >= cutoff)
        };
        let mut relaxed_used = false;
        let mut survivors: Vec<&RawHit> = above(threshold).collect();
        if survivors.is_empty() && max_score > 0.0 {
            relaxed_used = true;
            survivors = above(threshold * 0.5).take(RELAXED_PASS_CAP).collect();
        }
        info!(
            total_found,
            survivors = survivors.len(),
            max_score,
            threshold,
            relaxed_used,
            "Threshold filtering done"
        );
        if survivors.is_empty() {
            return Outcome::NoResults {
                message: MSG_NO_RESULTS.to_string(),
            };
        }
        let candidates: Vec<Product> = survivors.iter().map(|h| Product::from_hit(h)).collect();
        self.emit(
            sink,
            ChatStreamEvent::Candidates {
                count: candidates.len(),
            },
        )
        .await;

        // 8. Categorize the head of the candidate list.
        let mut buckets =
            categories::categorize(&candidates[..candidates.len().min(CATEGORIZE_TOP)]);

        // 9. Re-rank.
        self.emit(
            sink,
            ChatStreamEvent::Status {
                message: "Підбираю найкраще...".into(),
                kind: StatusKind::Recommending,
            },
        )
        .await;
        let rerank_slice = &candidates[..candidates.len().min(RERANK_TOP)];
        let (recommendations, rerank_message) =
            self.assistant.rerank(rerank_slice, &query).await;

        // 10. Compose: re-ranked first, the rest by combined score.
        let candidate_ids: HashSet<&str> = candidates.iter().map(|p| p.id.as_str()).collect();
        let reco_ids: Vec<String> = recommendations
            .iter()
            .filter(|r| candidate_ids.contains(r.product_id.as_str()))
            .map(|r| r.product_id.clone())
            .collect();
        let by_id: HashMap<&str, &Product> =
            candidates.iter().map(|p| (p.id.as_str(), p)).collect();
        let reco_set: HashSet<&str> = reco_ids.iter().map(String::as_str).collect();
        let mut ordered: Vec<Product> = reco_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied().cloned())
            .collect();
        ordered.extend(
            candidates
                .iter()
                .filter(|p| !reco_set.contains(p.id.as_str()))
                .cloned(),
        );
        if !reco_ids.is_empty() {
            buckets.insert(0, (RECOMMENDED_CODE.to_string(), reco_ids.clone()));
        }
        let facets = categories::facet_payload(
            &buckets
                .iter()
                .filter(|(code, _)| code.as_str() != RECOMMENDED_CODE)
                .cloned()
                .collect(),
            reco_ids.len(),
        );
        self.emit(
            sink,
            ChatStreamEvent::Categories {
                categories: facets.clone(),
            },
        )
        .await;
        self.emit(
            sink,
            ChatStreamEvent::Recommendations {
                count: recommendations.len(),
                assistant_message: rerank_message.clone(),
            },
        )
        .await;

        // 11. Category filter.
        let mut dialog_state = "final_results".to_string();
        let mut category_notice = "";
        if let Some(selector) = selected_category {
            match categories::resolve_category(selector) {
                Some(def) if def.code == RECOMMENDED_CODE => {
                    ordered.retain(|p| reco_set.contains(p.id.as_str()));
                }
                Some(def) => {
                    let allowed: HashSet<&str> = crate::categories::CATEGORY_SCHEMA
                        .iter()
                        .filter(|c| c.code == def.code || c.parent == Some(def.code))
                        .map(|c| c.code)
                        .collect();
                    ordered.retain(|p| {
                        categories::assign_category(p).is_some_and(|code| allowed.contains(code))
                    });
                }
                None => {
                    warn!(selector, "Unknown category selector, passing all results");
                    dialog_state = "category_not_found".to_string();
                    category_notice = MSG_CATEGORY_NOT_FOUND;
                }
            }
        }

        // 12. Persist the full ordered list for pagination, then the history item.
        let total_for_session = ordered.len();
        self.sessions
            .store(session_id, ordered.clone(), total_for_session)
            .await;
        let keywords: Vec<String> = query
            .split_whitespace()
            .filter(|w| w.chars().count() > 2)
            .take(5)
            .map(str::to_string)
            .collect();

        let max_display = k.min(self.settings.max_chat_display_items);
        let results: Vec<Product> = ordered.into_iter().take(max_display).collect();
        self.history.add(&query, keywords, results.len()).await;

        let assistant_message = format!(
            "{}{}{}",
            if relaxed_used { MSG_RELAXED_PREAMBLE } else { "" },
            rerank_message,
            category_notice
        );

        let actions: Vec<ActionButton> = facets
            .iter()
            .take(MAX_CATEGORY_ACTIONS)
            .map(|facet| {
                let mut button =
                    ActionButton::button("select_category", facet.code.clone(), facet.label.clone());
                if facet.special == Some(true) {
                    button.special = Some("recommended".to_string());
                }
                button
            })
            .collect();

        if let Some(log) = &self.search_log {
            let record = SearchLogRecord {
                timestamp: String::new(),
                session_id: session_id.to_string(),
                query: query.clone(),
                intent: "product_search".into(),
                subqueries: subqueries.clone(),
                total_products_found: total_found,
                products_after_filtering: candidates.len(),
                max_score,
                threshold,
                search_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                top_products: results
                    .iter()
                    .map(|p| LoggedProduct {
                        id: p.id.clone(),
                        name: p.display_title().unwrap_or_else(|| p.id.clone()),
                        score: p.score,
                        recommended: reco_set.contains(p.id.as_str()),
                    })
                    .collect(),
                categories: facets.iter().map(|f| f.label.clone()).collect(),
                recommendations_count: recommendations.len(),
            };
            let log = Arc::clone(log);
            tokio::spawn(async move { log.log(record).await });
        }

        Outcome::ProductResults(Box::new(ProductOutcome {
            results,
            recommendations,
            facets,
            buckets,
            assistant_message,
            dialog_state,
            actions,
            subqueries,
        }))
    }

    async fn emit(&self, sink: Option<&mpsc::Sender<ChatStreamEvent>>, event: ChatStreamEvent) {
        if let Some(sink) = sink {
            // A closed channel means the client is gone; the pipeline keeps
            // going so the session store still gets its write.
            let _ = sink.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(id: &str, score: f64) -> RawHit {
        json!({ "_id": id, "_score": score, "_source": { "title_ua": "Товар" } })
    }

    fn settings() -> Settings {
        Settings::from_env()
    }

    #[test]
    fn test_validate_query_rules() {
        assert!(validate_query("чорна футболка").is_ok());
        assert!(validate_query("  оk  ").is_ok());
        assert!(validate_query("a").is_err(), "too short");
        assert!(validate_query(&"ф".repeat(501)).is_err(), "too long");
        assert!(validate_query("12345 !!!").is_err(), "no letters");
        assert!(validate_query("принтерррррррр").is_err(), "8+ repeated chars");
        assert!(validate_query("оооооооп").is_ok(), "7 repeats pass");
    }

    #[test]
    fn test_validate_query_idempotent() {
        let q = "  чорна футболка  ";
        let once = validate_query(q).unwrap();
        let twice = validate_query(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_weight_decay() {
        let results = vec![
            ("перший".to_string(), vec![hit("a", 1.0)]),
            ("другий".to_string(), vec![hit("b", 1.0)]),
            ("третій".to_string(), vec![hit("c", 1.0)]),
        ];
        let merged = merge_weighted(&results, 0.85);
        let score_of = |id: &str| {
            merged
                .iter()
                .find(|h| h["_id"] == id)
                .and_then(|h| h["_score"].as_f64())
                .unwrap()
        };
        assert!((score_of("a") - 1.0).abs() < 1e-9);
        assert!((score_of("b") - 0.85).abs() < 1e-9);
        assert!((score_of("c") - 0.85_f64.powi(2)).abs() < 1e-9);
        assert_eq!(merged[0]["_id"], "a", "sorted by combined score");
    }

    #[test]
    fn test_merge_co_occurrence_bonus() {
        let results = vec![
            ("перший".to_string(), vec![hit("a", 1.0), hit("b", 0.9)]),
            ("другий".to_string(), vec![hit("a", 0.8)]),
        ];
        let merged = merge_weighted(&results, 0.85);
        let a = merged
            .iter()
            .find(|h| h["_id"] == "a")
            .and_then(|h| h["_score"].as_f64())
            .unwrap();
        // max(1.0, 0.8 * 0.85) + 0.05
        assert!((a - 1.05).abs() < 1e-9);
    }

    #[test]
    fn test_merge_bonus_accumulates_per_extra_subquery() {
        // A product present under every subquery collects one bonus per
        // duplicate occurrence; five subqueries cap it at +0.20 over the max.
        let results: Vec<(String, Vec<RawHit>)> = (0..5)
            .map(|i| (format!("sq{i}"), vec![hit("a", 1.0)]))
            .collect();
        let merged = merge_weighted(&results, 1.0);
        let a = merged[0]["_score"].as_f64().unwrap();
        assert!((a - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_threshold_regimes() {
        let settings = settings();
        // Defaults: ratio 0.4, abs 0.3.
        let m = 2.0;
        // <5 hits: max(0.3*0.5, 0.4*0.625*2.0) = max(0.15, 0.5)
        assert!((adaptive_threshold(m, 3, &settings) - 0.5).abs() < 1e-9);
        // <15 hits: max(0.21, 0.3*2.0) = 0.6
        assert!((adaptive_threshold(m, 10, &settings) - 0.6).abs() < 1e-9);
        // <50 hits: max(0.255, 0.35*2.0) = 0.7
        assert!((adaptive_threshold(m, 30, &settings) - 0.7).abs() < 1e-9);
        // >=50 hits: max(0.3, 0.4*2.0) = 0.8
        assert!((adaptive_threshold(m, 80, &settings) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_threshold_monotone_in_hit_count() {
        let settings = settings();
        for m in [0.2, 1.0, 3.5] {
            let mut last = 0.0;
            for count in [1, 5, 15, 50, 500] {
                let t = adaptive_threshold(m, count, &settings);
                assert!(
                    t >= last,
                    "threshold decreased for m={m} at count={count}: {t} < {last}"
                );
                last = t;
            }
        }
    }

    #[test]
    fn test_adaptive_threshold_zero_max() {
        assert_eq!(adaptive_threshold(0.0, 100, &settings()), 0.0);
    }
}
