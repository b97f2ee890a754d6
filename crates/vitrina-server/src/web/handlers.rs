// crates/vitrina-server/src/web/handlers.rs
// Request/response handlers for the REST surface

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::{Value, json};
use std::time::Instant;
use tracing::{info, warn};
use vitrina_types::{
    ActionButton, CacheStatsResponse, ChatSearchRequest, ChatSearchResponse, DialogContext,
    HealthResponse, LoadMoreRequest, LoadMoreResponse, Product, SearchRequest, SearchResponse,
    StatsResponse,
};

use crate::pipeline::Outcome;
use crate::web::state::AppState;

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.search.index_stats().await;
    Json(HealthResponse {
        status: "healthy".into(),
        search_engine: if stats.health == "unknown" {
            "unreachable".into()
        } else {
            "connected".into()
        },
        index: state.search.index_name().to_string(),
        documents_count: stats.documents_count,
        cache_size: state.embeddings.cache().len().await,
        uptime_seconds: state.uptime_seconds(),
    })
}

/// GET /live
pub async fn live() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

/// GET /ready
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if state.search.ping().await {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "search_engine": "unreachable" })),
        )
    }
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.search.index_stats().await;
    Json(StatsResponse {
        index: state.search.index_name().to_string(),
        documents_count: stats.documents_count,
        index_size_bytes: stats.index_size_bytes,
        health: stats.health,
        embedding_cache_size: state.embeddings.cache().len().await,
        embedding_model: state.embeddings.model_name().to_string(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// GET /cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let cache = state.embeddings.cache();
    let expired = cache.cleanup_expired().await;
    Json(CacheStatsResponse {
        size: cache.len().await,
        capacity: cache.capacity(),
        ttl_seconds: cache.ttl().as_secs(),
        expired_cleaned_now: expired,
    })
}

/// POST /cache/clear
pub async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    state.embeddings.cache().clear().await;
    Json(json!({ "message": "Cache cleared" }))
}

/// POST /search — direct bm25 / knn / hybrid search.
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, Json<Value>)> {
    let started = Instant::now();
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(bad_request("Query cannot be empty"));
    }

    let mode = request.mode.to_lowercase().replace("semantic", "knn");
    let k = request.k.clamp(1, 500);
    let candidates = (k * 2).max(100);

    let hits = match mode.as_str() {
        "bm25" => state.search.bm25_search(&query, candidates).await,
        "knn" => {
            let vector = require_embedding(&state, &query).await?;
            state.search.semantic_search(&vector, candidates).await
        }
        "hybrid" => {
            let vector = require_embedding(&state, &query).await?;
            state
                .search
                .hybrid_search(&vector, &query, candidates)
                .await
                .unwrap_or_default()
        }
        other => {
            return Err(bad_request(&format!("Unknown search mode: {other}")));
        }
    };

    // BM25 scores live on their own scale, so the lexical floor applies there.
    let min_score = if mode == "bm25" {
        state.settings.bm25_min_score
    } else {
        request.min_score
    };
    let results: Vec<Product> = hits
        .iter()
        .filter(|h| h.get("_score").and_then(Value::as_f64).unwrap_or(0.0) >= min_score)
        .take(k)
        .map(Product::from_hit)
        .collect();

    let search_time_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(query = %query, mode = %mode, results = results.len(), search_time_ms, "/search done");

    Ok(Json(SearchResponse {
        total_found: results.len(),
        results,
        search_time_ms,
        mode: request.mode,
    }))
}

async fn require_embedding(
    state: &AppState,
    query: &str,
) -> Result<Vec<f32>, (StatusCode, Json<Value>)> {
    match state.embeddings.embed(query).await {
        Some(vector) => Ok(vector),
        None => {
            warn!(query, "Embedding unavailable for direct search");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "detail": "Embedding service unavailable. Please try again later." })),
            ))
        }
    }
}

fn bad_request(detail: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail })))
}

/// POST /chat/search — the full conversational pipeline, request/response mode.
pub async fn chat_search(
    State(state): State<AppState>,
    Json(request): Json<ChatSearchRequest>,
) -> Json<ChatSearchResponse> {
    let started = Instant::now();
    let outcome = state
        .pipeline
        .run(
            &request.query,
            &request.session_id,
            request.k.clamp(1, 200),
            request.selected_category.as_deref(),
            request.dialog_context.as_ref(),
            &request.search_history,
            None,
        )
        .await;
    Json(outcome_into_response(
        outcome,
        started.elapsed().as_secs_f64() * 1000.0,
    ))
}

/// POST /chat/search/load-more — pagination from the session store.
/// A missing or expired session returns an empty batch, never an error.
pub async fn load_more(
    State(state): State<AppState>,
    Json(request): Json<LoadMoreRequest>,
) -> Json<LoadMoreResponse> {
    let limit = request.limit.clamp(1, 50);
    let page = state
        .sessions
        .fetch(&request.session_id, request.offset, limit)
        .await;
    info!(
        session_id = %request.session_id,
        offset = request.offset,
        returned = page.products.len(),
        has_more = page.has_more,
        "Load more"
    );
    Json(LoadMoreResponse {
        products: page.products,
        next_offset: page.next_offset,
        has_more: page.has_more,
        total_found: page.total_found,
    })
}

/// Serialize a pipeline outcome to the wire response shape.
pub fn outcome_into_response(outcome: Outcome, search_time_ms: f64) -> ChatSearchResponse {
    let empty = |message: String, dialog_state: &str, needs_user_input: bool| ChatSearchResponse {
        results: Vec::new(),
        recommendations: Vec::new(),
        categories: Vec::new(),
        search_time_ms,
        assistant_message: Some(message),
        dialog_state: Some(dialog_state.to_string()),
        dialog_context: None,
        needs_user_input,
        actions: None,
    };

    match outcome {
        Outcome::Greeting { message } => empty(message, "greeting", true),
        Outcome::Invalid { message } => empty(message, "invalid_query", true),
        Outcome::NoResults { message } => empty(message, "no_results", true),
        Outcome::Error { message } => empty(message, "error", false),
        Outcome::Clarification {
            message,
            categories,
        } => {
            let actions: Vec<ActionButton> = categories
                .iter()
                .take(8)
                .map(|category| ActionButton::button("search_category", category.clone(), category.clone()))
                .collect();
            let mut response = empty(message, "clarification", true);
            response.dialog_context = Some(DialogContext {
                clarification_asked: true,
                categories_suggested: categories,
                extra: Default::default(),
            });
            response.actions = (!actions.is_empty()).then_some(actions);
            response
        }
        Outcome::ProductResults(outcome) => {
            let mut extra = serde_json::Map::new();
            extra.insert(
                "available_categories".into(),
                json!(outcome.facets.iter().map(|f| f.label.clone()).collect::<Vec<_>>()),
            );
            extra.insert(
                "category_buckets".into(),
                json!(outcome
                    .buckets
                    .iter()
                    .cloned()
                    .collect::<std::collections::HashMap<String, Vec<String>>>()),
            );
            extra.insert("semantic_subqueries".into(), json!(outcome.subqueries));

            ChatSearchResponse {
                results: outcome.results,
                recommendations: outcome.recommendations,
                categories: outcome.facets,
                search_time_ms,
                assistant_message: Some(outcome.assistant_message),
                dialog_state: Some(outcome.dialog_state),
                dialog_context: Some(DialogContext {
                    clarification_asked: false,
                    categories_suggested: Vec::new(),
                    extra,
                }),
                needs_user_input: false,
                actions: (!outcome.actions.is_empty()).then_some(outcome.actions),
            }
        }
    }
}
