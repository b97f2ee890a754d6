// crates/vitrina-types/src/lib.rs

//! Shared data contracts between the Vitrina gateway and its clients.
//!
//! This crate provides the wire-visible domain model:
//! - **Products**: search hits as the front-end renders them
//! - **Chat search**: request/response shapes for the conversational pipeline
//! - **Streaming**: the typed event set emitted over the SSE channel
//!
//! Everything here is plain serde data; no server-side dependencies allowed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ===================================================
// PRODUCTS
// ===================================================

/// A single product as returned to clients.
///
/// The score is whatever ranking stage produced the product last: the raw
/// engine score for direct searches, the fused/weighted value for chat
/// searches. Invariants: score is non-negative and ids are unique within
/// one response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_ua: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_ru: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_ua: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_ru: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub good_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uktzed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_unit_ua: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discounted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default = "default_true")]
    pub availability: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<HashMap<String, Vec<String>>>,
}

fn default_true() -> bool {
    true
}

impl Product {
    /// Build a product from a raw search-engine hit (`_id` / `_score` /
    /// `_source` / `highlight`). Missing availability defaults to true.
    pub fn from_hit(hit: &Value) -> Self {
        let src = hit.get("_source").cloned().unwrap_or(Value::Null);
        let get_str = |key: &str| src.get(key).and_then(Value::as_str).map(str::to_string);
        let get_f64 = |key: &str| src.get(key).and_then(Value::as_f64);

        Self {
            id: hit
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            score: hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0),
            title_ua: get_str("title_ua"),
            title_ru: get_str("title_ru"),
            description_ua: get_str("description_ua"),
            description_ru: get_str("description_ru"),
            sku: get_str("sku"),
            good_code: get_str("good_code"),
            uktzed: get_str("uktzed"),
            measurement_unit_ua: get_str("measurement_unit_ua"),
            vat: get_str("vat"),
            discounted: src.get("discounted").and_then(Value::as_bool),
            height: get_f64("height"),
            width: get_f64("width"),
            length: get_f64("length"),
            weight: get_f64("weight"),
            availability: src
                .get("availability")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            highlight: hit
                .get("highlight")
                .and_then(|h| serde_json::from_value(h.clone()).ok()),
        }
    }

    /// All searchable text of the product, lowercased, for keyword matching.
    pub fn combined_text(&self) -> String {
        [
            self.title_ua.as_deref(),
            self.title_ru.as_deref(),
            self.description_ua.as_deref(),
            self.description_ru.as_deref(),
        ]
        .iter()
        .flatten()
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
    }

    /// Display title, preferring Ukrainian.
    pub fn display_title(&self) -> Option<String> {
        self.title_ua.clone().or_else(|| self.title_ru.clone())
    }
}

// ===================================================
// RECOMMENDATIONS
// ===================================================

/// Ranking tier assigned by the re-ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationBucket {
    MustHave,
    GoodToHave,
    #[default]
    AlsoConsider,
}

/// A re-ranked product with an explanation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRecommendation {
    pub product_id: String,
    pub relevance_score: f64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub bucket: RecommendationBucket,
}

// ===================================================
// CATEGORIES & ACTIONS
// ===================================================

/// One facet of the categorized result set, ready for rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryFacet {
    pub code: String,
    pub label: String,
    pub emoji: String,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special: Option<bool>,
}

/// Tappable action offered to the client (category buttons etc.).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionButton {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    pub value: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special: Option<String>,
}

impl ActionButton {
    pub fn button(action: impl Into<String>, value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: "button".into(),
            action: action.into(),
            value: value.into(),
            label: label.into(),
            special: None,
        }
    }
}

// ===================================================
// DIALOG CONTEXT & HISTORY
// ===================================================

/// Client-carried dialog state. The gateway never persists this; it reads
/// two fields and echoes everything else back for the client to carry.
///
/// Note: `clarification_asked` is client-trusted. A client that sets it can
/// force the classifier into `product_search` even for a vague query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DialogContext {
    #[serde(default)]
    pub clarification_asked: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories_suggested: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// One entry of the client-supplied search history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHistoryItem {
    pub query: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Unix timestamp, seconds.
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub results_count: usize,
}

// ===================================================
// REQUESTS
// ===================================================

/// Direct (non-conversational) search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// "bm25" | "knn" | "hybrid"
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_k() -> usize {
    50
}

fn default_min_score() -> f64 {
    0.1
}

fn default_mode() -> String {
    "bm25".to_string()
}

/// Conversational search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSearchRequest {
    pub query: String,
    pub session_id: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub search_history: Vec<SearchHistoryItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog_context: Option<DialogContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_category: Option<String>,
}

/// Pagination request against a stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadMoreRequest {
    pub session_id: String,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

// ===================================================
// RESPONSES
// ===================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<Product>,
    pub total_found: usize,
    pub search_time_ms: f64,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSearchResponse {
    pub results: Vec<Product>,
    pub recommendations: Vec<ProductRecommendation>,
    #[serde(default)]
    pub categories: Vec<CategoryFacet>,
    pub search_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog_context: Option<DialogContext>,
    pub needs_user_input: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<ActionButton>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadMoreResponse {
    pub products: Vec<Product>,
    pub next_offset: usize,
    pub has_more: bool,
    pub total_found: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub search_engine: String,
    pub index: String,
    pub documents_count: u64,
    pub cache_size: usize,
    pub uptime_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub index: String,
    pub documents_count: u64,
    pub index_size_bytes: u64,
    pub health: String,
    pub embedding_cache_size: usize,
    pub embedding_model: String,
    pub uptime_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub size: usize,
    pub capacity: usize,
    pub ttl_seconds: u64,
    pub expired_cleaned_now: usize,
}

// ===================================================
// STREAMING
// ===================================================

/// Status phases surfaced to the client while the pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Thinking,
    Searching,
    Recommending,
}

/// Events emitted over the chat-search SSE channel, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    Status { message: String, kind: StatusKind },
    AssistantStart { length: usize },
    AssistantDelta { text: String },
    AssistantEnd,
    Candidates { count: usize },
    Categories { categories: Vec<CategoryFacet> },
    Recommendations { count: usize, assistant_message: String },
    NoResults { message: String },
    Final(Box<ChatSearchResponse>),
    Error { message: String },
}

impl ChatStreamEvent {
    /// SSE `event:` field name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::AssistantStart { .. } => "assistant_start",
            Self::AssistantDelta { .. } => "assistant_delta",
            Self::AssistantEnd => "assistant_end",
            Self::Candidates { .. } => "candidates",
            Self::Categories { .. } => "categories",
            Self::Recommendations { .. } => "recommendations",
            Self::NoResults { .. } => "no_results",
            Self::Final(_) => "final",
            Self::Error { .. } => "error",
        }
    }

    /// SSE `data:` field payload.
    pub fn data(&self) -> Value {
        match self {
            Self::Status { message, kind } => serde_json::json!({
                "message": message,
                "type": kind,
            }),
            Self::AssistantStart { length } => serde_json::json!({ "length": length }),
            Self::AssistantDelta { text } => serde_json::json!({ "text": text }),
            Self::AssistantEnd => serde_json::json!({}),
            Self::Candidates { count } => serde_json::json!({ "count": count }),
            Self::Categories { categories } => serde_json::json!({ "categories": categories }),
            Self::Recommendations {
                count,
                assistant_message,
            } => serde_json::json!({
                "count": count,
                "assistant_message": assistant_message,
            }),
            Self::NoResults { message } => serde_json::json!({ "message": message }),
            Self::Final(response) => serde_json::to_value(response).unwrap_or(Value::Null),
            Self::Error { message } => serde_json::json!({ "message": message }),
        }
    }
}
