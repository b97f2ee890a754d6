// crates/vitrina-server/src/assistant/mod.rs
// LLM assistant: unified query classifier + product re-ranker

pub mod json;
pub mod prompts;

use crate::error::{Result, VitrinaError};
use crate::llm::ChatClient;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;
use vitrina_types::{
    DialogContext, Product, ProductRecommendation, RecommendationBucket, SearchHistoryItem,
};

/// Minimum relevance the re-ranker output must carry to be kept.
const RERANK_MIN_RELEVANCE: f64 = 0.4;
/// Backfill target when the re-ranker returns a thin list.
const RERANK_BACKFILL_TARGET: usize = 7;
/// Backfill triggers when fewer than this many entries survive.
const RERANK_BACKFILL_MIN: usize = 5;
/// Local ranker keeps entries at or above this score.
const LOCAL_MIN_SCORE: f64 = 0.5;
/// Per-token title bonus of the local ranker, and its cap.
const LOCAL_TOKEN_BONUS: f64 = 0.05;
const LOCAL_BONUS_CAP: f64 = 0.3;

/// What the classifier decided to do with the utterance.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantAction {
    Greeting,
    Invalid,
    Clarification { categories: Vec<String> },
    ProductSearch { subqueries: Vec<String> },
}

/// Validated classifier output.
#[derive(Debug, Clone)]
pub struct Classification {
    pub action: AssistantAction,
    pub confidence: f64,
    pub message: String,
}

/// The LLM seam of the pipeline. Mocked in tests.
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Classify the utterance. Hard failures (timeout, unparseable output)
    /// surface as errors; there is no silent downgrade because the semantic
    /// subqueries are material to recall.
    async fn classify(
        &self,
        query: &str,
        history: &[SearchHistoryItem],
        dialog_context: Option<&DialogContext>,
    ) -> Result<Classification>;

    /// Re-rank candidates into explained recommendations. Never fails: any
    /// upstream problem falls back to the local ranker.
    async fn rerank(
        &self,
        products: &[Product],
        query: &str,
    ) -> (Vec<ProductRecommendation>, String);
}

/// Production assistant over the chat-completions client.
pub struct GptAssistant {
    chat: ChatClient,
    temperature: f32,
    max_tokens_analyze: u32,
    max_tokens_reco: u32,
    analyze_timeout: Duration,
    reco_timeout: Duration,
}

impl GptAssistant {
    pub fn new(chat: ChatClient, settings: &crate::config::Settings) -> Self {
        Self {
            chat,
            temperature: settings.gpt_temperature,
            max_tokens_analyze: settings.gpt_max_tokens_analyze,
            max_tokens_reco: settings.gpt_max_tokens_reco,
            analyze_timeout: Duration::from_secs_f64(settings.gpt_analyze_timeout_seconds),
            reco_timeout: Duration::from_secs_f64(settings.gpt_reco_timeout_seconds),
        }
    }
}

#[async_trait]
impl Assistant for GptAssistant {
    async fn classify(
        &self,
        query: &str,
        history: &[SearchHistoryItem],
        dialog_context: Option<&DialogContext>,
    ) -> Result<Classification> {
        let prompt = prompts::classifier_prompt(query, history, dialog_context);
        let content = tokio::time::timeout(
            self.analyze_timeout,
            self.chat
                .complete_json(&prompt, self.temperature, self.max_tokens_analyze),
        )
        .await
        .map_err(|_| VitrinaError::AssistantTimeout)?
        .map_err(|e| VitrinaError::Assistant(e.to_string()))?;

        let mut classification = parse_classification(&json::extract_json_safely(&content))?;

        // The prompt already forbids a second clarification in a row, but the
        // invariant matters downstream, so it is enforced here as well.
        if dialog_context.is_some_and(|ctx| ctx.clarification_asked)
            && matches!(classification.action, AssistantAction::Clarification { .. })
        {
            classification.action = AssistantAction::ProductSearch {
                subqueries: Vec::new(),
            };
        }

        Ok(classification)
    }

    async fn rerank(
        &self,
        products: &[Product],
        query: &str,
    ) -> (Vec<ProductRecommendation>, String) {
        if products.is_empty() {
            return (
                Vec::new(),
                "На жаль, не знайдено відповідних товарів за вашим запитом. Спробуйте уточнити пошук."
                    .to_string(),
            );
        }
        let products = &products[..products.len().min(prompts::RERANK_CANDIDATES)];

        if !self.chat.is_configured() {
            return local_rank(products, query);
        }

        let prompt = prompts::rerank_prompt(products, query);
        let response = tokio::time::timeout(
            self.reco_timeout,
            self.chat
                .complete_json(&prompt, self.temperature, self.max_tokens_reco),
        )
        .await;

        match response {
            Ok(Ok(content)) => {
                match parse_rerank(&json::extract_json_safely(&content), products) {
                    Some((mut recommendations, message)) => {
                        backfill_recommendations(&mut recommendations, products);
                        (recommendations, message)
                    }
                    None => local_rank(products, query),
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Re-ranker call failed, using local ranking");
                local_rank(products, query)
            }
            Err(_) => {
                warn!("Re-ranker timed out, using local ranking");
                local_rank(products, query)
            }
        }
    }
}

/// Validate the classifier JSON into the tagged action.
pub fn parse_classification(raw: &Value) -> Result<Classification> {
    let action = raw
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| VitrinaError::Assistant("classifier response missing 'action'".into()))?;

    let message = raw
        .get("assistant_message")
        .and_then(Value::as_str)
        .unwrap_or("Шукаю для вас товари...")
        .to_string();
    let confidence = raw
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.8)
        .clamp(0.0, 1.0);

    let string_list = |key: &str, cap: usize| -> Vec<String> {
        raw.get(key)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .take(cap)
                    .collect()
            })
            .unwrap_or_default()
    };

    let action = match action {
        "greeting" => AssistantAction::Greeting,
        "invalid" => AssistantAction::Invalid,
        "clarification" => AssistantAction::Clarification {
            categories: string_list("categories", 8),
        },
        "product_search" => AssistantAction::ProductSearch {
            subqueries: string_list("semantic_subqueries", 5),
        },
        other => {
            return Err(VitrinaError::Assistant(format!(
                "classifier returned unknown action '{other}'"
            )));
        }
    };

    Ok(Classification {
        action,
        confidence,
        message,
    })
}

/// Validate re-ranker JSON; `None` means "fall back to local ranking".
pub fn parse_rerank(
    raw: &Value,
    products: &[Product],
) -> Option<(Vec<ProductRecommendation>, String)> {
    let entries = raw.get("recommendations")?.as_array()?;

    let mut recommendations: Vec<ProductRecommendation> = entries
        .iter()
        .filter_map(|entry| {
            let index = entry.get("product_index")?.as_i64()?;
            let relevance = entry.get("relevance_score")?.as_f64()?;
            if relevance < RERANK_MIN_RELEVANCE {
                return None;
            }
            let product = products.get(usize::try_from(index - 1).ok()?)?;
            Some(ProductRecommendation {
                product_id: product.id.clone(),
                relevance_score: relevance.clamp(0.0, 1.0),
                reason: entry
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("Рекомендовано")
                    .to_string(),
                title: product.display_title(),
                bucket: parse_bucket(entry.get("bucket").and_then(Value::as_str)),
            })
        })
        .collect();

    if recommendations.is_empty() {
        return None;
    }
    recommendations.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let message = raw
        .get("assistant_message")
        .and_then(Value::as_str)
        .unwrap_or("Я підібрав для вас відповідні варіанти.")
        .to_string();

    Some((recommendations, message))
}

fn parse_bucket(raw: Option<&str>) -> RecommendationBucket {
    match raw {
        Some("must_have") => RecommendationBucket::MustHave,
        Some("good_to_have") => RecommendationBucket::GoodToHave,
        _ => RecommendationBucket::AlsoConsider,
    }
}

/// When the model returned a thin list for a non-thin candidate set, pad it
/// with the best remaining candidates (normalized engine score) until at
/// least [`RERANK_BACKFILL_TARGET`] entries are present.
pub fn backfill_recommendations(
    recommendations: &mut Vec<ProductRecommendation>,
    products: &[Product],
) {
    if recommendations.len() >= RERANK_BACKFILL_MIN || products.len() < RERANK_BACKFILL_MIN {
        return;
    }
    let target = RERANK_BACKFILL_TARGET.min(products.len());
    let max_score = products
        .iter()
        .map(|p| p.score)
        .fold(f64::MIN, f64::max)
        .max(1e-9);
    let taken: std::collections::HashSet<&str> = recommendations
        .iter()
        .map(|r| r.product_id.as_str())
        .collect();

    let fill: Vec<ProductRecommendation> = products
        .iter()
        .filter(|p| !taken.contains(p.id.as_str()))
        .take(target.saturating_sub(recommendations.len()))
        .map(|p| ProductRecommendation {
            product_id: p.id.clone(),
            relevance_score: (p.score / max_score).clamp(0.0, 1.0),
            reason: "Схожий на те, що ви шукали".to_string(),
            title: p.display_title(),
            bucket: RecommendationBucket::AlsoConsider,
        })
        .collect();
    recommendations.extend(fill);
}

/// Offline fallback ranking: normalized engine score plus a small bonus per
/// query token found in the title. Keeps entries at or above 0.5, or the
/// top-3 unconditionally when nothing qualifies.
pub fn local_rank(products: &[Product], query: &str) -> (Vec<ProductRecommendation>, String) {
    let tokens: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let max_score = products
        .iter()
        .map(|p| p.score)
        .fold(f64::MIN, f64::max)
        .max(1e-9);

    let score_for = |p: &Product| -> f64 {
        let base = p.score / max_score;
        let title = p.display_title().unwrap_or_default().to_lowercase();
        let bonus = tokens
            .iter()
            .filter(|t| title.contains(t.as_str()))
            .count() as f64
            * LOCAL_TOKEN_BONUS;
        (base + bonus.min(LOCAL_BONUS_CAP)).min(1.0)
    };

    let mut ranked: Vec<&Product> = products.iter().collect();
    ranked.sort_by(|a, b| {
        score_for(b)
            .partial_cmp(&score_for(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(20);

    let mut kept: Vec<&Product> = ranked
        .iter()
        .copied()
        .filter(|p| score_for(p) >= LOCAL_MIN_SCORE)
        .collect();
    if kept.is_empty() {
        kept = ranked.into_iter().take(3).collect();
    }

    let recommendations = kept
        .into_iter()
        .enumerate()
        .map(|(i, p)| ProductRecommendation {
            product_id: p.id.clone(),
            relevance_score: score_for(p),
            reason: build_human_reason(query),
            title: p.display_title(),
            bucket: match i {
                0..=2 => RecommendationBucket::MustHave,
                3..=9 => RecommendationBucket::GoodToHave,
                _ => RecommendationBucket::AlsoConsider,
            },
        })
        .collect();

    (
        recommendations,
        "Я підібрав варіанти на основі відповідності вашому запиту.".to_string(),
    )
}

fn build_human_reason(query: &str) -> String {
    let q = query.to_lowercase();
    let mut parts = vec!["Відповідає вашому запиту"];
    if ["хлоп", "мальч", "юнак"].iter().any(|t| q.contains(t)) {
        parts.push("підходить для хлопчика");
    }
    if ["дівч", "девоч", "girl"].iter().any(|t| q.contains(t)) {
        parts.push("підходить для дівчинки");
    }
    if ["дит", "ребен", "kid", "child"].iter().any(|t| q.contains(t)) {
        parts.push("дитяча категорія");
    }
    parts.join(", ")
}
