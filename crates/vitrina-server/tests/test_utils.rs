//! Test utilities for Vitrina integration tests

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use vitrina::assistant::{Assistant, AssistantAction, Classification};
use vitrina::config::Settings;
use vitrina::pipeline::{Embedder, SearchBackend, SearchPipeline};
use vitrina::session::{SearchHistory, SessionStore};
use vitrina_types::{DialogContext, Product, ProductRecommendation, RecommendationBucket, SearchHistoryItem};

/// Scripted assistant: fixed classification, re-ranks the first N candidates.
pub struct MockAssistant {
    pub classification: Classification,
    pub rerank_top: usize,
    pub rerank_message: String,
}

impl MockAssistant {
    pub fn product_search(subqueries: &[&str], rerank_top: usize) -> Self {
        Self {
            classification: Classification {
                action: AssistantAction::ProductSearch {
                    subqueries: subqueries.iter().map(|s| s.to_string()).collect(),
                },
                confidence: 0.95,
                message: "Шукаю товари...".into(),
            },
            rerank_top,
            rerank_message: "Я підібрав для вас добірку товарів.".into(),
        }
    }

    pub fn greeting(message: &str) -> Self {
        Self {
            classification: Classification {
                action: AssistantAction::Greeting,
                confidence: 0.99,
                message: message.into(),
            },
            rerank_top: 0,
            rerank_message: String::new(),
        }
    }

    pub fn clarification(message: &str, categories: &[&str]) -> Self {
        Self {
            classification: Classification {
                action: AssistantAction::Clarification {
                    categories: categories.iter().map(|s| s.to_string()).collect(),
                },
                confidence: 0.9,
                message: message.into(),
            },
            rerank_top: 0,
            rerank_message: String::new(),
        }
    }
}

#[async_trait]
impl Assistant for MockAssistant {
    async fn classify(
        &self,
        _query: &str,
        _history: &[SearchHistoryItem],
        _dialog_context: Option<&DialogContext>,
    ) -> vitrina::Result<Classification> {
        Ok(self.classification.clone())
    }

    async fn rerank(
        &self,
        products: &[Product],
        _query: &str,
    ) -> (Vec<ProductRecommendation>, String) {
        let recommendations = products
            .iter()
            .take(self.rerank_top)
            .enumerate()
            .map(|(i, p)| ProductRecommendation {
                product_id: p.id.clone(),
                relevance_score: 0.95 - i as f64 * 0.05,
                reason: "Добре підходить".into(),
                title: p.display_title(),
                bucket: RecommendationBucket::MustHave,
            })
            .collect();
        (recommendations, self.rerank_message.clone())
    }
}

/// Embedder that returns a fixed vector for every non-empty text.
pub struct MockEmbedder {
    pub fail_all: bool,
    pub calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn working() -> Self {
        Self {
            fail_all: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn broken() -> Self {
        Self {
            fail_all: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        texts
            .iter()
            .map(|t| {
                if self.fail_all || t.trim().is_empty() {
                    None
                } else {
                    Some(vec![0.1, 0.2, 0.3, 0.4])
                }
            })
            .collect()
    }
}

/// Search backend serving canned hits per subquery; counts calls.
pub struct MockSearch {
    pub hits_by_subquery: HashMap<String, Vec<Value>>,
    pub calls: AtomicUsize,
}

impl MockSearch {
    pub fn new(hits_by_subquery: HashMap<String, Vec<Value>>) -> Self {
        Self {
            hits_by_subquery,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for MockSearch {
    async fn multi_semantic_search(
        &self,
        query_vectors: &[(String, Vec<f32>)],
        _k_per_query: usize,
    ) -> Vec<(String, Vec<Value>)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        query_vectors
            .iter()
            .map(|(subquery, _)| {
                (
                    subquery.clone(),
                    self.hits_by_subquery.get(subquery).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }
}

/// One raw engine hit.
pub fn hit(id: &str, score: f64, title: &str) -> Value {
    json!({
        "_id": id,
        "_score": score,
        "_source": { "title_ua": title, "availability": true }
    })
}

/// Twenty descending-score hits for one subquery, ids prefixed.
pub fn hits_page(prefix: &str, base_score: f64, title: &str) -> Vec<Value> {
    (0..20)
        .map(|j| hit(&format!("{prefix}_{j}"), base_score - j as f64 * 0.01, title))
        .collect()
}

/// Wired pipeline plus the shared stores for assertions.
pub struct TestPipeline {
    pub pipeline: SearchPipeline,
    pub sessions: Arc<SessionStore>,
    pub history: Arc<SearchHistory>,
    pub search: Arc<MockSearch>,
}

pub fn build_pipeline(
    assistant: MockAssistant,
    embedder: MockEmbedder,
    search: MockSearch,
) -> TestPipeline {
    let settings = Arc::new(Settings::from_env());
    let sessions = Arc::new(SessionStore::new(
        settings.max_sessions,
        Duration::from_secs(settings.search_results_ttl_seconds),
    ));
    let history = Arc::new(SearchHistory::new(
        settings.max_search_history,
        Duration::from_secs(settings.search_history_ttl_days * 86_400),
    ));
    let search = Arc::new(search);
    let backend: Arc<dyn SearchBackend> = search.clone();

    let pipeline = SearchPipeline::new(
        settings,
        Arc::new(embedder),
        backend,
        Arc::new(assistant),
        Arc::clone(&sessions),
        Arc::clone(&history),
        None,
    );

    TestPipeline {
        pipeline,
        sessions,
        history,
        search,
    }
}
