// crates/vitrina-server/src/web/state.rs
// Web server state management

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::assistant::GptAssistant;
use crate::config::Settings;
use crate::embeddings::EmbeddingClient;
use crate::llm::ChatClient;
use crate::pipeline::SearchPipeline;
use crate::search::SearchEngineClient;
use crate::search_log::SearchLogger;
use crate::session::{SearchHistory, SessionStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,

    /// Embedding client (owns the process-wide embedding cache)
    pub embeddings: Arc<EmbeddingClient>,

    /// Product index client
    pub search: Arc<SearchEngineClient>,

    /// The conversational pipeline
    pub pipeline: Arc<SearchPipeline>,

    /// Per-session result cache for pagination
    pub sessions: Arc<SessionStore>,

    /// Process-wide search history
    pub history: Arc<SearchHistory>,

    pub started_at: Instant,
}

impl AppState {
    /// Wire the full dependency graph from settings. The single reqwest
    /// client is shared by the search-engine and embedding clients; the LLM
    /// side gets its own because completion calls run with longer deadlines.
    pub fn new(settings: Arc<Settings>) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.request_timeout_duration())
            .build()?;

        let embeddings = Arc::new(EmbeddingClient::new(
            http_client.clone(),
            settings.embedding_api_url.clone(),
            settings.embedding_model_name.clone(),
            settings.vector_dimension,
            Duration::from_secs(settings.embedding_single_timeout_seconds),
            settings.embedding_max_concurrent,
            settings.embed_cache_size,
            Duration::from_secs(settings.cache_ttl_seconds),
        ));

        let search = Arc::new(SearchEngineClient::new(http_client, &settings));

        let llm_http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(
                settings
                    .gpt_analyze_timeout_seconds
                    .max(settings.gpt_reco_timeout_seconds),
            ))
            .build()?;
        let chat = ChatClient::new(
            llm_http,
            settings.openai_api_key.clone(),
            settings.gpt_api_base.clone(),
            settings.gpt_model.clone(),
            settings.max_retries,
        );
        let assistant = Arc::new(GptAssistant::new(chat, &settings));

        let sessions = Arc::new(SessionStore::new(
            settings.max_sessions,
            Duration::from_secs(settings.search_results_ttl_seconds),
        ));
        let history = Arc::new(SearchHistory::new(
            settings.max_search_history,
            Duration::from_secs(settings.search_history_ttl_days * 86_400),
        ));

        let search_log = settings.search_log_dir.as_deref().and_then(|dir| {
            match SearchLogger::new(dir) {
                Ok(logger) => Some(Arc::new(logger)),
                Err(e) => {
                    warn!(error = %e, dir, "Search log disabled: cannot open directory");
                    None
                }
            }
        });

        let embedder: Arc<dyn crate::pipeline::Embedder> = embeddings.clone();
        let backend: Arc<dyn crate::pipeline::SearchBackend> = search.clone();
        let pipeline = Arc::new(SearchPipeline::new(
            Arc::clone(&settings),
            embedder,
            backend,
            assistant,
            Arc::clone(&sessions),
            Arc::clone(&history),
            search_log,
        ));

        Ok(Self {
            settings,
            embeddings,
            search,
            pipeline,
            sessions,
            history,
            started_at: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
