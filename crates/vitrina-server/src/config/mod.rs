// crates/vitrina-server/src/config/mod.rs
// Environment-based configuration - single source of truth for all env vars

use std::time::Duration;
use tracing::{debug, warn};

/// All gateway settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    // Search engine
    pub elastic_url: String,
    pub elastic_user: String,
    pub elastic_password: String,
    pub index_name: String,
    pub vector_field_name: String,
    /// Field tried when the configured vector field returns nothing.
    pub vector_fallback_field: String,
    pub knn_num_candidates: usize,
    pub bm25_min_score: f64,
    pub hybrid_alpha: f64,
    pub hybrid_fusion: FusionStrategy,

    // Embeddings
    pub embedding_api_url: String,
    pub embedding_model_name: String,
    pub vector_dimension: usize,
    pub embed_cache_size: usize,
    pub cache_ttl_seconds: u64,
    pub embedding_max_concurrent: usize,
    pub embedding_single_timeout_seconds: u64,

    // Shared HTTP
    pub request_timeout: u64,
    pub max_retries: u32,

    // LLM
    pub openai_api_key: String,
    pub gpt_api_base: String,
    pub gpt_model: String,
    pub gpt_temperature: f32,
    pub gpt_max_tokens_analyze: u32,
    pub gpt_max_tokens_reco: u32,
    pub gpt_analyze_timeout_seconds: f64,
    pub gpt_reco_timeout_seconds: f64,

    // Chat search relevance
    pub chat_search_score_threshold_ratio: f64,
    pub chat_search_min_score_absolute: f64,
    pub chat_search_subquery_weight_decay: f64,
    pub chat_search_max_k_per_subquery: usize,

    // Sessions & history
    pub max_sessions: usize,
    pub search_results_ttl_seconds: u64,
    pub max_chat_display_items: usize,
    pub max_search_history: usize,
    pub search_history_ttl_days: u64,

    // Background janitor
    pub cleanup_interval_seconds: u64,

    // Streaming
    pub sse_slow_mode: bool,
    pub sse_delay_seconds: f64,

    // Server
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub search_log_dir: Option<String>,
}

/// Hybrid fusion strategy for direct hybrid search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FusionStrategy {
    #[default]
    Weighted,
    Rrf,
}

impl FusionStrategy {
    fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "rrf" => Self::Rrf,
            "weighted" => Self::Weighted,
            other => {
                warn!(value = other, "Unknown HYBRID_FUSION, using weighted");
                Self::Weighted
            }
        }
    }
}

impl Settings {
    /// Load all settings from environment variables (call once at startup).
    pub fn from_env() -> Self {
        let settings = Self {
            elastic_url: env_string("ELASTIC_URL", "http://elasticsearch:9200"),
            elastic_user: env_string("ELASTIC_USER", "elastic"),
            elastic_password: env_string("ELASTIC_PASSWORD", "elastic"),
            index_name: env_string("INDEX_NAME", "products_qwen3_8b"),
            vector_field_name: env_string("VECTOR_FIELD_NAME", "description_vector"),
            vector_fallback_field: env_string("VECTOR_FALLBACK_FIELD", "description_vector"),
            knn_num_candidates: env_parsed("KNN_NUM_CANDIDATES", 500),
            bm25_min_score: env_parsed("BM25_MIN_SCORE", 5.0),
            hybrid_alpha: env_parsed("HYBRID_ALPHA", 0.7),
            hybrid_fusion: FusionStrategy::parse(&env_string("HYBRID_FUSION", "weighted")),

            embedding_api_url: env_string("EMBEDDING_API_URL", "http://localhost:9001/api/embeddings"),
            embedding_model_name: env_string("EMBEDDING_MODEL_NAME", "dengcao/Qwen3-Embedding-8B:Q8_0"),
            vector_dimension: env_parsed("VECTOR_DIMENSION", 4096),
            embed_cache_size: env_parsed("EMBED_CACHE_SIZE", 2000),
            cache_ttl_seconds: env_parsed("CACHE_TTL_SECONDS", 3600),
            embedding_max_concurrent: env_parsed("EMBEDDING_MAX_CONCURRENT", 2),
            embedding_single_timeout_seconds: env_parsed("EMBEDDING_SINGLE_TIMEOUT_SECONDS", 15),

            request_timeout: env_parsed("REQUEST_TIMEOUT", 30),
            max_retries: env_parsed("MAX_RETRIES", 3),

            openai_api_key: env_string("OPENAI_API_KEY", ""),
            gpt_api_base: env_string("GPT_API_BASE", "https://api.openai.com/v1"),
            gpt_model: env_string("GPT_MODEL", "gpt-4o-mini"),
            gpt_temperature: env_parsed("GPT_TEMPERATURE", 0.3),
            gpt_max_tokens_analyze: env_parsed("GPT_MAX_TOKENS_ANALYZE", 1500),
            gpt_max_tokens_reco: env_parsed("GPT_MAX_TOKENS_RECO", 2000),
            gpt_analyze_timeout_seconds: env_parsed("GPT_ANALYZE_TIMEOUT_SECONDS", 15.0),
            gpt_reco_timeout_seconds: env_parsed("GPT_RECO_TIMEOUT_SECONDS", 30.0),

            chat_search_score_threshold_ratio: env_parsed("CHAT_SEARCH_SCORE_THRESHOLD_RATIO", 0.4),
            chat_search_min_score_absolute: env_parsed("CHAT_SEARCH_MIN_SCORE_ABSOLUTE", 0.3),
            chat_search_subquery_weight_decay: env_parsed("CHAT_SEARCH_SUBQUERY_WEIGHT_DECAY", 0.85),
            chat_search_max_k_per_subquery: env_parsed("CHAT_SEARCH_MAX_K_PER_SUBQUERY", 20),

            max_sessions: env_parsed("MAX_SESSIONS", 1000),
            search_results_ttl_seconds: env_parsed("SEARCH_RESULTS_TTL_SECONDS", 3600),
            max_chat_display_items: env_parsed("MAX_CHAT_DISPLAY_ITEMS", 100),
            max_search_history: env_parsed("MAX_SEARCH_HISTORY", 20),
            search_history_ttl_days: env_parsed("SEARCH_HISTORY_TTL_DAYS", 7),

            cleanup_interval_seconds: env_parsed("CLEANUP_INTERVAL_SECONDS", 300),

            sse_slow_mode: env_flag("SSE_SLOW_MODE", true),
            sse_delay_seconds: env_parsed("SSE_DELAY_SECONDS", 0.02),

            host: env_string("HOST", "0.0.0.0"),
            port: env_parsed("PORT", 8000),
            cors_origins: env_string("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            search_log_dir: std::env::var("SEARCH_LOG_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        debug!(
            index = %settings.index_name,
            vector_field = %settings.vector_field_name,
            model = %settings.embedding_model_name,
            "Settings loaded"
        );
        settings
    }

    /// Validate the configuration. Errors are fatal at startup.
    pub fn validate(&self) -> ConfigReport {
        let mut report = ConfigReport::default();

        if !(5..=300).contains(&self.request_timeout) {
            report.error(format!(
                "REQUEST_TIMEOUT is {} but must lie within 5..=300 seconds",
                self.request_timeout
            ));
        }
        if self.vector_dimension == 0 {
            report.error("VECTOR_DIMENSION cannot be zero");
        }
        if self.embed_cache_size == 0 {
            report.error("EMBED_CACHE_SIZE cannot be zero");
        }
        if !(0.0..=1.0).contains(&self.hybrid_alpha) {
            report.error(format!(
                "HYBRID_ALPHA is {} but must lie within [0, 1]",
                self.hybrid_alpha
            ));
        }
        if self.chat_search_subquery_weight_decay <= 0.0
            || self.chat_search_subquery_weight_decay > 1.0
        {
            report.error(format!(
                "CHAT_SEARCH_SUBQUERY_WEIGHT_DECAY is {} but must lie within (0, 1]",
                self.chat_search_subquery_weight_decay
            ));
        }

        if self.openai_api_key.is_empty() {
            report.warning("OPENAI_API_KEY is not set; chat search will fail until it is configured");
        }
        if self.embedding_max_concurrent == 0 {
            report.warning("EMBEDDING_MAX_CONCURRENT=0 disables embedding fan-out");
        }

        report
    }

    pub fn request_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn sse_delay(&self) -> Option<Duration> {
        if self.sse_slow_mode && self.sse_delay_seconds > 0.0 {
            Some(Duration::from_secs_f64(self.sse_delay_seconds))
        } else {
            None
        }
    }
}

/// Severity of one configuration finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Findings collected while validating [`Settings`], in check order.
/// Errors block startup; warnings are logged and tolerated.
#[derive(Debug, Default)]
pub struct ConfigReport {
    findings: Vec<(Severity, String)>,
}

impl ConfigReport {
    fn error(&mut self, message: impl Into<String>) {
        self.findings.push((Severity::Error, message.into()));
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.findings.push((Severity::Warning, message.into()));
    }

    pub fn has_errors(&self) -> bool {
        self.findings
            .iter()
            .any(|(severity, _)| *severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> + '_ {
        self.findings
            .iter()
            .filter(|(severity, _)| *severity == Severity::Warning)
            .map(|(_, message)| message.as_str())
    }

    /// One line per finding, severity-tagged, for logs and `check-config`.
    pub fn render(&self) -> String {
        if self.findings.is_empty() {
            return "configuration looks good".to_string();
        }
        self.findings
            .iter()
            .map(|(severity, message)| match severity {
                Severity::Error => format!("error: {message}"),
                Severity::Warning => format!("warning: {message}"),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "Unparseable env value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Boolean env var with the usual truthy/falsy spellings; anything else
/// keeps the default (with a log line, since a typo here is easy to miss).
fn env_flag(name: &str, default: bool) -> bool {
    let Ok(raw) = std::env::var(name) else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        other => {
            warn!(var = name, value = other, "Not a boolean, keeping default");
            default
        }
    }
}
