// crates/vitrina-server/src/error.rs
// Standardized error types for Vitrina

use thiserror::Error;

/// Main error type for the Vitrina library
#[derive(Error, Debug)]
pub enum VitrinaError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("search engine error: {0}")]
    SearchEngine(String),

    #[error("assistant error: {0}")]
    Assistant(String),

    #[error("assistant timeout")]
    AssistantTimeout,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using VitrinaError
pub type Result<T> = std::result::Result<T, VitrinaError>;

impl VitrinaError {
    /// Short user-safe message in the shopper's language, for HTTP bodies
    /// and SSE `error` events. Internal detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            VitrinaError::InvalidInput(msg) => msg.clone(),
            VitrinaError::AssistantTimeout | VitrinaError::Assistant(_) => {
                "Вибачте, асистент зараз недоступний. Спробуйте ще раз за хвилину.".to_string()
            }
            VitrinaError::Embedding(_) => {
                "Не вдалося обробити запит. Спробуйте інше формулювання.".to_string()
            }
            _ => "Вибачте, виникла помилка. Будь ласка, спробуйте ще раз.".to_string(),
        }
    }
}

impl From<String> for VitrinaError {
    fn from(s: String) -> Self {
        VitrinaError::Other(s)
    }
}

impl From<tokio::task::JoinError> for VitrinaError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            VitrinaError::Cancelled
        } else {
            VitrinaError::Other(err.to_string())
        }
    }
}
