// crates/vitrina-server/src/search_log.rs
// Write-only JSONL log of chat-search queries, for offline quality analysis

use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Top-products slice kept per record.
const TOP_PRODUCTS_LOGGED: usize = 20;

/// One logged product line.
#[derive(Debug, Clone, Serialize)]
pub struct LoggedProduct {
    pub id: String,
    pub name: String,
    pub score: f64,
    pub recommended: bool,
}

/// One record per executed chat search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchLogRecord {
    pub timestamp: String,
    pub session_id: String,
    pub query: String,
    pub intent: String,
    pub subqueries: Vec<String>,
    pub total_products_found: usize,
    pub products_after_filtering: usize,
    pub max_score: f64,
    pub threshold: f64,
    pub search_time_ms: f64,
    pub top_products: Vec<LoggedProduct>,
    pub categories: Vec<String>,
    pub recommendations_count: usize,
}

/// Append-only search log. Failures are logged and swallowed; logging must
/// never affect a request.
pub struct SearchLogger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SearchLogger {
    pub fn new(logs_dir: &str) -> std::io::Result<Self> {
        let dir = PathBuf::from(logs_dir);
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join("search_queries.jsonl"),
            write_lock: Mutex::new(()),
        })
    }

    pub async fn log(&self, mut record: SearchLogRecord) {
        record.timestamp = Utc::now().to_rfc3339();
        record.top_products.truncate(TOP_PRODUCTS_LOGGED);

        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize search log record");
                return;
            }
        };

        let _guard = self.write_lock.lock().await;
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, path = %self.path.display(), "Failed to write search log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(query: &str) -> SearchLogRecord {
        SearchLogRecord {
            timestamp: String::new(),
            session_id: "s1".into(),
            query: query.into(),
            intent: "product_search".into(),
            subqueries: vec!["чорна футболка".into()],
            total_products_found: 40,
            products_after_filtering: 12,
            max_score: 1.4,
            threshold: 0.49,
            search_time_ms: 120.5,
            top_products: (0..30)
                .map(|i| LoggedProduct {
                    id: format!("p{i}"),
                    name: "Товар".into(),
                    score: 1.0,
                    recommended: i < 3,
                })
                .collect(),
            categories: vec!["clothing".into()],
            recommendations_count: 3,
        }
    }

    #[tokio::test]
    async fn test_log_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SearchLogger::new(dir.path().to_str().unwrap()).unwrap();
        logger.log(record("чорна футболка")).await;
        logger.log(record("каструля")).await;

        let content =
            std::fs::read_to_string(dir.path().join("search_queries.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["query"], "чорна футболка");
        assert_eq!(
            first["top_products"].as_array().unwrap().len(),
            TOP_PRODUCTS_LOGGED,
            "top products truncated"
        );
        assert!(!first["timestamp"].as_str().unwrap().is_empty());
    }
}
