// crates/vitrina-server/src/background/mod.rs
// Background janitor for periodic cache and session expiry sweeps

use crate::embeddings::EmbeddingClient;
use crate::session::{SearchHistory, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Periodic janitor: sweeps the embedding cache, the search history and the
/// session store. Shares the same locks as the request path, so each sweep
/// is short; a failing sweep is logged and the loop continues.
pub struct Janitor {
    interval: Duration,
    embeddings: Arc<EmbeddingClient>,
    sessions: Arc<SessionStore>,
    history: Arc<SearchHistory>,
    shutdown: watch::Receiver<bool>,
}

impl Janitor {
    pub fn new(
        interval: Duration,
        embeddings: Arc<EmbeddingClient>,
        sessions: Arc<SessionStore>,
        history: Arc<SearchHistory>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            interval,
            embeddings,
            sessions,
            history,
            shutdown,
        }
    }

    /// Run the sweep loop until shutdown is signalled.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Janitor started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;

        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("Janitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn sweep(&self) {
        let embeddings = self.embeddings.cache().cleanup_expired().await;
        let sessions = self.sessions.sweep_expired().await;
        let history = self.history.sweep_expired().await;
        if embeddings + sessions + history > 0 {
            info!(embeddings, sessions, history, "Janitor sweep removed expired entries");
        } else {
            debug!("Janitor sweep found nothing expired");
        }
    }
}

/// Spawn the janitor; dropping or sending `true` through the returned sender
/// stops it.
pub fn spawn(
    interval: Duration,
    embeddings: Arc<EmbeddingClient>,
    sessions: Arc<SessionStore>,
    history: Arc<SearchHistory>,
) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let janitor = Janitor::new(interval, embeddings, sessions, history, shutdown_rx);
    tokio::spawn(async move {
        janitor.run().await;
    });
    shutdown_tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_janitor_sweeps_and_stops() {
        let embeddings = Arc::new(EmbeddingClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1".into(),
            "test".into(),
            4,
            Duration::from_millis(10),
            2,
            10,
            Duration::from_millis(10),
        ));
        let sessions = Arc::new(SessionStore::new(10, Duration::from_millis(10)));
        let history = Arc::new(SearchHistory::new(10, Duration::from_millis(10)));

        embeddings.cache().put("k", vec![0.0]).await;
        sessions.store("s", Vec::new(), 0).await;

        let shutdown = spawn(
            Duration::from_millis(20),
            Arc::clone(&embeddings),
            Arc::clone(&sessions),
            Arc::clone(&history),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(embeddings.cache().len().await, 0);
        assert_eq!(sessions.len().await, 0);

        shutdown.send(true).unwrap();
    }
}
