// crates/vitrina-server/src/web/sse.rs
// SSE streaming chat-search endpoint

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::warn;
use vitrina_types::{ChatStreamEvent, DialogContext, SearchHistoryItem, StatusKind};

use super::handlers::outcome_into_response;
use crate::pipeline::Outcome;
use crate::web::state::AppState;

/// Query parameters of GET /chat/search/sse. Complex objects arrive
/// base64url-encoded so they survive query-string transport.
#[derive(Debug, Deserialize)]
pub struct SseParams {
    pub query: String,
    pub session_id: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub selected_category: Option<String>,
    #[serde(default)]
    pub dialog_context_b64: Option<String>,
    #[serde(default)]
    pub search_history_b64: Option<String>,
}

fn default_k() -> usize {
    50
}

/// Streaming chat-search endpoint.
pub async fn chat_search_sse(
    State(state): State<AppState>,
    Query(params): Query<SseParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<ChatStreamEvent>(256);

    tokio::spawn(async move {
        process_chat_stream(state, params, tx).await;
    });

    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event.data()).unwrap_or_default();
            yield Ok(Event::default().event(event.name()).data(data));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Run the pipeline and feed the event channel in wire order.
async fn process_chat_stream(state: AppState, params: SseParams, tx: mpsc::Sender<ChatStreamEvent>) {
    let started = Instant::now();
    let delay = state.settings.sse_delay();

    let _ = tx
        .send(ChatStreamEvent::Status {
            message: "Думаю...".into(),
            kind: StatusKind::Thinking,
        })
        .await;

    let dialog_context = params
        .dialog_context_b64
        .as_deref()
        .and_then(decode_base64_json::<DialogContext>);
    let search_history = params
        .search_history_b64
        .as_deref()
        .and_then(decode_base64_json::<Vec<SearchHistoryItem>>)
        .unwrap_or_default();

    let outcome = state
        .pipeline
        .run(
            &params.query,
            &params.session_id,
            params.k,
            params.selected_category.as_deref(),
            dialog_context.as_ref(),
            &search_history,
            Some(&tx),
        )
        .await;

    match &outcome {
        Outcome::Error { message } => {
            let _ = tx
                .send(ChatStreamEvent::Error {
                    message: message.clone(),
                })
                .await;
            return;
        }
        Outcome::NoResults { message } => {
            let _ = tx
                .send(ChatStreamEvent::NoResults {
                    message: message.clone(),
                })
                .await;
        }
        Outcome::Greeting { message }
        | Outcome::Invalid { message }
        | Outcome::Clarification { message, .. } => {
            type_message(&tx, message, delay).await;
        }
        Outcome::ProductResults(product_outcome) => {
            type_message(&tx, &product_outcome.assistant_message, delay).await;
        }
    }

    let response = outcome_into_response(outcome, started.elapsed().as_secs_f64() * 1000.0);
    let _ = tx.send(ChatStreamEvent::Final(Box::new(response))).await;
}

/// Stream an assistant message character by character for the typing effect.
async fn type_message(tx: &mpsc::Sender<ChatStreamEvent>, message: &str, delay: Option<Duration>) {
    let _ = tx
        .send(ChatStreamEvent::AssistantStart {
            length: message.chars().count(),
        })
        .await;
    for ch in message.chars() {
        if tx.is_closed() {
            // Client went away; stop pacing out characters.
            return;
        }
        let _ = tx
            .send(ChatStreamEvent::AssistantDelta {
                text: ch.to_string(),
            })
            .await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
    let _ = tx.send(ChatStreamEvent::AssistantEnd).await;
}

/// Decode a base64url (or plain base64) JSON payload from a query param.
fn decode_base64_json<T: serde::de::DeserializeOwned>(encoded: &str) -> Option<T> {
    let bytes = URL_SAFE
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .or_else(|_| STANDARD.decode(encoded))
        .ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Undecodable base64 JSON query param");
            None
        }
    }
}
