//! Integration tests for the chat search pipeline
//!
//! Upstreams (assistant, embedder, search engine) are mocked; the pipeline,
//! session store and response serialization run for real.

mod test_utils;

use std::collections::HashMap;
use test_utils::*;
use vitrina::pipeline::Outcome;
use vitrina::web::handlers::outcome_into_response;

const SUBQUERIES: [&str; 3] = [
    "чорна футболка",
    "футболка базова чорна",
    "футболка бавовна чорна",
];

fn product_search_fixture(rerank_top: usize) -> TestPipeline {
    let mut hits = HashMap::new();
    hits.insert(SUBQUERIES[0].to_string(), hits_page("a", 1.0, "Футболка чорна"));
    hits.insert(SUBQUERIES[1].to_string(), hits_page("b", 0.9, "Футболка базова"));
    hits.insert(SUBQUERIES[2].to_string(), hits_page("c", 0.8, "Футболка бавовна"));
    build_pipeline(
        MockAssistant::product_search(&SUBQUERIES, rerank_top),
        MockEmbedder::working(),
        MockSearch::new(hits),
    )
}

async fn run_default(fixture: &TestPipeline, query: &str) -> Outcome {
    fixture
        .pipeline
        .run(query, "session-1", 50, None, None, &[], None)
        .await
}

#[tokio::test]
async fn test_greeting_short_circuits() {
    let fixture = build_pipeline(
        MockAssistant::greeting("Вітаю!"),
        MockEmbedder::working(),
        MockSearch::empty(),
    );
    let outcome = run_default(&fixture, "привіт").await;

    match &outcome {
        Outcome::Greeting { message } => assert_eq!(message, "Вітаю!"),
        other => panic!("expected greeting, got {other:?}"),
    }
    assert_eq!(fixture.search.call_count(), 0, "no search engine calls");

    let response = outcome_into_response(outcome, 1.0);
    assert!(response.results.is_empty());
    assert!(response.recommendations.is_empty());
    assert_eq!(response.dialog_state.as_deref(), Some("greeting"));
    assert!(response.needs_user_input);
}

#[tokio::test]
async fn test_clarification_returns_category_buttons() {
    let categories = ["Одяг", "Іграшки", "Кухня", "Для дому"];
    let fixture = build_pipeline(
        MockAssistant::clarification("Що саме вас цікавить?", &categories),
        MockEmbedder::working(),
        MockSearch::empty(),
    );
    let outcome = run_default(&fixture, "що у вас є?").await;

    assert!(matches!(outcome, Outcome::Clarification { .. }));
    assert_eq!(fixture.search.call_count(), 0, "no search engine calls");

    let response = outcome_into_response(outcome, 1.0);
    assert!(response.results.is_empty());
    let actions = response.actions.expect("clarification offers buttons");
    assert_eq!(actions.len(), 4);
    assert!(actions.iter().all(|a| a.action == "search_category"));
    assert_eq!(actions[0].value, "Одяг");
    let ctx = response.dialog_context.expect("dialog context echoed");
    assert!(ctx.clarification_asked);
    assert_eq!(ctx.categories_suggested.len(), 4);
}

#[tokio::test]
async fn test_product_search_happy_path() {
    let fixture = product_search_fixture(8);
    let outcome = run_default(&fixture, "чорна футболка").await;

    let product_outcome = match outcome {
        Outcome::ProductResults(po) => po,
        other => panic!("expected products, got {other:?}"),
    };

    // Re-ranked ids lead the final order, in re-ranker order.
    assert_eq!(product_outcome.recommendations.len(), 8);
    for (i, rec) in product_outcome.recommendations.iter().enumerate() {
        assert_eq!(product_outcome.results[i].id, rec.product_id);
    }

    // The first subquery dominates: its top hit carries full weight.
    assert_eq!(product_outcome.results[0].id, "a_0");
    assert!((product_outcome.results[0].score - 1.0).abs() < 1e-9);

    // Recommended facet leads the category payload.
    assert_eq!(product_outcome.facets[0].code, "recommended");
    assert_eq!(product_outcome.facets[0].special, Some(true));
    assert_eq!(product_outcome.facets[0].count, 8);

    // Every recommendation id is present in results.
    let result_ids: std::collections::HashSet<&str> =
        product_outcome.results.iter().map(|p| p.id.as_str()).collect();
    assert!(
        product_outcome
            .recommendations
            .iter()
            .all(|r| result_ids.contains(r.product_id.as_str()))
    );

    // Combined scores stay sorted after the recommended prefix.
    let tail = &product_outcome.results[product_outcome.recommendations.len()..];
    for pair in tail.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    assert_eq!(product_outcome.dialog_state, "final_results");
    assert_eq!(fixture.history.len().await, 1, "history item appended");
}

#[tokio::test]
async fn test_results_capped_at_k() {
    let fixture = product_search_fixture(3);
    let outcome = fixture
        .pipeline
        .run("чорна футболка", "session-1", 10, None, None, &[], None)
        .await;
    match outcome {
        Outcome::ProductResults(po) => {
            assert!(po.results.len() <= 10);
            // The full pre-cap list is still stored for pagination.
            let page = fixture.sessions.fetch("session-1", 0, 1000).await;
            assert_eq!(page.products.len(), 60);
        }
        other => panic!("expected products, got {other:?}"),
    }
}

#[tokio::test]
async fn test_no_results_when_scores_below_threshold() {
    // Same shape as the happy path, but every score tops out at 0.1: the
    // adaptive floor (and the relaxed half-threshold pass) filter everything.
    let mut hits = HashMap::new();
    for (prefix, sq) in [("a", SUBQUERIES[0]), ("b", SUBQUERIES[1]), ("c", SUBQUERIES[2])] {
        hits.insert(
            sq.to_string(),
            (0..5)
                .map(|j| hit(&format!("{prefix}_{j}"), 0.1 - j as f64 * 0.005, "Товар"))
                .collect(),
        );
    }
    let fixture = build_pipeline(
        MockAssistant::product_search(&SUBQUERIES, 8),
        MockEmbedder::working(),
        MockSearch::new(hits),
    );
    let outcome = run_default(&fixture, "чорна футболка").await;

    match &outcome {
        Outcome::NoResults { message } => {
            assert!(message.contains("нічого не знайдено"));
        }
        other => panic!("expected no results, got {other:?}"),
    }
    let response = outcome_into_response(outcome, 1.0);
    assert!(response.results.is_empty());
    assert_eq!(response.dialog_state.as_deref(), Some("no_results"));
}

#[tokio::test]
async fn test_pagination_continues_stored_order() {
    let fixture = product_search_fixture(8);
    let outcome = run_default(&fixture, "чорна футболка").await;
    let product_outcome = match outcome {
        Outcome::ProductResults(po) => po,
        other => panic!("expected products, got {other:?}"),
    };

    let page = fixture.sessions.fetch("session-1", 20, 20).await;
    assert_eq!(page.products.len(), 20);
    assert_eq!(page.next_offset, 40);
    assert!(page.has_more, "60 stored > 40 consumed");
    assert_eq!(page.total_found, 60);

    // The page continues exactly where the capped response ended.
    let full = fixture.sessions.fetch("session-1", 0, 1000).await;
    assert_eq!(full.products[20].id, page.products[0].id);
    // And the stored head equals the returned results.
    for (stored, returned) in full.products.iter().zip(product_outcome.results.iter()) {
        assert_eq!(stored.id, returned.id);
    }

    let missing = fixture.sessions.fetch("other-session", 0, 20).await;
    assert!(missing.products.is_empty(), "missing session yields empty batch");
}

#[tokio::test]
async fn test_unknown_category_passes_all_with_notice() {
    let fixture = product_search_fixture(8);
    let outcome = fixture
        .pipeline
        .run(
            "чорна футболка",
            "session-1",
            50,
            Some("nonexistent"),
            None,
            &[],
            None,
        )
        .await;

    match outcome {
        Outcome::ProductResults(po) => {
            assert_eq!(po.dialog_state, "category_not_found");
            assert!(po.assistant_message.contains("недоступна"));
            assert_eq!(po.results.len(), 50, "nothing filtered out");
        }
        other => panic!("expected products, got {other:?}"),
    }
}

#[tokio::test]
async fn test_known_category_filters_results() {
    let mut hits = HashMap::new();
    hits.insert(
        SUBQUERIES[0].to_string(),
        vec![
            hit("shirt", 1.0, "Футболка чорна"),
            hit("pan", 0.95, "Каструля емальована"),
            hit("doll", 0.9, "Лялька мала"),
        ],
    );
    let fixture = build_pipeline(
        MockAssistant::product_search(&SUBQUERIES[..1], 0),
        MockEmbedder::working(),
        MockSearch::new(hits),
    );
    let outcome = fixture
        .pipeline
        .run("чорна футболка", "s", 50, Some("clothing"), None, &[], None)
        .await;

    match outcome {
        Outcome::ProductResults(po) => {
            assert_eq!(po.dialog_state, "final_results");
            assert_eq!(po.results.len(), 1);
            assert_eq!(po.results[0].id, "shirt");
        }
        other => panic!("expected products, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_input_rejected_before_classification() {
    let fixture = build_pipeline(
        MockAssistant::product_search(&SUBQUERIES, 8),
        MockEmbedder::working(),
        MockSearch::empty(),
    );

    for query in ["1234 56", "x", "ііііііііііі"] {
        let outcome = run_default(&fixture, query).await;
        assert!(
            matches!(outcome, Outcome::Invalid { .. }),
            "query {query:?} should be invalid"
        );
    }
    assert_eq!(fixture.search.call_count(), 0);
}

#[tokio::test]
async fn test_embedding_failure_is_user_visible_error() {
    let fixture = build_pipeline(
        MockAssistant::product_search(&SUBQUERIES, 8),
        MockEmbedder::broken(),
        MockSearch::empty(),
    );
    let outcome = run_default(&fixture, "чорна футболка").await;
    match outcome {
        Outcome::Error { message } => assert!(message.contains("Не вдалося обробити запит")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_subqueries_fall_back_to_query() {
    let mut hits = HashMap::new();
    hits.insert("чорна футболка".to_string(), hits_page("q", 1.0, "Футболка"));
    let fixture = build_pipeline(
        MockAssistant::product_search(&[], 3),
        MockEmbedder::working(),
        MockSearch::new(hits),
    );
    let outcome = run_default(&fixture, "чорна футболка").await;
    match outcome {
        Outcome::ProductResults(po) => {
            assert_eq!(po.subqueries, vec!["чорна футболка".to_string()]);
            assert!(!po.results.is_empty());
        }
        other => panic!("expected products, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rerun_is_deterministic() {
    let fixture = product_search_fixture(8);
    let first = run_default(&fixture, "чорна футболка").await;
    let second = run_default(&fixture, "чорна футболка").await;

    let (first, second) = match (first, second) {
        (Outcome::ProductResults(a), Outcome::ProductResults(b)) => (a, b),
        other => panic!("expected products twice, got {other:?}"),
    };
    let ids = |po: &vitrina::pipeline::ProductOutcome| {
        po.results.iter().map(|p| p.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(first.facets, second.facets);
}
