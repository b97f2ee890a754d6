// crates/vitrina-server/src/search/fusion.rs
// Score fusion for hybrid (semantic + lexical) result lists

use serde_json::Value;
use std::collections::HashMap;

/// RRF rank constant
const RRF_C: usize = 30;

fn hit_id(hit: &Value) -> String {
    hit.get("_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn hit_score(hit: &Value) -> f64 {
    hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0)
}

fn set_score(hit: &mut Value, score: f64) {
    if let Some(obj) = hit.as_object_mut() {
        obj.insert("_score".into(), Value::from(score));
    }
}

/// Weighted fusion: normalize each list by its own max score, combine with
/// α (semantic) and 1-α (lexical). When one list is empty the weights
/// collapse to the non-empty side, so its top-k passes through unchanged
/// in order. The fused value overwrites `_score`.
pub fn weighted_merge(sem: Vec<Value>, bm: Vec<Value>, k: usize, alpha: f64) -> Vec<Value> {
    let (alpha, beta) = match (sem.is_empty(), bm.is_empty()) {
        (true, false) => (0.0, 1.0),
        (false, true) => (1.0, 0.0),
        _ => (alpha, 1.0 - alpha),
    };

    let max_sem = sem.iter().map(hit_score).fold(f64::MIN, f64::max).max(1e-9);
    let max_bm = bm.iter().map(hit_score).fold(f64::MIN, f64::max).max(1e-9);

    let mut combined: HashMap<String, f64> = HashMap::new();
    let mut pool: HashMap<String, Value> = HashMap::new();

    for hit in sem {
        let id = hit_id(&hit);
        let normalized = hit_score(&hit) / max_sem;
        *combined.entry(id.clone()).or_insert(0.0) += alpha * normalized;
        pool.entry(id).or_insert(hit);
    }
    for hit in bm {
        let id = hit_id(&hit);
        let normalized = hit_score(&hit) / max_bm;
        *combined.entry(id.clone()).or_insert(0.0) += beta * normalized;
        pool.entry(id).or_insert(hit);
    }

    rank_and_take(combined, pool, k)
}

/// Reciprocal-rank fusion: score(id) = Σ 1/(c + rank + 1) over both lists.
pub fn rrf_merge(sem: Vec<Value>, bm: Vec<Value>, k: usize) -> Vec<Value> {
    let mut combined: HashMap<String, f64> = HashMap::new();
    let mut pool: HashMap<String, Value> = HashMap::new();

    for list in [sem, bm] {
        for (rank, hit) in list.into_iter().enumerate() {
            let id = hit_id(&hit);
            *combined.entry(id.clone()).or_insert(0.0) += 1.0 / (RRF_C + rank + 1) as f64;
            pool.entry(id).or_insert(hit);
        }
    }

    rank_and_take(combined, pool, k)
}

fn rank_and_take(
    combined: HashMap<String, f64>,
    mut pool: HashMap<String, Value>,
    k: usize,
) -> Vec<Value> {
    let mut ordered: Vec<(String, f64)> = combined.into_iter().collect();
    // Ties break on id so reruns stay deterministic.
    ordered.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    ordered
        .into_iter()
        .take(k)
        .filter_map(|(id, score)| {
            let mut hit = pool.remove(&id)?;
            set_score(&mut hit, score);
            Some(hit)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(id: &str, score: f64) -> Value {
        json!({ "_id": id, "_score": score, "_source": {} })
    }

    #[test]
    fn test_weighted_merge_prefers_high_combined() {
        let sem = vec![hit("a", 0.9), hit("b", 0.5)];
        let bm = vec![hit("b", 20.0), hit("c", 10.0)];
        let merged = weighted_merge(sem, bm, 10, 0.7);

        // "b" appears in both lists, so it should rank first.
        assert_eq!(merged[0]["_id"], "b");
        let b_score = merged[0]["_score"].as_f64().unwrap();
        // 0.7 * (0.5/0.9) + 0.3 * (20/20)
        assert!((b_score - (0.7 * (0.5 / 0.9) + 0.3)).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_merge_empty_semantic_passes_lexical_through() {
        let bm = vec![hit("x", 30.0), hit("y", 20.0), hit("z", 10.0)];
        let merged = weighted_merge(Vec::new(), bm, 2, 0.7);
        let ids: Vec<_> = merged.iter().map(|h| h["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["x", "y"]);
        // Weight collapsed to 1.0, so the top hit keeps a normalized score of 1.0.
        assert!((merged[0]["_score"].as_f64().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_merge_empty_lexical_passes_semantic_through() {
        let sem = vec![hit("a", 0.8), hit("b", 0.4)];
        let merged = weighted_merge(sem, Vec::new(), 5, 0.7);
        let ids: Vec<_> = merged.iter().map(|h| h["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_rrf_merge_rewards_co_occurrence() {
        let sem = vec![hit("a", 0.9), hit("b", 0.8)];
        let bm = vec![hit("b", 12.0), hit("c", 11.0)];
        let merged = rrf_merge(sem, bm, 10);
        assert_eq!(merged[0]["_id"], "b");
        let expected = 1.0 / 32.0 + 1.0 / 31.0;
        assert!((merged[0]["_score"].as_f64().unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_merge_respects_k() {
        let sem = (0..10).map(|i| hit(&format!("s{i}"), 1.0 - i as f64 * 0.05)).collect();
        let merged = weighted_merge(sem, Vec::new(), 3, 0.7);
        assert_eq!(merged.len(), 3);
    }
}
