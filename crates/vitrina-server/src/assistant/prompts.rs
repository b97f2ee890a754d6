// crates/vitrina-server/src/assistant/prompts.rs
// Prompt builders for the unified classifier and the re-ranker

use crate::categories;
use vitrina_types::{DialogContext, Product, SearchHistoryItem};

/// History window passed to the classifier.
const HISTORY_WINDOW: usize = 3;

/// Build the unified-classifier prompt: one call decides between greeting,
/// invalid, clarification and product_search, and produces the semantic
/// subqueries for the search case.
pub fn classifier_prompt(
    query: &str,
    history: &[SearchHistoryItem],
    dialog_context: Option<&DialogContext>,
) -> String {
    let mut context = String::new();
    if !history.is_empty() {
        let recent: Vec<String> = history
            .iter()
            .rev()
            .take(HISTORY_WINDOW)
            .rev()
            .map(|item| format!("- Користувач шукав: '{}'", item.query))
            .collect();
        context = format!(
            "**Історія попередніх пошуків:**\n{}\n\n",
            recent.join("\n")
        );
    }

    let mut clarification_note = String::new();
    if let Some(ctx) = dialog_context
        && ctx.clarification_asked
    {
        clarification_note = format!(
            "\n⚠️ ВАЖЛИВО: користувач ВЖЕ отримав уточнююче питання про категорії \
({:?}) і зараз відповідає на нього. НЕ питай уточнень повторно. \
action ПОВИНЕН бути \"product_search\"; побудуй semantic_subqueries з відповіді \
користувача (навіть якщо вона загальна, як-от \"покажи всі\").\n",
            ctx.categories_suggested
        );
    }

    let categories_list = categories::top_level_labels()
        .iter()
        .map(|label| format!("- {label}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Ти – AI асистент інтернет-магазину TA-DA! — великого універмагу товарів для дому та сім'ї.

**Категорії магазину:**
{categories_list}

Контекстні ситуації теж є запитами про товари: романтична вечеря → посуд і свічки;
день народження → іграшки та святкові товари; школа → канцелярія і рюкзаки;
прибирання → господарські товари.

{context}{clarification_note}**Запит користувача:** "{query}"

Вибери ОДНУ дію:

1. "greeting" — привітання, прощання або подяка без запиту про товари.
2. "invalid" — запит явно не про товари магазину (рецепти, погода, жарти,
   випадковий текст). Використовуй дуже рідко.
3. "clarification" — загальне питання про асортимент ("що у вас є?",
   "покажи каталог"). Постав коротке уточнююче питання та поверни 4-8
   конкретних категорій зі списку вище у полі "categories".
4. "product_search" — користувач шукає товар, бренд, категорію або описує
   ситуацію, де потрібні товари. Створи 2-5 "semantic_subqueries": перший —
   найточніший варіант запиту (доповнений з історії, якщо запит неповний,
   наприклад "а синя?" після "червона футболка" означає "синя футболка"),
   решта — варіації з синонімами та розширеннями.

Правила:
- Якщо запит містить і привітання, і товар ("привіт, шукаю футболку") — це product_search.
- Конкретний запит ("корм для котів", "футболки Beki") НЕ потребує уточнення.
- assistant_message: коротко (1-3 речення), українською, по-дружньому.

Поверни JSON:
{{
  "action": "greeting" | "invalid" | "clarification" | "product_search",
  "confidence": 0.95,
  "assistant_message": "...",
  "semantic_subqueries": ["..."],
  "categories": ["..."]
}}"#
    )
}

/// Item limit sent to the re-ranker.
pub const RERANK_CANDIDATES: usize = 25;

/// Build the re-ranker prompt over the candidate slice.
pub fn rerank_prompt(products: &[Product], query: &str) -> String {
    let items: Vec<serde_json::Value> = products
        .iter()
        .take(RERANK_CANDIDATES)
        .enumerate()
        .map(|(i, p)| {
            serde_json::json!({
                "index": i + 1,
                "id": p.id,
                "title": p.display_title().unwrap_or_default(),
                "desc": truncate_chars(
                    p.description_ua.as_deref().or(p.description_ru.as_deref()).unwrap_or(""),
                    200
                ),
            })
        })
        .collect();
    let items_json = serde_json::to_string_pretty(&items).unwrap_or_default();
    let count = items.len();

    format!(
        r#"Ти – експертний консультант інтернет-магазину TA-DA!.

**Запит користувача:** "{query}"

Проаналізуй знайдені товари та відміть найкращі (5-10, якщо є хоч трохи релевантні).

## Знайдені товари ({count} кандидатів):
{items_json}

Оцінка relevance_score: 0.9-1.0 — ідеально відповідає запиту (назва, бренд,
характеристики); 0.7-0.89 — дуже добре підходить; 0.5-0.69 — добре підходить
за категорією; 0.4-0.49 — підходить частково. Товари з оцінкою нижче 0.4 не включай.

bucket: "must_have" — топ-3 найкращі; "good_to_have" — решта хороших варіантів;
"also_consider" — варіанти на додачу.

reason: конкретне пояснення українською, згадуй бренд і характеристики
("Класичні капці gemelli для дому, зручні та практичні"), не загальні фрази.

Поверни JSON:
{{
  "recommendations": [
    {{
      "product_index": 1,
      "relevance_score": 0.95,
      "reason": "...",
      "bucket": "must_have"
    }}
  ],
  "assistant_message": "Персоналізоване повідомлення (2-3 речення) українською про підібрану добірку."
}}"#
    )
}

/// Char-safe prefix (titles and descriptions are Cyrillic).
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_multibyte() {
        let s = "футболка";
        assert_eq!(truncate_chars(s, 4), "футб");
        assert_eq!(truncate_chars(s, 100), s);
    }

    #[test]
    fn test_classifier_prompt_includes_history_window() {
        let history: Vec<SearchHistoryItem> = (0..5)
            .map(|i| SearchHistoryItem {
                query: format!("запит {i}"),
                keywords: vec![],
                timestamp: 0.0,
                results_count: 0,
            })
            .collect();
        let prompt = classifier_prompt("а синя?", &history, None);
        assert!(prompt.contains("запит 4"));
        assert!(prompt.contains("запит 2"));
        assert!(!prompt.contains("запит 1"), "only the last 3 are included");
    }

    #[test]
    fn test_classifier_prompt_clarification_note() {
        let ctx = DialogContext {
            clarification_asked: true,
            categories_suggested: vec!["Іграшки".into()],
            extra: Default::default(),
        };
        let prompt = classifier_prompt("будь-які", &[], Some(&ctx));
        assert!(prompt.contains("product_search"));
        assert!(prompt.contains("Іграшки"));
    }
}
