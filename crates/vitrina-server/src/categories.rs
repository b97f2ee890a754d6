// crates/vitrina-server/src/categories.rs
// Keyword-based product categorization with hierarchy rollup

use std::collections::HashMap;
use vitrina_types::{CategoryFacet, Product};

/// Synthetic facet populated from re-ranker output; carries no keywords.
pub const RECOMMENDED_CODE: &str = "recommended";

/// One entry of the static category schema.
pub struct CategoryDef {
    pub code: &'static str,
    pub label: &'static str,
    pub emoji: &'static str,
    pub keywords: &'static [&'static str],
    pub parent: Option<&'static str>,
    pub special: bool,
}

const fn cat(
    code: &'static str,
    label: &'static str,
    emoji: &'static str,
    keywords: &'static [&'static str],
) -> CategoryDef {
    CategoryDef {
        code,
        label,
        emoji,
        keywords,
        parent: None,
        special: false,
    }
}

const fn sub(
    code: &'static str,
    label: &'static str,
    emoji: &'static str,
    keywords: &'static [&'static str],
    parent: &'static str,
) -> CategoryDef {
    CategoryDef {
        code,
        label,
        emoji,
        keywords,
        parent: Some(parent),
        special: false,
    }
}

/// Store assortment schema. Subcategories precede their parent so that a
/// tie between a specific and a broad match resolves to the specific one
/// (ties break by insertion order).
pub static CATEGORY_SCHEMA: &[CategoryDef] = &[
    CategoryDef {
        code: RECOMMENDED_CODE,
        label: "⭐ Рекомендовано для вас",
        emoji: "⭐",
        keywords: &[],
        parent: None,
        special: true,
    },
    cat("accessories", "Аксесуари", "🧦", &[
        "шкарпетки", "колготи", "гольфи", "панчохи", "шапка", "шарф", "рукавиці",
        "ремінь", "сумка", "гаманець", "рюкзак", "парасолька", "окуляри", "заколка",
    ]),
    sub("toys_dolls", "Ляльки", "🪆", &["лялька", "пупс"], "toys"),
    sub("toys_construction", "Конструктори і пазли", "🧩", &[
        "конструктор", "пазл", "мозаїка",
    ], "toys"),
    cat("toys", "Іграшки", "🧸", &[
        "іграшка", "машинка", "м'яка іграшка", "автомат", "пістолет", "трактор", "динозавр",
    ]),
    sub("clothing_tshirts", "Футболки і майки", "👕", &[
        "футболка", "майка", "лонгслів", "поло",
    ], "clothing"),
    sub("clothing_pants", "Штани і джинси", "👖", &[
        "штани", "джинси", "шорти", "брюки",
    ], "clothing"),
    sub("clothing_sleepwear", "Піжами і домашній одяг", "🌙", &[
        "піжама", "халат", "нічна сорочка",
    ], "clothing"),
    cat("clothing", "Одяг", "👕", &[
        "одяг", "сукня", "костюм", "кофта", "світшот", "жилет", "куртка", "худі", "водолазка",
    ]),
    cat("stationery", "Канцелярія", "📚", &[
        "зошит", "блокнот", "олівець", "ручка", "маркер", "фарби", "пензлик",
        "акварель", "папка", "пенал", "щоденник", "папір", "клей",
    ]),
    cat("household", "Господарські товари", "🏠", &[
        "відро", "миска", "таз", "губка", "щітка", "швабра", "ганчірка", "мило",
        "засіб", "прання", "миття", "чищення", "серветка",
    ]),
    sub("tableware_cookware", "Каструлі і сковорідки", "🍳", &[
        "каструля", "сковорода", "сотейник", "казан",
    ], "tableware"),
    sub("tableware_serving", "Посуд для сервірування", "🍽️", &[
        "тарілка", "чашка", "стакан", "келих", "блюдо", "салатник",
    ], "tableware"),
    cat("tableware", "Кухонний посуд", "🍽️", &[
        "посуд", "ложка", "виделка", "ніж", "форма для випікання",
    ]),
    cat("garden", "Для саду і городу", "🌱", &[
        "насіння", "добриво", "грунт", "горщик", "лопата", "граблі", "шланг", "субстрат",
    ]),
    cat("cosmetics", "Косметика і гігієна", "🧴", &[
        "шампунь", "бальзам", "крем", "гель для душу", "зубна паста", "зубна щітка",
        "дезодорант", "фарба для волосся", "туш", "помада",
    ]),
    cat("footwear", "Взуття", "👞", &[
        "чоботи", "черевики", "кросівки", "кеди", "тапки", "тапочки", "шльопанці",
        "капці", "туфлі", "босоніжки",
    ]),
    cat("electrical", "Електротовари", "💡", &[
        "лампа", "ліхтар", "подовжувач", "розетка", "вимикач", "батарейка",
        "зарядний", "кабель", "навушники",
    ]),
    cat("festive", "Святкові товари", "🎉", &[
        "свічка", "листівка", "коробка подарункова", "гірлянда", "кулька", "значок", "магніт",
    ]),
    cat("containers", "Контейнери і зберігання", "📦", &[
        "контейнер", "органайзер", "коробка", "ємність", "лоток",
    ]),
    cat("food", "Продукти харчування", "🍪", &[
        "печиво", "цукерки", "шоколад", "чіпси", "напій", "кава", "тістечко", "соус",
    ]),
    cat("textiles", "Домашній текстиль", "🏡", &[
        "ковдра", "подушка", "рушник", "скатертина", "килим", "штора", "постільна білизна",
    ]),
    cat("pets", "Товари для тварин", "🐾", &[
        "корм", "ласощі", "нашийник", "повідець", "лежак", "годівниця",
        "для котів", "для собак",
    ]),
    cat("fishing", "Риболовля", "🎣", &[
        "вудилище", "леса", "гачок", "котушка", "воблер", "приманка", "поплавець", "прикормка",
    ]),
    cat("creativity", "Творчість і хобі", "🎨", &[
        "розмальовка", "картина за номерами", "алмазна мозаїка", "фоаміран", "фетр",
        "набір для творчості",
    ]),
    cat("sports", "Спорт і фітнес", "🏋️", &[
        "м'яч", "еспандер", "гантелі", "скакалка", "тренажер", "велосипед", "самокат",
    ]),
    cat("auto", "Автотовари", "🚗", &[
        "ароматизатор автомобільний", "щітка склоочисника", "тримач", "трос", "автохімія",
    ]),
];

pub fn find_category(code: &str) -> Option<&'static CategoryDef> {
    CATEGORY_SCHEMA.iter().find(|c| c.code == code)
}

/// Resolve a client-supplied category selector: a code or a display label.
pub fn resolve_category(selector: &str) -> Option<&'static CategoryDef> {
    CATEGORY_SCHEMA
        .iter()
        .find(|c| c.code == selector || c.label == selector)
}

/// Labels of the top-level assortment categories, for the classifier prompt.
pub fn top_level_labels() -> Vec<&'static str> {
    CATEGORY_SCHEMA
        .iter()
        .filter(|c| !c.special && c.parent.is_none())
        .map(|c| c.label)
        .collect()
}

/// Pick the best-matching category for one product: the non-special category
/// with the most keyword substrings in the product text. Ties resolve to the
/// earlier schema entry; no match means the product is left out of faceting.
pub fn assign_category(product: &Product) -> Option<&'static str> {
    let text = product.combined_text();
    let mut best: Option<&'static str> = None;
    let mut best_hits = 0usize;
    for def in CATEGORY_SCHEMA.iter().filter(|c| !c.special) {
        let hits = def.keywords.iter().filter(|kw| text.contains(*kw)).count();
        if hits > best_hits {
            best = Some(def.code);
            best_hits = hits;
        }
    }
    best
}

/// Category buckets: code → product ids, in schema order.
pub type CategoryBuckets = Vec<(String, Vec<String>)>;

/// Assign every product, then roll small sibling buckets up into their
/// parent: when a parent's children collectively hold at least 3 products
/// and more than the parent itself, the children merge into the parent.
pub fn categorize(products: &[Product]) -> CategoryBuckets {
    let mut by_code: HashMap<&'static str, Vec<String>> = HashMap::new();
    for product in products {
        if let Some(code) = assign_category(product) {
            by_code.entry(code).or_default().push(product.id.clone());
        }
    }
    rollup(&mut by_code);

    // Deterministic order: schema insertion order.
    CATEGORY_SCHEMA
        .iter()
        .filter_map(|def| {
            by_code
                .remove(def.code)
                .filter(|ids| !ids.is_empty())
                .map(|ids| (def.code.to_string(), ids))
        })
        .collect()
}

fn rollup(by_code: &mut HashMap<&'static str, Vec<String>>) {
    let parents: Vec<&'static str> = CATEGORY_SCHEMA
        .iter()
        .filter_map(|c| c.parent)
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();

    for parent in parents {
        let children: Vec<&'static str> = CATEGORY_SCHEMA
            .iter()
            .filter(|c| c.parent == Some(parent))
            .map(|c| c.code)
            .collect();

        let child_total: usize = children
            .iter()
            .filter_map(|code| by_code.get(code))
            .map(Vec::len)
            .sum();
        let parent_count = by_code.get(parent).map_or(0, Vec::len);

        if child_total >= 3 && child_total > parent_count {
            let mut merged = by_code.remove(parent).unwrap_or_default();
            for code in &children {
                if let Some(ids) = by_code.remove(code) {
                    merged.extend(ids);
                }
            }
            by_code.insert(parent, merged);
        }
    }
}

/// Shape buckets into the ordered facet payload: the `recommended` facet
/// (when populated) always leads, the rest follow by count descending.
pub fn facet_payload(buckets: &CategoryBuckets, recommended_count: usize) -> Vec<CategoryFacet> {
    let mut facets: Vec<CategoryFacet> = buckets
        .iter()
        .filter_map(|(code, ids)| {
            let def = find_category(code)?;
            Some(CategoryFacet {
                code: def.code.to_string(),
                label: def.label.to_string(),
                emoji: def.emoji.to_string(),
                count: ids.len(),
                special: None,
            })
        })
        .collect();
    facets.sort_by(|a, b| b.count.cmp(&a.count));

    if recommended_count > 0
        && let Some(def) = find_category(RECOMMENDED_CODE)
    {
        facets.insert(
            0,
            CategoryFacet {
                code: def.code.to_string(),
                label: def.label.to_string(),
                emoji: def.emoji.to_string(),
                count: recommended_count,
                special: Some(true),
            },
        );
    }
    facets
}
