
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::catalog::ProductRecord;

/// A bullet line counts as product copy when it mentions one of these.
const BULLET_KEYWORDS: &[&str] = &["hold", "finish", "texture", "volume", "frizz", "shine"];
const MAX_BULLETS: usize = 12;

/// title/description keyword → catalog tag
const TAG_RULES: &[(&str, &str)] = &[
    ("curl", "curly"),
    ("wavy", "wavy"),
    ("straight", "straight"),
    ("spray", "spray"),
    ("powder", "powder"),
    ("clay", "clay"),
    ("pomade", "pomade"),
    ("cement", "pomade"),
    ("frizz", "frizz"),
    ("shine", "shine"),
    ("volume", "volume"),
    ("matte", "matte"),
];

macro_rules! static_selector {
    ($name:ident, $css:expr) => {
        fn $name() -> &'static Selector {
            static SELECTOR: OnceLock<Selector> = OnceLock::new();
            SELECTOR.get_or_init(|| Selector::parse($css).expect("static selector is valid"))
        }
    };
}

static_selector!(title_selector, "title");
static_selector!(og_title_selector, r#"meta[property="og:title"]"#);
static_selector!(og_image_selector, r#"meta[property="og:image"]"#);
static_selector!(meta_description_selector, r#"meta[name="description"]"#);
static_selector!(ld_json_selector, r#"script[type="application/ld+json"]"#);
static_selector!(li_selector, "li");
static_selector!(heading_selector, "h1, h2, h3, h4, h5, h6");

/// Extract one `ProductRecord` from a product page. Extraction is
/// best-effort: missing sections come back empty rather than failing the
/// page.
#[inline]
pub fn extract_product(url: &str, html: &str) -> ProductRecord {
    let document = Html::parse_document(html);
    let ld = ld_json_product(&document);

    let og_title = meta_content(&document, og_title_selector());
    let title = if og_title.is_empty() {
        document
            .select(title_selector())
            .next()
            .map(element_text)
            .unwrap_or_default()
    } else {
        og_title
    };

    let meta_description = meta_content(&document, meta_description_selector());
    let description = ld
        .as_ref()
        .and_then(|v| v.get("description"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(meta_description);

    let price = ld
        .as_ref()
        .and_then(|v| v.get("offers"))
        .and_then(|offers| offers.get("price"))
        .map(json_scalar_to_string)
        .unwrap_or_default();

    let og_image = meta_content(&document, og_image_selector());
    let image = if og_image.is_empty() {
        ld.as_ref()
            .and_then(|v| v.get("image"))
            .map(|v| match v {
                serde_json::Value::Array(items) => items
                    .first()
                    .and_then(|i| i.as_str())
                    .unwrap_or_default()
                    .to_string(),
                other => json_scalar_to_string(other),
            })
            .unwrap_or_default()
    } else {
        og_image
    };

    let record = ProductRecord {
        id: url.to_string(),
        url: url.to_string(),
        name: title.trim().to_string(),
        description: description.trim().to_string(),
        price,
        image,
        bullets: extract_bullets(&document),
        how_to_use: find_section(&document, &["how to use", "how-to", "usage", "use"]),
        ingredients: find_section(&document, &["ingredients", "what's inside"]),
        tags: Vec::new(),
    };

    let tags = infer_tags(&record);
    ProductRecord { tags, ..record }
}

fn meta_content(document: &Html, selector: &Selector) -> String {
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .unwrap_or_default()
}

/// First JSON-LD block describing a Product.
fn ld_json_product(document: &Html) -> Option<serde_json::Value> {
    for script in document.select(ld_json_selector()) {
        let raw: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };
        let type_matches = value
            .get("@type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| t.eq_ignore_ascii_case("product"));
        if type_matches {
            return Some(value);
        }
    }
    None
}

/// List items that read like product copy: mention a catalog keyword and
/// have a plausible length. Deduped in document order.
fn extract_bullets(document: &Html) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut bullets = Vec::new();

    for li in document.select(li_selector()) {
        let text = element_text(li);
        let lowered = text.to_lowercase();

        if !(7..=220).contains(&text.len()) {
            continue;
        }
        if !BULLET_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            continue;
        }
        if seen.insert(text.clone()) {
            bullets.push(text);
        }
        if bullets.len() == MAX_BULLETS {
            break;
        }
    }

    bullets
}

/// Locate a section by heading keywords and gather the next few sibling
/// paragraphs or lists.
fn find_section(document: &Html, label_words: &[&str]) -> String {
    for heading in document.select(heading_selector()) {
        let heading_text = element_text(heading).to_lowercase();
        if !label_words.iter().any(|w| heading_text.contains(w)) {
            continue;
        }

        let mut texts = Vec::new();
        let mut inspected = 0;
        let mut sibling = heading.next_sibling();
        while let Some(node) = sibling {
            if let Some(element) = ElementRef::wrap(node) {
                let name = element.value().name();
                if matches!(name, "p" | "ul" | "ol" | "div") {
                    texts.push(element_text(element));
                }
                inspected += 1;
                if inspected == 3 {
                    break;
                }
            }
            sibling = node.next_sibling();
        }

        let joined = texts
            .iter()
            .filter(|t| !t.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            return joined;
        }
    }

    String::new()
}

fn infer_tags(record: &ProductRecord) -> Vec<String> {
    let haystack = format!("{} {}", record.name, record.description).to_lowercase();
    let mut tags = Vec::new();

    for (keyword, tag) in TAG_RULES {
        if haystack.contains(keyword) && !tags.iter().any(|t| t == tag) {
            tags.push((*tag).to_string());
        }
    }

    tags
}

fn json_scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}
