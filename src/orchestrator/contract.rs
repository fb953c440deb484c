use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use tracing::warn;

use super::{Decision, RecommendCount};
use crate::retriever::RankedMatch;
use crate::{GuideError, Result};

/// Tags that mark a reply as something other than an embeddable fragment.
const DISALLOWED_MARKUP: &[&str] = &[
    "<!doctype", "<html", "<head", "<body", "<script", "<style", "<iframe",
];

/// A reply that passed the output contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedReply {
    pub html: String,
    pub truncated: bool,
}

fn anchor_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("a[href]").expect("static selector is valid"))
}

/// Enforce the reply contract on raw model output.
///
/// Recommendation replies must carry 1-2 anchors whose hrefs all come from
/// the shortlist actually shown to the model; clarifying replies must carry
/// exactly one question and no links; nothing may exceed the word budget
/// (over-budget recommendations are cut back to the last complete product
/// line instead of being rejected).
#[inline]
pub fn validate_reply(
    raw: &str,
    decision: &Decision,
    candidate_urls: &[String],
    word_budget: usize,
) -> Result<ValidatedReply> {
    let cleaned = strip_code_fences(raw).trim().to_string();
    if cleaned.is_empty() {
        return Err(GuideError::OutputContract("empty reply".to_string()));
    }

    let lowered = cleaned.to_lowercase();
    for marker in DISALLOWED_MARKUP {
        if lowered.contains(marker) {
            return Err(GuideError::OutputContract(format!(
                "reply is not a bare fragment (found {marker})"
            )));
        }
    }

    let anchors = extract_anchor_hrefs(&cleaned);

    match decision {
        Decision::Clarify(_) => {
            if !anchors.is_empty() {
                return Err(GuideError::OutputContract(
                    "clarifying reply must not contain product links".to_string(),
                ));
            }
            if cleaned.matches('?').count() != 1 {
                return Err(GuideError::OutputContract(
                    "clarifying reply must ask exactly one question".to_string(),
                ));
            }
            if visible_word_count(&cleaned) > word_budget {
                return Err(GuideError::OutputContract(
                    "clarifying reply exceeds the word budget".to_string(),
                ));
            }
            Ok(ValidatedReply {
                html: cleaned,
                truncated: false,
            })
        }
        Decision::Recommend(count) => {
            if anchors.is_empty() {
                return Err(GuideError::OutputContract(
                    "recommendation contains no product links".to_string(),
                ));
            }
            if anchors.len() > 2 {
                return Err(GuideError::OutputContract(format!(
                    "recommendation contains {} product links, maximum is 2",
                    anchors.len()
                )));
            }
            // The anti-hallucination invariant: a link the shortlist never
            // contained means the model invented a product.
            for href in &anchors {
                if !candidate_urls.iter().any(|url| url == href) {
                    return Err(GuideError::OutputContract(format!(
                        "reply links to {href}, which was not among the candidates"
                    )));
                }
            }
            if *count == RecommendCount::Two && anchors.len() < 2 {
                return Err(GuideError::OutputContract(
                    "two products were expected but only one was linked".to_string(),
                ));
            }

            if visible_word_count(&cleaned) <= word_budget {
                return Ok(ValidatedReply {
                    html: cleaned,
                    truncated: false,
                });
            }

            let truncated = truncate_to_budget(&cleaned, word_budget)?;
            warn!(
                "Reply exceeded the {}-word budget; truncated at the last complete product line",
                word_budget
            );
            Ok(ValidatedReply {
                html: truncated,
                truncated: true,
            })
        }
    }
}

/// Deterministic reply built straight from the shortlist, used when the
/// model cannot produce a contract-satisfying answer. Always validates.
#[inline]
pub fn fallback_reply(shortlist: &[RankedMatch], count: RecommendCount) -> String {
    let picks: Vec<&RankedMatch> = shortlist.iter().take(count.as_usize()).collect();

    match picks.as_slice() {
        [only] => format!(
            "<p>Based on what you've told me, I'd go with <a href=\"{}\">{}</a>{}.</p>",
            escape_attr(&only.metadata.url),
            escape_text(&only.metadata.name),
            reason_clause(&only.metadata.description),
        ),
        [first, second] => format!(
            "<p>Two good options for you:</p>\
             <p><a href=\"{}\">{}</a>{}.</p>\
             <p><a href=\"{}\">{}</a>{}.</p>",
            escape_attr(&first.metadata.url),
            escape_text(&first.metadata.name),
            reason_clause(&first.metadata.description),
            escape_attr(&second.metadata.url),
            escape_text(&second.metadata.name),
            reason_clause(&second.metadata.description),
        ),
        _ => String::new(),
    }
}

/// All anchor hrefs in document order.
#[inline]
pub fn extract_anchor_hrefs(html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(html);
    fragment
        .select(anchor_selector())
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect()
}

/// Words a reader would actually see (markup stripped).
#[inline]
pub fn visible_word_count(html: &str) -> usize {
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .count()
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("html") on the opening fence, then the fence
    // itself on the closing side.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Keep whole top-level elements while they fit the budget. The result must
/// still contain at least one product link; otherwise the fragment is not
/// repairable by truncation.
fn truncate_to_budget(html: &str, word_budget: usize) -> Result<String> {
    let mut kept = String::new();
    let mut words = 0;

    for chunk in top_level_chunks(html) {
        let chunk_words = visible_word_count(&chunk);
        if words + chunk_words > word_budget {
            break;
        }
        words += chunk_words;
        kept.push_str(&chunk);
    }

    if extract_anchor_hrefs(&kept).is_empty() {
        return Err(GuideError::OutputContract(
            "no complete product line fits inside the word budget".to_string(),
        ));
    }

    Ok(kept)
}

fn top_level_chunks(html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(html);
    let mut chunks = Vec::new();

    for child in fragment.root_element().children() {
        if let Some(element) = ElementRef::wrap(child) {
            chunks.push(element.html());
        } else if let Some(text) = child.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
        }
    }

    chunks
}

fn reason_clause(description: &str) -> String {
    let snippet = first_sentence(description);
    if snippet.is_empty() {
        String::new()
    } else {
        format!(" — {}", escape_text(&snippet))
    }
}

/// First sentence of a description, capped so the fallback template can
/// never blow the word budget.
fn first_sentence(description: &str) -> String {
    let trimmed = description.trim();
    let sentence = trimmed.split('.').next().unwrap_or("").trim();
    sentence.split_whitespace().take(15).collect::<Vec<_>>().join(" ")
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
