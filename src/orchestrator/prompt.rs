use itertools::Itertools;

use super::{ConversationState, RecommendCount};
use crate::chat::ChatMessage;
use crate::retriever::RankedMatch;

/// Older turns carry little signal for a product question and cost tokens.
const MAX_HISTORY_TURNS: usize = 8;

/// Build the completion request for a recommendation turn: system
/// instructions (tone, scope, format, expected product count), the
/// shortlist, the recent conversation, then the current message.
#[inline]
pub fn compose(
    count: RecommendCount,
    shortlist: &[RankedMatch],
    state: &ConversationState,
    message: &str,
    word_budget: usize,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(state.turns.len() + 2);
    messages.push(ChatMessage::system(system_prompt(
        count,
        shortlist,
        word_budget,
    )));

    let skip = state.turns.len().saturating_sub(MAX_HISTORY_TURNS);
    messages.extend(state.turns.iter().skip(skip).cloned());

    messages.push(ChatMessage::user(message));
    messages
}

/// Extra instruction appended after a contract violation, before the single
/// retry.
#[inline]
pub fn stricter_reminder(violation: &str) -> ChatMessage {
    ChatMessage::system(format!(
        "Your previous reply was rejected: {violation}. Answer again and follow the format \
         rules exactly: a bare HTML fragment, the stated number of product links, only URLs \
         from the CANDIDATES list, and nothing else."
    ))
}

fn system_prompt(count: RecommendCount, shortlist: &[RankedMatch], word_budget: usize) -> String {
    let expected = match count {
        RecommendCount::One => "exactly one product",
        RecommendCount::Two => "exactly two products",
    };

    let candidates = shortlist
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            format!(
                "{}. {} | {} | {}",
                i + 1,
                candidate.metadata.name,
                candidate.metadata.url,
                candidate.metadata.description
            )
        })
        .join("\n");

    format!(
        "You are the Ortahaus Product Guide, a friendly expert on this hair product catalog. \
         You only discuss Ortahaus products and hair routines; politely decline anything else.\n\
         Recommend {expected} from the CANDIDATES list below.\n\
         Format rules:\n\
         - Reply with a bare HTML fragment: <p> elements only, no markdown, no <html> or <body> wrappers.\n\
         - Put each recommended product in its own <p> containing one anchor: <a href=\"URL\">Product Name</a>, \
           followed by a short reason and, when useful, a one-line usage tip.\n\
         - Use only URLs that appear in CANDIDATES. Never invent or reuse other links.\n\
         - Stay under {word_budget} words.\n\
         CANDIDATES:\n{candidates}"
    )
}
