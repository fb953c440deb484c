pub mod contract;
pub mod prompt;
pub mod slots;


pub use contract::{ValidatedReply, fallback_reply, validate_reply};
pub use slots::{SlotKind, Slots};

use std::sync::Arc;
use tracing::{debug, warn};

use crate::chat::{ChatMessage, CompletionBackend};
use crate::config::{Config, RankingConfig};
use crate::retriever::{CandidateSource, RankedMatch};
use crate::{GuideError, Result};

/// Turns kept per session; older ones stop informing retrieval or prompts.
const MAX_STORED_TURNS: usize = 20;

/// Per-session conversation memory. Owned by its session: exactly one turn
/// mutates it at a time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub turns: Vec<ChatMessage>,
    pub slots: Slots,
}

impl ConversationState {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendCount {
    One,
    Two,
}

impl RecommendCount {
    #[inline]
    pub fn as_usize(self) -> usize {
        match self {
            RecommendCount::One => 1,
            RecommendCount::Two => 2,
        }
    }
}

/// What this turn should do, decided before any model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Ask one short question about the named slot; no recommendation.
    Clarify(SlotKind),
    Recommend(RecommendCount),
}

/// How the reply was produced. The degrade path (model, retried model,
/// deterministic template) is a value, not control flow buried in catches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyPath {
    /// Composed without the language model (clarification or redirect).
    Direct,
    Model,
    ModelRetry,
    Template,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    OffTopic,
    Clarified(SlotKind),
    Recommended(RecommendCount),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply_html: String,
    pub path: ReplyPath,
    pub kind: TurnKind,
}

/// Selection policy: pure so it is testable without retrieval or a model.
///
/// A clearly separated high-confidence top match earns a single-product
/// recommendation; otherwise two products when two exist. With nothing known
/// about the customer and only weak matches, ask about the most valuable
/// missing slot instead.
#[inline]
pub fn decide(slots: &Slots, matches: &[RankedMatch], ranking: &RankingConfig) -> Decision {
    let Some(top) = matches.first() else {
        return Decision::Clarify(slots.first_missing().unwrap_or(SlotKind::Concern));
    };

    if !slots.required_known() && top.score < ranking.min_score {
        return Decision::Clarify(slots.first_missing().unwrap_or(SlotKind::HairType));
    }

    let separated = matches
        .get(1)
        .is_none_or(|second| top.score - second.score >= ranking.score_gap);
    if top.score >= ranking.high_confidence && separated {
        return Decision::Recommend(RecommendCount::One);
    }

    if matches.len() >= 2 {
        Decision::Recommend(RecommendCount::Two)
    } else {
        Decision::Recommend(RecommendCount::One)
    }
}

/// Per-turn conversational driver: updates slots, detects off-topic
/// messages, retrieves candidates, decides, and produces a validated reply.
pub struct Orchestrator {
    candidates: Arc<dyn CandidateSource>,
    chat: Arc<dyn CompletionBackend>,
    ranking: RankingConfig,
    word_budget: usize,
    top_k: usize,
}

impl Orchestrator {
    #[inline]
    pub fn new(
        candidates: Arc<dyn CandidateSource>,
        chat: Arc<dyn CompletionBackend>,
        config: &Config,
    ) -> Self {
        Self {
            candidates,
            chat,
            ranking: config.ranking.clone(),
            word_budget: config.reply.word_budget,
            top_k: config.index.top_k,
        }
    }

    /// Process one user message against the session state and return the
    /// validated reply. The state machine is re-evaluated every turn.
    #[inline]
    pub async fn take_turn(
        &self,
        state: &mut ConversationState,
        message: &str,
    ) -> Result<TurnOutcome> {
        let message = message.trim();
        if message.is_empty() {
            return Err(GuideError::Request("message must not be empty".to_string()));
        }

        state.slots.absorb(message);

        if slots::is_off_topic(message) {
            debug!("Off-topic message, replying with redirect");
            let outcome = TurnOutcome {
                reply_html: redirect_reply(&state.slots),
                path: ReplyPath::Direct,
                kind: TurnKind::OffTopic,
            };
            finish_turn(state, message, &outcome.reply_html);
            return Ok(outcome);
        }

        let query = retrieval_query(state, message);
        let filter = state.slots.filter();
        let matches = self
            .candidates
            .retrieve(&query, self.top_k, filter.as_ref())
            .await?;

        let outcome = match decide(&state.slots, &matches, &self.ranking) {
            Decision::Clarify(kind) => TurnOutcome {
                reply_html: format!("<p>{}</p>", kind.question()),
                path: ReplyPath::Direct,
                kind: TurnKind::Clarified(kind),
            },
            Decision::Recommend(count) => self.recommend(state, message, &matches, count).await?,
        };

        finish_turn(state, message, &outcome.reply_html);
        Ok(outcome)
    }

    /// Model call with the three-step degrade path: one completion, one
    /// stricter retry after a contract violation, then the deterministic
    /// template. The returned reply always satisfies the contract.
    async fn recommend(
        &self,
        state: &ConversationState,
        message: &str,
        matches: &[RankedMatch],
        count: RecommendCount,
    ) -> Result<TurnOutcome> {
        let shortlist = &matches[..count.as_usize().min(matches.len())];
        let count = if shortlist.len() < 2 {
            RecommendCount::One
        } else {
            count
        };
        let decision = Decision::Recommend(count);
        let candidate_urls: Vec<String> = shortlist
            .iter()
            .map(|m| m.metadata.url.clone())
            .collect();

        let messages = prompt::compose(count, shortlist, state, message, self.word_budget);

        let first_failure = match self.model_attempt(&messages, &decision, &candidate_urls).await {
            Ok(validated) => {
                return Ok(TurnOutcome {
                    reply_html: validated.html,
                    path: ReplyPath::Model,
                    kind: TurnKind::Recommended(count),
                });
            }
            Err(err @ GuideError::Config(_)) => return Err(err),
            Err(err) => err,
        };

        // A contract violation gets one stricter retry; a transport failure
        // was already retried inside the client, so it goes straight to the
        // template.
        if matches!(first_failure, GuideError::OutputContract(_)) {
            warn!("Model reply rejected ({}), retrying once", first_failure);
            let mut retry_messages = messages;
            retry_messages.push(prompt::stricter_reminder(&first_failure.to_string()));

            match self.model_attempt(&retry_messages, &decision, &candidate_urls).await {
                Ok(validated) => {
                    return Ok(TurnOutcome {
                        reply_html: validated.html,
                        path: ReplyPath::ModelRetry,
                        kind: TurnKind::Recommended(count),
                    });
                }
                Err(err @ GuideError::Config(_)) => return Err(err),
                Err(err) => warn!("Retry also failed ({}), using template reply", err),
            }
        } else {
            warn!(
                "Completion failed ({}), using template reply",
                first_failure
            );
        }

        Ok(TurnOutcome {
            reply_html: contract::fallback_reply(shortlist, count),
            path: ReplyPath::Template,
            kind: TurnKind::Recommended(count),
        })
    }

    async fn model_attempt(
        &self,
        messages: &[ChatMessage],
        decision: &Decision,
        candidate_urls: &[String],
    ) -> Result<ValidatedReply> {
        let raw = self.chat.complete(messages).await?;
        contract::validate_reply(&raw, decision, candidate_urls, self.word_budget)
    }
}

/// Fixed redirect for off-topic messages, plus one product question.
fn redirect_reply(slots: &Slots) -> String {
    let question = slots
        .first_missing()
        .unwrap_or(SlotKind::HairType)
        .question();
    format!(
        "<p>I'm the Ortahaus product guide, so I'll stick to hair products here. {question}</p>"
    )
}

/// The current message plus the last couple of user turns, so follow-ups
/// like "something lighter" keep their context at retrieval time.
fn retrieval_query(state: &ConversationState, message: &str) -> String {
    let mut parts: Vec<&str> = state
        .turns
        .iter()
        .filter(|turn| turn.role == crate::chat::Role::User)
        .rev()
        .take(2)
        .map(|turn| turn.content.as_str())
        .collect();
    parts.reverse();
    parts.push(message);
    parts.join("\n")
}

fn finish_turn(state: &mut ConversationState, message: &str, reply: &str) {
    state.turns.push(ChatMessage::user(message));
    state.turns.push(ChatMessage::assistant(reply));

    if state.turns.len() > MAX_STORED_TURNS {
        let excess = state.turns.len() - MAX_STORED_TURNS;
        state.turns.drain(..excess);
    }
}
