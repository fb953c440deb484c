use std::collections::HashSet;

use crate::retriever::SlotFilter;

/// The structured facts the guide tries to learn before recommending,
/// in clarification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    HairType,
    Concern,
    Finish,
}

impl SlotKind {
    /// The single short question asked when this slot is the most valuable
    /// one still missing. Each contains exactly one question mark.
    #[inline]
    pub fn question(self) -> &'static str {
        match self {
            SlotKind::HairType => {
                "What's your hair type — straight, wavy, curly, or coily?"
            }
            SlotKind::Concern => {
                "What would you most like to improve — frizz, volume, shine, or hold?"
            }
            SlotKind::Finish => "Do you prefer a matte, natural, or glossy finish?",
        }
    }
}

/// Facts extracted from the conversation so far. Values are canonical
/// vocabulary terms; a later statement may refine a slot but nothing ever
/// resets one to unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slots {
    pub hair_type: Option<String>,
    pub concern: Option<String>,
    pub finish: Option<String>,
}

/// keyword → canonical hair type
const HAIR_TYPES: &[(&str, &str)] = &[
    ("straight", "straight"),
    ("wavy", "wavy"),
    ("waves", "wavy"),
    ("curly", "curly"),
    ("curls", "curly"),
    ("curl", "curly"),
    ("coily", "coily"),
    ("kinky", "coily"),
    ("fine", "fine"),
    ("thin", "fine"),
    ("thick", "thick"),
];

/// keyword → canonical concern
const CONCERNS: &[(&str, &str)] = &[
    ("frizz", "frizz"),
    ("frizzy", "frizz"),
    ("volume", "volume"),
    ("flat", "volume"),
    ("limp", "volume"),
    ("shine", "shine"),
    ("dull", "shine"),
    ("dry", "dryness"),
    ("dryness", "dryness"),
    ("damaged", "damage"),
    ("damage", "damage"),
    ("breakage", "damage"),
    ("oily", "oil control"),
    ("greasy", "oil control"),
    ("definition", "definition"),
    ("texture", "texture"),
];

/// keyword → canonical finish/hold
const FINISHES: &[(&str, &str)] = &[
    ("matte", "matte"),
    ("natural", "natural"),
    ("glossy", "glossy"),
    ("shiny", "glossy"),
    ("hold", "hold"),
    ("firm", "strong hold"),
    ("strong", "strong hold"),
    ("light", "light hold"),
    ("flexible", "light hold"),
];

/// Product-form and domain words that mark a message as on-topic even when
/// no slot keyword appears.
const PRODUCT_VOCAB: &[&str] = &[
    "hair", "hairstyle", "style", "styling", "product", "products", "pomade", "clay", "paste",
    "spray", "powder", "gel", "wax", "cream", "shampoo", "conditioner", "salt", "scalp", "wash",
    "recommend", "recommendation",
];

impl Slots {
    /// Extract any newly stated facts from a user message. Best-effort
    /// keyword matching against a fixed vocabulary; unmatched text leaves
    /// the slots unchanged.
    #[inline]
    pub fn absorb(&mut self, message: &str) {
        let tokens = tokenize(message);

        if let Some(value) = match_vocab(&tokens, HAIR_TYPES) {
            self.hair_type = Some(value.to_string());
        }
        if let Some(value) = match_vocab(&tokens, CONCERNS) {
            self.concern = Some(value.to_string());
        }
        if let Some(value) = match_vocab(&tokens, FINISHES) {
            self.finish = Some(value.to_string());
        }
    }

    /// Hair type and concern are the required slots; finish/hold is a
    /// refinement.
    #[inline]
    pub fn required_known(&self) -> bool {
        self.hair_type.is_some() && self.concern.is_some()
    }

    #[inline]
    pub fn known_count(&self) -> usize {
        [&self.hair_type, &self.concern, &self.finish]
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    /// Highest-information missing slot, in priority order.
    #[inline]
    pub fn first_missing(&self) -> Option<SlotKind> {
        if self.hair_type.is_none() {
            Some(SlotKind::HairType)
        } else if self.concern.is_none() {
            Some(SlotKind::Concern)
        } else if self.finish.is_none() {
            Some(SlotKind::Finish)
        } else {
            None
        }
    }

    /// Metadata filter for retrieval. Hair type is the one slot products
    /// are reliably tagged with.
    #[inline]
    pub fn filter(&self) -> Option<SlotFilter> {
        self.hair_type.as_ref().map(|tag| SlotFilter { tag: tag.clone() })
    }
}

/// A message is off-topic when it references neither the catalog vocabulary
/// nor any slot keyword.
#[inline]
pub fn is_off_topic(message: &str) -> bool {
    let tokens = tokenize(message);

    if PRODUCT_VOCAB.iter().any(|word| tokens.contains(*word)) {
        return false;
    }

    match_vocab(&tokens, HAIR_TYPES).is_none()
        && match_vocab(&tokens, CONCERNS).is_none()
        && match_vocab(&tokens, FINISHES).is_none()
}

fn tokenize(message: &str) -> HashSet<String> {
    message
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn match_vocab(tokens: &HashSet<String>, vocab: &[(&str, &'static str)]) -> Option<&'static str> {
    vocab
        .iter()
        .find(|(keyword, _)| tokens.contains(*keyword))
        .map(|(_, canonical)| *canonical)
}
