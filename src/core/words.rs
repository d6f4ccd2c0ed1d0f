//! Word acceptance and fragment generation.
//!
//! The dictionary itself is an external collaborator behind `WordOracle`;
//! an unavailable dictionary must answer `false` (fail closed), never
//! block indefinitely.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;

use super::constants::FRAGMENT_POOL;

/// External dictionary predicate.
pub trait WordOracle: Send + Sync {
    fn is_valid_word(&self, word: &str) -> bool;
}

impl<F> WordOracle for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_valid_word(&self, word: &str) -> bool {
        self(word)
    }
}

/// A word is accepted iff it is a dictionary word and contains the
/// required fragment as a substring, case-insensitively.
pub fn accepts(oracle: &dyn WordOracle, word: &str, fragment: &str) -> bool {
    if word.is_empty() || fragment.is_empty() {
        return false;
    }
    let word_lower = word.to_lowercase();
    word_lower.contains(&fragment.to_lowercase()) && oracle.is_valid_word(&word_lower)
}

/// Draw the next required fragment, uppercased for display.
pub fn random_fragment() -> String {
    let mut rng = rand::thread_rng();
    FRAGMENT_POOL
        .choose(&mut rng)
        .map(|s| s.to_uppercase())
        .unwrap_or_default()
}

/// Hash-set backed oracle over a fixed word list.
pub struct WordListOracle {
    words: HashSet<String>,
}

impl WordListOracle {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words
                .into_iter()
                .map(|w| w.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Small builtin list, enough for demos and tests. Every entry
    /// contains at least one fragment from the pool.
    pub fn builtin() -> Self {
        Self {
            words: BUILTIN_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl WordOracle for WordListOracle {
    fn is_valid_word(&self, word: &str) -> bool {
        self.words.contains(&word.to_lowercase())
    }
}

static BUILTIN_WORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "the", "there", "theory", "then", "they", "thing", "think", "hero", "heat", "herd",
        "winter", "instead", "intent", "invent", "interest", "water", "later", "matter", "letter",
        "banner", "answer", "anchor", "random", "grand", "stand", "sand", "hand", "rest", "best",
        "forest", "station", "nation", "motion", "mention", "question", "relate", "create",
        "estate", "donate", "forward", "formal", "before", "where", "sphere", "herself", "song",
        "strong", "string", "spring", "bring", "being", "doing", "going", "loud", "could",
        "would", "found", "round", "sound", "ground", "mount", "install", "small", "tall",
        "wallet", "entire", "entry", "moment", "agent", "talent",
    ]
});
