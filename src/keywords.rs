//! Keyword extraction for metadata-filtered retrieval.
//!
//! Passages are tagged at ingestion time with `tag_<keyword> = true` metadata
//! entries; at query time the chain extracts keywords from the question and
//! its paraphrases and restricts the vector search to passages carrying at
//! least one of them (see [`crate::filter`]).
//!
//! Extraction goes through a [`Tagger`], the part-of-speech model. When no
//! tagger is configured the extractor either falls back to a crude
//! whitespace split (`use_fallback = true`) or extracts nothing.
//!
//! The built-in [`RuleTagger`] is a lightweight English tagger: UAX #29 word
//! segmentation, a stop-word list, suffix-based lemmatization, and
//! lexicon/suffix part-of-speech heuristics. It is tuned for short questions
//! rather than general prose.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use unicode_segmentation::UnicodeSegmentation;

use crate::config::KeywordsConfig;

/// A deduplicated set of lowercase lemmas.
pub type KeywordSet = BTreeSet<String>;

/// Coarse universal part-of-speech tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pos {
    Noun,
    Propn,
    Verb,
    Adj,
    Adv,
    Num,
    Punct,
    /// Function words: determiners, pronouns, auxiliaries, particles.
    Other,
}

/// One analyzed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub lemma: String,
    pub pos: Pos,
    pub is_stop: bool,
    pub is_punct: bool,
}

/// A part-of-speech model.
pub trait Tagger: Send + Sync {
    fn name(&self) -> &str;
    fn tag(&self, text: &str) -> Vec<Token>;
}

/// Extracts [`KeywordSet`]s from free text.
#[derive(Clone)]
pub struct KeywordExtractor {
    tagger: Option<Arc<dyn Tagger>>,
}

impl KeywordExtractor {
    pub fn new(tagger: Option<Arc<dyn Tagger>>) -> Self {
        Self { tagger }
    }

    /// Extractor backed by the built-in [`RuleTagger`].
    pub fn with_rules() -> Self {
        Self::new(Some(Arc::new(RuleTagger)))
    }

    /// Extractor with no linguistic model; only the fallback can produce keywords.
    pub fn without_model() -> Self {
        Self::new(None)
    }

    pub fn from_config(config: &KeywordsConfig) -> Self {
        match config.tagger.as_str() {
            "none" => Self::without_model(),
            _ => Self::with_rules(),
        }
    }

    pub fn has_model(&self) -> bool {
        self.tagger.is_some()
    }

    /// Extract keywords from `text`.
    ///
    /// With a model: nouns and proper nouns (plus verbs when `include_verb`),
    /// excluding stop words, punctuation, and lemmas of two characters or
    /// fewer. Without a model: whitespace tokens longer than three
    /// characters when `use_fallback`, otherwise nothing.
    pub fn extract(&self, text: &str, use_fallback: bool, include_verb: bool) -> KeywordSet {
        if text.trim().is_empty() {
            return KeywordSet::new();
        }

        let tagger = match &self.tagger {
            Some(t) => t,
            None if use_fallback => return fallback_keywords(text),
            None => return KeywordSet::new(),
        };

        tagger
            .tag(text)
            .into_iter()
            .filter(|t| !t.is_stop && !t.is_punct)
            .filter(|t| match t.pos {
                Pos::Noun | Pos::Propn => true,
                Pos::Verb => include_verb,
                _ => false,
            })
            .filter(|t| t.lemma.chars().count() > 2)
            .map(|t| t.lemma.to_lowercase())
            .collect()
    }
}

impl std::fmt::Debug for KeywordExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordExtractor")
            .field("tagger", &self.tagger.as_ref().map(|t| t.name().to_string()))
            .finish()
    }
}

fn fallback_keywords(text: &str) -> KeywordSet {
    text.split_whitespace()
        .filter(|w| w.chars().count() > 3)
        .map(|w| w.to_lowercase())
        .collect()
}

// ============ Rule-based tagger ============

/// Heuristic English tagger with no model files.
pub struct RuleTagger;

impl Tagger for RuleTagger {
    fn name(&self) -> &str {
        "rules"
    }

    fn tag(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut sentence_start = true;

        for word in text.split_word_bounds() {
            if word.trim().is_empty() {
                continue;
            }

            let lower = word.to_lowercase();
            let is_punct = !word.chars().any(|c| c.is_alphanumeric());
            let is_stop = !is_punct && stop_words().contains(lower.as_str());

            let pos = if is_punct {
                Pos::Punct
            } else if word.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
                Pos::Num
            } else if is_stop {
                Pos::Other
            } else {
                guess_pos(word, &lower, sentence_start)
            };

            let lemma = match pos {
                Pos::Verb => verb_lemma(&lower),
                Pos::Noun => noun_lemma(&lower),
                Pos::Propn => word.to_string(),
                _ => lower.clone(),
            };

            tokens.push(Token {
                text: word.to_string(),
                lemma,
                pos,
                is_stop,
                is_punct,
            });

            sentence_start = is_punct && matches!(word, "." | "?" | "!");
        }

        tokens
    }
}

fn guess_pos(word: &str, lower: &str, sentence_start: bool) -> Pos {
    let first_upper = word.chars().next().is_some_and(|c| c.is_uppercase());
    let all_upper = word.chars().filter(|c| c.is_alphabetic()).count() > 1
        && word.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_uppercase());

    if all_upper || (first_upper && !sentence_start) {
        return Pos::Propn;
    }
    if noun_ing().contains(lower) {
        return Pos::Noun;
    }
    if verb_lexicon().contains(verb_lemma(lower).as_str()) {
        return Pos::Verb;
    }
    let len = lower.chars().count();
    if (lower.ends_with("ing") && len > 5) || (lower.ends_with("ed") && !lower.ends_with("eed") && len > 4)
    {
        return Pos::Verb;
    }
    if lower.ends_with("ly") && len > 4 {
        return Pos::Adv;
    }
    if adjective_lexicon().contains(lower)
        || ["ous", "ful", "ive", "able", "ible", "less"]
            .iter()
            .any(|s| lower.ends_with(s) && len > s.len() + 2)
    {
        return Pos::Adj;
    }
    Pos::Noun
}

/// Reduce a plural noun to its singular form.
fn noun_lemma(word: &str) -> String {
    if let Some(lemma) = irregular_nouns().get(word) {
        return lemma.to_string();
    }
    let len = word.chars().count();
    if len <= 3 || word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix("ies") {
        if len > 4 {
            return format!("{}y", stem);
        }
    }
    for suffix in ["sses", "xes", "ches", "shes", "zes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    match word.strip_suffix('s') {
        Some(stem) => stem.to_string(),
        None => word.to_string(),
    }
}

/// Reduce an inflected verb to its base form.
fn verb_lemma(word: &str) -> String {
    if let Some(lemma) = irregular_verbs().get(word) {
        return lemma.to_string();
    }
    if verb_lexicon().contains(word) {
        return word.to_string();
    }
    let len = word.chars().count();

    if let Some(stem) = word.strip_suffix("ied") {
        if len > 4 {
            return format!("{}y", stem);
        }
    }
    if let Some(stem) = word.strip_suffix("ing") {
        if len > 5 {
            return restore_stem(stem);
        }
    }
    if let Some(stem) = word.strip_suffix("ed") {
        if len > 3 && !word.ends_with("eed") {
            return restore_stem(stem);
        }
    }
    if let Some(stem) = word.strip_suffix("ies") {
        if len > 4 {
            return format!("{}y", stem);
        }
    }
    for suffix in ["sses", "xes", "ches", "shes", "zes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if len > 3 && !word.ends_with("ss") && !word.ends_with("us") {
        if let Some(stem) = word.strip_suffix('s') {
            return stem.to_string();
        }
    }
    word.to_string()
}

/// Undo consonant doubling or restore a dropped final `e` after stripping
/// `-ed`/`-ing`.
fn restore_stem(stem: &str) -> String {
    if verb_lexicon().contains(stem) {
        return stem.to_string();
    }
    let chars: Vec<char> = stem.chars().collect();
    let n = chars.len();
    if n >= 3 && chars[n - 1] == chars[n - 2] && !matches!(chars[n - 1], 'l' | 's' | 'f' | 'z') {
        return chars[..n - 1].iter().collect();
    }
    let with_e = format!("{}e", stem);
    if verb_lexicon().contains(with_e.as_str()) {
        return with_e;
    }
    const E_ENDINGS: [&str; 20] = [
        "at", "iz", "is", "bl", "ur", "ir", "uc", "ak", "ag", "ov", "iv", "ud", "ac", "ut", "os",
        "us", "rg", "dg", "nc", "rc",
    ];
    if E_ENDINGS.iter().any(|e| stem.ends_with(e)) || n <= 2 {
        return with_e;
    }
    stem.to_string()
}

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "a", "about", "above", "after", "again", "against", "all", "almost", "also",
            "although", "always", "am", "among", "an", "and", "another", "any", "anyone",
            "anything", "are", "around", "as", "at", "be", "became", "because", "become",
            "been", "before", "being", "below", "between", "both", "but", "by", "ca", "can",
            "cannot", "could", "did", "do", "does", "doing", "done", "down", "during", "each",
            "either", "else", "enough", "even", "ever", "every", "everyone", "everything",
            "few", "for", "from", "further", "get", "give", "go", "had", "has", "have",
            "having", "he", "her", "here", "hers", "herself", "him", "himself", "his", "how",
            "however", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "least",
            "less", "made", "make", "many", "may", "me", "might", "mine", "more", "most",
            "much", "must", "my", "myself", "neither", "never", "no", "nobody", "none", "nor",
            "not", "nothing", "now", "of", "off", "often", "on", "once", "one", "only", "or",
            "other", "others", "otherwise", "our", "ours", "ourselves", "out", "over", "own",
            "part", "per", "perhaps", "please", "put", "quite", "rather", "really", "regarding",
            "same", "say", "see", "seem", "seems", "several", "she", "should", "show", "since",
            "so", "some", "someone", "something", "sometimes", "still", "such", "take", "than",
            "that", "the", "their", "theirs", "them", "themselves", "then", "there", "therefore",
            "these", "they", "this", "those", "though", "through", "thus", "to", "together",
            "too", "toward", "towards", "under", "until", "up", "upon", "us", "used", "using",
            "various", "very", "via", "was", "we", "well", "were", "what", "whatever", "when",
            "whenever", "where", "whether", "which", "while", "who", "whoever", "whole", "whom",
            "whose", "why", "will", "with", "within", "without", "would", "yet", "you", "your",
            "yours", "yourself", "yourselves", "'s", "n't", "'re", "'ve", "'ll", "'d", "'m",
        ]
        .into_iter()
        .collect()
    })
}

fn verb_lexicon() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "accept", "allow", "appeal", "apply", "attend", "ban", "borrow", "bring", "buy",
            "cancel", "change", "cheat", "choose", "complain", "complete", "contact", "drop",
            "eat", "enroll", "enrol", "excuse", "expel", "fail", "file", "find", "graduate",
            "happen", "help", "join", "keep", "know", "leave", "lose", "miss", "need", "obtain",
            "pass", "pay", "permit", "prohibit", "receive", "refund", "register", "renew",
            "report", "request", "require", "return", "run", "shift", "smoke", "submit",
            "suspend", "transfer", "use", "vote", "wait", "want", "wear", "withdraw", "work",
            "write",
        ]
        .into_iter()
        .collect()
    })
}

fn adjective_lexicon() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "academic", "annual", "early", "final", "first", "free", "full", "good", "high",
            "large", "last", "late", "low", "major", "minor", "new", "next", "official", "old",
            "open", "other", "past", "previous", "proper", "public", "same", "second", "small",
            "specific", "total",
        ]
        .into_iter()
        .collect()
    })
}

fn noun_ing() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "building", "ceiling", "clothing", "evening", "hearing", "housing", "learning",
            "meeting", "morning", "parking", "spring", "string", "teaching", "training",
            "wedding", "offering", "uniforming", "counseling", "counselling",
        ]
        .into_iter()
        .collect()
    })
}

fn irregular_nouns() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| {
        [
            ("children", "child"),
            ("men", "man"),
            ("women", "woman"),
            ("people", "person"),
            ("feet", "foot"),
            ("teeth", "tooth"),
            ("criteria", "criterion"),
            ("faculties", "faculty"),
            ("indices", "index"),
            ("theses", "thesis"),
        ]
        .into_iter()
        .collect()
    })
}

fn irregular_verbs() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| {
        [
            ("went", "go"),
            ("got", "get"),
            ("took", "take"),
            ("taken", "take"),
            ("paid", "pay"),
            ("wore", "wear"),
            ("worn", "wear"),
            ("brought", "bring"),
            ("bought", "buy"),
            ("left", "leave"),
            ("came", "come"),
            ("gave", "give"),
            ("given", "give"),
            ("kept", "keep"),
            ("lost", "lose"),
            ("found", "find"),
            ("chose", "choose"),
            ("chosen", "choose"),
            ("wrote", "write"),
            ("written", "write"),
            ("ran", "run"),
            ("knew", "know"),
            ("known", "know"),
            ("withdrew", "withdraw"),
            ("withdrawn", "withdraw"),
        ]
        .into_iter()
        .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> KeywordSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fallback_drops_tokens_of_three_chars_or_fewer() {
        let extractor = KeywordExtractor::without_model();
        let keywords = extractor.extract("the cat sat on the mat", true, false);
        assert!(keywords.is_empty());
    }

    #[test]
    fn test_fallback_keeps_longer_tokens_lowercased() {
        let extractor = KeywordExtractor::without_model();
        let keywords = extractor.extract("Students MUST attend the Orientation", true, false);
        assert_eq!(keywords, set(&["students", "must", "attend", "orientation"]));
    }

    #[test]
    fn test_fallback_boundary_is_strictly_greater_than_three() {
        let extractor = KeywordExtractor::without_model();
        let keywords = extractor.extract("abc abcd", true, false);
        assert_eq!(keywords, set(&["abcd"]));
    }

    #[test]
    fn test_no_model_without_fallback_is_empty() {
        let extractor = KeywordExtractor::without_model();
        assert!(extractor.extract("tardy policy rules", false, true).is_empty());
    }

    #[test]
    fn test_empty_text_is_empty() {
        assert!(KeywordExtractor::with_rules().extract("  ", true, true).is_empty());
        assert!(KeywordExtractor::without_model().extract("", true, true).is_empty());
    }

    #[test]
    fn test_rules_extract_nouns_from_question() {
        let extractor = KeywordExtractor::with_rules();
        let keywords = extractor.extract("What is the tardy policy?", true, true);
        assert_eq!(keywords, set(&["policy", "tardy"]));
    }

    #[test]
    fn test_rules_lemmatize_plurals() {
        let extractor = KeywordExtractor::with_rules();
        let keywords = extractor.extract("school lateness rules", true, false);
        assert_eq!(keywords, set(&["lateness", "rule", "school"]));
    }

    #[test]
    fn test_rules_include_verbs_only_when_asked() {
        let extractor = KeywordExtractor::with_rules();
        let with_verbs = extractor.extract("Can students wear sandals?", true, true);
        assert_eq!(with_verbs, set(&["sandal", "student", "wear"]));

        let without_verbs = extractor.extract("Can students wear sandals?", true, false);
        assert_eq!(without_verbs, set(&["sandal", "student"]));
    }

    #[test]
    fn test_rules_lemmatize_verbs() {
        assert_eq!(verb_lemma("attended"), "attend");
        assert_eq!(verb_lemma("dropped"), "drop");
        assert_eq!(verb_lemma("requires"), "require");
        assert_eq!(verb_lemma("required"), "require");
        assert_eq!(verb_lemma("applied"), "apply");
        assert_eq!(verb_lemma("paid"), "pay");
        assert_eq!(verb_lemma("enrolled"), "enroll");
    }

    #[test]
    fn test_rules_lemmatize_nouns() {
        assert_eq!(noun_lemma("policies"), "policy");
        assert_eq!(noun_lemma("absences"), "absence");
        assert_eq!(noun_lemma("classes"), "class");
        assert_eq!(noun_lemma("status"), "status");
        assert_eq!(noun_lemma("children"), "child");
    }

    #[test]
    fn test_rules_tag_proper_nouns_and_acronyms() {
        let tokens = RuleTagger.tag("Where is the UIC library in Davao?");
        let uic = tokens.iter().find(|t| t.text == "UIC").unwrap();
        assert_eq!(uic.pos, Pos::Propn);
        let davao = tokens.iter().find(|t| t.text == "Davao").unwrap();
        assert_eq!(davao.pos, Pos::Propn);

        let keywords = KeywordExtractor::with_rules().extract("Where is the UIC library in Davao?", true, false);
        assert_eq!(keywords, set(&["davao", "library", "uic"]));
    }

    #[test]
    fn test_rules_skip_short_lemmas_and_punctuation() {
        let tokens = RuleTagger.tag("ID, ok?");
        assert!(tokens.iter().any(|t| t.is_punct));
        let keywords = KeywordExtractor::with_rules().extract("ID, ok?", true, true);
        assert!(keywords.is_empty());
    }

    #[test]
    fn test_from_config_respects_tagger() {
        let mut config = KeywordsConfig::default();
        assert!(KeywordExtractor::from_config(&config).has_model());
        config.tagger = "none".to_string();
        assert!(!KeywordExtractor::from_config(&config).has_model());
    }
}
