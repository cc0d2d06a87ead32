//! Keyword relevance scoring for memory search.
//!
//! Latin text is compared word by word; CJK text has no word boundaries, so
//! each ideograph or kana counts as its own token.

use std::collections::BTreeSet;

/// Minimum length of an alphanumeric word token.
const MIN_WORD_LEN: usize = 2;

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'   // hiragana, katakana
        | '\u{3400}'..='\u{4DBF}' // extension A
        | '\u{4E00}'..='\u{9FFF}' // unified ideographs
        | '\u{AC00}'..='\u{D7AF}' // hangul syllables
        | '\u{F900}'..='\u{FAFF}' // compatibility ideographs
    )
}

/// Split `text` into lowercase search tokens.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    let mut word = String::new();

    let flush = |word: &mut String, tokens: &mut BTreeSet<String>| {
        if word.chars().count() >= MIN_WORD_LEN {
            tokens.insert(std::mem::take(word));
        } else {
            word.clear();
        }
    };

    for c in text.chars() {
        if is_cjk(c) {
            flush(&mut word, &mut tokens);
            tokens.insert(c.to_string());
        } else if c.is_alphanumeric() {
            word.extend(c.to_lowercase());
        } else {
            flush(&mut word, &mut tokens);
        }
    }
    flush(&mut word, &mut tokens);
    tokens
}

/// Collapse whitespace and lowercase, for identity and phrase comparison.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A parsed search query.
#[derive(Debug, Clone)]
pub struct Matcher {
    phrase: String,
    tokens: BTreeSet<String>,
}

impl Matcher {
    pub fn new(query: &str) -> Self {
        Self {
            phrase: normalize(query),
            tokens: tokenize(query),
        }
    }

    /// Whether the query matches everything.
    pub fn is_empty(&self) -> bool {
        self.phrase.is_empty()
    }

    /// Relevance of `content`: the fraction of query tokens it contains, plus
    /// one when the whole query appears verbatim.
    pub fn score(&self, content: &str) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let mut score = 0.0;
        if !self.tokens.is_empty() {
            let haystack = tokenize(content);
            let matched = self.tokens.intersection(&haystack).count();
            score += matched as f64 / self.tokens.len() as f64;
        }
        if normalize(content).contains(&self.phrase) {
            score += 1.0;
        }
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_mixed_text() {
        let tokens = tokenize("Mira met 林 at the Dock, a port.");
        assert!(tokens.contains("mira"));
        assert!(tokens.contains("dock"));
        assert!(tokens.contains("林"));
        // single-letter words are dropped
        assert!(!tokens.contains("a"));
    }

    #[test]
    fn test_tokenize_cjk_per_character() {
        let tokens = tokenize("魔法学院");
        assert_eq!(tokens.len(), 4);
        assert!(tokens.contains("魔"));
        assert!(tokens.contains("院"));
    }

    #[test]
    fn test_score() {
        let matcher = Matcher::new("silver dragon");
        assert_eq!(matcher.score("A silver dragon sleeps"), 2.0);
        assert_eq!(matcher.score("The dragon wakes"), 0.5);
        assert_eq!(matcher.score("Nothing here"), 0.0);

        let cjk = Matcher::new("魔法");
        assert_eq!(cjk.score("这里有魔力"), 0.5);
        assert_eq!(cjk.score("魔法学院"), 2.0);
    }

    #[test]
    fn test_empty_query() {
        let matcher = Matcher::new("   ");
        assert!(matcher.is_empty());
        assert_eq!(matcher.score("anything"), 0.0);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  The   Storm\nBreaks "), "the storm breaks");
    }
}
