//! Built-in detection lexicon.
//!
//! Two tiers per category: plain keywords matched by substring, and
//! regular expressions for phrasings a literal cannot pin down. Patterns
//! are compiled once when the classifier is built so a bad expression
//! surfaces at startup instead of on the first message.

use std::collections::HashMap;

use regex::Regex;

use crate::monitor::config::Category;

/// Phrases suggesting the text refers to an attached image. Used to decide
/// whether a text-only pass on an image-bearing message deserves a score
/// boost when the vision service is down.
const IMAGE_HINTS: &[&str] = &[
    "photo",
    "picture",
    "image",
    "attached",
    "attachment",
    "screenshot",
];

const fn keyword_table(category: Category) -> &'static [&'static str] {
    match category {
        Category::Harassment => &[
            "stupid",
            "idiot",
            "loser",
            "pathetic",
            "worthless",
            "shut up",
            "nobody likes you",
            "waste of space",
        ],
        Category::Discrimination => &[
            "go back to your country",
            "your kind",
            "people like you don't belong",
            "because you're a woman",
            "too old for this job",
            "not a culture fit for someone like you",
        ],
        Category::Inappropriate => &[
            "nude",
            "explicit photo",
            "send pics",
            "nsfw",
            "sexting",
            "what are you wearing",
        ],
        Category::Threats => &[
            "kill you",
            "hurt you",
            "make you pay",
            "you will regret",
            "watch your back",
            "i know where you live",
        ],
    }
}

const fn pattern_table(category: Category) -> &'static [&'static str] {
    match category {
        Category::Harassment => &[
            r"\byou(?:'re| are)\s+(?:so\s+)?(?:stupid|worthless|pathetic|useless)\b",
            r"\bnobody\s+(?:likes|wants)\s+you\b",
        ],
        Category::Discrimination => &[
            r"\bgo\s+back\s+to\s+(?:your|where)\b",
            r"\bbecause\s+of\s+your\s+(?:race|religion|gender|age|accent)\b",
        ],
        Category::Inappropriate => &[
            r"\bsend\s+(?:me\s+)?(?:nudes|pics|photos)\b",
            r"\b(?:explicit|obscene)\s+(?:photo|picture|image|content)s?\b",
        ],
        Category::Threats => &[
            r"\bi\s+will\s+(?:kill|hurt|destroy|end)\s+you\b",
            r"\bi(?:'m| am)\s+going\s+to\s+(?:kill|hurt|find)\s+you\b",
        ],
    }
}

/// Keyword and pattern tiers for one category.
pub(crate) struct CategoryLexicon {
    pub(crate) keywords: &'static [&'static str],
    pub(crate) patterns: Vec<Regex>,
}

/// The full compiled lexicon, keyed by category.
pub(crate) struct Lexicon {
    entries: HashMap<Category, CategoryLexicon>,
}

impl Lexicon {
    /// Compiles every built-in pattern.
    pub(crate) fn compile() -> Result<Self, regex::Error> {
        let mut entries = HashMap::new();
        for category in Category::ALL {
            let sources = pattern_table(category);
            let mut patterns = Vec::with_capacity(sources.len());
            for source in sources {
                patterns.push(Regex::new(source)?);
            }
            entries.insert(
                category,
                CategoryLexicon {
                    keywords: keyword_table(category),
                    patterns,
                },
            );
        }
        Ok(Self { entries })
    }

    pub(crate) fn category(&self, category: Category) -> Option<&CategoryLexicon> {
        self.entries.get(&category)
    }
}

/// True when lowercased text mentions an attachment or image.
pub(crate) fn has_image_hint(corpus: &str) -> bool {
    IMAGE_HINTS.iter().any(|hint| corpus.contains(hint))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_every_pattern_compiles() {
        let lexicon = Lexicon::compile().unwrap();
        for category in Category::ALL {
            assert!(lexicon.category(category).is_some());
        }
    }

    #[test]
    fn test_benign_text_matches_nothing() {
        let lexicon = Lexicon::compile().unwrap();
        let corpus = "team update\nlet's circle back monday";

        for category in Category::ALL {
            let entry = lexicon.category(category).unwrap();
            for keyword in entry.keywords {
                assert!(!corpus.contains(keyword), "keyword {keyword:?} matched");
            }
            for pattern in &entry.patterns {
                assert!(!pattern.is_match(corpus), "pattern {pattern} matched");
            }
        }
    }

    #[test]
    fn test_direct_threat_hits_both_tiers() {
        let lexicon = Lexicon::compile().unwrap();
        let corpus = "i will kill you if you come to the office tomorrow";
        let entry = lexicon.category(Category::Threats).unwrap();

        assert!(entry.keywords.iter().any(|k| corpus.contains(k)));
        assert!(entry.patterns.iter().any(|p| p.is_match(corpus)));
    }

    #[test]
    fn test_keywords_are_lowercase() {
        for category in Category::ALL {
            for keyword in keyword_table(category) {
                assert_eq!(*keyword, keyword.to_lowercase());
            }
        }
    }

    #[test]
    fn test_image_hints() {
        assert!(has_image_hint("see the attached photo"));
        assert!(has_image_hint("screenshot below"));
        assert!(!has_image_hint("quarterly numbers look fine"));
    }
}
