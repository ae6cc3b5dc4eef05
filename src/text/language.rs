use super::LanguageDetector;

pub(super) const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "because",
    "been", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has",
    "have", "he", "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just",
    "more", "most", "my", "no", "not", "of", "on", "one", "only", "or", "other", "our", "out",
    "she", "so", "some", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "to", "up", "was", "we", "were", "what", "when", "which", "who", "will",
    "with", "would", "you", "your",
];

pub(super) const FRENCH_STOPWORDS: &[&str] = &[
    "au", "aux", "avec", "ce", "ces", "cette", "dans", "de", "des", "du", "elle", "en", "est",
    "et", "eux", "il", "ils", "je", "la", "le", "les", "leur", "lui", "ma", "mais", "me",
    "mes", "moi", "mon", "ne", "nos", "notre", "nous", "on", "ou", "par", "pas", "pour",
    "qu", "que", "qui", "sa", "se", "ses", "son", "sont", "sur", "ta", "te", "tes", "toi",
    "ton", "tu", "un", "une", "vos", "votre", "vous", "y", "été", "être", "était",
];

/// Stop-word lists for the languages the normalizer understands.
pub(super) fn stopwords(language: &str) -> Option<&'static [&'static str]> {
    match language {
        "en" => Some(ENGLISH_STOPWORDS),
        "fr" => Some(FRENCH_STOPWORDS),
        _ => None,
    }
}

/// Split on anything that is neither a letter nor a digit.
pub(super) fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

/// Picks the language whose stop words dominate the text.
///
/// Undecided (`None`) when fewer than `min_hits` stop words match, or when
/// both languages score the same.
#[derive(Debug, Clone, Copy)]
pub struct StopwordLanguageDetector {
    pub min_hits: usize,
}

impl Default for StopwordLanguageDetector {
    fn default() -> Self {
        Self { min_hits: 2 }
    }
}

impl LanguageDetector for StopwordLanguageDetector {
    fn detect(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        let (mut en, mut fr) = (0usize, 0usize);
        for word in words(&lowered) {
            if ENGLISH_STOPWORDS.contains(&word) {
                en += 1;
            }
            if FRENCH_STOPWORDS.contains(&word) {
                fr += 1;
            }
        }

        let (language, hits) = match en.cmp(&fr) {
            std::cmp::Ordering::Greater => ("en", en),
            std::cmp::Ordering::Less => ("fr", fr),
            std::cmp::Ordering::Equal => return None,
        };
        (hits >= self.min_hits).then(|| language.to_string())
    }
}
