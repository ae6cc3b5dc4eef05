use super::language::{stopwords, words};
use super::Normalizer;

/// Lowercases, splits on non-alphanumerics and drops stop words.
///
/// Languages without a stop-word list pass the text through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopwordNormalizer;

impl Normalizer for StopwordNormalizer {
    fn normalize(&self, text: &str, language: Option<&str>) -> String {
        let Some(stop) = language.and_then(stopwords) else {
            return text.to_string();
        };
        let lowered = text.to_lowercase();
        words(&lowered)
            .filter(|word| !stop.contains(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english_stopwords_removed() {
        let text = StopwordNormalizer.normalize("The Cat, and the Dog!", Some("en"));
        assert_eq!(text, "cat dog");
    }

    #[test]
    fn test_french_stopwords_removed() {
        let text = StopwordNormalizer.normalize("Le chat est sur la table", Some("fr"));
        assert_eq!(text, "chat table");
    }

    #[test]
    fn test_numbers_kept() {
        let text = StopwordNormalizer.normalize("Version 2 of the API", Some("en"));
        assert_eq!(text, "version 2 api");
    }

    #[test]
    fn test_unknown_or_absent_language_is_pass_through() {
        let input = "Der Hund, und die Katze";
        assert_eq!(StopwordNormalizer.normalize(input, Some("de")), input);
        assert_eq!(StopwordNormalizer.normalize(input, None), input);
    }
}
