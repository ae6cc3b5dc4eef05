//! Text collaborators used when building item records.
//!
//! The engine only depends on the three traits below. The default
//! implementations are deliberately small: visible-text extraction with
//! `scraper`, and stop-word based language detection and normalization for
//! English and French.

mod extract;
mod language;
mod normalize;

use std::sync::Arc;

pub use extract::HtmlTextExtractor;
pub use language::StopwordLanguageDetector;
pub use normalize::StopwordNormalizer;

/// Raw page bytes to visible text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, body: &[u8]) -> String;
}

/// Best-effort language detection. `None` when undecided.
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> Option<String>;
}

/// Simplify text for downstream indexing. With no language the text is
/// returned unchanged.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, text: &str, language: Option<&str>) -> String;
}

/// The three collaborators bundled for sharing across engines.
#[derive(Clone)]
pub struct TextPipeline {
    pub extractor: Arc<dyn TextExtractor>,
    pub detector: Arc<dyn LanguageDetector>,
    pub normalizer: Arc<dyn Normalizer>,
}

impl Default for TextPipeline {
    fn default() -> Self {
        Self {
            extractor: Arc::new(HtmlTextExtractor),
            detector: Arc::new(StopwordLanguageDetector::default()),
            normalizer: Arc::new(StopwordNormalizer),
        }
    }
}

impl std::fmt::Debug for TextPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextPipeline").finish_non_exhaustive()
    }
}

impl TextPipeline {
    /// Language of the first candidate the detector recognises.
    pub fn detect_first<'a>(
        &self,
        candidates: impl IntoIterator<Item = Option<&'a str>>,
    ) -> Option<String> {
        candidates
            .into_iter()
            .flatten()
            .filter(|text| !text.trim().is_empty())
            .find_map(|text| self.detector.detect(text))
    }

    /// Normalize the non-empty parts joined by single spaces.
    pub fn normalize_parts<'a>(
        &self,
        parts: impl IntoIterator<Item = Option<&'a str>>,
        language: Option<&str>,
    ) -> String {
        let joined = parts
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        self.normalizer.normalize(&joined, language)
    }
}
