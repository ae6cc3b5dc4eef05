use scraper::{Html, Node};

use super::TextExtractor;

/// Elements whose text never reaches the reader.
const HIDDEN_ELEMENTS: &[&str] = &[
    "style", "script", "head", "title", "meta", "noscript", "template",
];

/// Visible text of an HTML document, text nodes joined by single spaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlTextExtractor;

impl TextExtractor for HtmlTextExtractor {
    fn extract(&self, body: &[u8]) -> String {
        let source = String::from_utf8_lossy(body);
        let document = Html::parse_document(&source);

        let mut pieces = Vec::new();
        for node in document.tree.root().descendants() {
            let Node::Text(text) = node.value() else {
                continue;
            };
            let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
                Node::Element(element) => HIDDEN_ELEMENTS.contains(&element.name()),
                _ => false,
            });
            if hidden {
                continue;
            }
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                pieces.push(trimmed);
            }
        }
        pieces.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_visible_text_only() {
        let html = br#"<!DOCTYPE html>
<html>
  <head><title>Page title</title><style>body { color: red }</style></head>
  <body>
    <h1>Heading</h1>
    <script>var hidden = 1;</script>
    <p>First <b>bold</b> paragraph.</p>
    <noscript>Enable JS</noscript>
  </body>
</html>"#;

        let text = HtmlTextExtractor.extract(html);
        assert_eq!(text, "Heading First bold paragraph.");
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let text = HtmlTextExtractor.extract(b"<p>caf\xff</p>");
        assert!(text.starts_with("caf"));
    }

    #[test]
    fn test_plain_text_body() {
        assert_eq!(HtmlTextExtractor.extract(b"just words"), "just words");
    }

    #[test]
    fn test_empty_body() {
        assert_eq!(HtmlTextExtractor.extract(b""), "");
    }
}
