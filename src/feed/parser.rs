use feed_rs::model::Entry;
use feed_rs::parser::{self, ParseFeedError};

use super::source::FeedEntry;

/// Parse an RSS or Atom document into entries, in document order.
pub fn parse_entries(bytes: &[u8]) -> Result<Vec<FeedEntry>, ParseFeedError> {
    let feed = parser::parse(bytes)?;
    Ok(feed.entries.into_iter().map(to_entry).collect())
}

fn to_entry(entry: Entry) -> FeedEntry {
    // RSS <link> and Atom rel="alternate" (the default rel) are the page link
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .map(|l| l.href.clone());
    let links = entry.links.into_iter().map(|l| l.href).collect();

    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body));

    FeedEntry {
        link,
        links,
        title: entry.title.map(|t| t.content),
        summary,
        published: entry.published,
        // feed-rs exposes no separate creation date
        created: None,
        updated: entry.updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_rss_entries() {
        let rss = br#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Example</title>
  <item>
    <title>First</title>
    <link>https://example.com/first</link>
    <description>Summary one</description>
    <pubDate>Wed, 21 Oct 2015 07:28:00 GMT</pubDate>
  </item>
  <item>
    <title>No link</title>
  </item>
</channel></rss>"#;

        let entries = parse_entries(rss).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.link.as_deref(), Some("https://example.com/first"));
        assert_eq!(first.links, vec!["https://example.com/first".to_string()]);
        assert_eq!(first.title.as_deref(), Some("First"));
        assert_eq!(first.summary.as_deref(), Some("Summary one"));
        assert_eq!(
            first.published.map(|d| d.to_rfc3339()),
            Some("2015-10-21T07:28:00+00:00".to_string())
        );

        assert_eq!(entries[1].link, None);
        assert!(entries[1].links.is_empty());
    }

    #[test]
    fn test_atom_prefers_alternate_link() {
        let atom = br#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example</title>
  <id>urn:example</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <title>Post</title>
    <id>urn:post</id>
    <updated>2024-01-02T00:00:00Z</updated>
    <link rel="enclosure" href="https://example.com/audio.mp3"/>
    <link rel="alternate" href="https://example.com/post"/>
    <content type="html">Body text</content>
  </entry>
</feed>"#;

        let entries = parse_entries(atom).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.link.as_deref(), Some("https://example.com/post"));
        assert_eq!(entry.links.len(), 2);
        assert_eq!(entry.links[0], "https://example.com/audio.mp3");
        assert_eq!(entry.summary.as_deref(), Some("Body text"));
        assert!(entry.updated.is_some());
    }

    #[test]
    fn test_only_non_alternate_links() {
        let atom = br#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example</title>
  <id>urn:example</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <title>Post</title>
    <id>urn:post</id>
    <updated>2024-01-02T00:00:00Z</updated>
    <link rel="related" href="https://example.com/related"/>
  </entry>
</feed>"#;

        let entries = parse_entries(atom).unwrap();
        assert_eq!(entries[0].link, None);
        assert_eq!(entries[0].links, vec!["https://example.com/related".to_string()]);
    }

    #[test]
    fn test_invalid_xml_is_error() {
        assert!(parse_entries(b"<not valid xml").is_err());
    }
}
