use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::subscription::{FeedListError, Subscription};
use crate::util::validate_url_with;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack exhaustion from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Attributes of one `<outline>` element.
struct Outline {
    xml_url: Option<String>,
    title: Option<String>,
}

/// Extract subscriptions from OPML content.
///
/// Every outline with an `xmlUrl` is a feed. Folder outlines (no `xmlUrl`)
/// contribute their title as a label to every feed nested inside them,
/// outermost folder first. Feeds with invalid URLs are skipped with a warning.
pub fn parse_opml(
    content: &str,
    allow_private_hosts: bool,
) -> Result<Vec<Subscription>, FeedListError> {
    // SEC-002: XXE protection. quick-xml (0.37) never parses <!ENTITY> declarations;
    // custom entities produce `EscapeError::UnrecognizedEntity` through
    // `decode_and_unescape_value()` (not `_with()`).
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut subscriptions = Vec::new();
    // One slot per open outline: the folder label, or None for feed outlines
    let mut folders: Vec<Option<String>> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                // SEC-003: Reject excessively nested OPMLs
                if folders.len() >= MAX_OPML_DEPTH {
                    return Err(FeedListError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                let outline = read_outline(&e, &reader)?;
                let label = match outline.xml_url {
                    Some(_) => None,
                    None => outline.title.clone(),
                };
                push_feed(&mut subscriptions, outline, &folders, allow_private_hosts);
                folders.push(label);
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let outline = read_outline(&e, &reader)?;
                push_feed(&mut subscriptions, outline, &folders, allow_private_hosts);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                folders.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(FeedListError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(subscriptions)
}

fn push_feed(
    subscriptions: &mut Vec<Subscription>,
    outline: Outline,
    folders: &[Option<String>],
    allow_private_hosts: bool,
) {
    let Some(url) = outline.xml_url else {
        return;
    };
    if let Err(e) = validate_url_with(&url, allow_private_hosts) {
        tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
        return;
    }
    let labels = folders.iter().flatten().cloned().collect();
    subscriptions.push(Subscription { url, labels });
}

fn read_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Outline, FeedListError> {
    let mut outline = Outline {
        xml_url: None,
        title: None,
    };
    let decoder = reader.decoder();

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = || {
            attr.decode_and_unescape_value(decoder)
                .map(|v| v.trim().to_string())
                .map_err(|e| FeedListError::XmlParse(e.to_string()))
        };
        match attr.key.as_ref() {
            b"xmlUrl" => outline.xml_url = Some(value()?),
            b"title" => outline.title = Some(value()?),
            b"text" if outline.title.is_none() => outline.title = Some(value()?),
            _ => {}
        }
    }

    outline.title = outline.title.filter(|t| !t.is_empty());
    Ok(outline)
}
