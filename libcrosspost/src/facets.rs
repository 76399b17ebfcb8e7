//! Link facet extraction
//!
//! Bluesky does not parse links out of post text; every link must be sent as
//! a facet spanning the URL's UTF-8 byte range.

use std::sync::OnceLock;

use regex::Regex;
use serde::ser::{Serialize, Serializer};

const LINK_FEATURE_TYPE: &str = "app.bsky.richtext.facet#link";

/// A link annotation over a byte range of the post text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facet {
    pub byte_start: usize,
    pub byte_end: usize,
    pub uri: String,
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"https?://\S+").expect("URL pattern is valid"))
}

/// Find every URL in `text`, in order of appearance
///
/// Each occurrence gets its own facet, so a link repeated twice yields two
/// facets over two different ranges.
pub fn extract(text: &str) -> Vec<Facet> {
    url_pattern()
        .find_iter(text)
        .map(|m| Facet {
            byte_start: m.start(),
            byte_end: m.end(),
            uri: m.as_str().to_string(),
        })
        .collect()
}

#[derive(serde::Serialize)]
struct WireFacet<'a> {
    index: WireIndex,
    features: [WireFeature<'a>; 1],
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct WireIndex {
    byte_start: usize,
    byte_end: usize,
}

#[derive(serde::Serialize)]
struct WireFeature<'a> {
    #[serde(rename = "$type")]
    kind: &'static str,
    uri: &'a str,
}

impl Serialize for Facet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireFacet {
            index: WireIndex {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
            },
            features: [WireFeature {
                kind: LINK_FEATURE_TYPE,
                uri: &self.uri,
            }],
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_urls() {
        assert!(extract("just some words, no links here").is_empty());
        assert!(extract("").is_empty());
    }

    #[test]
    fn test_single_url_ascii() {
        let facets = extract("Read https://example.com/post now");

        assert_eq!(
            facets,
            vec![Facet {
                byte_start: 5,
                byte_end: 29,
                uri: "https://example.com/post".to_string(),
            }]
        );
    }

    #[test]
    fn test_multiple_urls_in_order() {
        let text = "a http://one.example b https://two.example/x c";
        let facets = extract(text);

        assert_eq!(facets.len(), 2);
        assert_eq!(facets[0].uri, "http://one.example");
        assert_eq!(facets[1].uri, "https://two.example/x");
        assert!(facets[0].byte_end <= facets[1].byte_start);

        for facet in &facets {
            assert_eq!(&text[facet.byte_start..facet.byte_end], facet.uri);
            assert_eq!(facet.byte_end - facet.byte_start, facet.uri.len());
        }
    }

    #[test]
    fn test_offsets_are_bytes_not_chars() {
        // 8 chars before the URL, 12 bytes
        let text = "héllo 🌍 https://example.org";
        let facets = extract(text);

        assert_eq!(facets.len(), 1);
        assert_eq!(facets[0].byte_start, 12);
        assert_eq!(facets[0].byte_end, text.len());
        assert_eq!(&text.as_bytes()[12..], b"https://example.org");
    }

    #[test]
    fn test_repeated_url_gets_one_facet_per_occurrence() {
        let facets = extract("see https://a.example and again https://a.example");

        assert_eq!(facets.len(), 2);
        assert_eq!((facets[0].byte_start, facets[0].byte_end), (4, 21));
        assert_eq!((facets[1].byte_start, facets[1].byte_end), (32, 49));
        assert_eq!(facets[0].uri, facets[1].uri);
    }

    #[test]
    fn test_url_stops_at_whitespace() {
        let facets = extract("https://a.example/path?q=1\nnext line");
        assert_eq!(facets[0].uri, "https://a.example/path?q=1");
    }

    #[test]
    fn test_scheme_required() {
        assert!(extract("example.com and ftp://files.example").is_empty());
    }

    #[test]
    fn test_serializes_to_richtext_facet() {
        let facet = Facet {
            byte_start: 4,
            byte_end: 21,
            uri: "https://a.example".to_string(),
        };

        let json = serde_json::to_value(&facet).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "index": { "byteStart": 4, "byteEnd": 21 },
                "features": [{
                    "$type": "app.bsky.richtext.facet#link",
                    "uri": "https://a.example"
                }]
            })
        );
    }
}
