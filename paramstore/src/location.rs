//! Conversion between parameter sets and their shareable location descriptor
//! (query string) form.
//!
//! The wire format is a flat query string of `key=value` pairs, encoded and
//! decoded with `serde_qs`. Structured values (arrays/objects, such as tag
//! filters) are JSON-encoded before being escaped as a single value.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::{debug, warn};
use serde_json::Value as JsonValue;

use crate::{Error, ParameterSet};

/// The externally visible, bookmarkable serialization of a [`ParameterSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LocationDescriptor(String);

impl LocationDescriptor {
    /// Serializes the given parameter set. Keys with empty values are
    /// omitted.
    pub fn from_params(params: &ParameterSet) -> Self {
        let entries = params
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .collect::<BTreeMap<&String, &String>>();
        match serde_qs::to_string(&entries) {
            Ok(qs) => Self(qs),
            Err(e) => {
                warn!("Failed to serialize parameters to a location: {}", e);
                Self::default()
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LocationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for LocationDescriptor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LocationDescriptor {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The result of parsing a location descriptor: the parameters that could be
/// recovered, along with the entries that had to be dropped.
#[derive(Debug, Default)]
pub struct ParsedLocation {
    pub params: ParameterSet,
    pub rejected: Vec<Error>,
}

/// Parses the given location descriptor into a parameter set.
///
/// Accepts a bare query string (`a=1&b=2`), one with a leading `?`, or a
/// path/URL followed by `?` and the query string. A `?` only separates a
/// path when it comes before the first `=`, so values may contain a literal
/// `?`. Entries that cannot be decoded, and values of keys in
/// `structured_keys` that are not valid JSON, are dropped and reported in
/// [`ParsedLocation::rejected`]. Empty values are ignored. If a key appears
/// more than once, the last occurrence wins.
pub fn parse_location(descriptor: &str, structured_keys: &BTreeSet<String>) -> ParsedLocation {
    let mut parsed = ParsedLocation::default();
    for entry in query_part(descriptor)
        .split('&')
        .filter(|e| !e.is_empty())
    {
        // Entries are decoded one at a time so that a single malformed
        // entry only drops itself.
        let (key, value) = match parse_entry(entry) {
            Ok(Some(kv)) => kv,
            Ok(None) => {
                debug!("Ignoring location entry without a value: {}", entry);
                continue;
            }
            Err(e) => {
                reject(&mut parsed, e);
                continue;
            }
        };
        if structured_keys.contains(&key) {
            if let Err(e) = parse_structured(&key, &value) {
                // A previous, valid occurrence of the same key must not
                // survive a later invalid one.
                parsed.params.remove(&key);
                reject(&mut parsed, e);
                continue;
            }
        }
        parsed.params.insert(key, value);
    }
    parsed
}

/// Parses the raw value of a structured parameter as JSON.
pub fn parse_structured(key: &str, raw: &str) -> Result<JsonValue, Error> {
    serde_json::from_str(raw).map_err(|e| Error::MalformedValue(key.to_string(), e))
}

fn query_part(descriptor: &str) -> &str {
    if let Some(query) = descriptor.strip_prefix('?') {
        return query;
    }
    match (descriptor.find('?'), descriptor.find('=')) {
        (Some(q), Some(eq)) if q < eq => &descriptor[q + 1..],
        (Some(q), None) => &descriptor[q + 1..],
        _ => descriptor,
    }
}

// Decodes a single `key=value` entry. Yields `None` for entries whose value
// is empty.
fn parse_entry(entry: &str) -> Result<Option<(String, String)>, Error> {
    let malformed = |reason: String| Error::MalformedLocation(entry.to_string(), reason);
    match entry.split_once('=') {
        None => return Ok(None),
        Some(("", _)) => return Err(malformed("empty key".to_string())),
        Some((_, "")) => return Ok(None),
        Some(_) => (),
    }
    let decoded = serde_qs::from_str::<BTreeMap<String, String>>(entry)
        .map_err(|e| malformed(e.to_string()))?;
    match decoded.into_iter().next() {
        Some((key, _)) if key.is_empty() => Err(malformed("empty key".to_string())),
        Some((_, value)) if value.is_empty() => Ok(None),
        Some(kv) => Ok(Some(kv)),
        None => Ok(None),
    }
}

fn reject(parsed: &mut ParsedLocation, err: Error) {
    warn!("Dropping location entry: {}", err);
    parsed.rejected.push(err);
}

#[cfg(test)]
mod test {
    use super::*;

    fn structured() -> BTreeSet<String> {
        BTreeSet::from(["tags".to_string()])
    }

    fn assert_round_trip(params: ParameterSet) {
        let loc = LocationDescriptor::from_params(&params);
        let parsed = parse_location(loc.as_str(), &structured());
        assert!(parsed.rejected.is_empty(), "{:?} from {}", parsed.rejected, loc);
        assert_eq!(parsed.params, params, "{}", loc);
    }

    #[test]
    fn serialization_omits_empty_values_and_escapes() {
        let params = ParameterSet::new()
            .with("db", "_internal")
            .with("namespace", "")
            .with("metric", "lindb.broker cpu")
            .with("tags", r#"{"node":["a&b"]}"#);
        let loc = LocationDescriptor::from_params(&params);
        assert!(loc.as_str().starts_with("db=_internal&metric="));
        assert!(!loc.as_str().contains("namespace"));
        assert!(!loc.as_str().contains(' '));
        assert!(!loc.as_str().contains('"'));
        // The `&` inside the tag filter must not split the entry.
        assert_eq!(loc.as_str().split('&').count(), 3);
        assert!(LocationDescriptor::from_params(&ParameterSet::new()).is_empty());
    }

    #[test]
    fn round_trip_preserves_non_empty_params() {
        assert_round_trip(
            ParameterSet::new()
                .with("db", "monitor")
                .with("metric", "a=b&c")
                .with("show", "true")
                .with("tags", r#"{"host":["h1","h2"]}"#),
        );
    }

    #[test]
    fn round_trip_preserves_reserved_characters() {
        assert_round_trip(
            ParameterSet::new()
                .with("plus", "a+b")
                .with("percent", "100%25 %")
                .with("question", "a?b=c")
                .with("hash", "#top")
                .with("tags", r#"{"host":["a+b","c?d#e","50%"]}"#),
        );
        assert_round_trip(
            ParameterSet::new()
                .with("a+b", "1")
                .with("a%b", "2")
                .with("a?b", "3")
                .with("a#b", "4")
                .with("a=b", "5"),
        );
    }

    #[test]
    fn round_trip_preserves_non_ascii_and_whitespace() {
        assert_round_trip(
            ParameterSet::new()
                .with("metric", "température")
                .with("namespace", "命名空间")
                .with("blank", "   ")
                .with("tab", "\t")
                .with("tags", r#"{"région":["île de france"]}"#),
        );
        assert_round_trip(
            ParameterSet::new()
                .with("clé", "valeur")
                .with(" ", "space key")
                .with("two words", " padded "),
        );
    }

    #[test]
    fn corrupt_structured_value_is_dropped() {
        let parsed = parse_location("db=x&tags=not-json", &structured());
        assert_eq!(parsed.params, ParameterSet::new().with("db", "x"));
        assert_eq!(parsed.rejected.len(), 1);
        assert!(matches!(parsed.rejected[0], Error::MalformedValue(ref k, _) if k == "tags"));
    }

    #[test]
    fn accepts_full_urls_and_form_encoding() {
        let expected = ParameterSet::new().with("db", "a b").with("metric", "m");
        for descriptor in [
            "/search/explore?db=a+b&metric=m",
            "http://console:9000/search/explore?db=a%20b&metric=m",
            "?db=a+b&metric=m",
            "db=a+b&metric=m",
        ] {
            let parsed = parse_location(descriptor, &structured());
            assert_eq!(parsed.params, expected, "{}", descriptor);
        }
    }

    #[test]
    fn bare_query_keeps_literal_question_marks() {
        let parsed = parse_location("db=a?b&metric=m", &BTreeSet::new());
        assert!(parsed.rejected.is_empty());
        assert_eq!(parsed.params.get("db"), Some("a?b"));
        assert_eq!(parsed.params.get("metric"), Some("m"));

        let parsed = parse_location("/explore?q=why?&tags=%7B%7D", &structured());
        assert_eq!(parsed.params.get("q"), Some("why?"));
        assert_eq!(parsed.params.get("tags"), Some("{}"));
    }

    #[test]
    fn fragments_are_not_stripped() {
        let parsed = parse_location("db=a&metric=m#top", &structured());
        assert_eq!(parsed.params.get("metric"), Some("m#top"));
    }

    #[test]
    fn nested_and_keyless_entries_are_dropped() {
        let parsed = parse_location("=v&filter[x]=1&metric=cpu&&flag&db=", &structured());
        assert_eq!(parsed.params, ParameterSet::new().with("metric", "cpu"));
        assert_eq!(parsed.rejected.len(), 2);
        assert!(parsed
            .rejected
            .iter()
            .all(|e| matches!(e, Error::MalformedLocation(_, _))));
    }

    #[test]
    fn later_occurrence_wins() {
        let parsed = parse_location("db=a&metric=m&db=b", &structured());
        assert_eq!(parsed.params.get("db"), Some("b"));
    }

    #[test]
    fn later_invalid_structured_value_removes_earlier_one() {
        let parsed = parse_location("tags=%7B%7D&tags=oops", &structured());
        assert!(!parsed.params.contains_key("tags"));
    }
}
