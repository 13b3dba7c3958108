//! Query templates and their binding against the current parameters.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{ParameterSet, QueryStatement};

const PLACEHOLDER_START: &str = "${";
const PLACEHOLDER_END: char = '}';

/// A query containing references to parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryTemplate {
    /// Query text with `${key}` placeholders.
    Text(String),
    /// A structured statement whose unset parts come from the parameters.
    Statement(QueryStatement),
}

impl QueryTemplate {
    /// Binds this template against the given parameters. Never fails.
    pub fn bind(&self, params: &ParameterSet) -> String {
        match self {
            Self::Text(text) => bind_text(text, params),
            Self::Statement(stmt) => stmt.bind(params),
        }
    }

    /// Parameter keys referenced by this template, in order of first use.
    pub fn placeholders(&self) -> Vec<String> {
        match self {
            Self::Text(text) => placeholders(text),
            Self::Statement(stmt) => stmt.referenced_keys(),
        }
    }
}

impl From<&str> for QueryTemplate {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for QueryTemplate {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<QueryStatement> for QueryTemplate {
    fn from(stmt: QueryStatement) -> Self {
        Self::Statement(stmt)
    }
}

/// Substitutes every `${key}` placeholder in the given text with the
/// URL-escaped value of `key`.
///
/// Placeholders referencing absent keys are replaced with an empty string.
/// An unterminated `${` is left as-is.
pub fn bind_text(text: &str, params: &ParameterSet) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some((before, key, after)) = next_placeholder(rest) {
        out.push_str(before);
        match params.get(key) {
            Some(value) => out.push_str(&urlencoding::encode(value)),
            None => debug!("Template references missing parameter \"{}\"", key),
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Parameter keys referenced in the given text, in order of first use.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut rest = text;
    while let Some((_, key, after)) = next_placeholder(rest) {
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
        rest = after;
    }
    keys
}

// Splits the text around its first complete placeholder, returning the text
// before it, the key, and the text after it.
fn next_placeholder(text: &str) -> Option<(&str, &str, &str)> {
    let start = text.find(PLACEHOLDER_START)?;
    let key_start = start + PLACEHOLDER_START.len();
    let key_len = text[key_start..].find(PLACEHOLDER_END)?;
    let key_end = key_start + key_len;
    Some((
        &text[..start],
        &text[key_start..key_end],
        &text[key_end + PLACEHOLDER_END.len_utf8()..],
    ))
}
