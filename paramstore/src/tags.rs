//! Tag filters, stored in the `tags` parameter as a JSON object mapping tag
//! keys to the list of selected tag values.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::location::parse_structured;
use crate::{Error, Map, ParameterSet};

/// The name of the parameter holding the tag filter.
pub const TAGS_PARAM: &str = "tags";

/// Selected tag values, keyed by tag key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagFilter(Map<String, Vec<String>>);

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience method for building a filter.
    pub fn with<K, I, V>(mut self, key: K, values: I) -> Self
    where
        K: AsRef<str>,
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        self.0.insert(
            key.as_ref().to_string(),
            values.into_iter().map(|v| v.as_ref().to_string()).collect(),
        );
        self
    }

    /// Parses a tag filter from the raw (JSON-encoded) parameter value.
    ///
    /// Scalar tag values are accepted and treated as single-value lists.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let value = parse_structured(TAGS_PARAM, raw)?;
        let obj = match value {
            JsonValue::Object(obj) => obj,
            _ => return Err(Error::MalformedTagFilter),
        };
        let mut filter = Map::new();
        for (k, v) in obj {
            let values = match v {
                JsonValue::Array(arr) => arr
                    .into_iter()
                    .map(scalar_to_string)
                    .collect::<Result<Vec<String>, Error>>()?,
                other => vec![scalar_to_string(other)?],
            };
            filter.insert(k, values);
        }
        Ok(Self(filter))
    }

    /// Reads the tag filter from the given parameters. An absent `tags`
    /// parameter yields an empty filter.
    pub fn from_params(params: &ParameterSet) -> Result<Self, Error> {
        match params.get(TAGS_PARAM) {
            Some(raw) if !raw.trim().is_empty() => Self::parse(raw),
            _ => Ok(Self::default()),
        }
    }

    /// Returns the parameter form of this filter.
    pub fn to_param(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Labels summarizing the filter, one per tag key that has at least one
    /// selected value, in the form `key(count)`.
    pub fn labels(&self) -> Vec<String> {
        self.active()
            .map(|(k, v)| format!("{}({})", k, v.len()))
            .collect()
    }

    /// Returns a copy of this filter without the given tag key.
    ///
    /// Accepts either a bare tag key or a label as produced by
    /// [`TagFilter::labels`].
    pub fn without<K: AsRef<str>>(&self, key: K) -> Self {
        let key = key.as_ref();
        let key = match key.rfind('(') {
            Some(pos) if key.ends_with(')') => &key[..pos],
            _ => key,
        };
        let mut filter = self.0.clone();
        filter.remove(key);
        Self(filter)
    }

    /// Tag keys with at least one selected value, along with their values.
    pub fn active(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter().filter(|(_, v)| !v.is_empty())
    }

    /// Whether there are no selected values at all.
    pub fn is_empty(&self) -> bool {
        self.active().next().is_none()
    }
}

fn scalar_to_string(v: JsonValue) -> Result<String, Error> {
    match v {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::MalformedTagFilter),
    }
}
