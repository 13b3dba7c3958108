//! Parameter sets and the deltas that are applied to them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Error;

/// We use [`std::collections::BTreeMap`] as our default map structure, which
/// gives us a stable iteration (and therefore serialization) order.
pub type Map<K, V> = BTreeMap<K, V>;

/// The current set of query-building parameters, mapping parameter names to
/// their values.
///
/// Structured values (like tag filters) are stored in their JSON-encoded
/// form. A key is either present with a value or entirely absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSet(Map<String, String>);

impl ParameterSet {
    /// Constructs an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience method for constructing a parameter set.
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.insert(key, value);
        self
    }

    /// Get the value associated with the given key.
    pub fn get<K: AsRef<str>>(&self, key: K) -> Option<&str> {
        self.0.get(key.as_ref()).map(String::as_str)
    }

    /// Returns whether or not the parameter set contains the given key.
    pub fn contains_key<K: AsRef<str>>(&self, key: K) -> bool {
        self.0.contains_key(key.as_ref())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// An iterator visiting all key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Interprets the value associated with the given key as a boolean
    /// toggle. Anything other than `"true"` (including an absent key) reads
    /// as `false`.
    pub fn flag<K: AsRef<str>>(&self, key: K) -> bool {
        self.get(key).map(str::trim) == Some("true")
    }

    /// Interprets the value associated with the given key as a
    /// comma-separated list, skipping empty entries.
    pub fn list<K: AsRef<str>>(&self, key: K) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the keys whose presence or value differs between this
    /// parameter set and the other one, in key order.
    pub fn changed_keys(&self, other: &ParameterSet) -> Vec<String> {
        let mut changed = Vec::new();
        for (k, v) in self.0.iter() {
            if other.0.get(k) != Some(v) {
                changed.push(k.clone());
            }
        }
        for k in other.0.keys() {
            if !self.0.contains_key(k) {
                changed.push(k.clone());
            }
        }
        changed.sort();
        changed
    }

    pub(crate) fn insert<K, V>(&mut self, key: K, value: V) -> Option<String>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.0
            .insert(key.as_ref().to_string(), value.as_ref().to_string())
    }

    pub(crate) fn remove<K: AsRef<str>>(&mut self, key: K) -> Option<String> {
        self.0.remove(key.as_ref())
    }
}

impl<K, V> FromIterator<(K, V)> for ParameterSet
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// A change to be merged into a [`ParameterSet`].
///
/// Each entry either sets a key to a value (`Some`) or removes the key
/// (`None`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamDelta(Map<String, Option<String>>);

impl ParamDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the given key to the given value.
    pub fn set<K, V>(mut self, key: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.0
            .insert(key.as_ref().to_string(), Some(value.as_ref().to_string()));
        self
    }

    /// Sets the given key to the JSON encoding of the given value.
    pub fn set_json<K, V>(self, key: K, value: &V) -> Result<Self, Error>
    where
        K: AsRef<str>,
        V: Serialize,
    {
        let encoded = serde_json::to_string(value)?;
        Ok(self.set(key, encoded))
    }

    /// Removes the given key.
    pub fn unset<K: AsRef<str>>(mut self, key: K) -> Self {
        self.0.insert(key.as_ref().to_string(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Option<String>)> {
        self.0.iter()
    }
}

impl<K, V> FromIterator<(K, Option<V>)> for ParamDelta
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        let mut delta = Self::new();
        for (k, v) in iter {
            delta = match v {
                Some(v) => delta.set(k, v),
                None => delta.unset(k),
            };
        }
        delta
    }
}
