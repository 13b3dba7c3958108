//! Field dependency declarations (cascade/clear relationships) and their
//! validation.

use std::collections::{BTreeSet, VecDeque};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{Error, Map};

/// Declares, for a single controllable field, which parameters invalidate it
/// and which parameters it invalidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldDependency {
    /// Parameters whose change causes this field to reset.
    pub cascade: BTreeSet<String>,
    /// Parameters that must be removed whenever this field's value changes.
    pub clear: BTreeSet<String>,
}

impl FieldDependency {
    /// A policy that neither cascades nor clears anything.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Convenience method for declaring the clear set.
    pub fn clearing<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.clear
            .extend(keys.into_iter().map(|k| k.as_ref().to_string()));
        self
    }

    /// Convenience method for declaring the cascade set.
    pub fn cascading_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.cascade
            .extend(keys.into_iter().map(|k| k.as_ref().to_string()));
        self
    }
}

/// The statically declared dependency table for all of the fields in a view.
///
/// A change to a field invalidates every key in its clear set, as well as
/// every field that cascades on it. Invalidated fields in turn invalidate
/// their own dependents. The table guarantees that this process never comes
/// back around to the field that started it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DependencyTable {
    fields: Map<String, FieldDependency>,
}

impl DependencyTable {
    /// Builds a table from the given declarations, failing if they contain
    /// a cycle.
    pub fn new(fields: Map<String, FieldDependency>) -> Result<Self, Error> {
        let table = Self { fields };
        table.validate()?;
        Ok(table)
    }

    /// Registers the dependency declaration for a field, failing if it
    /// introduces a cycle. On failure the table is left unchanged.
    pub fn register<F: AsRef<str>>(
        &mut self,
        field: F,
        dep: FieldDependency,
    ) -> Result<(), Error> {
        let field = field.as_ref().to_string();
        let prev = self.fields.insert(field.clone(), dep);
        if let Err(e) = self.validate() {
            match prev {
                Some(p) => self.fields.insert(field, p),
                None => self.fields.remove(&field),
            };
            return Err(e);
        }
        debug!("Registered field dependency for {}", field);
        Ok(())
    }

    /// Convenience method for registering a field while building a table.
    pub fn with<F: AsRef<str>>(mut self, field: F, dep: FieldDependency) -> Result<Self, Error> {
        self.register(field, dep)?;
        Ok(self)
    }

    /// The declaration exactly as it was registered for the given field.
    pub fn declared<F: AsRef<str>>(&self, field: F) -> Option<&FieldDependency> {
        self.fields.get(field.as_ref())
    }

    /// An iterator over the names of all declared fields.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Fields that cascade on the given key, i.e. that need to reload when
    /// it changes.
    pub fn dependents<K: AsRef<str>>(&self, key: K) -> Vec<&str> {
        let key = key.as_ref();
        self.fields
            .iter()
            .filter(|(_, dep)| dep.cascade.contains(key))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Returns the effective policy to apply when the given field changes.
    ///
    /// The clear set of the returned policy is transitively closed: it
    /// includes everything invalidated by the keys it clears. Unknown fields
    /// resolve to a no-op policy.
    pub fn policy<F: AsRef<str>>(&self, field: F) -> FieldDependency {
        let field = field.as_ref();
        let cascade = self
            .fields
            .get(field)
            .map(|d| d.cascade.clone())
            .unwrap_or_default();

        let mut clear = BTreeSet::new();
        let mut queue = VecDeque::from(self.edges(field));
        while let Some(key) = queue.pop_front() {
            if key == field || !clear.insert(key.clone()) {
                continue;
            }
            queue.extend(self.edges(&key));
        }
        FieldDependency { cascade, clear }
    }

    /// Checks that no field, through its clear set and the cascades of the
    /// fields it invalidates, ends up invalidating itself.
    pub fn validate(&self) -> Result<(), Error> {
        let mut done = BTreeSet::new();
        for field in self.fields.keys() {
            let mut path = Vec::new();
            self.visit(field, &mut path, &mut done)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        key: &str,
        path: &mut Vec<String>,
        done: &mut BTreeSet<String>,
    ) -> Result<(), Error> {
        if let Some(pos) = path.iter().position(|k| k == key) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(key.to_string());
            return Err(Error::DependencyCycle(cycle));
        }
        if done.contains(key) {
            return Ok(());
        }
        path.push(key.to_string());
        for next in self.edges(key) {
            self.visit(&next, path, done)?;
        }
        path.pop();
        done.insert(key.to_string());
        Ok(())
    }

    // Keys directly invalidated by a change to the given key.
    fn edges(&self, key: &str) -> Vec<String> {
        let mut next = self
            .fields
            .get(key)
            .map(|d| d.clear.iter().cloned().collect::<BTreeSet<String>>())
            .unwrap_or_default();
        next.extend(self.dependents(key).into_iter().map(ToString::to_string));
        next.into_iter().collect()
    }
}

impl<'de> Deserialize<'de> for DependencyTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let fields = Map::<String, FieldDependency>::deserialize(deserializer)?;
        DependencyTable::new(fields).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        static ref EXPLORE: DependencyTable = DependencyTable::default()
            .with("db", FieldDependency::noop().clearing(["namespace", "metric"]))
            .unwrap()
            .with(
                "namespace",
                FieldDependency::noop()
                    .clearing(["metric"])
                    .cascading_on(["db"])
            )
            .unwrap()
            .with(
                "metric",
                FieldDependency::noop()
                    .clearing(["field", "groupBy", "tags"])
                    .cascading_on(["db", "namespace"])
            )
            .unwrap()
            .with("field", FieldDependency::noop().cascading_on(["metric"]))
            .unwrap();
    }

    #[test]
    fn policy_is_transitively_closed() {
        let policy = EXPLORE.policy("db");
        assert_eq!(
            policy.clear.iter().collect::<Vec<_>>(),
            vec!["field", "groupBy", "metric", "namespace", "tags"]
        );
        let policy = EXPLORE.policy("metric");
        assert_eq!(
            policy.clear.iter().collect::<Vec<_>>(),
            vec!["field", "groupBy", "tags"]
        );
        assert!(policy.cascade.contains("namespace"));
    }

    #[test]
    fn unknown_field_has_noop_policy() {
        assert_eq!(EXPLORE.policy("show"), FieldDependency::noop());
    }

    #[test]
    fn dependents_lists_cascading_fields() {
        assert_eq!(EXPLORE.dependents("db"), vec!["metric", "namespace"]);
        assert_eq!(EXPLORE.dependents("metric"), vec!["field"]);
        assert!(EXPLORE.dependents("tags").is_empty());
    }

    #[test]
    fn clear_cycle_is_rejected() {
        let mut table = DependencyTable::default()
            .with("a", FieldDependency::noop().clearing(["b"]))
            .unwrap()
            .with("b", FieldDependency::noop().clearing(["c"]))
            .unwrap();
        let err = table
            .register("c", FieldDependency::noop().clearing(["a"]))
            .unwrap_err();
        match err {
            Error::DependencyCycle(path) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            e => panic!("expected a dependency cycle, but got {:?}", e),
        }
        // The offending declaration must not have been kept.
        assert!(table.declared("c").is_none());
        assert!(table.validate().is_ok());
    }

    #[test]
    fn cascade_cycle_is_rejected() {
        // a clears b, but a also resets whenever b changes.
        let result = DependencyTable::default()
            .with("a", FieldDependency::noop().clearing(["b"]).cascading_on(["b"]));
        assert!(matches!(result, Err(Error::DependencyCycle(_))));
    }

    #[test]
    fn self_clear_is_rejected() {
        let result =
            DependencyTable::default().with("a", FieldDependency::noop().clearing(["a"]));
        assert!(matches!(result, Err(Error::DependencyCycle(_))));
    }

    #[test]
    fn deserialization_validates() {
        let ok: DependencyTable =
            serde_json::from_str(r#"{ "db": { "clear": ["metric"] }, "metric": {} }"#).unwrap();
        assert_eq!(ok.fields().collect::<Vec<_>>(), vec!["db", "metric"]);
        let bad = serde_json::from_str::<DependencyTable>(
            r#"{ "a": { "clear": ["b"] }, "b": { "clear": ["a"] } }"#,
        );
        assert!(bad.is_err());
    }
}
