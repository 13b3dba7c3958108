//! Structured query statements for the metric explorer.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{ParameterSet, TagFilter};

/// A structured query statement. Any part left unset is filled in from the
/// current parameters when the statement is bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryStatement {
    pub namespace: Option<String>,
    pub metric: Option<String>,
    pub field: Option<Vec<String>>,
    pub tags: Option<TagFilter>,
    pub group_by: Option<Vec<String>>,
}

impl QueryStatement {
    /// Renders the statement against the given parameters.
    ///
    /// Produces something like
    /// `select 'f1','f2' from 'metric' where host in ('a','b') group by node`.
    /// Without a metric, or without any fields, there is nothing to query and
    /// the result is an empty string.
    pub fn bind(&self, params: &ParameterSet) -> String {
        let metric = match self
            .metric
            .clone()
            .or_else(|| params.get("metric").map(ToString::to_string))
        {
            Some(m) if !m.is_empty() => m,
            _ => return String::new(),
        };
        let fields = self.field.clone().unwrap_or_else(|| params.list("field"));
        if fields.is_empty() {
            return String::new();
        }
        let tags = match &self.tags {
            Some(t) => t.clone(),
            None => TagFilter::from_params(params).unwrap_or_else(|e| {
                warn!("Ignoring tag filter while building statement: {}", e);
                TagFilter::default()
            }),
        };
        let group_by = self
            .group_by
            .clone()
            .unwrap_or_else(|| params.list("groupBy"));

        let mut sql = format!(
            "select {} from {}",
            fields
                .iter()
                .map(|f| quote(f))
                .collect::<Vec<String>>()
                .join(","),
            quote(&metric)
        );
        if !tags.is_empty() {
            let conditions = tags
                .active()
                .map(|(k, values)| {
                    format!(
                        "{} in ({})",
                        k,
                        values
                            .iter()
                            .map(|v| quote(v))
                            .collect::<Vec<String>>()
                            .join(",")
                    )
                })
                .collect::<Vec<String>>();
            sql.push_str(" where ");
            sql.push_str(&conditions.join(" and "));
        }
        if !group_by.is_empty() {
            sql.push_str(" group by ");
            sql.push_str(&group_by.join(","));
        }
        sql
    }

    /// The namespace the statement should be executed in, if any.
    pub fn namespace(&self, params: &ParameterSet) -> Option<String> {
        self.namespace
            .clone()
            .or_else(|| params.get("namespace").map(ToString::to_string))
            .filter(|ns| !ns.is_empty())
    }

    /// Parameter keys this statement reads when bound.
    pub fn referenced_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if self.namespace.is_none() {
            keys.push("namespace");
        }
        if self.metric.is_none() {
            keys.push("metric");
        }
        if self.field.is_none() {
            keys.push("field");
        }
        if self.tags.is_none() {
            keys.push("tags");
        }
        if self.group_by.is_none() {
            keys.push("groupBy");
        }
        keys.into_iter().map(ToString::to_string).collect()
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "\\'"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn binds_from_params() {
        let params = ParameterSet::new()
            .with("metric", "lindb.runtime.mem")
            .with("field", "alloc,heap")
            .with("groupBy", "node")
            .with("tags", r#"{"node":["n1","n2"],"role":[]}"#);
        assert_eq!(
            QueryStatement::default().bind(&params),
            "select 'alloc','heap' from 'lindb.runtime.mem' where node in ('n1','n2') group by node"
        );
    }

    #[test]
    fn explicit_parts_take_precedence() {
        let params = ParameterSet::new()
            .with("metric", "a")
            .with("field", "f")
            .with("groupBy", "node");
        let stmt = QueryStatement {
            metric: Some("b".to_string()),
            group_by: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(stmt.bind(&params), "select 'f' from 'b'");
    }

    #[test]
    fn missing_metric_or_fields_yields_empty_statement() {
        let stmt = QueryStatement::default();
        assert_eq!(stmt.bind(&ParameterSet::new().with("field", "f")), "");
        assert_eq!(stmt.bind(&ParameterSet::new().with("metric", "m")), "");
    }

    #[test]
    fn corrupt_tags_are_ignored() {
        let params = ParameterSet::new()
            .with("metric", "m")
            .with("field", "f")
            .with("tags", "not-json");
        assert_eq!(QueryStatement::default().bind(&params), "select 'f' from 'm'");
    }

    #[test]
    fn quotes_are_escaped() {
        let params = ParameterSet::new().with("metric", "it's").with("field", "f");
        assert_eq!(
            QueryStatement::default().bind(&params),
            r"select 'f' from 'it\'s'"
        );
    }
}
