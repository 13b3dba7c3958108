//! Query targets: the queries issued by dashboard panels and charts in
//! reaction to parameter changes.

use std::cell::Cell;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{Error, ParameterSet, QueryTemplate};

/// A query issued by a panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// The database to execute the query against. Falls back to the `db`
    /// parameter when unset.
    #[serde(default)]
    pub db: Option<String>,
    pub sql: QueryTemplate,
    /// Whether the query should be bound against the current parameters. If
    /// not, the query text is used verbatim.
    #[serde(default = "default_bind")]
    pub bind: bool,
    /// Parameters whose changes require the query to be reissued.
    #[serde(default)]
    pub watch: Vec<String>,
}

fn default_bind() -> bool {
    true
}

/// A query that is ready to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundQuery {
    pub db: String,
    pub namespace: Option<String>,
    pub sql: String,
}

impl Target {
    /// Constructor for a target that binds against the current parameters.
    pub fn new<T: Into<QueryTemplate>>(sql: T) -> Self {
        Self {
            db: None,
            sql: sql.into(),
            bind: true,
            watch: Vec::new(),
        }
    }

    pub fn with_db<D: AsRef<str>>(mut self, db: D) -> Self {
        self.db = Some(db.as_ref().to_string());
        self
    }

    pub fn watching<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.watch
            .extend(keys.into_iter().map(|k| k.as_ref().to_string()));
        self
    }

    /// Whether a change to the given keys requires this target to be
    /// reissued.
    ///
    /// A bound target without an explicit watch list watches every key its
    /// query references.
    pub fn should_refresh<S: AsRef<str>>(&self, changed: &[S]) -> bool {
        if !self.bind {
            return false;
        }
        let watched = if self.watch.is_empty() {
            let mut keys = self.sql.placeholders();
            if self.db.is_none() {
                keys.push("db".to_string());
            }
            keys
        } else {
            self.watch.clone()
        };
        changed
            .iter()
            .any(|c| watched.iter().any(|w| w == c.as_ref()))
    }

    /// Resolves this target against the given parameters.
    ///
    /// Returns `None` when there is nothing to execute: no database is
    /// known, or the bound query is empty.
    pub fn resolve(&self, params: &ParameterSet) -> Option<BoundQuery> {
        let db = self
            .db
            .clone()
            .or_else(|| params.get("db").map(ToString::to_string))
            .filter(|db| !db.is_empty())?;
        let (sql, namespace) = match (&self.sql, self.bind) {
            (QueryTemplate::Statement(stmt), true) => {
                (stmt.bind(params), stmt.namespace(params))
            }
            (tpl, true) => (tpl.bind(params), None),
            (QueryTemplate::Text(text), false) => (text.clone(), None),
            (QueryTemplate::Statement(stmt), false) => {
                (stmt.bind(&ParameterSet::new()), stmt.namespace.clone())
            }
        };
        if sql.is_empty() {
            return None;
        }
        Some(BoundQuery { db, namespace, sql })
    }
}

/// The service that executes queries against the database cluster.
pub trait QueryExecutor {
    /// Executes the given query, returning the raw result payload. Failures
    /// are reported as [`Error::UpstreamFetch`].
    fn exec(&self, query: &BoundQuery) -> Result<JsonValue, Error>;
}

/// A ticket identifying a single issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

/// Helps a dependent ignore stale responses: only the response to the most
/// recently issued request is accepted.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    latest: Cell<u64>,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a ticket for a new request, superseding all earlier ones.
    pub fn issue(&self) -> Ticket {
        let next = self.latest.get() + 1;
        self.latest.set(next);
        Ticket(next)
    }

    /// Whether the response to the request with the given ticket should be
    /// accepted.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        ticket.0 == self.latest.get()
    }

    /// Passes the given response through if its ticket is still current.
    pub fn accept<T>(&self, ticket: Ticket, response: T) -> Option<T> {
        if self.is_current(ticket) {
            Some(response)
        } else {
            debug!("Discarding stale response for request {}", ticket.0);
            None
        }
    }
}
