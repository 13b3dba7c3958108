//! paramstore keeps the query-building parameters of a database console
//! (database, namespace, metric, fields, tag filters and so on) in one place.
//!
//! It synchronizes those parameters with a shareable location descriptor (a
//! query string), applies declared cascade/clear policies when a field
//! changes, notifies subscribed dependents, and binds query templates
//! against the current parameters.
//!
//! For the command line interface, see the `paramstore-cli` crate.

mod config;
mod dependency;
mod error;
pub mod location;
mod params;
mod statement;
pub mod storage;
mod store;
mod tags;
pub mod target;
pub mod template;

pub use config::{ConfigFormat, ViewConfig};
pub use dependency::{DependencyTable, FieldDependency};
pub use error::Error;
pub use location::LocationDescriptor;
pub use params::{Map, ParamDelta, ParameterSet};
pub use statement::QueryStatement;
pub use storage::Preferences;
pub use store::{ParamStateStore, Subscription};
pub use tags::{TagFilter, TAGS_PARAM};
pub use target::{BoundQuery, QueryExecutor, RequestSequencer, Target};
pub use template::QueryTemplate;
