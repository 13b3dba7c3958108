//! View configuration: the statically declared parameter schema, field
//! dependencies and query targets of a view.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use eyre::{Result, WrapErr};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::tags::TAGS_PARAM;
use crate::{
    DependencyTable, Error, FieldDependency, ParamStateStore, QueryStatement, Target,
};

/// The file formats from which view configurations can be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Determines the format of the given file from its extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| Error::CannotDetermineFileType(path.to_path_buf()))?;
        match ext.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yml" | "yaml" => Ok(Self::Yaml),
            other => Err(Error::UnsupportedFileType(other.to_string())),
        }
    }
}

/// Configuration for a single view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewConfig {
    pub name: String,
    /// Parameters whose values are JSON-encoded.
    #[serde(default = "default_structured_keys")]
    pub structured_keys: BTreeSet<String>,
    /// Cascade/clear declarations, keyed by field. Validated on load.
    #[serde(default)]
    pub fields: DependencyTable,
    #[serde(default)]
    pub targets: Vec<Target>,
}

fn default_structured_keys() -> BTreeSet<String> {
    BTreeSet::from([TAGS_PARAM.to_string()])
}

impl ViewConfig {
    /// The configuration of the metric explorer view, in which selecting a
    /// database, namespace and metric progressively narrows down the fields,
    /// tag filters and grouping that can be chosen.
    pub fn explore() -> Result<Self, Error> {
        let fields = DependencyTable::default()
            .with("db", FieldDependency::noop().clearing(["namespace", "metric"]))?
            .with(
                "namespace",
                FieldDependency::noop()
                    .clearing(["metric"])
                    .cascading_on(["db"]),
            )?
            .with(
                "metric",
                FieldDependency::noop()
                    .clearing(["field", "groupBy", "tags"])
                    .cascading_on(["db", "namespace"]),
            )?
            .with("field", FieldDependency::noop().cascading_on(["metric"]))?
            .with("groupBy", FieldDependency::noop().cascading_on(["metric"]))?;
        Ok(Self {
            name: "explore".to_string(),
            structured_keys: default_structured_keys(),
            fields,
            targets: vec![Target::new(QueryStatement::default()).watching([
                "db",
                "namespace",
                "metric",
                "field",
                "groupBy",
                "tags",
            ])],
        })
    }

    /// Parses a configuration in the given format.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, Error> {
        Ok(match format {
            ConfigFormat::Json => serde_json::from_str(content)?,
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
        })
    }

    /// Loads a configuration from the given JSON or YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Attempting to load view configuration: {}", path.display());
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Io(path.display().to_string(), e))
            .wrap_err_with(|| Error::FailedToLoadConfig(path.to_path_buf()))?;
        let config = Self::parse(&content, format)
            .wrap_err_with(|| Error::FailedToLoadConfig(path.to_path_buf()))?;
        debug!(
            "Loaded view {} with {} field(s) from {}",
            config.name,
            config.fields.fields().count(),
            path.display()
        );
        Ok(config)
    }

    /// Constructs a new, empty store for this view.
    pub fn store(&self) -> ParamStateStore {
        ParamStateStore::with_structured_keys(&self.structured_keys)
    }

    /// The targets that need to be reissued after the given keys changed.
    pub fn targets_to_refresh<S: AsRef<str>>(&self, changed: &[S]) -> Vec<&Target> {
        self.targets
            .iter()
            .filter(|t| t.should_refresh(changed))
            .collect()
    }
}
