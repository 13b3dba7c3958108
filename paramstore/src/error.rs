use std::path::PathBuf;

use thiserror::Error;

/// The primary error type that can be produced by paramstore.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed location entry \"{0}\": {1}")]
    MalformedLocation(String, String),
    #[error("value for structured parameter \"{0}\" is not valid JSON: {1}")]
    MalformedValue(String, serde_json::Error),
    #[error("tag filter must be a JSON object mapping tag keys to arrays of values")]
    MalformedTagFilter,
    #[error("field dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),
    #[error("query execution against database \"{0}\" failed: {1}")]
    UpstreamFetch(String, String),
    #[error("invalid storage key \"{0}\": keys may not be empty or contain path separators")]
    InvalidStorageKey(String),
    #[error("I/O error {0}: {1}")]
    Io(String, std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("cannot determine file type of file: {0}")]
    CannotDetermineFileType(PathBuf),
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("failed to load view configuration from {0}")]
    FailedToLoadConfig(PathBuf),
}
