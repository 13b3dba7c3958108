//! Persistent local key/value storage for saved UI preferences.
//!
//! Preferences are not query parameters, but they share the same rule for
//! externally stored state: reads parse defensively, and a corrupt entry is
//! deleted and reset rather than failing the caller.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::{Error, Map};

/// Raw string storage, analogous to a browser's local storage.
pub trait StorageBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, Error>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), Error>;
    fn remove_item(&mut self, key: &str) -> Result<(), Error>;
}

/// Storage that only lives as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend(Map<String, String>);

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.0.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), Error> {
        self.0.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<(), Error> {
        self.0.remove(key);
        Ok(())
    }
}

/// Storage backed by a directory, with one file per key.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Constructor. Creates the directory if it does not exist yet.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            fs::create_dir_all(dir).map_err(|e| Error::Io(dir.display().to_string(), e))?;
            debug!("Created storage directory: {}", dir.display());
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, Error> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key == "." || key == ".." {
            return Err(Error::InvalidStorageKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl StorageBackend for FileBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>, Error> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(path.display().to_string(), e)),
        }
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let path = self.path_for(key)?;
        fs::write(&path, value).map_err(|e| Error::Io(path.display().to_string(), e))
    }

    fn remove_item(&mut self, key: &str) -> Result<(), Error> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(path.display().to_string(), e)),
        }
    }
}

/// JSON-object preferences stored on top of a [`StorageBackend`].
#[derive(Debug, Clone, Default)]
pub struct Preferences<B> {
    backend: B,
}

impl<B: StorageBackend> Preferences<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Reads the object stored under the given key.
    ///
    /// An absent entry reads as an empty object. An entry that is not a valid
    /// JSON object is removed, and also reads as an empty object.
    pub fn get_object(&mut self, key: &str) -> Result<JsonValue, Error> {
        let raw = match self.backend.get_item(key)? {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => return Ok(empty_object()),
        };
        match serde_json::from_str::<JsonValue>(&raw) {
            Ok(obj @ JsonValue::Object(_)) => Ok(obj),
            Ok(_) => {
                warn!("Resetting stored preferences \"{}\": not an object", key);
                self.backend.remove_item(key)?;
                Ok(empty_object())
            }
            Err(e) => {
                warn!("Resetting corrupt stored preferences \"{}\": {}", key, e);
                self.backend.remove_item(key)?;
                Ok(empty_object())
            }
        }
    }

    /// Stores the given raw value under the given key.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), Error> {
        self.backend.set_item(key, value)
    }

    /// Sets the value at the given dot-separated path within the object
    /// stored under the given key, creating intermediate objects as needed.
    ///
    /// Intermediate values that are not objects are replaced.
    pub fn set_object_value<V: Serialize>(
        &mut self,
        key: &str,
        path: &str,
        value: &V,
    ) -> Result<(), Error> {
        let mut obj = self.get_object(key)?;
        set_path(&mut obj, path, serde_json::to_value(value)?);
        let encoded = serde_json::to_string(&obj)?;
        self.set_value(key, &encoded)
    }
}

fn empty_object() -> JsonValue {
    JsonValue::Object(JsonMap::new())
}

fn set_path(target: &mut JsonValue, path: &str, value: JsonValue) {
    let segments = path.split('.').collect::<Vec<&str>>();
    set_segments(target, &segments, value);
}

fn set_segments(target: &mut JsonValue, segments: &[&str], value: JsonValue) {
    if !target.is_object() {
        *target = empty_object();
    }
    if let JsonValue::Object(obj) = target {
        match segments {
            [] => {}
            [last] => {
                obj.insert(last.to_string(), value);
            }
            [first, rest @ ..] => {
                let next = obj
                    .entry(first.to_string())
                    .or_insert_with(empty_object);
                set_segments(next, rest, value);
            }
        }
    }
}
