use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage file is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

/// Small string key-value store that survives restarts.
///
/// Values are opaque strings; callers serialize their own records.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    /// Drop every entry `keep` rejects, returning how many went.
    fn retain(&self, keep: &dyn Fn(&str, &str) -> bool) -> Result<usize, StorageError>;
}

// Key-value store kept as a single JSON object on disk
pub struct JsonFileStore {
    path: PathBuf,
    file_mutex: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            info!("Creating new key-value store at {}", path.display());
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            fs::write(&path, "{}")?;
        }

        Ok(Self {
            path,
            file_mutex: Mutex::new(()),
        })
    }

    fn load(&self) -> Result<Map<String, Value>, StorageError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_reader(file) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => {
                warn!("Key-value store {} is not a JSON object, starting empty", self.path.display());
                Ok(Map::new())
            }
            Err(e) if e.is_eof() => Ok(Map::new()),
            // The next write replaces the unreadable file
            Err(e) => {
                warn!(
                    "Key-value store {} is unreadable ({}), starting empty",
                    self.path.display(),
                    e
                );
                Ok(Map::new())
            }
        }
    }

    // Write to a sibling file then rename into place
    fn save(&self, map: &Map<String, Value>) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _lock = self.file_mutex.lock().map_err(|_| StorageError::Poisoned)?;
        let map = self.load()?;

        Ok(map.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _lock = self.file_mutex.lock().map_err(|_| StorageError::Poisoned)?;
        let mut map = self.load()?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.save(&map)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _lock = self.file_mutex.lock().map_err(|_| StorageError::Poisoned)?;
        let mut map = self.load()?;
        if map.remove(key).is_some() {
            self.save(&map)?;
        }
        Ok(())
    }

    fn retain(&self, keep: &dyn Fn(&str, &str) -> bool) -> Result<usize, StorageError> {
        let _lock = self.file_mutex.lock().map_err(|_| StorageError::Poisoned)?;
        let mut map = self.load()?;
        let before = map.len();

        map.retain(|key, value| match value {
            Value::String(s) => keep(key, s),
            other => keep(key, &other.to_string()),
        });

        let removed = before - map.len();
        if removed > 0 {
            self.save(&map)?;
        }
        Ok(removed)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn retain(&self, keep: &dyn Fn(&str, &str) -> bool) -> Result<usize, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        let before = entries.len();
        entries.retain(|key, value| keep(key, value));
        Ok(before - entries.len())
    }
}
