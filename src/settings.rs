use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

const SETTINGS_PREFIX: &str = "satgazer_";

/// Largest value stored under a single key, in bytes.
pub const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings database error: {0}")]
    Database(#[from] duckdb::Error),
    #[error("could not encode setting: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("setting {key} is missing chunk {index}")]
    MissingChunk { key: String, index: usize },
    #[error("setting {key} has an invalid chunk count {value:?}")]
    BadChunkCount { key: String, value: String },
}

/// Raw string storage behind [`SettingsStore`].
pub trait SettingsBackend {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError>;
    fn delete(&mut self, key: &str) -> Result<(), SettingsError>;
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: HashMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), SettingsError> {
        self.values.remove(key);
        Ok(())
    }
}

/// JSON settings with values over [`CHUNK_SIZE`] bytes split across
/// `<key>_0..<key>_N` plus a `<key>_chunks` count.
pub struct SettingsStore {
    backend: Box<dyn SettingsBackend>,
}

fn full_key(key: &str) -> String {
    format!("{SETTINGS_PREFIX}{key}")
}

fn chunk_key(key: &str, index: usize) -> String {
    format!("{SETTINGS_PREFIX}{key}_{index}")
}

fn count_key(key: &str) -> String {
    format!("{SETTINGS_PREFIX}{key}_chunks")
}

/// Splits on char boundaries so every chunk is valid UTF-8.
fn split_chunks(value: &str, size: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let mut end = size.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}

impl SettingsStore {
    pub fn new(backend: Box<dyn SettingsBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// Writes the new value before deleting anything left from the old one,
    /// so a failed write keeps the previous value readable.
    pub fn save<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), SettingsError> {
        let json = serde_json::to_string(value)?;

        if json.len() <= CHUNK_SIZE {
            self.backend.set(&full_key(key), &json)?;
            self.backend.delete(&count_key(key))?;
            return self.delete_chunks_from(key, 0);
        }

        let chunks = split_chunks(&json, CHUNK_SIZE);
        for (index, chunk) in chunks.iter().enumerate() {
            self.backend.set(&chunk_key(key, index), chunk)?;
        }
        self.backend.set(&count_key(key), &chunks.len().to_string())?;
        self.backend.delete(&full_key(key))?;
        self.delete_chunks_from(key, chunks.len())?;
        debug!(key, bytes = json.len(), chunks = chunks.len(), "saved chunked setting");
        Ok(())
    }

    /// Returns `default` when the setting is missing or unreadable.
    pub fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.try_load(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(err) => {
                warn!(key, error = %err, "falling back to default setting");
                default
            }
        }
    }

    pub fn try_load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        let raw = match self.backend.get(&count_key(key))? {
            Some(count) => {
                let count: usize = count.trim().parse().map_err(|_| SettingsError::BadChunkCount {
                    key: key.to_string(),
                    value: count.clone(),
                })?;
                let mut joined = String::new();
                for index in 0..count {
                    let chunk = self.backend.get(&chunk_key(key, index))?.ok_or_else(|| {
                        SettingsError::MissingChunk {
                            key: key.to_string(),
                            index,
                        }
                    })?;
                    joined.push_str(&chunk);
                }
                joined
            }
            None => match self.backend.get(&full_key(key))? {
                Some(value) => value,
                None => return Ok(None),
            },
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Deletes the value, every chunk and the chunk count.
    pub fn remove(&mut self, key: &str) -> Result<(), SettingsError> {
        self.backend.delete(&full_key(key))?;
        self.backend.delete(&count_key(key))?;
        self.delete_chunks_from(key, 0)
    }

    /// Chunks are found by walking the indices rather than trusting the count,
    /// so chunks from an interrupted save are still reached. They go last
    /// first, which keeps the remainder contiguous if a delete fails.
    fn delete_chunks_from(&mut self, key: &str, start: usize) -> Result<(), SettingsError> {
        let mut end = start;
        while self.backend.get(&chunk_key(key, end))?.is_some() {
            end += 1;
        }
        for index in (start..end).rev() {
            self.backend.delete(&chunk_key(key, index))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ObserverLocation;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn test_round_trip_small_value() {
        let mut store = SettingsStore::in_memory();
        let home = ObserverLocation::new(51.5, -0.12);
        store.save("home_location", &home).unwrap();
        assert_eq!(store.load("home_location", ObserverLocation::new(0.0, 0.0)), home);
        assert!(!store.load("show_path", false));
    }

    #[test]
    fn test_round_trip_chunked_value() {
        let mut store = SettingsStore::in_memory();
        let value: String = "abcdefghij".repeat(1000);
        assert_eq!(value.len(), 10_000);

        store.save("big", &value).unwrap();
        assert_eq!(store.load("big", String::new()), value);
    }

    #[test]
    fn test_chunks_respect_char_boundaries() {
        let value = "ø".repeat(5000);
        for chunk in split_chunks(&value, CHUNK_SIZE) {
            assert!(chunk.len() <= CHUNK_SIZE);
        }

        let mut store = SettingsStore::in_memory();
        store.save("unicode", &value).unwrap();
        assert_eq!(store.load("unicode", String::new()), value);
    }

    #[test]
    fn test_missing_chunk_falls_back_to_default() {
        let mut backend = MemoryBackend::new();
        backend.set("satgazer_broken_chunks", "3").unwrap();
        backend.set("satgazer_broken_0", "\"ab").unwrap();
        let store = SettingsStore::new(Box::new(backend));
        assert_eq!(store.load("broken", "fallback".to_string()), "fallback");
    }

    #[test]
    fn test_corrupt_values_fall_back_to_default() {
        let mut backend = MemoryBackend::new();
        backend.set("satgazer_height", "not json").unwrap();
        backend.set("satgazer_odd_chunks", "many").unwrap();
        let store = SettingsStore::new(Box::new(backend));
        assert_eq!(store.load("height", 10.0), 10.0);
        assert_eq!(store.load("odd", 7u32), 7);
    }

    #[test]
    fn test_remove_deletes_every_chunk() {
        let mut store = SettingsStore::in_memory();
        store.save("big", &"x".repeat(9000)).unwrap();
        store.remove("big").unwrap();
        assert_eq!(store.load("big", String::from("gone")), "gone");

        // Shrinking a chunked value back to a single key leaves no chunks.
        store.save("big", &"y".repeat(9000)).unwrap();
        store.save("big", "small").unwrap();
        assert_eq!(store.load("big", String::new()), "small");
        assert!(store.backend.get("satgazer_big_0").unwrap().is_none());
        assert!(store.backend.get("satgazer_big_chunks").unwrap().is_none());
    }

    /// Memory storage that starts refusing writes after a set number of them.
    struct FlakyBackend {
        values: Rc<RefCell<HashMap<String, String>>>,
        writes_left: Rc<Cell<usize>>,
    }

    impl SettingsBackend for FlakyBackend {
        fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
            Ok(self.values.borrow().get(key).cloned())
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
            if self.writes_left.get() == 0 {
                let err = std::io::Error::other("settings backend offline");
                return Err(SettingsError::Encode(serde_json::Error::io(err)));
            }
            self.writes_left.set(self.writes_left.get() - 1);
            self.values.borrow_mut().insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn delete(&mut self, key: &str) -> Result<(), SettingsError> {
            self.values.borrow_mut().remove(key);
            Ok(())
        }
    }

    #[test]
    fn test_failed_save_keeps_old_value_and_leaves_nothing_behind() {
        let values = Rc::new(RefCell::new(HashMap::new()));
        let writes_left = Rc::new(Cell::new(usize::MAX));
        let mut store = SettingsStore::new(Box::new(FlakyBackend {
            values: values.clone(),
            writes_left: writes_left.clone(),
        }));

        store.save("home", "old").unwrap();

        // The second chunk write fails.
        writes_left.set(1);
        assert!(store.save("home", &"z".repeat(9000)).is_err());
        assert_eq!(store.load("home", String::from("DEFAULT")), "old");
        assert!(values.borrow().contains_key("satgazer_home_0"));

        writes_left.set(usize::MAX);
        store.remove("home").unwrap();
        assert!(values.borrow().is_empty());
        assert_eq!(store.load("home", String::from("DEFAULT")), "DEFAULT");
    }

    #[test]
    fn test_failed_small_save_keeps_chunked_value() {
        let values = Rc::new(RefCell::new(HashMap::new()));
        let writes_left = Rc::new(Cell::new(usize::MAX));
        let mut store = SettingsStore::new(Box::new(FlakyBackend {
            values: values.clone(),
            writes_left: writes_left.clone(),
        }));

        let big = "q".repeat(9000);
        store.save("cache", &big).unwrap();

        writes_left.set(0);
        assert!(store.save("cache", "small").is_err());
        assert_eq!(store.load("cache", String::new()), big);

        // Overwriting with fewer chunks drops the surplus ones.
        writes_left.set(usize::MAX);
        store.save("cache", &"r".repeat(5000)).unwrap();
        assert_eq!(store.load("cache", String::new()), "r".repeat(5000));
        assert!(values.borrow().contains_key("satgazer_cache_1"));
        assert!(!values.borrow().contains_key("satgazer_cache_2"));
        assert!(!values.borrow().contains_key("satgazer_cache"));
    }
}
