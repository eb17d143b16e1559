//! Filesystem persistence and the filesystem wipe platform.
//!
//! Layout under the data directory:
//!
//! ```text
//! state.json     key-value state (identity keys, token)
//! cache/<name>   cache stores
//! db/<name>      local databases
//! ephemeral/     short-lived files, tracked as wipe handles
//! ```

use std::{
    collections::BTreeMap,
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use hushwire_core::{KeyValueStore, StorageError, WipeError, WipePlatform};
use tracing::{debug, info};

use crate::driver::Platform;

const STATE_FILE: &str = "state.json";
const CACHE_DIR: &str = "cache";
const DATABASE_DIR: &str = "db";
const EPHEMERAL_DIR: &str = "ephemeral";

/// Key-value store kept in one JSON file.
///
/// Every call reads or rewrites the file, so separate handles on the same path
/// always agree.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(io_error(&e)),
        };
        serde_json::from_str(&text).map_err(|e| StorageError::Corrupt {
            key: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(&e))?;
        }
        let text = serde_json::to_string(entries).map_err(|e| StorageError::Io(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|e| io_error(&e))?;
        fs::rename(&tmp, &self.path).map_err(|e| io_error(&e))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.read()?;
        entries.insert(key.to_string(), value.to_string());
        self.write(&entries)
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.read()?;
        if entries.remove(key).is_some() {
            self.write(&entries)?;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        remove_if_present(fs::remove_file(&self.path)).map_err(|e| io_error(&e))
    }
}

/// Wipe target over a data directory.
#[derive(Debug, Clone)]
pub struct FilePlatform {
    root: PathBuf,
}

impl FilePlatform {
    /// Platform rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Key-value store this platform clears.
    pub fn store(&self) -> FileStore {
        FileStore::new(self.root.join(STATE_FILE))
    }

    /// Directory holding cache stores.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    /// Directory holding local databases.
    pub fn database_dir(&self) -> PathBuf {
        self.root.join(DATABASE_DIR)
    }

    /// Directory holding short-lived files.
    pub fn ephemeral_dir(&self) -> PathBuf {
        self.root.join(EPHEMERAL_DIR)
    }

    fn entries(dir: &Path) -> io::Result<Vec<String>> {
        let read = match fs::read_dir(dir) {
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        for entry in read {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn remove_entry(path: &Path) -> io::Result<()> {
        if path.is_dir() {
            remove_if_present(fs::remove_dir_all(path))
        } else {
            remove_if_present(fs::remove_file(path))
        }
    }
}

impl Platform for FilePlatform {
    fn ephemeral_file(&mut self, name: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let dir = self.ephemeral_dir();
        fs::create_dir_all(&dir).map_err(|e| io_error(&e))?;

        let path = dir.join(name);
        fs::write(&path, bytes).map_err(|e| io_error(&e))?;
        debug!(path = %path.display(), "ephemeral file written");
        Ok(path.display().to_string())
    }
}

impl WipePlatform for FilePlatform {
    fn clear_key_value(&mut self) -> Result<(), StorageError> {
        self.store().clear()
    }

    fn cache_names(&self) -> Result<Vec<String>, WipeError> {
        Self::entries(&self.cache_dir())
            .map_err(|e| WipeError::Cache { name: CACHE_DIR.into(), reason: e.to_string() })
    }

    fn delete_cache(&mut self, name: &str) -> Result<(), WipeError> {
        Self::remove_entry(&self.cache_dir().join(name))
            .map_err(|e| WipeError::Cache { name: name.into(), reason: e.to_string() })
    }

    fn database_names(&self) -> Result<Vec<String>, WipeError> {
        Self::entries(&self.database_dir())
            .map_err(|e| WipeError::Database { name: DATABASE_DIR.into(), reason: e.to_string() })
    }

    fn delete_database(&mut self, name: &str) -> Result<(), WipeError> {
        Self::remove_entry(&self.database_dir().join(name))
            .map_err(|e| WipeError::Database { name: name.into(), reason: e.to_string() })
    }

    fn revoke_handle(&mut self, handle: &str) -> Result<(), WipeError> {
        remove_if_present(fs::remove_file(handle))
            .map_err(|e| WipeError::Handle { handle: handle.into(), reason: e.to_string() })
    }

    fn navigate_wiped(&mut self) -> Result<(), WipeError> {
        for dir in [CACHE_DIR, DATABASE_DIR, EPHEMERAL_DIR] {
            remove_if_present(fs::remove_dir(self.root.join(dir)))
                .map_err(|e| WipeError::Navigation(format!("{dir}: {e}")))?;
        }
        info!(root = %self.root.display(), "data directory back to fresh state");
        Ok(())
    }

    fn reload(&mut self) -> Result<(), WipeError> {
        for dir in [CACHE_DIR, DATABASE_DIR, EPHEMERAL_DIR] {
            remove_if_present(fs::remove_dir_all(self.root.join(dir)))
                .map_err(|e| WipeError::Navigation(format!("{dir}: {e}")))?;
        }
        debug!(root = %self.root.display(), "data directory reset");
        Ok(())
    }
}

fn remove_if_present(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn io_error(e: &io::Error) -> StorageError {
    StorageError::Io(e.to_string())
}
