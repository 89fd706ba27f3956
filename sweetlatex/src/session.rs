use log::warn;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Key under which the access token is persisted.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("session file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("session file {path} is not a JSON object")]
    Malformed { path: PathBuf },
    #[error("encoding session state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("token store lock poisoned")]
    Poisoned,
}

/// Holder of the one access token a client authenticates with.
///
/// Implementations use interior mutability so a single client can be shared by reference. Two
/// racing writers are not coordinated beyond that: the last write wins.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn store(&self, token: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        MemoryTokenStore::default()
    }

    pub fn with_token(token: &str) -> Self {
        MemoryTokenStore {
            token: Mutex::new(Some(token.to_string())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<String> {
        self.token.lock().ok()?.clone()
    }

    fn store(&self, token: &str) -> Result<(), StoreError> {
        *self.token.lock().map_err(|_| StoreError::Poisoned)? = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.token.lock().map_err(|_| StoreError::Poisoned)? = None;
        Ok(())
    }
}

/// Small JSON key-value file, eg `{"accessToken": "..."}`, which survives restarts.
///
/// Other keys in the file are preserved. A missing file reads as "no token".
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileTokenStore {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, Value>, StoreError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(StoreError::Malformed {
                path: self.path.clone(),
            }),
        }
    }

    fn write_map(&self, map: Map<String, Value>) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(&Value::Object(map))?;
        std::fs::write(&self.path, raw).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Like `read_map()`, but a corrupt file is discarded rather than blocking a rewrite.
    fn read_map_for_update(&self) -> Result<Map<String, Value>, StoreError> {
        match self.read_map() {
            Err(StoreError::Malformed { path }) => {
                warn!("discarding malformed session file: {}", path.display());
                Ok(Map::new())
            }
            other => other,
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        let _guard = self.lock.lock().ok()?;
        match self.read_map() {
            Ok(map) => map
                .get(ACCESS_TOKEN_KEY)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            Err(e) => {
                warn!("ignoring unreadable session state: {e}");
                None
            }
        }
    }

    fn store(&self, token: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut map = self.read_map_for_update()?;
        map.insert(ACCESS_TOKEN_KEY.to_string(), Value::String(token.to_string()));
        self.write_map(map)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut map = self.read_map_for_update()?;
        if map.remove(ACCESS_TOKEN_KEY).is_none() && !self.path.exists() {
            return Ok(());
        }
        self.write_map(map)
    }
}

#[test]
fn test_memory_store() {
    let store = MemoryTokenStore::new();
    assert_eq!(store.load(), None);
    store.store("abc").unwrap();
    assert_eq!(store.load(), Some("abc".to_string()));
    store.store("def").unwrap();
    assert_eq!(store.load(), Some("def".to_string()));
    store.clear().unwrap();
    assert_eq!(store.load(), None);
    assert_eq!(
        MemoryTokenStore::with_token("xyz").load(),
        Some("xyz".to_string())
    );
}

#[test]
fn test_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let store = FileTokenStore::new(&path);
    assert_eq!(store.load(), None);
    // clearing with no file is fine, and doesn't create one
    store.clear().unwrap();
    assert!(!path.exists());

    store.store("abc").unwrap();
    // a second handle on the same file sees the token, as after a restart
    assert_eq!(
        FileTokenStore::new(&path).load(),
        Some("abc".to_string())
    );
    let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw[ACCESS_TOKEN_KEY], Value::String("abc".to_string()));

    store.clear().unwrap();
    assert_eq!(store.load(), None);
}

#[test]
fn test_file_store_preserves_other_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, r#"{"theme": "dark"}"#).unwrap();

    let store = FileTokenStore::new(&path);
    store.store("abc").unwrap();
    store.clear().unwrap();
    let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw, serde_json::json!({"theme": "dark"}));
}

#[test]
fn test_file_store_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, "not json").unwrap();

    let store = FileTokenStore::new(&path);
    assert_eq!(store.load(), None);
    store.store("abc").unwrap();
    assert_eq!(store.load(), Some("abc".to_string()));
}
