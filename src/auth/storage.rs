// Durable session storage
// One key per session field, so a partially written session is detectable

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::types::{Session, User};
use crate::error::StorageError;

pub const TOKEN_KEY: &str = "payflow_auth_token";
pub const REFRESH_TOKEN_KEY: &str = "payflow_refresh_token";
pub const USER_KEY: &str = "payflow_user_data";
pub const TOKEN_EXPIRY_KEY: &str = "payflow_token_expiry";

const SESSION_KEYS: [&str; 4] = [TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY, TOKEN_EXPIRY_KEY];

/// Durable key-value storage surviving process restarts
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        tracing::debug!("Opening session store: {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// Store that lives only as long as the process
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.conn().execute("DELETE FROM kv WHERE key = ?", [key])?;
        Ok(())
    }
}

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values().remove(key);
        Ok(())
    }
}

/// Persist every session field
pub fn save_session(store: &dyn SessionStore, session: &Session) -> Result<(), StorageError> {
    store.set(TOKEN_KEY, &session.access_token)?;
    store.set(REFRESH_TOKEN_KEY, &session.refresh_token)?;
    store.set(
        TOKEN_EXPIRY_KEY,
        &session.expires_at.timestamp_millis().to_string(),
    )?;
    match &session.user {
        Some(user) => store.set(USER_KEY, &serde_json::to_string(user)?)?,
        None => store.remove(USER_KEY)?,
    }
    Ok(())
}

/// Persist only the user record
pub fn save_user(store: &dyn SessionStore, user: &User) -> Result<(), StorageError> {
    store.set(USER_KEY, &serde_json::to_string(user)?)
}

/// Load a persisted session
///
/// Returns `None` unless both tokens are present. A missing expiry is read
/// as already expired; unreadable user data is dropped.
pub fn load_session(store: &dyn SessionStore) -> Result<Option<Session>, StorageError> {
    let (Some(access_token), Some(refresh_token)) =
        (store.get(TOKEN_KEY)?, store.get(REFRESH_TOKEN_KEY)?)
    else {
        return Ok(None);
    };

    let expires_at = match store.get(TOKEN_EXPIRY_KEY)? {
        Some(raw) => {
            let millis: i64 = raw.trim().parse().map_err(|_| StorageError::Corrupt {
                key: TOKEN_EXPIRY_KEY.to_string(),
                message: format!("not a timestamp: {}", raw),
            })?;
            DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
        }
        None => DateTime::<Utc>::default(),
    };

    let user = match store.get(USER_KEY)? {
        Some(raw) => match serde_json::from_str::<User>(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable persisted user data");
                None
            }
        },
        None => None,
    };

    Ok(Some(Session {
        access_token,
        refresh_token,
        expires_at,
        user,
    }))
}

/// Remove every session field; safe when nothing is stored
pub fn clear_session(store: &dyn SessionStore) -> Result<(), StorageError> {
    for key in SESSION_KEYS {
        store.remove(key)?;
    }
    Ok(())
}
