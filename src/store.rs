//! Local session store
//!
//! Persists the login session and the per-install device UUID across process
//! restarts, as JSON files inside a state directory. Logout clears the
//! session in full; the device UUID survives logout (it identifies the
//! install, not the user) and is only removed by an explicit reset.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const SESSION_FILE: &str = "session.json";
const DEVICE_UUID_FILE: &str = "device_uuid";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt store file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Persisted login session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub user_id: String,
    pub expires_at: Option<String>,
    pub expiry_date: Option<String>,
    pub is_logged_in: bool,
}

/// File-backed store for session state and the device UUID
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    fn device_uuid_path(&self) -> PathBuf {
        self.dir.join(DEVICE_UUID_FILE)
    }

    /// Load the persisted session, if any
    pub fn load(&self) -> Result<Option<StoredSession>, StoreError> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path)?;
        let session: StoredSession = serde_json::from_str(&data)?;
        debug!("Loaded stored session for user {}", session.user_id);
        Ok(Some(session))
    }

    /// Persist the session
    pub fn save(&self, session: &StoredSession) -> Result<(), StoreError> {
        let data = serde_json::to_string_pretty(session)?;
        fs::write(self.session_path(), data)?;
        debug!("Saved session for user {}", session.user_id);
        Ok(())
    }

    /// Clear the session in full (logout)
    pub fn clear(&self) -> Result<(), StoreError> {
        let path = self.session_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        info!("Cleared stored session");
        Ok(())
    }

    /// Get the per-install device UUID, generating and persisting it on
    /// first use
    pub fn device_uuid(&self) -> Result<String, StoreError> {
        let path = self.device_uuid_path();
        if path.exists() {
            let uuid = fs::read_to_string(&path)?.trim().to_string();
            if !uuid.is_empty() {
                return Ok(uuid);
            }
        }
        let uuid = Uuid::new_v4().to_string();
        fs::write(&path, &uuid)?;
        info!("Generated device UUID {}", uuid);
        Ok(uuid)
    }

    /// Forget the device UUID (device change); a new one is generated on the
    /// next `device_uuid` call
    pub fn reset_device_uuid(&self) -> Result<(), StoreError> {
        let path = self.device_uuid_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_session() -> StoredSession {
        StoredSession {
            access_token: "tok-123".to_string(),
            user_id: "emp01".to_string(),
            expires_at: Some("2026-09-01T00:00:00+00:00".to_string()),
            expiry_date: Some("2026-12-31".to_string()),
            is_logged_in: true,
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        assert!(store.load().unwrap().is_none());
        store.save(&sample_session()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample_session()));
    }

    #[test]
    fn test_clear_removes_session() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        store.save(&sample_session()).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // Clearing an already-empty store is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_device_uuid_is_stable() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        let first = store.device_uuid().unwrap();
        let second = store.device_uuid().unwrap();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_device_uuid_regenerated_over_empty_file() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        // A truncated file is read, rejected, and overwritten in one call
        fs::write(dir.path().join(DEVICE_UUID_FILE), "").unwrap();
        let uuid = store.device_uuid().unwrap();
        assert!(Uuid::parse_str(&uuid).is_ok());
        assert_eq!(store.device_uuid().unwrap(), uuid);
    }

    #[test]
    fn test_device_uuid_survives_logout_but_not_reset() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        let original = store.device_uuid().unwrap();
        store.save(&sample_session()).unwrap();
        store.clear().unwrap();
        assert_eq!(store.device_uuid().unwrap(), original);

        store.reset_device_uuid().unwrap();
        assert_ne!(store.device_uuid().unwrap(), original);
    }
}
