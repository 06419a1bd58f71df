//! Client state file I/O.
//!
//! The former local-storage flag bag, persisted as one versioned JSON
//! document with secure file permissions (0o600). The remote database is
//! authoritative for everything here except the cached token pair.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use contrail_core::ClientState;

use crate::error::StoreError;

/// Current state file format version.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDocument {
    version: u32,
    last_updated: String,
    state: ClientState,
}

/// Load client state from file.
///
/// Returns `None` if the file doesn't exist, is invalid, or carries an
/// unknown version.
pub fn load_state(path: &Path) -> Option<ClientState> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("failed to read state file: {e}");
            return None;
        }
    };

    match serde_json::from_str::<StateDocument>(&data) {
        Ok(doc) if doc.version == STATE_VERSION => Some(doc.state),
        Ok(doc) => {
            tracing::warn!("unsupported state file version: {}", doc.version);
            None
        }
        Err(e) => {
            tracing::warn!("failed to parse state file: {e}");
            None
        }
    }
}

/// Save client state to file.
///
/// Creates parent directories if needed. Sets file permissions to 0o600.
pub fn save_state(path: &Path, state: &ClientState) -> Result<(), StoreError> {
    let doc = StateDocument {
        version: STATE_VERSION,
        last_updated: Utc::now().to_rfc3339(),
        state: state.clone(),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(&doc)?;
    std::fs::write(path, &json).map_err(|e| StoreError::Io(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }

    Ok(())
}

/// Shared handle over the persisted client state.
///
/// All in-process mutation is serialized through one mutex, and every
/// mutation is written back before the lock is released. Two OS processes
/// racing on the same file remain last-write-wins.
#[derive(Clone)]
pub struct StateStore {
    path: Arc<PathBuf>,
    state: Arc<Mutex<ClientState>>,
}

impl StateStore {
    /// Open the store, loading existing state or starting fresh.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = load_state(&path).unwrap_or_default();
        Self {
            path: Arc::new(path),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Snapshot of the current state.
    pub fn read(&self) -> ClientState {
        self.state.lock().clone()
    }

    /// Mutate the state and persist it before releasing the lock.
    pub fn update<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut ClientState),
    {
        let mut guard = self.state.lock();
        f(&mut guard);
        save_state(&self.path, &guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use contrail_core::{Phase, UserId};
    use tempfile::TempDir;

    fn test_path(dir: &TempDir) -> PathBuf {
        dir.path().join("state.json")
    }

    #[test]
    fn load_missing_file_returns_none() {
        let dir = TempDir::new().unwrap();
        assert!(load_state(&test_path(&dir)).is_none());
    }

    #[test]
    fn load_invalid_json_returns_none() {
        let dir = TempDir::new().unwrap();
        let path = test_path(&dir);
        std::fs::write(&path, "not json").unwrap();
        assert!(load_state(&path).is_none());
    }

    #[test]
    fn load_wrong_version_returns_none() {
        let dir = TempDir::new().unwrap();
        let path = test_path(&dir);
        std::fs::write(
            &path,
            r#"{"version":2,"lastUpdated":"2026-01-01T00:00:00Z","state":{}}"#,
        )
        .unwrap();
        assert!(load_state(&path).is_none());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = test_path(&dir);

        let mut state = ClientState::default();
        state.set_tokens(UserId::from_raw("user_1"), "acc", "ref");
        state.phase = Phase::ReconcilingSubscription;
        save_state(&path, &state).unwrap();

        let loaded = load_state(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("dir").join("state.json");
        save_state(&path, &ClientState::default()).unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn save_sets_permissions_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = test_path(&dir);
        save_state(&path, &ClientState::default()).unwrap();
        let perms = std::fs::metadata(&path).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }

    #[test]
    fn store_update_persists() {
        let dir = TempDir::new().unwrap();
        let path = test_path(&dir);

        let store = StateStore::open(&path);
        store
            .update(|state| {
                state.pending_activation = true;
                state.skip_initial_redirect = true;
            })
            .unwrap();

        // A second handle opened on the same path sees the write.
        let reopened = StateStore::open(&path);
        let state = reopened.read();
        assert!(state.pending_activation);
        assert!(state.skip_initial_redirect);
    }

    #[test]
    fn store_open_missing_starts_default() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(test_path(&dir));
        assert_eq!(store.read(), ClientState::default());
    }

    #[test]
    fn clones_share_state() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(test_path(&dir));
        let clone = store.clone();

        store.update(|s| s.is_admin = true).unwrap();
        assert!(clone.read().is_admin);
    }
}
