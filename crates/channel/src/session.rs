//! Session identity and credential persistence. A successful handshake
//! saves credentials to disk so a process restart can reconnect without
//! re-pairing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use reclaim_core::ReclaimResult;

/// Lifecycle state of the channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    AwaitingHandshake,
    Connected,
    Disconnected,
}

/// Opaque credential blob issued by the channel provider on pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub device_id: String,
    pub auth_blob: String,
}

/// File-backed credential storage under `<session_path>/<session_id>.json`.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(session_path: &str, session_id: &str) -> Self {
        Self {
            path: PathBuf::from(session_path).join(format!("{session_id}.json")),
        }
    }

    /// Returns stored credentials, or `None` when absent or unreadable.
    /// An unreadable file means re-pairing, never a startup failure.
    pub fn load(&self) -> Option<SessionCredentials> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(creds) => {
                debug!(path = %self.path.display(), "restored session credentials");
                Some(creds)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding corrupt session credentials");
                None
            }
        }
    }

    pub fn save(&self, creds: &SessionCredentials) -> ReclaimResult<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(creds)?)?;
        debug!(path = %self.path.display(), "session credentials saved");
        Ok(())
    }

    /// Removes stored credentials, e.g. after an explicit logout.
    pub fn clear(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to clear session credentials");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_store() -> CredentialStore {
        let dir = std::env::temp_dir().join(format!("reclaim-session-{}", Uuid::new_v4()));
        CredentialStore::new(dir.to_str().unwrap(), "test_session")
    }

    #[test]
    fn test_save_load_clear_roundtrip() {
        let store = temp_store();
        assert!(store.load().is_none());

        let creds = SessionCredentials {
            device_id: "device-1".to_string(),
            auth_blob: "blob".to_string(),
        };
        store.save(&creds).unwrap();
        assert_eq!(store.load(), Some(creds));

        store.clear();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_corrupt_file_yields_none() {
        let store = temp_store();
        store
            .save(&SessionCredentials {
                device_id: "d".to_string(),
                auth_blob: "b".to_string(),
            })
            .unwrap();
        std::fs::write(&store.path, "not json").unwrap();
        assert!(store.load().is_none());
    }
}
