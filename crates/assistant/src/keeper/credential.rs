//! Credential storage
//!
//! The backend credential is the only shared mutable state in the system.
//! It is reachable only through a [`CredentialStore`] owned by the
//! [`TokenKeeper`](super::TokenKeeper).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Token type used when the backend doesn't send one
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Credential filename in the Mailpilot config directory
pub const CREDENTIAL_FILE: &str = "backend-credential.json";

/// Backend bearer credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "backend_token")]
    token: String,
    token_type: String,
    #[serde(rename = "auth_time")]
    obtained_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: impl Into<String>, token_type: Option<String>) -> Self {
        let token_type = token_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string());
        Self {
            token: token.into(),
            token_type,
            obtained_at: Utc::now(),
        }
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    /// Value for the `Authorization` header
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Storage for the single backend credential
pub trait CredentialStore: Send + Sync {
    /// Get the stored credential, if any
    fn get(&self) -> Result<Option<Credential>>;

    /// Store a credential, replacing any previous one
    fn set(&self, credential: Credential) -> Result<()>;

    /// Remove the stored credential
    fn clear(&self) -> Result<()>;
}

/// Process-local credential storage
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<Credential>> {
        let slot = self
            .slot
            .read()
            .map_err(|_| anyhow::anyhow!("credential lock poisoned"))?;
        Ok(slot.clone())
    }

    fn set(&self, credential: Credential) -> Result<()> {
        let mut slot = self
            .slot
            .write()
            .map_err(|_| anyhow::anyhow!("credential lock poisoned"))?;
        *slot = Some(credential);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut slot = self
            .slot
            .write()
            .map_err(|_| anyhow::anyhow!("credential lock poisoned"))?;
        *slot = None;
        Ok(())
    }
}

/// Credential persisted as JSON (`~/.config/mailpilot/backend-credential.json`)
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the given config directory
    pub fn in_dir(dir: &config::ConfigDir) -> Self {
        Self::new(dir.path(CREDENTIAL_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let credential = config::load_json_file(&self.path)?;
        Ok(Some(credential))
    }

    fn set(&self, credential: Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(&credential)?;
        let mut file = open_owner_only(&self.path)
            .with_context(|| format!("Failed to open credential: {}", self.path.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write credential: {}", self.path.display()))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove credential: {}", self.path.display())),
        }
    }
}

/// Open for writing, truncated; on unix the file is never readable by others,
/// even for the moment between creation and the first write
#[cfg(unix)]
fn open_owner_only(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_owner_only(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_token_type() {
        let credential = Credential::new("abc", None);
        assert_eq!(credential.authorization(), "Bearer abc");

        let credential = Credential::new("abc", Some("  ".into()));
        assert_eq!(credential.token_type(), "Bearer");

        let credential = Credential::new("abc", Some("bearer".into()));
        assert_eq!(credential.authorization(), "bearer abc");
    }

    #[test]
    fn test_debug_redacts_token() {
        let credential = Credential::new("super-secret", None);
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_memory_store_set_get_clear() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().unwrap().is_none());

        store.set(Credential::new("one", None)).unwrap();
        store.set(Credential::new("two", None)).unwrap();
        assert_eq!(store.get().unwrap().unwrap().authorization(), "Bearer two");

        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join(CREDENTIAL_FILE);

        FileCredentialStore::new(&path)
            .set(Credential::new("persisted", Some("Bearer".into())))
            .unwrap();

        let reopened = FileCredentialStore::new(&path);
        let credential = reopened.get().unwrap().unwrap();
        assert_eq!(credential.authorization(), "Bearer persisted");

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("backend_token"));
        assert!(raw.contains("auth_time"));
    }

    #[test]
    fn test_file_store_clear_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path().join(CREDENTIAL_FILE));
        store.clear().unwrap();

        store.set(Credential::new("x", None)).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path().join(CREDENTIAL_FILE));
        store.set(Credential::new("x", None)).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_tightens_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CREDENTIAL_FILE);
        std::fs::write(&path, "a much longer stale payload than the new credential").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileCredentialStore::new(&path);
        store.set(Credential::new("fresh", None)).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.get().unwrap().unwrap().authorization(), "Bearer fresh");
    }
}
