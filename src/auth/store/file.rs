//! File-based credential storage.

use super::CredentialStore;
use crate::auth::credentials::Credentials;
use crate::auth::error::AuthError;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// File permissions for credential files (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Stores credentials as one JSON file per account: `{dir}/{account}.json`.
///
/// Files are written to a temp file and renamed into place; on Unix the
/// file is created 0600 and the directory 0700.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn account_path(&self, account: &str) -> Result<PathBuf, AuthError> {
        if account.is_empty() {
            return Err(AuthError::Storage("Account name cannot be empty".to_string()));
        }

        // Only alphanumerics, hyphen, underscore: rules out traversal and separators.
        if !account
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AuthError::Storage(format!(
                "Invalid account name '{}': contains invalid characters",
                account
            )));
        }

        Ok(self.dir.join(format!("{}.json", account)))
    }

    fn ensure_dir(&self) -> Result<(), AuthError> {
        if self.dir.exists() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.dir).map_err(|e| {
            AuthError::Storage(format!(
                "Failed to create credential directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(DIR_MODE);
            std::fs::set_permissions(&self.dir, perms).map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to set directory permissions on '{}': {}",
                    self.dir.display(),
                    e
                ))
            })?;
        }

        Ok(())
    }

    fn write_temp(temp_path: &Path, content: &str) -> Result<(), AuthError> {
        let io_err = |e: std::io::Error| {
            AuthError::Storage(format!(
                "Failed to write temp file '{}': {}",
                temp_path.display(),
                e
            ))
        };

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(temp_path)
                .map_err(io_err)?;
            file.write_all(content.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(temp_path, content).map_err(io_err)?;
        }

        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    #[instrument(skip(self))]
    fn get(&self, account: &str) -> Result<Option<Credentials>, AuthError> {
        let path = self.account_path(account)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuthError::Storage(format!(
                    "Failed to read credential file '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let credentials = serde_json::from_str(&content).map_err(|e| {
            AuthError::Storage(format!(
                "Failed to parse credential file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Ok(Some(credentials))
    }

    #[instrument(skip(self, credentials))]
    fn set(&self, account: &str, credentials: &Credentials) -> Result<(), AuthError> {
        self.ensure_dir()?;

        let path = self.account_path(account)?;
        let content = serde_json::to_string_pretty(credentials)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize credentials: {}", e)))?;

        let temp_path = path.with_extension("tmp");
        Self::write_temp(&temp_path, &content)?;

        if let Err(e) = std::fs::rename(&temp_path, &path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(AuthError::Storage(format!(
                "Failed to rename '{}' to '{}': {}",
                temp_path.display(),
                path.display(),
                e
            )));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    fn clear(&self, account: &str) -> Result<(), AuthError> {
        let path = self.account_path(account)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Storage(format!(
                "Failed to remove credential file '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::new("access".into(), Some("refresh".into()), Some(3600))
    }

    #[test]
    fn test_file_set_get_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("creds"));

        assert!(store.get("default").unwrap().is_none());

        store.set("default", &credentials()).unwrap();
        let loaded = store.get("default").unwrap().unwrap();
        assert_eq!(loaded.access_token, "access");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh"));
        assert!(loaded.expires_at.is_some());

        store.clear("default").unwrap();
        assert!(store.get("default").unwrap().is_none());
        store.clear("default").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("creds"));
        store.set("default", &credentials()).unwrap();

        let file_mode = std::fs::metadata(store.dir().join("default.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);

        let dir_mode = std::fs::metadata(store.dir()).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn test_file_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        assert!(store.get("../etc/passwd").is_err());
        assert!(store.set("a/b", &credentials()).is_err());
        assert!(store.clear("").is_err());
    }

    #[test]
    fn test_file_empty_content_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        std::fs::write(dir.path().join("default.json"), "  \n").unwrap();
        assert!(store.get("default").unwrap().is_none());
    }

    #[test]
    fn test_file_corrupt_content_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        std::fs::write(dir.path().join("default.json"), "{not json").unwrap();
        assert!(matches!(store.get("default"), Err(AuthError::Storage(_))));
    }
}
