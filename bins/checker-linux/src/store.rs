//! JSON file credential store.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use checker_core::{ConfigError, CredentialStore, StoredConfig, WifiCredentials};

/// Credential store persisted as a single JSON document.
///
/// The whole document is kept in memory and rewritten on every change.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    config: Mutex<StoredConfig>,
}

impl FileCredentialStore {
    /// Open the store at `path`. A missing file yields an empty store; the
    /// file is created on the first write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| ConfigError::InvalidData(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == ErrorKind::NotFound => StoredConfig::default(),
            Err(e) => return Err(ConfigError::ReadError(format!("{}: {}", path.display(), e))),
        };

        Ok(Self {
            path,
            config: Mutex::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&StoredConfig) -> T) -> T {
        f(&self.config.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn update(&self, f: impl FnOnce(&mut StoredConfig)) -> Result<(), ConfigError> {
        let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = config.clone();
        f(&mut next);

        let json = serde_json::to_string_pretty(&next)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        fs::write(&self.path, json)
            .map_err(|e| ConfigError::WriteError(format!("{}: {}", self.path.display(), e)))?;

        *config = next;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn device_id(&self) -> Result<Option<String>, ConfigError> {
        Ok(self.read(|c| c.device_id.clone()))
    }

    fn set_device_id(&self, id: &str) -> Result<(), ConfigError> {
        self.update(|c| c.device_id = Some(id.to_string()))
    }

    fn credentials(&self) -> Result<Option<WifiCredentials>, ConfigError> {
        Ok(self.read(|c| c.wifi.clone()))
    }

    fn set_credentials(&self, credentials: &WifiCredentials) -> Result<(), ConfigError> {
        self.update(|c| c.wifi = Some(credentials.clone()))
    }

    fn clear_credentials(&self) -> Result<(), ConfigError> {
        self.update(|c| c.wifi = None)
    }

    fn server_url(&self) -> Result<Option<String>, ConfigError> {
        Ok(self.read(|c| c.server_url.clone()))
    }

    fn set_server_url(&self, url: &str) -> Result<(), ConfigError> {
        self.update(|c| c.server_url = Some(url.to_string()))
    }
}
