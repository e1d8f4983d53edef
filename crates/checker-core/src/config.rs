//! Credential storage abstraction.
//!
//! The device persists three things across reboots: its identifier, the WiFi
//! credentials entered through the provisioning portal, and the telemetry
//! server URL. Storage is platform specific:
//! - Linux: a JSON file (see the `checker-linux` binary)
//! - Embedded: NVS flash
//!
//! All methods are synchronous to support embedded platforms.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Server used when no valid URL has been stored.
pub const DEFAULT_SERVER_URL: &str = "ws://leinne.net:33877/ws";

/// Minimum accepted WiFi password length (WPA2 requires 8 characters).
pub const MIN_PASSWORD_LEN: usize = 8;

/// Failures of the persistent settings store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The backing storage could not be read.
    #[error("Failed to read device settings: {0}")]
    ReadError(String),

    /// A change could not be persisted.
    #[error("Failed to persist device settings: {0}")]
    WriteError(String),

    /// Stored settings exist but cannot be decoded.
    #[error("Stored device settings are corrupt: {0}")]
    InvalidData(String),

    /// The store is not usable at all (poisoned lock, missing flash partition).
    #[error("Settings storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// WiFi station credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    /// WiFi network SSID.
    pub ssid: String,

    /// WiFi network password.
    pub password: String,
}

impl WifiCredentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// Credentials are usable when the SSID is set and the password has at
    /// least [`MIN_PASSWORD_LEN`] characters.
    pub fn is_valid(&self) -> bool {
        !self.ssid.is_empty() && self.password.len() >= MIN_PASSWORD_LEN
    }
}

/// Persistent key-value storage consumed by the connection core.
pub trait CredentialStore: Send + Sync {
    /// Load the stored device identifier, if any.
    fn device_id(&self) -> Result<Option<String>, ConfigError>;

    /// Save the device identifier.
    fn set_device_id(&self, id: &str) -> Result<(), ConfigError>;

    /// Load WiFi credentials, if any were saved.
    fn credentials(&self) -> Result<Option<WifiCredentials>, ConfigError>;

    /// Save WiFi credentials.
    fn set_credentials(&self, credentials: &WifiCredentials) -> Result<(), ConfigError>;

    /// Remove stored WiFi credentials (factory reset).
    fn clear_credentials(&self) -> Result<(), ConfigError>;

    /// Load the telemetry server URL, if any.
    fn server_url(&self) -> Result<Option<String>, ConfigError>;

    /// Save the telemetry server URL.
    fn set_server_url(&self, url: &str) -> Result<(), ConfigError>;
}

/// Return stored credentials only when they pass validation.
pub fn valid_credentials<S: CredentialStore + ?Sized>(
    store: &S,
) -> Result<Option<WifiCredentials>, ConfigError> {
    Ok(store.credentials()?.filter(WifiCredentials::is_valid))
}

/// Resolve the telemetry server URL.
///
/// A missing URL, or one that is not a `ws://`/`wss://` URL, is replaced by
/// [`DEFAULT_SERVER_URL`] and the default is written back to the store.
pub fn resolve_server_url<S: CredentialStore + ?Sized>(store: &S) -> Result<String, ConfigError> {
    match store.server_url()? {
        Some(url) if is_websocket_url(&url) => Ok(url),
        _ => {
            store.set_server_url(DEFAULT_SERVER_URL)?;
            Ok(DEFAULT_SERVER_URL.to_string())
        }
    }
}

fn is_websocket_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

/// Contents of a credential store, serialized as one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi: Option<WifiCredentials>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
}

/// Volatile credential store, used for tests and simulators.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<StoredConfig>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StoredConfig) -> Self {
        Self {
            inner: Mutex::new(config),
        }
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> StoredConfig {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut StoredConfig)) -> Result<(), ConfigError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| ConfigError::StorageUnavailable("store lock poisoned".to_string()))?;
        f(&mut *guard);
        Ok(())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn device_id(&self) -> Result<Option<String>, ConfigError> {
        Ok(self.snapshot().device_id)
    }

    fn set_device_id(&self, id: &str) -> Result<(), ConfigError> {
        self.update(|c| c.device_id = Some(id.to_string()))
    }

    fn credentials(&self) -> Result<Option<WifiCredentials>, ConfigError> {
        Ok(self.snapshot().wifi)
    }

    fn set_credentials(&self, credentials: &WifiCredentials) -> Result<(), ConfigError> {
        self.update(|c| c.wifi = Some(credentials.clone()))
    }

    fn clear_credentials(&self) -> Result<(), ConfigError> {
        self.update(|c| c.wifi = None)
    }

    fn server_url(&self) -> Result<Option<String>, ConfigError> {
        Ok(self.snapshot().server_url)
    }

    fn set_server_url(&self, url: &str) -> Result<(), ConfigError> {
        self.update(|c| c.server_url = Some(url.to_string()))
    }
}
