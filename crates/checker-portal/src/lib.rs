//! # checker-portal
//!
//! Captive WiFi provisioning portal for the door checker.
//!
//! While the device has no usable WiFi credentials it exposes a small web
//! form. Submitting a valid SSID and password stores the credentials and
//! resolves the portal, after which the telemetry client can be told that the
//! device is provisioned.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use checker_portal::Portal;
//!
//! let portal = Portal::new(store, scanned_networks);
//! let listener = TcpListener::bind("0.0.0.0:8080").await?;
//! let credentials = portal.run(listener).await?;
//! handle.provisioned().await?;
//! ```

mod pages;
pub mod routes;

pub use routes::create_router;

use std::sync::{Arc, Mutex, PoisonError};

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::info;

use checker_core::{ConfigError, CredentialStore, WifiCredentials};

/// Largest accepted form body in bytes.
pub const MAX_FORM_BYTES: usize = 1024;

/// Errors raised by the provisioning portal.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("Portal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to store credentials: {0}")]
    Storage(#[from] ConfigError),

    #[error("Portal stopped before credentials were saved")]
    Closed,
}

/// Shared state for the portal handlers.
pub struct PortalState {
    store: Arc<dyn CredentialStore>,
    networks: Vec<String>,
    saved: Mutex<Option<oneshot::Sender<WifiCredentials>>>,
}

impl PortalState {
    /// Create the state and the receiver that resolves on the first
    /// successful save.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        networks: Vec<String>,
    ) -> (Self, oneshot::Receiver<WifiCredentials>) {
        let (saved_tx, saved_rx) = oneshot::channel();
        let state = Self {
            store,
            networks,
            saved: Mutex::new(Some(saved_tx)),
        };
        (state, saved_rx)
    }

    /// SSIDs offered in the settings form. Empty means free text entry.
    pub fn networks(&self) -> &[String] {
        &self.networks
    }

    /// Validate and persist credentials, then fire the provisioning
    /// notification. Only the first save notifies.
    pub(crate) fn save(&self, credentials: WifiCredentials) -> Result<bool, PortalError> {
        if !credentials.is_valid() {
            return Ok(false);
        }
        self.store.set_credentials(&credentials)?;
        info!(ssid = %credentials.ssid, "WiFi credentials saved");

        let notifier = self
            .saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(notifier) = notifier {
            let _ = notifier.send(credentials);
        }
        Ok(true)
    }
}

/// Type alias for shared state in Axum handlers.
pub type AppState = Arc<PortalState>;

/// A provisioning portal ready to serve.
pub struct Portal {
    router: Router,
    saved: oneshot::Receiver<WifiCredentials>,
}

impl Portal {
    pub fn new(store: Arc<dyn CredentialStore>, networks: Vec<String>) -> Self {
        let (state, saved) = PortalState::new(store, networks);
        Self {
            router: create_router(Arc::new(state)),
            saved,
        }
    }

    /// Serve until credentials are saved, then shut down gracefully and
    /// return them.
    pub async fn run(self, listener: TcpListener) -> Result<WifiCredentials, PortalError> {
        info!(addr = ?listener.local_addr().ok(), "Provisioning portal listening");

        let saved = self.saved;
        let (done_tx, done_rx) = oneshot::channel();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                if let Ok(credentials) = saved.await {
                    let _ = done_tx.send(credentials);
                }
            })
            .await?;

        let credentials = done_rx.await.map_err(|_| PortalError::Closed)?;
        info!("Provisioning portal stopped");
        Ok(credentials)
    }
}
