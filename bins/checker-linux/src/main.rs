mod store;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use checker_client::{ClientConfig, ConnectionState, TelemetryClient, TelemetryHandle};
use checker_core::{ConfigError, CredentialStore, SharedDeviceState};
use checker_portal::Portal;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::store::FileCredentialStore;

/// Host settings read from the environment.
#[derive(Debug)]
struct Settings {
    config_path: PathBuf,
    portal_addr: SocketAddr,
    door_period: Duration,
    networks: Vec<String>,
}

impl Settings {
    fn from_env() -> anyhow::Result<Self> {
        let config_path: PathBuf = std::env::var("CHECKER_CONFIG")
            .unwrap_or_else(|_| "checker.json".into())
            .into();
        let portal_addr: SocketAddr = std::env::var("CHECKER_PORTAL_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".into())
            .parse()?;
        let door_period = std::env::var("CHECKER_DOOR_PERIOD_SECS")
            .unwrap_or_else(|_| "15".into())
            .parse()
            .map(Duration::from_secs)?;
        // Networks offered by the portal, comma separated
        let networks: Vec<String> = std::env::var("CHECKER_SSIDS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|ssid| !ssid.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            config_path,
            portal_addr,
            door_period,
            networks,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,checker_client=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Door checker starting...");

    let settings = Settings::from_env()?;
    let store = Arc::new(FileCredentialStore::open(&settings.config_path)?);
    tracing::info!("Using settings file {}", store.path().display());
    ensure_device_id(store.as_ref())?;

    let device = Arc::new(SharedDeviceState::new(false, 100));
    let client = TelemetryClient::new(ClientConfig::default(), store.clone(), device.clone())?;
    tracing::info!(
        id = %client.identity(),
        url = client.server_url(),
        "Telemetry client configured"
    );

    let provisioned = client.is_provisioned();
    let (handle, mut client_task) = client.spawn();

    let portal_handle = (!provisioned).then(|| {
        let (addr, networks) = (settings.portal_addr, settings.networks.clone());
        let (store, handle) = (store.clone(), handle.clone());
        tokio::spawn(async move {
            if let Err(e) = run_portal(addr, store, networks, handle).await {
                tracing::error!("Provisioning portal error: {}", e);
            }
        })
    });

    let door_handle = tokio::spawn(simulate_door(
        device,
        handle.clone(),
        settings.door_period,
    ));
    let state_handle = tokio::spawn(log_state_changes(handle.subscribe()));

    // Wait for shutdown signal
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = &mut client_task => {
            tracing::warn!("Telemetry client stopped");
        }
    }

    door_handle.abort();
    state_handle.abort();
    if let Some(portal) = portal_handle {
        portal.abort();
    }
    if handle.shutdown().await.is_ok() {
        client_task.await?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Give the device a persistent identity on first start.
fn ensure_device_id(store: &dyn CredentialStore) -> Result<(), ConfigError> {
    match store.device_id()? {
        Some(id) if !id.is_empty() => Ok(()),
        _ => {
            let id = Uuid::new_v4().to_string();
            store.set_device_id(&id)?;
            tracing::info!(id = %id, "Generated device identity");
            Ok(())
        }
    }
}

/// Serve the provisioning portal until credentials are saved.
async fn run_portal(
    addr: SocketAddr,
    store: Arc<FileCredentialStore>,
    networks: Vec<String>,
    handle: TelemetryHandle,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Provisioning portal at http://{}/", addr);

    let credentials = Portal::new(store, networks).run(listener).await?;
    tracing::info!(ssid = %credentials.ssid, "Device provisioned");
    handle.provisioned().await?;
    Ok(())
}

/// Simulated door sensor: toggles the door and drains the battery slowly.
async fn simulate_door(device: Arc<SharedDeviceState>, handle: TelemetryHandle, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    let mut open = false;
    let mut battery: u8 = 100;

    loop {
        interval.tick().await;

        open = !open;
        battery = battery.saturating_sub(1);
        device.set_battery_percent(battery);

        if let Some(door) = device.set_open(open) {
            tracing::info!(open, battery, "Door changed");
            handle.report_door_change(door);
        }
    }
}

async fn log_state_changes(mut state: watch::Receiver<ConnectionState>) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        tracing::info!(state = %current, "Connection state changed");
    }
}
