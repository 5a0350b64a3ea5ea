//! Lazy device identity.
//!
//! Resolution order: in-memory value, then the persisted id, then a fresh
//! registration with the backend whose payload is exchanged for a stable id.
//! Any failure yields `None`; telemetry continues without a device id.

use super::TelemetryTransport;
use super::record::FRAMEWORK_NAME;
use duet_kernel::storage::KeyValueStore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const DEVICE_ID_KEY: &str = "duet_device_id";

/// Payload used when telemetry is disabled and the backend is never contacted.
pub const TELEMETRY_DISABLED_PAYLOAD: &str = "telemetry-disabled";

/// Turns an opaque registration payload into a stable device id.
pub trait DeviceIdExchange: Send + Sync {
    fn exchange(&self, payload: &str) -> Option<String>;
}

/// Default exchange: hex SHA-256 of the payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Exchange;

impl DeviceIdExchange for Sha256Exchange {
    fn exchange(&self, payload: &str) -> Option<String> {
        let payload = payload.trim();
        if payload.is_empty() {
            return None;
        }
        Some(hex::encode(Sha256::digest(payload.as_bytes())))
    }
}

/// Metadata sent with a device registration.
pub fn device_metadata() -> HashMap<String, String> {
    HashMap::from([
        ("os".to_string(), std::env::consts::OS.to_string()),
        ("arch".to_string(), std::env::consts::ARCH.to_string()),
        ("family".to_string(), std::env::consts::FAMILY.to_string()),
        ("framework".to_string(), FRAMEWORK_NAME.to_string()),
        (
            "framework_version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        ),
    ])
}

pub struct DeviceIdentity {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn TelemetryTransport>,
    exchange: Arc<dyn DeviceIdExchange>,
    metadata: HashMap<String, String>,
    resolved: Mutex<Option<String>>,
}

impl DeviceIdentity {
    pub fn new(store: Arc<dyn KeyValueStore>, transport: Arc<dyn TelemetryTransport>) -> Self {
        Self {
            store,
            transport,
            exchange: Arc::new(Sha256Exchange),
            metadata: device_metadata(),
            resolved: Mutex::new(None),
        }
    }

    pub fn with_exchange(mut self, exchange: Arc<dyn DeviceIdExchange>) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Resolve the device id, registering the device at most once per success.
    pub async fn device_id(&self, telemetry_enabled: bool) -> Option<String> {
        let mut resolved = self.resolved.lock().await;
        if let Some(id) = resolved.as_ref() {
            return Some(id.clone());
        }

        match self.store.get(DEVICE_ID_KEY).await {
            Ok(Some(id)) if !id.is_empty() => {
                *resolved = Some(id.clone());
                return Some(id);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to read cached device id"),
        }

        let payload = if telemetry_enabled {
            warn!("no cached device id, registering device");
            match self.transport.register_device(&self.metadata).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "device registration failed");
                    return None;
                }
            }
        } else {
            TELEMETRY_DISABLED_PAYLOAD.to_string()
        };

        let id = self.exchange.exchange(&payload)?;
        if let Err(e) = self.store.put(DEVICE_ID_KEY, id.clone()).await {
            warn!(error = %e, "failed to cache device id");
        }
        info!(device_id = %id, "device registered");
        *resolved = Some(id.clone());
        Some(id)
    }
}
