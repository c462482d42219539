//! Transport capability
//!
//! The platform Bluetooth stack, reduced to what discovery and the connection
//! session need. Events flow back over unbounded channels so that each scan
//! and each subscription has exactly one consumer.

use crate::domain::error::TransportError;
use crate::domain::models::{DeviceHandle, RadioState, RawFrame};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One advertisement as reported by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub service_uuids: Vec<Uuid>,
}

impl Advertisement {
    pub fn advertises_any(&self, filter: &[Uuid]) -> bool {
        self.service_uuids.iter().any(|uuid| filter.contains(uuid))
    }

    pub fn to_handle(&self) -> DeviceHandle {
        DeviceHandle {
            id: self.id.clone(),
            name: self.name.clone().filter(|name| !name.is_empty()),
            rssi: self.rssi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Observed(Advertisement),
    /// The platform aborted the scan
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    Value(RawFrame),
    Error(String),
    /// The link to the device dropped
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    pub timeout: Duration,
    /// Requested transfer-unit size; platforms may ignore it
    pub mtu: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    async fn radio_state(&self) -> Result<RadioState, TransportError>;

    /// Start scanning. `filter` is a hint: implementations may deliver
    /// advertisements that do not carry any of the listed identifiers.
    async fn start_scan(
        &self,
        filter: &[Uuid],
    ) -> Result<mpsc::UnboundedReceiver<ScanEvent>, TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn connect(&self, device_id: &str, options: ConnectOptions)
        -> Result<(), TransportError>;

    async fn cancel_connection(&self, device_id: &str) -> Result<(), TransportError>;

    async fn discover_services(
        &self,
        device_id: &str,
    ) -> Result<Vec<DiscoveredService>, TransportError>;

    async fn subscribe(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<NotificationEvent>, TransportError>;

    async fn unsubscribe(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError>;
}
