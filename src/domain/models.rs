use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A beacon observed during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Opaque, stable transport identifier
    pub id: String,
    pub name: Option<String>,
    /// Signal strength in dBm
    pub rssi: Option<i16>,
}

impl DeviceHandle {
    /// Name for display, falling back the way the device list does
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "Unknown Device",
        }
    }
}

/// The notification channel a connected session is subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub service: Uuid,
    pub characteristic: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Idle,
    Connecting(DeviceHandle),
    Connected(DeviceHandle, Subscription),
    Disconnecting,
    Failed(String),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting(_) => "Connecting...",
            ConnectionState::Connected(..) => "Connected",
            ConnectionState::Disconnecting => "Disconnecting...",
            ConnectionState::Failed(_) => "Failed",
        }
    }

    /// Whether a new connection attempt may start from this state
    pub fn is_at_rest(&self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Failed(_))
    }

    pub fn device(&self) -> Option<&DeviceHandle> {
        match self {
            ConnectionState::Connecting(device) | ConnectionState::Connected(device, _) => {
                Some(device)
            }
            _ => None,
        }
    }
}

/// Bytes exactly as delivered by the notification channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(Vec<u8>);

impl RawFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for RawFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// One decoded GPS sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Degrees, 1e-7 precision
    pub latitude: f64,
    /// Degrees, 1e-7 precision
    pub longitude: f64,
    /// Meters
    pub altitude: f64,
    /// Meters per second
    pub speed: f64,
    /// Degrees, 0-360
    pub course: f64,
    pub satellites: u8,
    /// Horizontal dilution of precision
    pub accuracy: f64,
    /// Calendar date stamped at decode time (the frame carries none)
    pub date: NaiveDate,
    /// Device time since the start of the hour, `MM:SS:CC`
    pub time: String,
    pub captured_at: DateTime<Utc>,
    #[serde(skip)]
    pub fix_quality: u8,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    DeviceFound(DeviceHandle),
    /// The scan window closed without a match and the roster now lists every device
    RosterFallback,
    ScanStopped,
    ScanFailed(String),
    ConnectionState(ConnectionState),
    /// A connect command was refused before any attempt started
    ConnectRefused(String),
    Reading(Reading),
    RecordingChanged(bool),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BluetoothCommand {
    StartScan,
    StopScan,
    Connect(String),
    Disconnect,
    StartRecording,
    StopRecording,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// Power state of the local Bluetooth radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
    Unknown,
}

impl std::fmt::Display for RadioState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RadioState::PoweredOn => "powered on",
            RadioState::PoweredOff => "powered off",
            RadioState::Unauthorized => "unauthorized",
            RadioState::Unsupported => "unsupported",
            RadioState::Unknown => "unknown",
        };
        f.write_str(label)
    }
}
