//! Error types
//!
//! [`BeaconError`] covers conditions the caller sees. Frame and validation
//! errors never leave the connection session; bad frames are routine on a
//! lossy notification channel and are dropped where they occur.

use crate::domain::models::RadioState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BeaconError {
    #[error("Bluetooth radio is not available ({0})")]
    RadioUnavailable(RadioState),

    #[error("Scan failed: {0}")]
    ScanError(String),

    #[error("A connection attempt is already in progress")]
    AlreadyInProgress,

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Device {0} is not in the roster")]
    UnknownDevice(String),

    #[error("Discovery roster has been released")]
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Frame too short: {len} bytes (need at least {min})")]
    FrameTooShort { len: usize, min: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Failure reported by the platform Bluetooth stack
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
