//! Bluetooth Module
//!
//! Discovers GPS beacons, holds one connection and turns notification
//! frames into readings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (Main coordinator - public API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Roster   │  │  Session   │  │ Protocol │
//! │           │  │            │  │          │
//! │ - scan    │  │ - connect  │  │ - UUIDs  │
//! │ - fallback│  │ - GATT     │  │ - frame  │
//! │           │  │ - pump     │  │   decode │
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       │              │
//!       └──────┬───────┘
//!              ▼
//!      ┌───────────────┐
//!      │ BleTransport  │  (WinRT on Windows)
//!      └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, timeouts and the binary frame decoder
//! - [`transport`] - Platform seam used by the roster and the session
//! - [`scanner`] - Discovery roster with the fallback window
//! - [`connection`] - Connection state machine and notification pump
//! - [`service`] - Main service coordinator

pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;

#[cfg(windows)]
pub mod winrt;

// Re-export main service for convenience
pub use service::BluetoothService;
