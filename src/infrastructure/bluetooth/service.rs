//! Bluetooth Service Module
//!
//! Coordinates discovery, the connection session and the track recorder,
//! and serialises commands from the front end.

use crate::domain::error::BeaconError;
use crate::domain::models::{
    AppEvent, BluetoothCommand, ConnectionState, DeviceHandle, MessageSeverity, Reading,
    StatusMessage,
};
use crate::domain::track::{TrackRecorder, TrackSnapshot};
use crate::infrastructure::bluetooth::{
    connection::ConnectionSession,
    protocol::SCAN_FILTER,
    scanner::{DiscoveryRoster, RosterMode},
    transport::BleTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService<T: BleTransport> {
    roster: DiscoveryRoster<T>,
    session: Arc<ConnectionSession<T>>,
    recorder: Arc<TrackRecorder>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    connect_task: Option<JoinHandle<()>>,
}

impl<T: BleTransport> BluetoothService<T> {
    pub fn new(transport: Arc<T>, event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        let recorder = TrackRecorder::new();
        Self {
            roster: DiscoveryRoster::new(Arc::clone(&transport), event_sender.clone()),
            session: ConnectionSession::new(
                transport,
                event_sender.clone(),
                Arc::clone(&recorder),
            ),
            recorder,
            event_sender,
            connect_task: None,
        }
    }

    /// Start scanning for GPS beacons
    pub async fn start_scan(&mut self) -> Result<(), BeaconError> {
        self.roster.start_scan(&SCAN_FILTER).await
    }

    /// Stop scanning
    pub async fn stop_scan(&mut self) {
        self.roster.stop_scan().await;
    }

    /// Connect to a roster entry.
    ///
    /// The attempt runs in the background so that [`Self::disconnect`] can
    /// cancel it; its outcome arrives as events.
    pub async fn connect(&mut self, device_id: &str) -> Result<(), BeaconError> {
        let device = self
            .roster
            .find(device_id)
            .ok_or_else(|| BeaconError::UnknownDevice(device_id.to_string()))?;
        if !self.session.state().is_at_rest() {
            return Err(BeaconError::AlreadyInProgress);
        }

        self.roster.stop_scan().await;

        let session = Arc::clone(&self.session);
        let sender = self.event_sender.clone();
        self.connect_task = Some(tokio::spawn(async move {
            match session.connect(device).await {
                Ok(()) | Err(BeaconError::Cancelled) => {}
                Err(e) => {
                    error!("Connection failed: {}", e);
                    let _ = sender.send(AppEvent::LogMessage(StatusMessage {
                        message: format!("Connection failed: {}", e),
                        severity: MessageSeverity::Error,
                    }));
                }
            }
        }));
        Ok(())
    }

    /// Disconnect from the current device, cancelling any pending attempt
    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
        if let Some(task) = self.connect_task.take() {
            let _ = task.await;
        }
    }

    pub fn start_recording(&self) {
        self.recorder.start();
        let _ = self.event_sender.send(AppEvent::RecordingChanged(true));
    }

    pub fn stop_recording(&self) {
        self.recorder.stop();
        let _ = self.event_sender.send(AppEvent::RecordingChanged(false));
    }

    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.roster.devices()
    }

    pub fn roster_mode(&self) -> RosterMode {
        self.roster.mode()
    }

    pub fn is_scanning(&self) -> bool {
        self.roster.is_scanning()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn latest_reading(&self) -> Option<Reading> {
        self.session.latest_reading()
    }

    /// Shared handle to the recorder, still readable after `run` consumes the service
    pub fn recorder(&self) -> Arc<TrackRecorder> {
        Arc::clone(&self.recorder)
    }

    pub fn track(&self) -> TrackSnapshot {
        self.recorder.snapshot()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn recording_duration(&self) -> Duration {
        self.recorder.duration()
    }

    /// Disconnect and release the radio
    pub async fn shutdown(&mut self) {
        self.disconnect().await;
        self.roster.release().await;
        info!("Bluetooth service shut down");
    }

    /// Process commands until `Shutdown` arrives or the channel closes
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BluetoothCommand>) {
        while let Some(cmd) = commands.recv().await {
            match cmd {
                BluetoothCommand::StartScan => {
                    if let Err(e) = self.start_scan().await {
                        error!("Failed to start scan: {}", e);
                        let _ = self.event_sender.send(AppEvent::ScanFailed(e.to_string()));
                    }
                }
                BluetoothCommand::StopScan => self.stop_scan().await,
                BluetoothCommand::Connect(device_id) => {
                    if let Err(e) = self.connect(&device_id).await {
                        error!("Connect to {} refused: {}", device_id, e);
                        let _ = self.event_sender.send(AppEvent::ConnectRefused(e.to_string()));
                    }
                }
                BluetoothCommand::Disconnect => self.disconnect().await,
                BluetoothCommand::StartRecording => self.start_recording(),
                BluetoothCommand::StopRecording => self.stop_recording(),
                BluetoothCommand::Shutdown => break,
            }
        }
        self.shutdown().await;
    }
}
