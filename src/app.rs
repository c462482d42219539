//! Headless console front end
//!
//! Drives a [`BluetoothService`] from its event stream: scans, connects per
//! settings and writes each reading to the output as one JSON line.

use crate::domain::models::{
    AppEvent, BluetoothCommand, ConnectionState, DeviceHandle, MessageSeverity,
};
use crate::domain::settings::SettingsService;
use crate::domain::track::{format_duration, MapRegion};
use crate::infrastructure::bluetooth::transport::BleTransport;
use crate::infrastructure::bluetooth::BluetoothService;
use serde::Serialize;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Serialize)]
struct TrackSummary {
    points: usize,
    duration: String,
    region: Option<Region>,
}

#[derive(Debug, Serialize)]
struct Region {
    latitude: f64,
    longitude: f64,
    latitude_delta: f64,
    longitude_delta: f64,
}

/// Decides which discovered device to connect to, one request at a time
#[derive(Debug)]
struct AutoConnect {
    enabled: bool,
    preferred: Option<String>,
    requested: bool,
}

impl AutoConnect {
    fn new(enabled: bool, preferred: Option<String>) -> Self {
        Self {
            enabled,
            preferred,
            requested: false,
        }
    }

    /// Whether to request a connection to `device` now
    fn offer(&mut self, device: &DeviceHandle) -> bool {
        let wanted = self
            .preferred
            .as_deref()
            .map_or(true, |id| id == device.id);
        if !self.enabled || !wanted || self.requested {
            return false;
        }
        self.requested = true;
        true
    }

    /// The last request went nowhere; allow another
    fn reset(&mut self) {
        self.requested = false;
    }
}

impl From<MapRegion> for Region {
    fn from(region: MapRegion) -> Self {
        Self {
            latitude: region.latitude,
            longitude: region.longitude,
            latitude_delta: region.latitude_delta,
            longitude_delta: region.longitude_delta,
        }
    }
}

/// Run until `shutdown` resolves or the service goes away.
///
/// Readings and the final track summary are written to `out`; everything
/// else goes through `tracing`.
pub async fn run<T, W, F>(
    transport: Arc<T>,
    mut settings: SettingsService,
    mut out: W,
    shutdown: F,
) -> anyhow::Result<()>
where
    T: BleTransport,
    W: Write,
    F: Future<Output = ()>,
{
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let service = BluetoothService::new(transport, event_tx);
    let recorder = service.recorder();
    let service_task = tokio::spawn(service.run(cmd_rx));

    let mut auto_connect = AutoConnect::new(
        settings.get().auto_connect,
        settings.get().preferred_device.clone(),
    );
    let auto_record = settings.get().auto_record;

    let _ = cmd_tx.send(BluetoothCommand::StartScan);
    let mut was_connected = false;
    let mut outcome = Ok(());

    tokio::pin!(shutdown);
    loop {
        let event = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            AppEvent::DeviceFound(device) => {
                info!(
                    "Found {} ({}) rssi {:?}",
                    device.display_name(),
                    device.id,
                    device.rssi
                );
                if auto_connect.offer(&device) {
                    let _ = cmd_tx.send(BluetoothCommand::Connect(device.id));
                }
            }
            AppEvent::RosterFallback => {
                warn!("No beacon advertised the GPS service; listing every device");
            }
            AppEvent::ScanStopped => debug!("Scan stopped"),
            AppEvent::ScanFailed(reason) => {
                error!("Scan failed: {}", reason);
                outcome = Err(anyhow::anyhow!("Scan failed: {}", reason));
                break;
            }
            AppEvent::ConnectionState(state) => {
                info!("Connection state: {}", state.as_str());
                match state {
                    ConnectionState::Connected(device, _) => {
                        was_connected = true;
                        if let Err(e) = settings.record_connection(&device.id) {
                            warn!("Failed to save settings: {}", e);
                        }
                        if auto_record && !recorder.is_recording() {
                            let _ = cmd_tx.send(BluetoothCommand::StartRecording);
                        }
                    }
                    ConnectionState::Failed(reason) => {
                        warn!("Connection failed: {}; scanning again", reason);
                        auto_connect.reset();
                        let _ = cmd_tx.send(BluetoothCommand::StartScan);
                    }
                    ConnectionState::Idle if was_connected => {
                        warn!("Link lost; scanning again");
                        was_connected = false;
                        auto_connect.reset();
                        let _ = cmd_tx.send(BluetoothCommand::StartScan);
                    }
                    _ => {}
                }
            }
            AppEvent::ConnectRefused(reason) => {
                warn!("Connect refused: {}", reason);
                auto_connect.reset();
            }
            AppEvent::Reading(reading) => {
                writeln!(out, "{}", serde_json::to_string(&reading)?)?;
                out.flush()?;
            }
            AppEvent::RecordingChanged(recording) => {
                info!("Recording {}", if recording { "started" } else { "stopped" });
            }
            AppEvent::LogMessage(message) => match message.severity {
                MessageSeverity::Error => error!("{}", message.message),
                MessageSeverity::Warning => warn!("{}", message.message),
                MessageSeverity::Info | MessageSeverity::Success => info!("{}", message.message),
            },
        }
    }

    // Read before stopping; a stopped recorder reports zero
    let duration = recorder.duration();
    let _ = cmd_tx.send(BluetoothCommand::StopRecording);
    let _ = cmd_tx.send(BluetoothCommand::Shutdown);
    if let Err(e) = service_task.await {
        error!("Bluetooth service task failed: {}", e);
    }

    let track = recorder.snapshot();
    let summary = TrackSummary {
        points: track.len(),
        duration: format_duration(duration),
        region: (!track.is_empty()).then(|| track.region(None).into()),
    };
    info!(
        "Recorded {} points over {}",
        summary.points, summary.duration
    );
    writeln!(out, "{}", serde_json::to_string(&summary)?)?;
    out.flush()?;

    outcome
}
