//! BLE Scanner Module
//!
//! Discovery roster: runs the scan and keeps a de-duplicated list of
//! candidate beacons in first-seen order.

use crate::domain::error::BeaconError;
use crate::domain::models::{AppEvent, DeviceHandle, MessageSeverity, RadioState, StatusMessage};
use crate::infrastructure::bluetooth::protocol::SCAN_WINDOW;
use crate::infrastructure::bluetooth::transport::{Advertisement, BleTransport, ScanEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Whether the roster is showing filter matches or every observed device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterMode {
    Filtered,
    /// No device matched within the scan window; advertisement payloads
    /// that omit the service identifier are listed too
    Fallback,
}

#[derive(Debug)]
struct RosterState {
    filter: Vec<Uuid>,
    mode: RosterMode,
    matched: Vec<DeviceHandle>,
    observed: Vec<DeviceHandle>,
}

impl RosterState {
    fn new(filter: &[Uuid]) -> Self {
        Self {
            filter: filter.to_vec(),
            mode: RosterMode::Filtered,
            matched: Vec::new(),
            observed: Vec::new(),
        }
    }

    /// Record an advertisement. Returns the roster entry when the device is
    /// visible in the current mode.
    fn observe(&mut self, adv: &Advertisement) -> Option<DeviceHandle> {
        let observed = upsert(&mut self.observed, adv.to_handle());
        let matched = adv
            .advertises_any(&self.filter)
            .then(|| upsert(&mut self.matched, adv.to_handle()));

        match self.mode {
            RosterMode::Filtered => matched,
            RosterMode::Fallback => Some(observed),
        }
    }

    /// Close the scan window. Returns true when the roster fell back.
    fn close_window(&mut self) -> bool {
        if self.mode == RosterMode::Filtered && self.matched.is_empty() {
            self.mode = RosterMode::Fallback;
            return true;
        }
        false
    }

    fn devices(&self) -> &[DeviceHandle] {
        match self.mode {
            RosterMode::Filtered => &self.matched,
            RosterMode::Fallback => &self.observed,
        }
    }
}

/// Insert or refresh by identifier. Absent fields keep their last value.
fn upsert(devices: &mut Vec<DeviceHandle>, handle: DeviceHandle) -> DeviceHandle {
    if let Some(existing) = devices.iter_mut().find(|d| d.id == handle.id) {
        if handle.name.is_some() {
            existing.name = handle.name;
        }
        if handle.rssi.is_some() {
            existing.rssi = handle.rssi;
        }
        return existing.clone();
    }
    devices.push(handle.clone());
    handle
}

/// Discovery roster for GPS beacons
pub struct DiscoveryRoster<T: BleTransport> {
    transport: Option<Arc<T>>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    state: Arc<Mutex<RosterState>>,
    scan_task: Option<JoinHandle<()>>,
}

impl<T: BleTransport> DiscoveryRoster<T> {
    pub fn new(transport: Arc<T>, event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            transport: Some(transport),
            event_sender,
            state: Arc::new(Mutex::new(RosterState::new(&[]))),
            scan_task: None,
        }
    }

    /// Clear the roster and start scanning for devices advertising any of
    /// `filter`
    pub async fn start_scan(&mut self, filter: &[Uuid]) -> Result<(), BeaconError> {
        let transport = self.transport.clone().ok_or(BeaconError::Released)?;

        // Stop any existing scan
        self.stop_scan().await;
        *self.state.lock() = RosterState::new(filter);

        let radio = transport
            .radio_state()
            .await
            .map_err(|e| BeaconError::ScanError(e.to_string()))?;
        if radio != RadioState::PoweredOn {
            warn!("Bluetooth radio not ready: {}", radio);
            return Err(BeaconError::RadioUnavailable(radio));
        }

        info!("Starting BLE scan for services: {:?}", filter);
        let events = transport
            .start_scan(filter)
            .await
            .map_err(|e| BeaconError::ScanError(e.to_string()))?;

        self.send_log("Scanning for GPS beacons...", MessageSeverity::Info);
        self.scan_task = Some(tokio::spawn(run_scan(
            transport,
            events,
            Arc::clone(&self.state),
            self.event_sender.clone(),
        )));

        Ok(())
    }

    /// Stop scanning. Safe to call when no scan is running.
    pub async fn stop_scan(&mut self) {
        let Some(task) = self.scan_task.take() else {
            return;
        };

        let finished = task.is_finished();
        task.abort();
        if finished {
            return;
        }

        info!("Stopping BLE scan...");
        if let Some(transport) = &self.transport {
            if let Err(e) = transport.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
        let _ = self.event_sender.send(AppEvent::ScanStopped);
    }

    /// Stop any scan and let go of the transport. Repeated calls are no-ops.
    pub async fn release(&mut self) {
        self.stop_scan().await;
        if self.transport.take().is_some() {
            debug!("Discovery roster released");
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Current roster in first-seen order
    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.state.lock().devices().to_vec()
    }

    pub fn mode(&self) -> RosterMode {
        self.state.lock().mode
    }

    pub fn find(&self, device_id: &str) -> Option<DeviceHandle> {
        self.state
            .lock()
            .devices()
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

impl<T: BleTransport> Drop for DiscoveryRoster<T> {
    fn drop(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
    }
}

async fn run_scan<T: BleTransport>(
    transport: Arc<T>,
    mut events: mpsc::UnboundedReceiver<ScanEvent>,
    state: Arc<Mutex<RosterState>>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
) {
    let window = tokio::time::sleep(SCAN_WINDOW);
    tokio::pin!(window);
    let mut window_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ScanEvent::Observed(adv)) => {
                    let visible = state.lock().observe(&adv);
                    if let Some(device) = visible {
                        debug!("Observed {} ({:?} dBm)", device.id, device.rssi);
                        let _ = event_sender.send(AppEvent::DeviceFound(device));
                    }
                }
                Some(ScanEvent::Error(message)) => {
                    warn!("Scan error: {}", message);
                    if let Err(e) = transport.stop_scan().await {
                        debug!("Stop after scan error failed: {}", e);
                    }
                    let _ = event_sender.send(AppEvent::ScanFailed(message));
                    break;
                }
                None => {
                    info!("Scan ended");
                    let _ = event_sender.send(AppEvent::ScanStopped);
                    break;
                }
            },
            _ = &mut window, if window_open => {
                window_open = false;
                let fell_back = state.lock().close_window();
                if fell_back {
                    info!("No beacon matched within {:?}, listing all devices", SCAN_WINDOW);
                    let _ = event_sender.send(AppEvent::RosterFallback);
                }
            }
        }
    }
}
