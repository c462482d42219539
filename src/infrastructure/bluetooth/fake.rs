//! Scripted transport for tests

use crate::domain::error::TransportError;
use crate::domain::models::RadioState;
use crate::infrastructure::bluetooth::protocol::{GPS_MAIN_CHARACTERISTIC_UUID, GPS_SERVICE_UUID};
use crate::infrastructure::bluetooth::transport::{
    Advertisement, BleTransport, ConnectOptions, DiscoveredService, NotificationEvent, ScanEvent,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

pub(crate) struct FakeTransport {
    pub radio: Mutex<RadioState>,
    pub scan_failure: Mutex<Option<TransportError>>,
    pub connect_failure: Mutex<Option<TransportError>>,
    pub services: Mutex<Vec<DiscoveredService>>,
    /// Connect waits on `connect_gate` while set
    pub hold_connect: AtomicBool,
    pub connect_gate: Notify,
    /// Discovery never completes while set
    pub hold_discovery: AtomicBool,
    /// Subscribe waits on `subscribe_gate` while set
    pub hold_subscribe: AtomicBool,
    pub subscribe_gate: Notify,
    scan_sender: Mutex<Option<mpsc::UnboundedSender<ScanEvent>>>,
    notification_sender: Mutex<Option<mpsc::UnboundedSender<NotificationEvent>>>,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            radio: Mutex::new(RadioState::PoweredOn),
            scan_failure: Mutex::new(None),
            connect_failure: Mutex::new(None),
            services: Mutex::new(vec![DiscoveredService {
                uuid: GPS_SERVICE_UUID,
                characteristics: vec![GPS_MAIN_CHARACTERISTIC_UUID],
            }]),
            hold_connect: AtomicBool::new(false),
            connect_gate: Notify::new(),
            hold_discovery: AtomicBool::new(false),
            hold_subscribe: AtomicBool::new(false),
            subscribe_gate: Notify::new(),
            scan_sender: Mutex::new(None),
            notification_sender: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTransport {
    pub fn advertise(&self, id: &str, rssi: i16, service_uuids: Vec<Uuid>) -> bool {
        self.emit_scan(ScanEvent::Observed(Advertisement {
            id: id.to_string(),
            name: Some(format!("Beacon {id}")),
            rssi: Some(rssi),
            service_uuids,
        }))
    }

    pub fn emit_scan(&self, event: ScanEvent) -> bool {
        self.scan_sender
            .lock()
            .as_ref()
            .is_some_and(|sender| sender.send(event).is_ok())
    }

    pub fn notify(&self, event: NotificationEvent) -> bool {
        self.notification_sender
            .lock()
            .as_ref()
            .is_some_and(|sender| sender.send(event).is_ok())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    async fn radio_state(&self) -> Result<RadioState, TransportError> {
        Ok(*self.radio.lock())
    }

    async fn start_scan(
        &self,
        _filter: &[Uuid],
    ) -> Result<mpsc::UnboundedReceiver<ScanEvent>, TransportError> {
        self.log("start_scan");
        if let Some(error) = self.scan_failure.lock().clone() {
            return Err(error);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.scan_sender.lock() = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.log("stop_scan");
        self.scan_sender.lock().take();
        Ok(())
    }

    async fn connect(
        &self,
        device_id: &str,
        options: ConnectOptions,
    ) -> Result<(), TransportError> {
        self.log(format!("connect:{device_id}:{}", options.mtu));
        if self.hold_connect.load(Ordering::SeqCst) {
            self.connect_gate.notified().await;
        }
        match self.connect_failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn cancel_connection(&self, device_id: &str) -> Result<(), TransportError> {
        self.log(format!("cancel:{device_id}"));
        self.notification_sender.lock().take();
        Ok(())
    }

    async fn discover_services(
        &self,
        device_id: &str,
    ) -> Result<Vec<DiscoveredService>, TransportError> {
        self.log(format!("discover:{device_id}"));
        if self.hold_discovery.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.services.lock().clone())
    }

    async fn subscribe(
        &self,
        device_id: &str,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<NotificationEvent>, TransportError> {
        self.log(format!("subscribe:{device_id}"));
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notification_sender.lock() = Some(tx);
        if self.hold_subscribe.load(Ordering::SeqCst) {
            self.subscribe_gate.notified().await;
        }
        Ok(rx)
    }

    async fn unsubscribe(
        &self,
        device_id: &str,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<(), TransportError> {
        self.log(format!("unsubscribe:{device_id}"));
        Ok(())
    }
}
