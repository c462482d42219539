//! BLE Connection Module
//!
//! Connection session for one beacon: drives the connection state machine,
//! subscribes to the GPS characteristic and turns notifications into
//! validated readings.

use crate::domain::error::BeaconError;
use crate::domain::models::{
    AppEvent, ConnectionState, DeviceHandle, MessageSeverity, RawFrame, Reading, StatusMessage,
    Subscription,
};
use crate::domain::track::TrackRecorder;
use crate::domain::validator;
use crate::infrastructure::bluetooth::protocol::{
    self, CONNECT_TIMEOUT, DISCOVERY_TIMEOUT, GPS_MAIN_CHARACTERISTIC_UUID, GPS_SERVICE_UUID,
    REQUESTED_MTU,
};
use crate::infrastructure::bluetooth::transport::{BleTransport, ConnectOptions, NotificationEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug)]
struct SessionInner {
    state: ConnectionState,
    latest: Option<Reading>,
    attempt: Option<CancellationToken>,
    pump: Option<JoinHandle<()>>,
    /// Bumped per connection attempt so a stale pump cannot tear down a newer link
    generation: u64,
}

/// Connection session for a single GPS beacon
pub struct ConnectionSession<T: BleTransport> {
    transport: Arc<T>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    recorder: Arc<TrackRecorder>,
    inner: Mutex<SessionInner>,
}

impl<T: BleTransport> ConnectionSession<T> {
    pub fn new(
        transport: Arc<T>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        recorder: Arc<TrackRecorder>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            event_sender,
            recorder,
            inner: Mutex::new(SessionInner {
                state: ConnectionState::Idle,
                latest: None,
                attempt: None,
                pump: None,
                generation: 0,
            }),
        })
    }

    /// Connect to `device` and subscribe to its GPS characteristic.
    ///
    /// Only valid while the session is at rest; otherwise fails with
    /// [`BeaconError::AlreadyInProgress`] and leaves the state alone.
    pub async fn connect(self: &Arc<Self>, device: DeviceHandle) -> Result<(), BeaconError> {
        let (token, generation) = {
            let mut inner = self.inner.lock();
            if !inner.state.is_at_rest() {
                return Err(BeaconError::AlreadyInProgress);
            }
            if matches!(inner.state, ConnectionState::Failed(_)) {
                self.set_state(&mut inner, ConnectionState::Idle);
            }
            let token = CancellationToken::new();
            inner.attempt = Some(token.clone());
            inner.generation += 1;
            let generation = inner.generation;
            self.set_state(&mut inner, ConnectionState::Connecting(device.clone()));
            (token, generation)
        };

        info!("Connecting to beacon {} ({})", device.display_name(), device.id);
        self.send_log(
            &format!("Connecting to {}...", device.display_name()),
            MessageSeverity::Info,
        );

        // Establish is polled first: a completed subscription must reach the
        // release path below even when the token is already cancelled
        let outcome = tokio::select! {
            biased;
            result = self.establish(&device) => Some(result),
            _ = token.cancelled() => None,
        };

        match outcome {
            Some(Ok(notifications)) => {
                let subscription = Subscription {
                    service: GPS_SERVICE_UUID,
                    characteristic: GPS_MAIN_CHARACTERISTIC_UUID,
                };
                {
                    let mut inner = self.inner.lock();
                    if !token.is_cancelled() {
                        inner.attempt = None;
                        self.set_state(
                            &mut inner,
                            ConnectionState::Connected(device.clone(), subscription),
                        );
                        inner.pump = Some(tokio::spawn(pump(
                            Arc::downgrade(self),
                            notifications,
                            generation,
                        )));
                        info!("Subscribed to GPS notifications from {}", device.id);
                        self.send_log("Connection established!", MessageSeverity::Success);
                        return Ok(());
                    }
                }
                // Disconnected while the subscription was being set up
                drop(notifications);
                self.release_link(&device.id, Some(subscription)).await;
                Err(BeaconError::Cancelled)
            }
            Some(Err(error)) => {
                warn!("Connection to {} failed: {}", device.id, error);
                if let Err(e) = self.transport.cancel_connection(&device.id).await {
                    debug!("Cancel after failed connect: {}", e);
                }
                let mut inner = self.inner.lock();
                if token.is_cancelled() {
                    return Err(BeaconError::Cancelled);
                }
                inner.attempt = None;
                self.set_state(&mut inner, ConnectionState::Failed(error.to_string()));
                Err(error)
            }
            None => {
                info!("Connection attempt to {} cancelled", device.id);
                Err(BeaconError::Cancelled)
            }
        }
    }

    async fn establish(
        &self,
        device: &DeviceHandle,
    ) -> Result<mpsc::UnboundedReceiver<NotificationEvent>, BeaconError> {
        let options = ConnectOptions {
            timeout: CONNECT_TIMEOUT,
            mtu: REQUESTED_MTU,
        };
        match timeout(CONNECT_TIMEOUT, self.transport.connect(&device.id, options)).await {
            Err(_) => {
                return Err(BeaconError::ConnectionFailed(format!(
                    "timed out after {}s",
                    CONNECT_TIMEOUT.as_secs()
                )))
            }
            Ok(Err(e)) => return Err(BeaconError::ConnectionFailed(e.to_string())),
            Ok(Ok(())) => {}
        }

        let services = match timeout(DISCOVERY_TIMEOUT, self.transport.discover_services(&device.id)).await {
            Err(_) => {
                return Err(BeaconError::ProtocolMismatch(format!(
                    "service discovery timed out after {}s",
                    DISCOVERY_TIMEOUT.as_secs()
                )))
            }
            Ok(Err(e)) => {
                return Err(BeaconError::ConnectionFailed(format!(
                    "service discovery failed: {}",
                    e
                )))
            }
            Ok(Ok(services)) => services,
        };
        debug!("Discovered {} services on {}", services.len(), device.id);

        let service = services
            .iter()
            .find(|s| s.uuid == GPS_SERVICE_UUID)
            .ok_or_else(|| BeaconError::ProtocolMismatch("GPS service not found".to_string()))?;
        if !service.characteristics.contains(&GPS_MAIN_CHARACTERISTIC_UUID) {
            return Err(BeaconError::ProtocolMismatch(
                "GPS main characteristic not found".to_string(),
            ));
        }

        match timeout(
            DISCOVERY_TIMEOUT,
            self.transport
                .subscribe(&device.id, GPS_SERVICE_UUID, GPS_MAIN_CHARACTERISTIC_UUID),
        )
        .await
        {
            Err(_) => Err(BeaconError::ConnectionFailed(
                "notification subscription timed out".to_string(),
            )),
            Ok(Err(e)) => Err(BeaconError::ConnectionFailed(format!(
                "notification subscription failed: {}",
                e
            ))),
            Ok(Ok(notifications)) => Ok(notifications),
        }
    }

    /// Tear down the current link or cancel an in-flight attempt.
    /// Does nothing when already idle.
    pub async fn disconnect(&self) {
        let (device_id, subscription) = {
            let mut inner = self.inner.lock();
            let target = match &inner.state {
                ConnectionState::Idle | ConnectionState::Disconnecting => return,
                ConnectionState::Failed(_) => None,
                ConnectionState::Connecting(device) => Some((device.id.clone(), None)),
                ConnectionState::Connected(device, subscription) => {
                    Some((device.id.clone(), Some(*subscription)))
                }
            };
            let Some((device_id, subscription)) = target else {
                self.set_state(&mut inner, ConnectionState::Idle);
                return;
            };
            if let Some(token) = inner.attempt.take() {
                token.cancel();
            }
            // Stop consuming frames before leaving Connected
            if let Some(pump) = inner.pump.take() {
                pump.abort();
            }
            inner.latest = None;
            self.set_state(&mut inner, ConnectionState::Disconnecting);
            (device_id, subscription)
        };

        self.release_link(&device_id, subscription).await;

        let mut inner = self.inner.lock();
        self.set_state(&mut inner, ConnectionState::Idle);
        drop(inner);

        info!("Disconnected from device {}", device_id);
        self.send_log("Disconnected from device", MessageSeverity::Info);
    }

    async fn release_link(&self, device_id: &str, subscription: Option<Subscription>) {
        release_link(self.transport.as_ref(), device_id, subscription).await;
    }

    /// Decode, validate and publish one notification.
    ///
    /// Bad frames are dropped without touching the connection state.
    pub(crate) fn handle_notification(&self, frame: RawFrame) -> Option<Reading> {
        self.handle_notification_at(frame, Utc::now())
    }

    pub(crate) fn handle_notification_at(
        &self,
        frame: RawFrame,
        now: DateTime<Utc>,
    ) -> Option<Reading> {
        if !matches!(self.inner.lock().state, ConnectionState::Connected(..)) {
            return None;
        }

        let reading = match protocol::decode_frame(&frame, now) {
            Ok(reading) => reading,
            Err(e) => {
                trace!("Dropping frame: {}", e);
                return None;
            }
        };
        let reading = match validator::validate(reading) {
            Ok(reading) => reading,
            Err(e) => {
                debug!("Dropping reading: {}", e);
                return None;
            }
        };

        {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, ConnectionState::Connected(..)) {
                return None;
            }
            inner.latest = Some(reading.clone());
        }
        self.recorder.add_point(reading.clone());
        let _ = self.event_sender.send(AppEvent::Reading(reading.clone()));
        Some(reading)
    }

    /// The link dropped underneath a connected session
    async fn on_link_lost(&self, generation: u64) {
        let (device_id, subscription) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            let ConnectionState::Connected(device, subscription) = &inner.state else {
                return;
            };
            let released = (device.id.clone(), *subscription);
            // Our own handle; dropping it does not abort this task
            inner.pump.take();
            inner.latest = None;
            self.set_state(&mut inner, ConnectionState::Disconnecting);
            released
        };

        warn!("Lost connection to {}", device_id);
        self.release_link(&device_id, Some(subscription)).await;

        let mut inner = self.inner.lock();
        self.set_state(&mut inner, ConnectionState::Idle);
        drop(inner);
        self.send_log("Connection lost", MessageSeverity::Warning);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state.clone()
    }

    pub fn latest_reading(&self) -> Option<Reading> {
        self.inner.lock().latest.clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.inner.lock().state, ConnectionState::Connected(..))
    }

    fn set_state(&self, inner: &mut SessionInner, state: ConnectionState) {
        debug!("Connection state: {} -> {}", inner.state.as_str(), state.as_str());
        inner.state = state.clone();
        let _ = self.event_sender.send(AppEvent::ConnectionState(state));
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

impl<T: BleTransport> Drop for ConnectionSession<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(token) = inner.attempt.take() {
            token.cancel();
        }
        if let Some(pump) = inner.pump.take() {
            pump.abort();
        }

        let (device_id, subscription) = match &inner.state {
            ConnectionState::Connecting(device) => (device.id.clone(), None),
            ConnectionState::Connected(device, subscription) => {
                (device.id.clone(), Some(*subscription))
            }
            _ => return,
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                info!("Session dropped while linked to {}, releasing", device_id);
                let transport = Arc::clone(&self.transport);
                handle.spawn(async move {
                    release_link(transport.as_ref(), &device_id, subscription).await;
                });
            }
            Err(_) => warn!("Session dropped outside a runtime; {} not released", device_id),
        }
    }
}

async fn release_link<T: BleTransport>(
    transport: &T,
    device_id: &str,
    subscription: Option<Subscription>,
) {
    if let Some(subscription) = subscription {
        if let Err(e) = transport
            .unsubscribe(device_id, subscription.service, subscription.characteristic)
            .await
        {
            debug!("Unsubscribe from {} failed: {}", device_id, e);
        }
    }
    if let Err(e) = transport.cancel_connection(device_id).await {
        warn!("Failed to cancel connection to {}: {}", device_id, e);
    }
}

/// Consume notifications strictly in arrival order.
///
/// Holds the session weakly; the pump ends once the owner lets go.
async fn pump<T: BleTransport>(
    session: Weak<ConnectionSession<T>>,
    mut notifications: mpsc::UnboundedReceiver<NotificationEvent>,
    generation: u64,
) {
    while let Some(event) = notifications.recv().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        match event {
            NotificationEvent::Value(frame) => {
                session.handle_notification(frame);
            }
            NotificationEvent::Error(message) => debug!("Notification error: {}", message),
            NotificationEvent::Disconnected => break,
        }
    }
    if let Some(session) = session.upgrade() {
        session.on_link_lost(generation).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::TransportError;
    use crate::infrastructure::bluetooth::fake::FakeTransport;
    use crate::infrastructure::bluetooth::protocol::tests::{fixed_now, frame_with};
    use crate::infrastructure::bluetooth::transport::DiscoveredService;
    use std::sync::atomic::Ordering;

    struct Harness {
        transport: Arc<FakeTransport>,
        session: Arc<ConnectionSession<FakeTransport>>,
        recorder: Arc<TrackRecorder>,
        events: mpsc::UnboundedReceiver<AppEvent>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(FakeTransport::default());
        let recorder = TrackRecorder::new();
        let (tx, events) = mpsc::unbounded_channel();
        let session = ConnectionSession::new(Arc::clone(&transport), tx, Arc::clone(&recorder));
        Harness {
            transport,
            session,
            recorder,
            events,
        }
    }

    fn beacon() -> DeviceHandle {
        DeviceHandle {
            id: "AA:BB".to_string(),
            name: Some("RC DIY".to_string()),
            rssi: Some(-60),
        }
    }

    async fn next_reading(events: &mut mpsc::UnboundedReceiver<AppEvent>) -> Reading {
        loop {
            match events.recv().await {
                Some(AppEvent::Reading(reading)) => return reading,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    }

    async fn wait_for_state(
        session: &ConnectionSession<FakeTransport>,
        check: impl Fn(&ConnectionState) -> bool,
    ) {
        for _ in 0..100 {
            if check(&session.state()) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("state never reached, last: {:?}", session.state());
    }

    #[tokio::test]
    async fn test_connect_subscribes() {
        let h = harness();
        h.session.connect(beacon()).await.unwrap();

        let state = h.session.state();
        assert_eq!(
            state,
            ConnectionState::Connected(
                beacon(),
                Subscription {
                    service: GPS_SERVICE_UUID,
                    characteristic: GPS_MAIN_CHARACTERISTIC_UUID,
                }
            )
        );
        assert_eq!(
            h.transport.calls(),
            vec![
                format!("connect:AA:BB:{}", REQUESTED_MTU),
                "discover:AA:BB".to_string(),
                "subscribe:AA:BB".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_while_connecting_is_rejected() {
        let h = harness();
        h.transport.hold_connect.store(true, Ordering::SeqCst);

        let session = Arc::clone(&h.session);
        let attempt = tokio::spawn(async move { session.connect(beacon()).await });
        wait_for_state(&h.session, |s| matches!(s, ConnectionState::Connecting(_))).await;

        assert_eq!(
            h.session.connect(beacon()).await,
            Err(BeaconError::AlreadyInProgress)
        );
        assert_eq!(h.session.state(), ConnectionState::Connecting(beacon()));

        h.transport.connect_gate.notify_one();
        assert!(attempt.await.unwrap().is_ok());
        assert!(h.session.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_cancels_in_flight_connect() {
        let h = harness();
        h.transport.hold_connect.store(true, Ordering::SeqCst);

        let session = Arc::clone(&h.session);
        let attempt = tokio::spawn(async move { session.connect(beacon()).await });
        wait_for_state(&h.session, |s| matches!(s, ConnectionState::Connecting(_))).await;

        h.session.disconnect().await;

        assert_eq!(attempt.await.unwrap(), Err(BeaconError::Cancelled));
        assert_eq!(h.session.state(), ConnectionState::Idle);
        assert!(h.transport.calls().contains(&"cancel:AA:BB".to_string()));
    }

    #[tokio::test]
    async fn test_missing_characteristic_fails_with_protocol_mismatch() {
        let h = harness();
        *h.transport.services.lock() = vec![DiscoveredService {
            uuid: GPS_SERVICE_UUID,
            characteristics: vec![],
        }];

        let result = h.session.connect(beacon()).await;
        assert!(matches!(result, Err(BeaconError::ProtocolMismatch(_))));
        assert!(matches!(h.session.state(), ConnectionState::Failed(_)));
        assert!(!h.transport.calls().contains(&"subscribe:AA:BB".to_string()));
    }

    #[tokio::test]
    async fn test_missing_service_fails_with_protocol_mismatch() {
        let h = harness();
        h.transport.services.lock().clear();

        let result = h.session.connect(beacon()).await;
        assert_eq!(
            result,
            Err(BeaconError::ProtocolMismatch("GPS service not found".to_string()))
        );
    }

    #[tokio::test]
    async fn test_transport_connect_error_fails_session() {
        let h = harness();
        *h.transport.connect_failure.lock() = Some(TransportError::new("unreachable"));

        let result = h.session.connect(beacon()).await;
        assert_eq!(
            result,
            Err(BeaconError::ConnectionFailed("unreachable".to_string()))
        );
        assert_eq!(
            h.session.state(),
            ConnectionState::Failed("Connection failed: unreachable".to_string())
        );

        // A failed session accepts a new attempt
        *h.transport.connect_failure.lock() = None;
        h.session.connect(beacon()).await.unwrap();
        assert!(h.session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let h = harness();
        h.transport.hold_connect.store(true, Ordering::SeqCst);

        let result = h.session.connect(beacon()).await;
        assert!(matches!(result, Err(BeaconError::ConnectionFailed(_))));
        assert!(matches!(h.session.state(), ConnectionState::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_timeout_is_protocol_mismatch() {
        let h = harness();
        h.transport.hold_discovery.store(true, Ordering::SeqCst);

        let result = h.session.connect(beacon()).await;
        assert!(matches!(result, Err(BeaconError::ProtocolMismatch(_))));
    }

    #[tokio::test]
    async fn test_notifications_flow_to_track() {
        let mut h = harness();
        h.session.connect(beacon()).await.unwrap();
        h.recorder.start();

        h.transport
            .notify(NotificationEvent::Value(frame_with(37.7749, -122.4194)));
        h.transport
            .notify(NotificationEvent::Value(RawFrame::new(vec![0u8; 5])));
        h.transport
            .notify(NotificationEvent::Value(frame_with(95.0, 10.0)));
        h.transport
            .notify(NotificationEvent::Error("checksum".to_string()));
        h.transport
            .notify(NotificationEvent::Value(frame_with(37.7750, -122.4195)));

        let first = next_reading(&mut h.events).await;
        let second = next_reading(&mut h.events).await;
        assert!((first.latitude - 37.7749).abs() < 1e-7);
        assert!((second.latitude - 37.7750).abs() < 1e-7);

        assert!(h.session.is_connected());
        assert_eq!(h.recorder.len(), 2);
        assert_eq!(h.session.latest_reading(), Some(second));
    }

    #[tokio::test]
    async fn test_frames_ignored_unless_connected() {
        let h = harness();
        assert_eq!(
            h.session
                .handle_notification_at(frame_with(1.0, 1.0), fixed_now()),
            None
        );
        assert_eq!(h.session.latest_reading(), None);
    }

    #[tokio::test]
    async fn test_disconnect_releases_subscription() {
        let h = harness();
        h.session.connect(beacon()).await.unwrap();
        h.session
            .handle_notification_at(frame_with(1.0, 1.0), fixed_now())
            .unwrap();
        assert!(h.session.latest_reading().is_some());

        h.session.disconnect().await;
        h.session.disconnect().await;

        assert_eq!(h.session.state(), ConnectionState::Idle);
        assert_eq!(h.session.latest_reading(), None);
        let calls = h.transport.calls();
        let unsubscribe = calls.iter().position(|c| c == "unsubscribe:AA:BB").unwrap();
        let cancel = calls.iter().position(|c| c == "cancel:AA:BB").unwrap();
        assert!(unsubscribe < cancel);
        assert!(!h.transport.notify(NotificationEvent::Value(frame_with(1.0, 1.0))));
    }

    #[tokio::test]
    async fn test_link_loss_returns_to_idle() {
        let h = harness();
        h.session.connect(beacon()).await.unwrap();

        h.transport.notify(NotificationEvent::Disconnected);
        wait_for_state(&h.session, |s| *s == ConnectionState::Idle).await;

        assert_eq!(h.session.latest_reading(), None);
        h.session.connect(beacon()).await.unwrap();
        assert!(h.session.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_from_failed_returns_to_idle() {
        let h = harness();
        h.transport.services.lock().clear();
        let _ = h.session.connect(beacon()).await;

        h.session.disconnect().await;
        assert_eq!(h.session.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_while_subscribing_releases_subscription() {
        let h = harness();
        h.transport.hold_subscribe.store(true, Ordering::SeqCst);

        let session = Arc::clone(&h.session);
        let attempt = tokio::spawn(async move { session.connect(beacon()).await });
        for _ in 0..100 {
            if h.transport.calls().contains(&"subscribe:AA:BB".to_string()) {
                break;
            }
            tokio::task::yield_now().await;
        }

        // The subscription completes after the disconnect has already run
        h.session.disconnect().await;
        h.transport.subscribe_gate.notify_one();

        assert_eq!(attempt.await.unwrap(), Err(BeaconError::Cancelled));
        assert_eq!(h.session.state(), ConnectionState::Idle);
        assert!(h.session.inner.lock().pump.is_none());

        let calls = h.transport.calls();
        let unsubscribe = calls.iter().position(|c| c == "unsubscribe:AA:BB").unwrap();
        let cancel = calls.iter().rposition(|c| c == "cancel:AA:BB").unwrap();
        assert!(unsubscribe < cancel);
        assert!(!h.transport.notify(NotificationEvent::Value(frame_with(1.0, 1.0))));
    }

    #[tokio::test]
    async fn test_dropping_connected_session_releases_link() {
        let Harness {
            transport,
            session,
            recorder,
            events: _events,
        } = harness();
        session.connect(beacon()).await.unwrap();
        recorder.start();

        drop(session);
        for _ in 0..100 {
            if transport.calls().contains(&"cancel:AA:BB".to_string()) {
                break;
            }
            tokio::task::yield_now().await;
        }

        let calls = transport.calls();
        assert!(calls.contains(&"unsubscribe:AA:BB".to_string()));
        assert!(calls.contains(&"cancel:AA:BB".to_string()));
        assert!(!transport.notify(NotificationEvent::Value(frame_with(1.0, 1.0))));
        tokio::task::yield_now().await;
        assert_eq!(recorder.len(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_from_failed_passes_through_idle() {
        let mut h = harness();
        h.transport.services.lock().clear();
        let _ = h.session.connect(beacon()).await;
        while h.events.try_recv().is_ok() {}

        *h.transport.services.lock() = vec![DiscoveredService {
            uuid: GPS_SERVICE_UUID,
            characteristics: vec![GPS_MAIN_CHARACTERISTIC_UUID],
        }];
        h.session.connect(beacon()).await.unwrap();

        let mut states = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            if let AppEvent::ConnectionState(state) = event {
                states.push(state.as_str());
            }
        }
        assert_eq!(states, vec!["Idle", "Connecting...", "Connected"]);
    }
}
