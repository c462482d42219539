//! WinRT transport
//!
//! [`BleTransport`] on top of the Windows Bluetooth LE APIs.

use crate::domain::error::TransportError;
use crate::domain::models::{RadioState, RawFrame};
use crate::infrastructure::bluetooth::transport::{
    Advertisement, BleTransport, ConnectOptions, DiscoveredService, NotificationEvent, ScanEvent,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEAdvertisementWatcherStoppedEventArgs, BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattDeviceService, GattSession, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{
    BluetoothAdapter, BluetoothCacheMode, BluetoothConnectionStatus, BluetoothError,
    BluetoothLEDevice,
};
use windows::Devices::Radios::RadioState as WinRadioState;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::DataReader;

const NOTIFY_ATTEMPTS: u32 = 3;
const NOTIFY_RETRY_DELAY_MS: u64 = 500;

struct Link {
    device: BluetoothLEDevice,
    session: Option<GattSession>,
    status_token: Option<i64>,
    services: Vec<GattDeviceService>,
    notifications: Option<(GattCharacteristic, i64)>,
    notification_sender: Option<mpsc::UnboundedSender<NotificationEvent>>,
}

type Links = Arc<Mutex<HashMap<String, Link>>>;

#[derive(Default)]
pub struct WinRtTransport {
    watcher: Mutex<Option<BluetoothLEAdvertisementWatcher>>,
    links: Links,
}

impl WinRtTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn device(&self, device_id: &str) -> Result<BluetoothLEDevice, TransportError> {
        self.links
            .lock()
            .get(device_id)
            .map(|link| link.device.clone())
            .ok_or_else(|| TransportError::new(format!("Device {} is not connected", device_id)))
    }

    fn service(&self, device_id: &str, uuid: Uuid) -> Result<GattDeviceService, TransportError> {
        let links = self.links.lock();
        let link = links
            .get(device_id)
            .ok_or_else(|| TransportError::new(format!("Device {} is not connected", device_id)))?;
        for service in &link.services {
            if service.Uuid().map_err(win_err)? == to_guid(uuid) {
                return Ok(service.clone());
            }
        }
        Err(TransportError::new(format!("Service {} not discovered", uuid)))
    }
}

fn win_err(e: windows::core::Error) -> TransportError {
    TransportError::new(format!("{}", e))
}

fn to_guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn from_guid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

fn parse_address(device_id: &str) -> Result<u64, TransportError> {
    u64::from_str_radix(device_id, 16)
        .map_err(|_| TransportError::new(format!("Invalid device identifier: {}", device_id)))
}

fn read_advertisement(
    args: &BluetoothLEAdvertisementReceivedEventArgs,
) -> windows::core::Result<Advertisement> {
    let adv = args.Advertisement()?;
    let uuids = adv.ServiceUuids()?;
    let mut service_uuids = Vec::new();
    for i in 0..uuids.Size()? {
        service_uuids.push(from_guid(uuids.GetAt(i)?));
    }

    let name = adv.LocalName()?.to_string();
    Ok(Advertisement {
        id: format!("{:012X}", args.BluetoothAddress()?),
        name: (!name.is_empty()).then_some(name),
        rssi: Some(args.RawSignalStrengthInDBm()?),
        service_uuids,
    })
}

#[async_trait]
impl BleTransport for WinRtTransport {
    async fn radio_state(&self) -> Result<RadioState, TransportError> {
        let adapter = match BluetoothAdapter::GetDefaultAsync().map_err(win_err)?.await {
            Ok(adapter) => adapter,
            Err(e) => {
                debug!("No default Bluetooth adapter: {}", e);
                return Ok(RadioState::Unsupported);
            }
        };
        if !adapter.IsLowEnergySupported().map_err(win_err)? {
            return Ok(RadioState::Unsupported);
        }

        let radio = adapter.GetRadioAsync().map_err(win_err)?.await.map_err(win_err)?;
        let state = match radio.State().map_err(win_err)? {
            WinRadioState::On => RadioState::PoweredOn,
            WinRadioState::Off => RadioState::PoweredOff,
            WinRadioState::Disabled => RadioState::Unauthorized,
            _ => RadioState::Unknown,
        };
        Ok(state)
    }

    async fn start_scan(
        &self,
        filter: &[Uuid],
    ) -> Result<mpsc::UnboundedReceiver<ScanEvent>, TransportError> {
        self.stop_scan().await?;

        // Advertisements often omit the service UUID, so the watcher reports
        // everything and the roster applies `filter`.
        debug!("Starting advertisement watcher (filter hint: {:?})", filter);

        let watcher = BluetoothLEAdvertisementWatcher::new().map_err(win_err)?;
        watcher
            .SetScanningMode(BluetoothLEScanningMode::Active)
            .map_err(win_err)?;

        let (tx, rx) = mpsc::unbounded_channel();

        let sender = tx.clone();
        let received = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = read_advertisement(args)?;
                    let _ = sender.send(ScanEvent::Observed(adv));
                }
                Ok(())
            },
        );

        let sender = tx;
        let stopped = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementWatcherStoppedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let error = args.Error()?;
                    if error != BluetoothError::Success {
                        let _ = sender.send(ScanEvent::Error(format!("{:?}", error)));
                    }
                }
                Ok(())
            },
        );

        watcher.Received(&received).map_err(win_err)?;
        watcher.Stopped(&stopped).map_err(win_err)?;
        watcher.Start().map_err(win_err)?;
        *self.watcher.lock() = Some(watcher);

        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            info!("Stopping advertisement watcher...");
            watcher.Stop().map_err(win_err)?;
        }
        Ok(())
    }

    async fn connect(
        &self,
        device_id: &str,
        options: ConnectOptions,
    ) -> Result<(), TransportError> {
        let address = parse_address(device_id)?;
        info!("Connecting to Bluetooth device: {:#X}", address);

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)
            .map_err(win_err)?
            .await
            .map_err(win_err)?;

        // Windows negotiates the MTU itself
        debug!(
            "Requested MTU {} (timeout {:?}) for {}",
            options.mtu, options.timeout, device_id
        );

        // GattSession keeps the link up between GATT operations
        let session = match GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId().map_err(win_err)?)
            .map_err(win_err)?
            .await
        {
            Ok(session) => {
                session.SetMaintainConnection(true).map_err(win_err)?;
                Some(session)
            }
            Err(e) => {
                warn!("Failed to create GattSession, continuing anyway: {}", e);
                None
            }
        };

        let links = Arc::clone(&self.links);
        let id = device_id.to_string();
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        if let Some(sender) = links
                            .lock()
                            .get(&id)
                            .and_then(|link| link.notification_sender.as_ref())
                        {
                            let _ = sender.send(NotificationEvent::Disconnected);
                        }
                    }
                }
                Ok(())
            });
        let status_token = device
            .ConnectionStatusChanged(&status_handler)
            .map_err(win_err)?;

        self.links.lock().insert(
            device_id.to_string(),
            Link {
                device,
                session,
                status_token: Some(status_token),
                services: Vec::new(),
                notifications: None,
                notification_sender: None,
            },
        );
        Ok(())
    }

    async fn cancel_connection(&self, device_id: &str) -> Result<(), TransportError> {
        let Some(link) = self.links.lock().remove(device_id) else {
            return Ok(());
        };

        if let Some((characteristic, token)) = &link.notifications {
            let _ = characteristic.RemoveValueChanged(*token);
        }
        if let Some(token) = link.status_token {
            let _ = link.device.RemoveConnectionStatusChanged(token);
        }
        for service in &link.services {
            let _ = service.Close();
        }
        if let Some(session) = &link.session {
            let _ = session.Close();
        }
        link.device.Close().map_err(win_err)?;
        info!("Closed connection to {}", device_id);
        Ok(())
    }

    async fn discover_services(
        &self,
        device_id: &str,
    ) -> Result<Vec<DiscoveredService>, TransportError> {
        let device = self.device(device_id)?;

        let result = device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)
            .map_err(win_err)?
            .await
            .map_err(win_err)?;
        let status = result.Status().map_err(win_err)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::new(format!(
                "Failed to get GATT services: {:?}",
                status
            )));
        }

        let services = result.Services().map_err(win_err)?;
        let mut discovered = Vec::new();
        let mut handles = Vec::new();
        for i in 0..services.Size().map_err(win_err)? {
            let service = services.GetAt(i).map_err(win_err)?;
            let chars_result = service
                .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)
                .map_err(win_err)?
                .await
                .map_err(win_err)?;

            let mut characteristics = Vec::new();
            if chars_result.Status().map_err(win_err)? == GattCommunicationStatus::Success {
                let chars = chars_result.Characteristics().map_err(win_err)?;
                for j in 0..chars.Size().map_err(win_err)? {
                    characteristics.push(from_guid(chars.GetAt(j).map_err(win_err)?.Uuid().map_err(win_err)?));
                }
            }

            discovered.push(DiscoveredService {
                uuid: from_guid(service.Uuid().map_err(win_err)?),
                characteristics,
            });
            handles.push(service);
        }
        info!("Found {} services on {}", discovered.len(), device_id);

        if let Some(link) = self.links.lock().get_mut(device_id) {
            link.services = handles;
        }
        Ok(discovered)
    }

    async fn subscribe(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<NotificationEvent>, TransportError> {
        let service = self.service(device_id, service)?;
        let chars_result = service
            .GetCharacteristicsForUuidAsync(to_guid(characteristic))
            .map_err(win_err)?
            .await
            .map_err(win_err)?;
        let chars = chars_result.Characteristics().map_err(win_err)?;
        if chars.Size().map_err(win_err)? == 0 {
            return Err(TransportError::new(format!(
                "Characteristic {} not found",
                characteristic
            )));
        }
        let gatt_char = chars.GetAt(0).map_err(win_err)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let sender = tx.clone();
        let data_handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let value = args.CharacteristicValue()?;
                    let reader = DataReader::FromBuffer(&value)?;
                    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
                    reader.ReadBytes(&mut bytes)?;
                    let _ = sender.send(NotificationEvent::Value(RawFrame::new(bytes)));
                }
                Ok(())
            },
        );
        let token = gatt_char.ValueChanged(&data_handler).map_err(win_err)?;

        let mut last_error = None;
        for attempt in 1..=NOTIFY_ATTEMPTS {
            match gatt_char
                .WriteClientCharacteristicConfigurationDescriptorAsync(
                    GattClientCharacteristicConfigurationDescriptorValue::Notify,
                )
                .map_err(win_err)?
                .await
            {
                Ok(GattCommunicationStatus::Success) => {
                    last_error = None;
                    break;
                }
                Ok(status) => {
                    warn!("Notification subscription returned status: {:?}", status);
                    last_error = Some(format!("{:?}", status));
                }
                Err(e) => {
                    warn!("Notification subscription attempt {} failed: {}", attempt, e);
                    last_error = Some(format!("{}", e));
                }
            }
            if attempt < NOTIFY_ATTEMPTS {
                tokio::time::sleep(tokio::time::Duration::from_millis(NOTIFY_RETRY_DELAY_MS))
                    .await;
            }
        }
        if let Some(error) = last_error {
            let _ = gatt_char.RemoveValueChanged(token);
            return Err(TransportError::new(format!(
                "Failed to enable notifications: {}",
                error
            )));
        }

        info!("Notifications enabled successfully");
        match self.links.lock().get_mut(device_id) {
            Some(link) => {
                link.notifications = Some((gatt_char, token));
                link.notification_sender = Some(tx);
            }
            None => {
                let _ = gatt_char.RemoveValueChanged(token);
                return Err(TransportError::new(format!(
                    "Device {} disconnected during subscription",
                    device_id
                )));
            }
        }
        Ok(rx)
    }

    async fn unsubscribe(
        &self,
        device_id: &str,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let notifications = {
            let mut links = self.links.lock();
            links.get_mut(device_id).and_then(|link| {
                link.notification_sender = None;
                link.notifications.take()
            })
        };
        let Some((gatt_char, token)) = notifications else {
            return Ok(());
        };

        gatt_char.RemoveValueChanged(token).map_err(win_err)?;
        let status = gatt_char
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::None,
            )
            .map_err(win_err)?
            .await
            .map_err(win_err)?;
        if status != GattCommunicationStatus::Success {
            debug!("Clearing notifications returned status: {:?}", status);
        }
        Ok(())
    }
}
