//! Windows BLE transport.
//!
//! Drives the WinRT Bluetooth LE APIs: an advertisement watcher for scanning,
//! `BluetoothLEDevice` + `GattSession` for the link, and `ValueChanged`
//! handlers that forward notifications into the session's event channel.

use crate::domain::models::ScannedDevice;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattSession, GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

fn to_guid(uuid: Uuid) -> GUID {
    let (data1, data2, data3, data4) = uuid.as_fields();
    GUID {
        data1,
        data2,
        data3,
        data4: *data4,
    }
}

fn from_guid(guid: GUID) -> Uuid {
    Uuid::from_fields(guid.data1, guid.data2, guid.data3, &guid.data4)
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

#[derive(Default)]
struct WinRtState {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    device: Option<BluetoothLEDevice>,
    gatt_session: Option<GattSession>,
    characteristics: HashMap<Uuid, GattCharacteristic>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
}

/// [`BleTransport`] backed by the WinRT Bluetooth stack
#[derive(Default)]
pub struct WinRtTransport {
    state: Mutex<WinRtState>,
}

impl WinRtTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WinRtState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn characteristic(&self, uuid: Uuid) -> Result<GattCharacteristic, TransportError> {
        let state = self.lock();
        if state.device.is_none() {
            return Err(TransportError::NotConnected);
        }
        state
            .characteristics
            .get(&uuid)
            .cloned()
            .ok_or_else(|| TransportError::Discover(format!("{} not discovered", uuid)))
    }
}

#[async_trait]
impl BleTransport for WinRtTransport {
    async fn start_scan(
        &self,
        sink: mpsc::UnboundedSender<ScannedDevice>,
    ) -> Result<(), TransportError> {
        self.stop_scan().await?;
        info!("Starting BLE scan for GoPro cameras");

        let scan_err = |e: windows::core::Error| TransportError::Scan(e.to_string());
        let watcher = BluetoothLEAdvertisementWatcher::new().map_err(scan_err)?;
        watcher
            .SetScanningMode(BluetoothLEScanningMode::Active)
            .map_err(scan_err)?;

        let service = to_guid(protocol::SERVICE_UUID);
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;
                    let service_uuids = adv.ServiceUuids()?;
                    let name = adv.LocalName()?.to_string();

                    let mut is_gopro = name.starts_with("GoPro");
                    for i in 0..service_uuids.Size()? {
                        if service_uuids.GetAt(i)? == service {
                            is_gopro = true;
                            break;
                        }
                    }

                    if is_gopro && !name.is_empty() {
                        let _ = sink.send(ScannedDevice {
                            name,
                            address: args.BluetoothAddress()?,
                            signal_strength: args.RawSignalStrengthInDBm()?,
                        });
                    }
                }
                Ok(())
            },
        );

        watcher.Received(&handler).map_err(scan_err)?;
        watcher.Start().map_err(scan_err)?;
        self.lock().watcher = Some(watcher);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        if let Some(watcher) = self.lock().watcher.take() {
            debug!("Stopping BLE scan");
            watcher
                .Stop()
                .map_err(|e| TransportError::Scan(e.to_string()))?;
        }
        Ok(())
    }

    async fn connect(
        &self,
        address: u64,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        let connect_err = |e: windows::core::Error| TransportError::Connect(e.to_string());
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)
            .map_err(connect_err)?
            .await
            .map_err(connect_err)?;
        info!("Opened {:#X}: {:?}", address, device.Name());

        // Keeps Windows from dropping the link between our writes
        let gatt_session = match GattSession::FromDeviceIdAsync(
            &device.BluetoothDeviceId().map_err(connect_err)?,
        ) {
            Ok(op) => match op.await {
                Ok(session) => {
                    let _ = session.SetMaintainConnection(true);
                    Some(session)
                }
                Err(e) => {
                    warn!("GattSession unavailable: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("GattSession unavailable: {}", e);
                None
            }
        };

        let (events, receiver) = mpsc::unbounded_channel();
        let sender = events.clone();
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        let _ = sender.send(TransportEvent::Disconnected);
                    }
                }
                Ok(())
            });
        device
            .ConnectionStatusChanged(&status_handler)
            .map_err(connect_err)?;

        let mut state = self.lock();
        state.device = Some(device);
        state.gatt_session = gatt_session;
        state.characteristics.clear();
        state.events = Some(events);
        Ok(receiver)
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>, TransportError> {
        let device = self
            .lock()
            .device
            .clone()
            .ok_or(TransportError::NotConnected)?;
        let discover_err = |e: windows::core::Error| TransportError::Discover(e.to_string());

        let services = device
            .GetGattServicesForUuidAsync(to_guid(protocol::SERVICE_UUID))
            .map_err(discover_err)?
            .await
            .map_err(discover_err)?;
        if services.Status().map_err(discover_err)? != GattCommunicationStatus::Success {
            return Err(TransportError::Discover(format!(
                "service query returned {:?}",
                services.Status()
            )));
        }
        let services = services.Services().map_err(discover_err)?;
        if services.Size().map_err(discover_err)? == 0 {
            return Err(TransportError::Discover("GoPro service not found".to_string()));
        }
        let service = services.GetAt(0).map_err(discover_err)?;

        let result = service
            .GetCharacteristicsAsync()
            .map_err(discover_err)?
            .await
            .map_err(discover_err)?;
        if result.Status().map_err(discover_err)? != GattCommunicationStatus::Success {
            return Err(TransportError::Discover(
                "characteristic query failed".to_string(),
            ));
        }

        let characteristics = result.Characteristics().map_err(discover_err)?;
        let mut found = HashMap::new();
        for i in 0..characteristics.Size().map_err(discover_err)? {
            let characteristic = characteristics.GetAt(i).map_err(discover_err)?;
            let uuid = from_guid(characteristic.Uuid().map_err(discover_err)?);
            found.insert(uuid, characteristic);
        }
        info!("Found {} GoPro characteristics", found.len());

        let uuids = found.keys().copied().collect();
        self.lock().characteristics = found;
        Ok(uuids)
    }

    async fn read_characteristic(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError> {
        let gatt = self.characteristic(characteristic)?;
        let read_err = |e: windows::core::Error| TransportError::Read(e.to_string());

        let result = gatt
            .ReadValueAsync()
            .map_err(read_err)?
            .await
            .map_err(read_err)?;
        let status = result.Status().map_err(read_err)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Read(format!(
                "{} returned {:?}",
                characteristic, status
            )));
        }
        read_buffer(&result.Value().map_err(read_err)?).map_err(read_err)
    }

    async fn write_characteristic(
        &self,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let gatt = self.characteristic(characteristic)?;
        let write_err = |e: windows::core::Error| TransportError::Write(e.to_string());

        let writer = DataWriter::new().map_err(write_err)?;
        writer.WriteBytes(value).map_err(write_err)?;
        let buffer = writer.DetachBuffer().map_err(write_err)?;

        let status = gatt
            .WriteValueWithOptionAsync(&buffer, GattWriteOption::WriteWithResponse)
            .map_err(write_err)?
            .await
            .map_err(write_err)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Write(format!(
                "{} returned {:?}",
                characteristic, status
            )));
        }
        Ok(())
    }

    async fn enable_notification(&self, characteristic: Uuid) -> Result<(), TransportError> {
        let gatt = self.characteristic(characteristic)?;
        let events = self
            .lock()
            .events
            .clone()
            .ok_or(TransportError::NotConnected)?;
        let notify_err = |e: windows::core::Error| TransportError::Notify(e.to_string());

        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let value = read_buffer(&args.CharacteristicValue()?)?;
                    let _ = events.send(TransportEvent::Notification {
                        characteristic,
                        value,
                    });
                }
                Ok(())
            },
        );
        gatt.ValueChanged(&handler).map_err(notify_err)?;

        let status = gatt
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )
            .map_err(notify_err)?
            .await
            .map_err(notify_err)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Notify(format!(
                "{} returned {:?}",
                characteristic, status
            )));
        }
        debug!("Notifications enabled on {}", characteristic);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let (device, gatt_session, events) = {
            let mut state = self.lock();
            state.characteristics.clear();
            (
                state.device.take(),
                state.gatt_session.take(),
                state.events.take(),
            )
        };
        if let Some(session) = gatt_session {
            let _ = session.Close();
        }
        if let Some(device) = device {
            info!("Closing camera link");
            let _ = device.Close();
        }
        if let Some(events) = events {
            let _ = events.send(TransportEvent::Disconnected);
        }
        Ok(())
    }
}
