//! Bluetooth Low Energy backend built on `bluest`.
//!
//! # Example
//!
//! ```no_run
//! use silbms_lib::bluest_transport::BluestRadio;
//! use silbms_lib::session::{BmsSession, DeviceFilter, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), silbms_lib::Error> {
//!     let radio = BluestRadio::new().await?;
//!     let session = BmsSession::new(radio, SessionConfig::default());
//!     session.connect(&DeviceFilter::named("SIL-001-002-003")).await?;
//!     let measurements = session.request_measurements().await?;
//!     println!("{:?}", measurements.voltages);
//!     Ok(())
//! }
//! ```

use crate::transport::{Advertisement, Notifications, Peripheral, Radio, RadioState, TransportError};
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Uuid};
use futures_util::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

/// GATT service exposed by the BMS.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x1d5688de_866d_3aa4_ec46_a1bddb37ecf6);
/// Characteristic used both for commands and for response notifications.
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xaf20fbac_2518_4998_9af7_af42540731b3);

impl From<bluest::Error> for TransportError {
    fn from(err: bluest::Error) -> Self {
        TransportError::Platform(err.to_string())
    }
}

/// The default system adapter.
#[derive(Debug, Clone)]
pub struct BluestRadio {
    adapter: Adapter,
}

impl BluestRadio {
    pub async fn new() -> Result<Self, TransportError> {
        let adapter = Adapter::default()
            .await
            .ok_or(TransportError::AdapterUnavailable)?;
        Ok(Self { adapter })
    }
}

#[async_trait]
impl Radio for BluestRadio {
    type Peripheral = BluestPeripheral;

    async fn state(&self) -> Result<RadioState, TransportError> {
        if self.adapter.is_available().await? {
            Ok(RadioState::PoweredOn)
        } else {
            Ok(RadioState::PoweredOff)
        }
    }

    async fn scan(
        &self,
    ) -> Result<BoxStream<'_, Advertisement<Self::Peripheral>>, TransportError> {
        let adapter = self.adapter.clone();
        let events = self.adapter.scan(&[]).await?;
        Ok(events
            .map(move |found| Advertisement {
                name: found.device.name().ok(),
                local_name: found.adv_data.local_name.clone(),
                peripheral: BluestPeripheral::new(adapter.clone(), found.device),
            })
            .boxed())
    }
}

/// A BMS reached through `bluest`.
#[derive(Debug, Clone)]
pub struct BluestPeripheral {
    adapter: Adapter,
    device: Device,
    characteristic: Arc<Mutex<Option<Characteristic>>>,
}

impl BluestPeripheral {
    fn new(adapter: Adapter, device: Device) -> Self {
        Self {
            adapter,
            device,
            characteristic: Arc::new(Mutex::new(None)),
        }
    }

    async fn characteristic(&self) -> Result<Characteristic, TransportError> {
        self.characteristic
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotDiscovered)
    }
}

#[async_trait]
impl Peripheral for BluestPeripheral {
    async fn connect(&self) -> Result<(), TransportError> {
        self.adapter.connect_device(&self.device).await?;
        Ok(())
    }

    async fn discover(&self) -> Result<(), TransportError> {
        let service = self
            .device
            .discover_services_with_uuid(SERVICE_UUID)
            .await?
            .first()
            .cloned()
            .ok_or_else(|| TransportError::ServiceNotFound(SERVICE_UUID.to_string()))?;
        let characteristic = service
            .discover_characteristics_with_uuid(CHARACTERISTIC_UUID)
            .await?
            .first()
            .cloned()
            .ok_or_else(|| TransportError::CharacteristicNotFound(CHARACTERISTIC_UUID.to_string()))?;
        log::debug!("discovered characteristic {CHARACTERISTIC_UUID}");
        *self.characteristic.lock().await = Some(characteristic);
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(self.device.is_connected().await)
    }

    async fn cancel_connection(&self) -> Result<(), TransportError> {
        self.adapter.disconnect_device(&self.device).await?;
        Ok(())
    }

    async fn write(&self, frame: &[u8]) -> Result<(), TransportError> {
        let characteristic = self.characteristic().await?;
        log::trace!("TX: {}", hex::encode(frame));
        characteristic.write(frame).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<Notifications, TransportError> {
        let characteristic = self.characteristic().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (subscribed_tx, subscribed_rx) = oneshot::channel();

        // The notify stream borrows the characteristic, so the task owns both.
        let forwarder = tokio::spawn(async move {
            let mut stream = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = subscribed_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = subscribed_tx.send(Err(TransportError::from(err)));
                    return;
                }
            };
            while let Some(value) = stream.next().await {
                if tx.send(value.map_err(TransportError::from)).is_err() {
                    break;
                }
            }
            log::debug!("notification forwarder stopped");
        });

        match subscribed_rx.await {
            Ok(Ok(())) => Ok(Notifications::with_forwarder(rx, forwarder)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(TransportError::NotificationsClosed),
        }
    }

    async fn wait_disconnected(&self) -> Result<(), TransportError> {
        let mut events = self.adapter.device_connection_events(&self.device).await?;
        while let Some(event) = events.next().await {
            if matches!(event, bluest::ConnectionEvent::Disconnected) {
                return Ok(());
            }
        }
        Err(TransportError::Platform(
            "connection event stream ended".to_string(),
        ))
    }
}
