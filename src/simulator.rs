//! In-memory BMS for development and tests.
//!
//! A [`SimulatedDevice`] behaves like the real peripheral: it checks the
//! checksum of every command, echoes mosfet commands, tracks the mosfet state
//! and answers requests with sealed frames split into notification sized
//! chunks. Knobs make it stay silent, refuse disconnects or fail connects.

use crate::crc8::compute_checksum;
use crate::protocol::{append_checksum, generate_command_payload, CommandType, PackedDate};
use crate::transport::{
    Advertisement, NotificationSender, Notifications, Peripheral, Radio, RadioState,
    TransportError,
};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Default notification payload size, matching the default ATT MTU.
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Measurement frame captured from a pack, without its checksum byte.
const MEASUREMENT_BODY: &str = "8e21003c0001007701694100160019fffffffd0a0a0a060a060a040a050a040a040a000a030a040a030a030a030a030a02000000000000000000000a040800001a2a55005f00000005003200000000283811a800000000004800000042000000d200010000009a0000000000000000963c00000000000f001401000035000000003aec00000000000000000000";

const STATUS_OFFSET: usize = 61;
const MOSFET_BIT: u16 = 1 << 14;

/// Sealed measurement frame reporting the given mosfet state.
pub fn measurement_frame(mosfet_on: bool) -> Vec<u8> {
    // the body is a compile time constant
    let mut body = hex::decode(MEASUREMENT_BODY).unwrap_or_default();
    if let Some(word) = body.get_mut(STATUS_OFFSET..STATUS_OFFSET + 2) {
        let mut status = u16::from_be_bytes([word[0], word[1]]);
        if mosfet_on {
            status |= MOSFET_BIT;
        } else {
            status &= !MOSFET_BIT;
        }
        word.copy_from_slice(&status.to_be_bytes());
    }
    append_checksum(&body)
}

/// Sealed usage summary frame.
pub fn usage_summary_frame() -> Vec<u8> {
    let mut body = vec![12];
    body.extend_from_slice(&118u16.to_be_bytes());
    body.extend_from_slice(&121u16.to_be_bytes());
    body.extend_from_slice(&50u16.to_be_bytes());
    body.extend_from_slice(&packed_date(2024, 3, 9).to_be_bytes());
    body.extend_from_slice(&4u16.to_be_bytes());
    append_checksum(&body)
}

/// Sealed production data frame.
pub fn production_data_frame() -> Vec<u8> {
    let mut body = vec![33];
    body.extend_from_slice(&packed_date(2023, 11, 20).to_be_bytes());
    body.extend_from_slice(b"SIL0000042");
    body.push(b';');
    body.extend_from_slice(b"SIMULATED PACK 001");
    append_checksum(&body)
}

fn packed_date(year: u16, month: u8, day: u8) -> u16 {
    PackedDate::new(year, month, day)
        .map(PackedDate::to_word)
        .unwrap_or_default()
}

#[derive(Debug)]
struct DeviceState {
    connected: bool,
    discovered: bool,
    mosfet_on: bool,
    subscribers: Vec<NotificationSender>,
    writes: Vec<Vec<u8>>,
    chunk_size: usize,
    response_delay: Duration,
    silent: bool,
    stuck_mosfet: bool,
    refuse_disconnect: bool,
    fail_connect: bool,
}

#[derive(Debug)]
struct DeviceInner {
    name: String,
    state: Mutex<DeviceState>,
    link: watch::Sender<bool>,
}

/// Handle to one simulated BMS. Clones share the same device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    inner: Arc<DeviceInner>,
}

impl SimulatedDevice {
    pub fn new(name: impl Into<String>) -> Self {
        let (link, _) = watch::channel(false);
        Self {
            inner: Arc::new(DeviceInner {
                name: name.into(),
                state: Mutex::new(DeviceState {
                    connected: false,
                    discovered: false,
                    mosfet_on: false,
                    subscribers: Vec::new(),
                    writes: Vec::new(),
                    chunk_size: DEFAULT_CHUNK_SIZE,
                    response_delay: Duration::ZERO,
                    silent: false,
                    stuck_mosfet: false,
                    refuse_disconnect: false,
                    fail_connect: false,
                }),
                link,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub async fn mosfet_on(&self) -> bool {
        self.inner.state.lock().await.mosfet_on
    }

    pub async fn set_mosfet_on(&self, on: bool) {
        self.inner.state.lock().await.mosfet_on = on;
    }

    /// Every frame written to the device, valid or not.
    pub async fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.state.lock().await.writes.clone()
    }

    /// Number of live notification subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    pub async fn set_chunk_size(&self, chunk_size: usize) {
        self.inner.state.lock().await.chunk_size = chunk_size.max(1);
    }

    pub async fn set_response_delay(&self, delay: Duration) {
        self.inner.state.lock().await.response_delay = delay;
    }

    /// Accept commands without ever answering.
    pub async fn set_silent(&self, silent: bool) {
        self.inner.state.lock().await.silent = silent;
    }

    /// Acknowledge mosfet commands without changing state.
    pub async fn set_stuck_mosfet(&self, stuck: bool) {
        self.inner.state.lock().await.stuck_mosfet = stuck;
    }

    pub async fn set_refuse_disconnect(&self, refuse: bool) {
        self.inner.state.lock().await.refuse_disconnect = refuse;
    }

    pub async fn set_fail_connect(&self, fail: bool) {
        self.inner.state.lock().await.fail_connect = fail;
    }

    /// Drops the link as if the device went out of range.
    pub async fn drop_link(&self) {
        let mut state = self.inner.state.lock().await;
        Self::close_link(&mut state);
        self.inner.link.send_replace(false);
    }

    fn close_link(state: &mut DeviceState) {
        state.connected = false;
        state.discovered = false;
        state.subscribers.clear();
    }

    fn answer(state: &mut DeviceState, command: CommandType) -> Vec<u8> {
        match command {
            CommandType::MosfetOn | CommandType::MosfetOff => {
                if !state.stuck_mosfet {
                    state.mosfet_on = command == CommandType::MosfetOn;
                }
                generate_command_payload(command)
            }
            CommandType::DataMeasurements => measurement_frame(state.mosfet_on),
            CommandType::UsageSummary => usage_summary_frame(),
            CommandType::ProductionData => production_data_frame(),
        }
    }

    fn deliver(subscribers: &[NotificationSender], frame: &[u8], chunk_size: usize) {
        for chunk in frame.chunks(chunk_size) {
            for tx in subscribers {
                // closed subscriptions are pruned on the next write
                let _ = tx.send(Ok(chunk.to_vec()));
            }
        }
    }
}

#[async_trait]
impl Peripheral for SimulatedDevice {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().await;
        if state.fail_connect {
            return Err(TransportError::Platform("connection refused".to_string()));
        }
        state.connected = true;
        self.inner.link.send_replace(true);
        log::debug!("{} connected", self.inner.name);
        Ok(())
    }

    async fn discover(&self) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().await;
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.discovered = true;
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(self.inner.state.lock().await.connected)
    }

    async fn cancel_connection(&self) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().await;
        if state.refuse_disconnect {
            log::debug!("{} ignores disconnect", self.inner.name);
            return Ok(());
        }
        Self::close_link(&mut state);
        self.inner.link.send_replace(false);
        Ok(())
    }

    async fn write(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().await;
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if !state.discovered {
            return Err(TransportError::NotDiscovered);
        }
        state.writes.push(frame.to_vec());
        state.subscribers.retain(|tx| !tx.is_closed());

        let Some((&checksum, body)) = frame.split_last() else {
            return Ok(());
        };
        if compute_checksum(body) != checksum {
            log::warn!("simulator dropped frame with bad checksum: {}", hex::encode(frame));
            return Ok(());
        }
        let Some(command) = CommandType::ALL
            .into_iter()
            .find(|command| generate_command_payload(*command) == frame)
        else {
            log::warn!("simulator dropped unknown command: {}", hex::encode(frame));
            return Ok(());
        };

        let response = Self::answer(&mut state, command);
        if state.silent {
            return Ok(());
        }
        let subscribers = state.subscribers.clone();
        let chunk_size = state.chunk_size;
        let delay = state.response_delay;
        if delay.is_zero() {
            Self::deliver(&subscribers, &response, chunk_size);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                Self::deliver(&subscribers, &response, chunk_size);
            });
        }
        Ok(())
    }

    async fn notifications(&self) -> Result<Notifications, TransportError> {
        let mut state = self.inner.state.lock().await;
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if !state.discovered {
            return Err(TransportError::NotDiscovered);
        }
        let (tx, notifications) = Notifications::channel();
        state.subscribers.push(tx);
        Ok(notifications)
    }

    async fn wait_disconnected(&self) -> Result<(), TransportError> {
        let mut link = self.inner.link.subscribe();
        link.wait_for(|connected| !*connected)
            .await
            .map(|_| ())
            .map_err(|_| TransportError::Platform("device removed".to_string()))
    }
}

/// Radio advertising a fixed set of simulated devices.
#[derive(Debug)]
pub struct SimulatedRadio {
    state: Mutex<RadioState>,
    devices: Vec<SimulatedDevice>,
}

impl SimulatedRadio {
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            state: Mutex::new(RadioState::PoweredOn),
            devices,
        }
    }

    /// Radio with a single device named `name`.
    pub fn with_device(name: &str) -> Self {
        Self::new(vec![SimulatedDevice::new(name)])
    }

    pub fn devices(&self) -> &[SimulatedDevice] {
        &self.devices
    }

    pub async fn set_state(&self, state: RadioState) {
        *self.state.lock().await = state;
    }
}

#[async_trait]
impl Radio for SimulatedRadio {
    type Peripheral = SimulatedDevice;

    async fn state(&self) -> Result<RadioState, TransportError> {
        Ok(*self.state.lock().await)
    }

    async fn scan(
        &self,
    ) -> Result<BoxStream<'_, Advertisement<Self::Peripheral>>, TransportError> {
        let advertisements = self
            .devices
            .iter()
            .map(|device| Advertisement {
                name: Some(device.inner.name.clone()),
                local_name: None,
                peripheral: device.clone(),
            })
            .collect::<Vec<_>>();
        // a real scan never ends on its own
        Ok(stream::iter(advertisements).chain(stream::pending()).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DataMeasurements, ProductionData, Response, UsageSummary};

    #[test]
    fn frames_decode() {
        let on = DataMeasurements::decode(&measurement_frame(true)).unwrap();
        assert!(on.mosfet_on());
        let off = DataMeasurements::decode(&measurement_frame(false)).unwrap();
        assert!(!off.mosfet_on());
        assert_eq!(on.voltages, off.voltages);

        let summary = UsageSummary::decode(&usage_summary_frame()).unwrap();
        assert_eq!(summary.cycles_charge, 121);
        assert_eq!(summary.date_charge.to_string(), "2024-03-09");

        let production = ProductionData::decode(&production_data_frame()).unwrap();
        assert_eq!(production.serial_number, "SIL0000042");
        assert_eq!(production.tag_data, "SIMULATED PACK 001");
    }

    #[test]
    fn frames_declare_their_length() {
        for frame in [
            measurement_frame(false),
            usage_summary_frame(),
            production_data_frame(),
        ] {
            assert_eq!(frame[0] as usize, frame.len());
        }
    }

    #[tokio::test]
    async fn answers_in_chunks() {
        let device = SimulatedDevice::new("SIL-1");
        device.connect().await.unwrap();
        device.discover().await.unwrap();
        let mut notifications = device.notifications().await.unwrap();
        device.set_chunk_size(5).await;
        device
            .write(&generate_command_payload(CommandType::UsageSummary))
            .await
            .unwrap();

        let mut received = Vec::new();
        while received.len() < 12 {
            let chunk = notifications.next().await.unwrap().unwrap();
            assert!(chunk.len() <= 5);
            received.extend(chunk);
        }
        assert_eq!(received, usage_summary_frame());
    }

    #[tokio::test]
    async fn drops_bad_checksum() {
        let device = SimulatedDevice::new("SIL-1");
        device.connect().await.unwrap();
        device.discover().await.unwrap();
        let notifications = device.notifications().await.unwrap();
        device.write(&[0x04, 0x21, 0x00, 0x11]).await.unwrap();
        assert_eq!(device.writes().await.len(), 1);
        drop(notifications);
        assert_eq!(device.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn write_requires_discovery() {
        let device = SimulatedDevice::new("SIL-1");
        assert_eq!(
            device.write(&[0x04]).await,
            Err(TransportError::NotConnected)
        );
        device.connect().await.unwrap();
        assert_eq!(
            device.write(&[0x04]).await,
            Err(TransportError::NotDiscovered)
        );
    }
}
