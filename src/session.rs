//! Transport session manager.
//!
//! A [`BmsSession`] owns the one peripheral the application talks to and the
//! lock serializing logical operations against it. Every request runs the
//! same sequence: lock, ensure connected, subscribe, write, reassemble, parse,
//! unlock.
//!
//! # Example
//!
//! ```no_run
//! use silbms_lib::session::{BmsSession, SessionConfig};
//! use silbms_lib::simulator::SimulatedRadio;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), silbms_lib::Error> {
//!     let config = SessionConfig {
//!         device_name: Some("SIL-001-002-003".to_string()),
//!         ..Default::default()
//!     };
//!     let radio = SimulatedRadio::with_device("SIL-001-002-003");
//!     let session = BmsSession::new(radio, config);
//!     session.connect(&session.config().device_filter()).await?;
//!
//!     let measurements = session.request_measurements().await?;
//!     println!("SOC: {}%", measurements.soc_percent);
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```

use crate::protocol::{
    generate_command_payload, CommandType, DataMeasurements, ProductionData, Response,
    UsageSummary,
};
use crate::reassembly::read_frame;
use crate::transport::{Advertisement, Peripheral, Radio, RadioState};
use crate::Error;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

type Result<T> = std::result::Result<T, Error>;

/// Timeouts and device selection for a [`BmsSession`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Exact advertised name of the device to connect to.
    pub device_name: Option<String>,
    /// Every BMS advertises a name with this prefix.
    pub name_prefix: String,
    /// Connect to the first device carrying the prefix, whatever its name.
    pub accept_any_device: bool,
    #[serde(with = "humantime_serde")]
    pub scan_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub disconnect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub disconnect_poll_interval: Duration,
    /// Pause between a mosfet command and the confirming measurement request.
    #[serde(with = "humantime_serde")]
    pub toggle_settle_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            name_prefix: "SIL-".to_string(),
            accept_any_device: false,
            scan_timeout: Duration::from_secs(15),
            response_timeout: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(5),
            disconnect_poll_interval: Duration::from_millis(500),
            toggle_settle_delay: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    pub fn device_filter(&self) -> DeviceFilter {
        DeviceFilter {
            prefix: self.name_prefix.clone(),
            target: self.device_name.clone(),
            accept_any_device: self.accept_any_device,
        }
    }
}

/// Selects the peripheral to connect to while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    pub prefix: String,
    pub target: Option<String>,
    pub accept_any_device: bool,
}

impl DeviceFilter {
    /// Filter for exactly one named device.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            prefix: SessionConfig::default().name_prefix,
            target: Some(name.into()),
            accept_any_device: false,
        }
    }

    /// Filter accepting any device carrying the default prefix.
    pub fn any() -> Self {
        Self {
            prefix: SessionConfig::default().name_prefix,
            target: None,
            accept_any_device: true,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        if !name.starts_with(&self.prefix) {
            return false;
        }
        self.accept_any_device || self.target.as_deref() == Some(name)
    }

    /// A device matches on either its platform name or its advertised local name.
    pub fn matches_advertisement<P>(&self, advertisement: &Advertisement<P>) -> bool {
        [&advertisement.name, &advertisement.local_name]
            .into_iter()
            .flatten()
            .any(|name| self.matches(name))
    }
}

/// Exclusive lock over the physical link.
#[derive(Debug)]
pub struct SessionLock {
    mutex: Mutex<()>,
    timeout: Duration,
}

/// Held while a logical operation runs. Dropping it releases the lock.
#[derive(Debug)]
pub struct SessionGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        log::debug!("Lock released");
    }
}

impl SessionLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            timeout,
        }
    }

    /// Waits up to the configured timeout for the lock.
    pub async fn acquire(&self) -> Result<SessionGuard<'_>> {
        log::debug!("Acquiring lock...");
        match tokio::time::timeout(self.timeout, self.mutex.lock()).await {
            Ok(guard) => {
                log::debug!("Lock acquired");
                Ok(SessionGuard { _guard: guard })
            }
            Err(_) => {
                log::warn!("Lock acquisition timed out after {:?}", self.timeout);
                Err(Error::DeviceLocked(self.timeout))
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.mutex.try_lock().is_err()
    }
}

/// Session with one BMS reachable through `R`.
pub struct BmsSession<R: Radio> {
    radio: R,
    device: Arc<Mutex<Option<R::Peripheral>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    lock: SessionLock,
    last_measurements: Mutex<Option<DataMeasurements>>,
    config: SessionConfig,
}

impl<R: Radio> BmsSession<R> {
    pub fn new(radio: R, config: SessionConfig) -> Self {
        Self {
            radio,
            device: Arc::new(Mutex::new(None)),
            watcher: Mutex::new(None),
            lock: SessionLock::new(config.lock_timeout),
            last_measurements: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn lock(&self) -> &SessionLock {
        &self.lock
    }

    /// Whether a device handle is currently held.
    pub async fn has_device(&self) -> bool {
        self.device.lock().await.is_some()
    }

    /// The most recent successfully decoded measurements.
    pub async fn last_measurements(&self) -> Option<DataMeasurements> {
        self.last_measurements.lock().await.clone()
    }

    /// Scans for a device accepted by `filter`, connects and discovers its services.
    ///
    /// The radio must be powered on. A device held from an earlier connect
    /// is disconnected first. The scan stops at the first match or
    /// after the configured scan timeout. Once connected, a watcher task
    /// clears the held device when the link drops.
    ///
    /// # Errors
    ///
    /// [`Error::BluetoothNotPoweredOn`], [`Error::ScanTimeout`],
    /// [`Error::ConnectionFailed`] or [`Error::DiscoveryFailed`].
    pub async fn connect(&self, filter: &DeviceFilter) -> Result<R::Peripheral> {
        let state = self.radio.state().await?;
        if state != RadioState::PoweredOn {
            log::warn!("Bluetooth radio state is {state:?}");
            return Err(Error::BluetoothNotPoweredOn);
        }
        self.release_previous().await;

        log::debug!("scan for {filter:?}");
        let scan_timeout = self.config.scan_timeout;
        let found = tokio::time::timeout(scan_timeout, async {
            let mut scan = self.radio.scan().await?;
            while let Some(advertisement) = scan.next().await {
                log::trace!(
                    "discovered {:?} / {:?}",
                    advertisement.name,
                    advertisement.local_name
                );
                if filter.matches_advertisement(&advertisement) {
                    return Ok(Some(advertisement));
                }
            }
            Ok::<_, Error>(None)
        })
        .await;

        let advertisement = match found {
            Ok(Ok(Some(advertisement))) => advertisement,
            Ok(Ok(None)) | Err(_) => {
                log::warn!("no matching device within {scan_timeout:?}");
                return Err(Error::ScanTimeout(scan_timeout));
            }
            Ok(Err(err)) => return Err(err),
        };
        let peripheral = advertisement.peripheral;

        if let Err(err) = self.open(&peripheral).await {
            self.forget_device().await;
            return Err(err);
        }
        log::info!(
            "Connected to {}",
            advertisement
                .name
                .or(advertisement.local_name)
                .unwrap_or_default()
        );

        *self.device.lock().await = Some(peripheral.clone());
        self.watch(peripheral.clone()).await;
        Ok(peripheral)
    }

    async fn open(&self, peripheral: &R::Peripheral) -> Result<()> {
        peripheral.connect().await.map_err(Error::ConnectionFailed)?;
        peripheral.discover().await.map_err(Error::DiscoveryFailed)?;
        Ok(())
    }

    async fn watch(&self, peripheral: R::Peripheral) {
        let slot = Arc::clone(&self.device);
        let handle = tokio::spawn(async move {
            match peripheral.wait_disconnected().await {
                Ok(()) => {
                    log::info!("Device disconnected");
                    slot.lock().await.take();
                }
                Err(err) => log::warn!("connection watcher stopped: {err}"),
            }
        });
        if let Some(previous) = self.watcher.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Cancels the link of a device still held from an earlier connect.
    async fn release_previous(&self) {
        let Some(previous) = self.device.lock().await.take() else {
            return;
        };
        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.abort();
        }
        log::debug!("releasing previously held device");
        if let Err(err) = previous.cancel_connection().await {
            log::warn!("Cannot cancel previous connection: {err}");
        }
    }

    async fn forget_device(&self) {
        self.device.lock().await.take();
        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.abort();
        }
    }

    async fn current_device(&self) -> Result<R::Peripheral> {
        self.device.lock().await.clone().ok_or(Error::NotConnected)
    }

    async fn ensure_connected(&self, peripheral: &R::Peripheral) -> Result<()> {
        if !peripheral.is_connected().await? {
            log::debug!("device not connected, reconnecting");
            peripheral.connect().await.map_err(Error::ConnectionFailed)?;
        }
        peripheral.discover().await.map_err(Error::DiscoveryFailed)
    }

    async fn send(&self, peripheral: &R::Peripheral, command: CommandType) -> Result<()> {
        let payload = generate_command_payload(command);
        log::debug!("Sending {command}");
        peripheral.write(&payload).await?;
        Ok(())
    }

    /// Sends the request of `T` and decodes the answer.
    pub async fn request<T: Response>(&self) -> Result<T> {
        let peripheral = self.current_device().await?;
        let _guard = self.lock.acquire().await?;
        self.ensure_connected(&peripheral).await?;

        let notifications = peripheral.notifications().await?;
        self.send(&peripheral, T::COMMAND).await?;
        let frame = read_frame(notifications, self.config.response_timeout).await?;
        T::decode(&frame)
    }

    /// Requests the live measurements.
    pub async fn request_measurements(&self) -> Result<DataMeasurements> {
        let measurements = self.request::<DataMeasurements>().await?;
        *self.last_measurements.lock().await = Some(measurements.clone());
        Ok(measurements)
    }

    pub async fn request_usage_summary(&self) -> Result<UsageSummary> {
        self.request().await
    }

    pub async fn request_production_data(&self) -> Result<ProductionData> {
        self.request().await
    }

    /// Switches the mosfet and reports the state read back from the device.
    ///
    /// After the mosfet command the session waits for the settle delay, then
    /// requests measurements and returns their mosfet flag. The returned
    /// state is not compared against `target`, see
    /// [`BmsSession::toggle_mosfet_checked`].
    pub async fn toggle_mosfet(&self, target: bool) -> Result<bool> {
        let peripheral = self.current_device().await?;
        let _guard = self.lock.acquire().await?;
        self.ensure_connected(&peripheral).await?;

        let notifications = peripheral.notifications().await?;
        self.send(&peripheral, CommandType::mosfet(target)).await?;
        tokio::time::sleep(self.config.toggle_settle_delay).await;
        self.send(&peripheral, CommandType::DataMeasurements).await?;

        let frame = read_frame(notifications, self.config.response_timeout).await?;
        let measurements = DataMeasurements::decode(&frame)?;
        let mosfet_on = measurements.mosfet_on();
        *self.last_measurements.lock().await = Some(measurements);
        log::info!("mosfet target={target} reported={mosfet_on}");
        Ok(mosfet_on)
    }

    /// Like [`BmsSession::toggle_mosfet`], failing when the target state was not reached.
    pub async fn toggle_mosfet_checked(&self, target: bool) -> Result<()> {
        let actual = self.toggle_mosfet(target).await?;
        if actual != target {
            return Err(Error::TargetStateNotReached { target, actual });
        }
        Ok(())
    }

    /// Cancels the connection until the device reports disconnected.
    ///
    /// Retries every poll interval until the disconnect timeout is exhausted.
    pub async fn disconnect(&self) -> Result<()> {
        let peripheral = self.current_device().await?;
        let start = tokio::time::Instant::now();
        loop {
            if let Err(err) = peripheral.cancel_connection().await {
                log::warn!("Disconnection attempt failed: {err}");
            }
            tokio::time::sleep(self.config.disconnect_poll_interval).await;

            if !peripheral.is_connected().await? {
                log::info!("Device disconnected successfully");
                self.forget_device().await;
                return Ok(());
            }
            if start.elapsed() >= self.config.disconnect_timeout {
                log::warn!(
                    "Device still connected after {:?}",
                    self.config.disconnect_timeout
                );
                return Err(Error::DisconnectTimeout(self.config.disconnect_timeout));
            }
            log::debug!("Device still connected, retrying disconnection...");
        }
    }

    /// Current connectedness. `false` when no device is held.
    pub async fn check_connection_status(&self) -> Result<bool> {
        let Some(peripheral) = self.device.lock().await.clone() else {
            return Ok(false);
        };
        Ok(peripheral.is_connected().await?)
    }
}

impl<R: Radio> Drop for BmsSession<R> {
    fn drop(&mut self) {
        if let Ok(mut watcher) = self.watcher.try_lock() {
            if let Some(handle) = watcher.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_requires_prefix() {
        let filter = DeviceFilter::named("SIL-001-002-003");
        assert!(filter.matches("SIL-001-002-003"));
        assert!(!filter.matches("SIL-001-002-004"));
        assert!(!filter.matches("XIL-001-002-003"));

        let any = DeviceFilter::any();
        assert!(any.matches("SIL-999-999-999"));
        assert!(!any.matches("Headphones"));
    }

    #[test]
    fn filter_without_target_matches_nothing() {
        let filter = SessionConfig::default().device_filter();
        assert!(!filter.matches("SIL-001-002-003"));
    }

    #[test]
    fn filter_checks_both_names() {
        let filter = DeviceFilter::named("SIL-1");
        let advertisement = Advertisement {
            name: None,
            local_name: Some("SIL-1".to_string()),
            peripheral: (),
        };
        assert!(filter.matches_advertisement(&advertisement));
        let advertisement = Advertisement {
            name: Some("other".to_string()),
            local_name: None,
            peripheral: (),
        };
        assert!(!filter.matches_advertisement(&advertisement));
    }

    #[test]
    fn default_config_timings() {
        let config = SessionConfig::default();
        assert_eq!(config.scan_timeout, Duration::from_secs(15));
        assert_eq!(config.response_timeout, Duration::from_secs(10));
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.disconnect_timeout, Duration::from_secs(5));
        assert_eq!(config.disconnect_poll_interval, Duration::from_millis(500));
        assert_eq!(config.toggle_settle_delay, Duration::from_secs(1));
    }

    #[test]
    fn config_deserializes_humantime() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"device_name": "SIL-001-002-003", "response_timeout": "2s 500ms"}"#,
        )
        .unwrap();
        assert_eq!(config.device_name.as_deref(), Some("SIL-001-002-003"));
        assert_eq!(config.response_timeout, Duration::from_millis(2500));
        assert_eq!(config.scan_timeout, Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn lock_times_out_while_held() {
        let lock = SessionLock::new(Duration::from_secs(5));
        let guard = lock.acquire().await.unwrap();
        assert!(lock.is_locked());
        assert!(matches!(
            lock.acquire().await,
            Err(Error::DeviceLocked(timeout)) if timeout == Duration::from_secs(5)
        ));
        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.acquire().await.is_ok());
    }
}
