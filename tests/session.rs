use silbms_lib::protocol::{generate_command_payload, CommandType};
use silbms_lib::session::{BmsSession, DeviceFilter, SessionConfig};
use silbms_lib::simulator::{SimulatedDevice, SimulatedRadio};
use silbms_lib::transport::{Peripheral, RadioState};
use silbms_lib::Error;
use std::time::Duration;
use tokio::time::Instant;

const DEVICE_NAME: &str = "SIL-001-002-003";

fn config() -> SessionConfig {
    SessionConfig {
        device_name: Some(DEVICE_NAME.to_string()),
        ..Default::default()
    }
}

async fn connected_session() -> (BmsSession<SimulatedRadio>, SimulatedDevice) {
    let radio = SimulatedRadio::new(vec![
        SimulatedDevice::new("Headphones"),
        SimulatedDevice::new("SIL-999-999-999"),
        SimulatedDevice::new(DEVICE_NAME),
    ]);
    let device = radio.devices()[2].clone();
    let session = BmsSession::new(radio, config());
    session
        .connect(&session.config().device_filter())
        .await
        .unwrap();
    (session, device)
}

#[tokio::test(start_paused = true)]
async fn request_measurements() {
    let (session, device) = connected_session().await;
    assert!(session.check_connection_status().await.unwrap());

    let measurements = session.request_measurements().await.unwrap();
    assert_eq!(measurements.temp_cell, 22);
    assert_eq!(measurements.voltages.len(), 20);
    assert!(!measurements.mosfet_on());
    assert_eq!(session.last_measurements().await, Some(measurements));

    assert_eq!(
        device.writes().await,
        vec![generate_command_payload(CommandType::DataMeasurements)]
    );
    assert_eq!(device.subscriber_count().await, 0);
    assert!(!session.lock().is_locked());
}

#[tokio::test(start_paused = true)]
async fn request_other_records() {
    let (session, _device) = connected_session().await;
    let summary = session.request_usage_summary().await.unwrap();
    assert_eq!(summary.cycles_discharge, 118);
    let production = session.request_production_data().await.unwrap();
    assert_eq!(production.serial_number, "SIL0000042");
}

#[tokio::test(start_paused = true)]
async fn single_byte_chunks_reassemble() {
    let (session, device) = connected_session().await;
    device.set_chunk_size(1).await;
    let measurements = session.request_measurements().await.unwrap();
    assert_eq!(measurements.soc_percent, 26);
}

#[tokio::test(start_paused = true)]
async fn connect_picks_matching_device() {
    let (session, device) = connected_session().await;
    assert_eq!(device.name(), DEVICE_NAME);
    assert!(!device.mosfet_on().await);
    assert!(session.has_device().await);
    assert!(session.radio().devices()[1].writes().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn connect_requires_powered_radio() {
    let radio = SimulatedRadio::with_device(DEVICE_NAME);
    radio.set_state(RadioState::PoweredOff).await;
    let session = BmsSession::new(radio, config());
    assert!(matches!(
        session.connect(&DeviceFilter::named(DEVICE_NAME)).await,
        Err(Error::BluetoothNotPoweredOn)
    ));
}

#[tokio::test(start_paused = true)]
async fn scan_times_out_without_match() {
    let session = BmsSession::new(SimulatedRadio::with_device("SIL-000-000-000"), config());
    let start = Instant::now();
    let result = session.connect(&DeviceFilter::named(DEVICE_NAME)).await;
    assert!(matches!(result, Err(Error::ScanTimeout(_))));
    assert!(start.elapsed() >= Duration::from_secs(15));
    assert!(!session.has_device().await);
}

#[tokio::test(start_paused = true)]
async fn accept_any_device() {
    let session = BmsSession::new(SimulatedRadio::with_device("SIL-000-000-000"), config());
    session.connect(&DeviceFilter::any()).await.unwrap();
    assert!(session.has_device().await);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_holds_no_device() {
    let radio = SimulatedRadio::with_device(DEVICE_NAME);
    radio.devices()[0].set_fail_connect(true).await;
    let session = BmsSession::new(radio, config());
    assert!(matches!(
        session.connect(&DeviceFilter::named(DEVICE_NAME)).await,
        Err(Error::ConnectionFailed(_))
    ));
    assert!(!session.has_device().await);
    assert!(!session.check_connection_status().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn request_without_device() {
    let session = BmsSession::new(SimulatedRadio::with_device(DEVICE_NAME), config());
    assert!(matches!(
        session.request_measurements().await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(session.disconnect().await, Err(Error::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn silent_device_times_out_and_releases() {
    let (session, device) = connected_session().await;
    device.set_silent(true).await;

    let start = Instant::now();
    assert!(matches!(
        session.request_measurements().await,
        Err(Error::ResponseTimeout(_))
    ));
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(device.subscriber_count().await, 0);
    assert!(!session.lock().is_locked());

    device.set_silent(false).await;
    assert!(session.request_measurements().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_are_serialized() {
    let (session, device) = connected_session().await;
    device.set_response_delay(Duration::from_secs(3)).await;

    let start = Instant::now();
    let (first, second) = tokio::join!(
        session.request_measurements(),
        session.request_usage_summary()
    );
    assert!(first.is_ok());
    assert!(second.is_ok());
    // the second request only starts once the first one released the lock
    assert!(start.elapsed() >= Duration::from_secs(6));
    assert_eq!(device.writes().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn lock_timeout_reports_device_locked() {
    let (session, device) = connected_session().await;
    device.set_response_delay(Duration::from_secs(6)).await;

    let (first, second) = tokio::join!(
        session.request_measurements(),
        session.request_usage_summary()
    );
    assert!(first.is_ok());
    assert!(matches!(second, Err(Error::DeviceLocked(_))));
    assert_eq!(device.writes().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn toggle_mosfet() {
    let (session, device) = connected_session().await;

    let start = Instant::now();
    assert!(session.toggle_mosfet(true).await.unwrap());
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert!(device.mosfet_on().await);
    assert_eq!(
        device.writes().await,
        vec![
            generate_command_payload(CommandType::MosfetOn),
            generate_command_payload(CommandType::DataMeasurements),
        ]
    );
    assert!(session.last_measurements().await.unwrap().mosfet_on());

    session.toggle_mosfet_checked(false).await.unwrap();
    assert!(!device.mosfet_on().await);
}

#[tokio::test(start_paused = true)]
async fn toggle_mosfet_target_not_reached() {
    let (session, device) = connected_session().await;
    device.set_stuck_mosfet(true).await;

    assert!(!session.toggle_mosfet(true).await.unwrap());
    assert!(matches!(
        session.toggle_mosfet_checked(true).await,
        Err(Error::TargetStateNotReached {
            target: true,
            actual: false
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn disconnect() {
    let (session, device) = connected_session().await;
    session.disconnect().await.unwrap();
    assert!(!session.has_device().await);
    assert!(!session.check_connection_status().await.unwrap());
    assert!(matches!(
        session.request_measurements().await,
        Err(Error::NotConnected)
    ));
    assert_eq!(device.subscriber_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_times_out() {
    let (session, device) = connected_session().await;
    device.set_refuse_disconnect(true).await;

    let start = Instant::now();
    assert!(matches!(
        session.disconnect().await,
        Err(Error::DisconnectTimeout(_))
    ));
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(session.check_connection_status().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn link_loss_clears_device() {
    let (session, device) = connected_session().await;
    device.drop_link().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!session.has_device().await);
    assert!(matches!(
        session.request_measurements().await,
        Err(Error::NotConnected)
    ));

    session
        .connect(&session.config().device_filter())
        .await
        .unwrap();
    assert!(session.request_measurements().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn reconnect_releases_previous_device() {
    let radio = SimulatedRadio::new(vec![
        SimulatedDevice::new(DEVICE_NAME),
        SimulatedDevice::new("SIL-009-009-009"),
    ]);
    let first = radio.devices()[0].clone();
    let second = radio.devices()[1].clone();
    let session = BmsSession::new(radio, config());

    session.connect(&DeviceFilter::named(DEVICE_NAME)).await.unwrap();
    assert!(first.is_connected().await.unwrap());

    session
        .connect(&DeviceFilter::named("SIL-009-009-009"))
        .await
        .unwrap();
    assert!(!first.is_connected().await.unwrap());
    assert!(second.is_connected().await.unwrap());
    assert!(session.request_measurements().await.is_ok());
    assert_eq!(second.writes().await.len(), 1);
    assert!(first.writes().await.is_empty());

    // connecting to the held device again keeps it usable
    session
        .connect(&DeviceFilter::named("SIL-009-009-009"))
        .await
        .unwrap();
    assert!(second.is_connected().await.unwrap());
    assert!(session.request_measurements().await.is_ok());
}
