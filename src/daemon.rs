use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde_json::json;
use silbms_lib::protocol::DataMeasurements;
use silbms_lib::session::BmsSession;
use silbms_lib::transport::Radio;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::commandline;

fn print_console(measurements: &DataMeasurements) {
    println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
    println!(
        "Temperature: cell={}°C shunt={}°C",
        measurements.temp_cell, measurements.temp_shunt
    );
    println!("Current: {:.2}A", measurements.current);
    println!(
        "SOC: {}% ({:.2}Ah of {}Ah)",
        measurements.soc_percent, measurements.soc, measurements.ah_nom
    );
    println!("Cell voltages: {:?}", measurements.voltages);
    println!("Average cell voltage: {:.3}V", measurements.avg_cell_voltage);
    println!("Mosfet: {}", if measurements.mosfet_on() { "on" } else { "off" });
    if measurements.alarms.any_alarm() {
        println!("Alarms: {:?}", measurements.alarms);
    }
    println!("RTC: {} {}", measurements.date_rtc, measurements.hour_rtc);
    println!("--------------------------");
}

fn print_json(value: serde_json::Value) {
    match serde_json::to_string(&value) {
        Ok(line) => println!("{line}"),
        Err(e) => error!("Failed to serialize data to JSON string: {e}"),
    }
}

fn output_measurements(output: &commandline::DaemonOutput, measurements: &DataMeasurements) {
    match output {
        commandline::DaemonOutput::Console => print_console(measurements),
        commandline::DaemonOutput::Json => print_json(json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "measurements": measurements,
        })),
    }
}

fn output_connection(output: &commandline::DaemonOutput, connected: bool) {
    match output {
        commandline::DaemonOutput::Console => {
            println!("Connected: {connected}");
        }
        commandline::DaemonOutput::Json => print_json(json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "connected": connected,
        })),
    }
}

async fn reconnect<R: Radio>(session: &BmsSession<R>) {
    info!("Reconnecting");
    let filter = session.config().device_filter();
    if let Err(e) = session.connect(&filter).await {
        error!("Reconnect failed: {} ({e})", e.public_message());
    }
}

pub async fn run<R: Radio>(
    session: &BmsSession<R>,
    output: commandline::DaemonOutput,
    interval: Duration,
    status_interval: Duration,
) -> Result<()> {
    info!(
        "Starting daemon mode: output={output:?}, interval={interval:?}, status_interval={status_interval:?}"
    );
    let mut data_tick = tokio::time::interval(interval);
    data_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status_tick = tokio::time::interval(status_interval);
    status_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_connected = true;

    loop {
        tokio::select! {
            _ = data_tick.tick() => {
                if !session.has_device().await {
                    reconnect(session).await;
                }
                match session.request_measurements().await {
                    Ok(measurements) => output_measurements(&output, &measurements),
                    Err(e) => error!("Error fetching measurements: {} ({e})", e.public_message()),
                }
            }
            _ = status_tick.tick() => {
                match session.check_connection_status().await {
                    Ok(connected) => {
                        debug!("connection status: {connected}");
                        if connected != last_connected {
                            output_connection(&output, connected);
                            last_connected = connected;
                        }
                        if !connected {
                            warn!("Device not connected");
                            reconnect(session).await;
                        }
                    }
                    Err(e) => error!("Cannot check connection status: {e}"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.with_context(|| "Cannot listen for shutdown signal")?;
                info!("Shutting down daemon");
                return Ok(());
            }
        }
    }
}
