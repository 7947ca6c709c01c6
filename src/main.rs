use anyhow::{bail, Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use silbms_lib::bluest_transport::BluestRadio;
use silbms_lib::protocol::{self, CommandType};
use silbms_lib::session::{BmsSession, SessionConfig};
use silbms_lib::simulator::SimulatedRadio;
use silbms_lib::transport::Radio;
use std::{ops::Deref, panic};

mod commandline;
mod config;
mod daemon;

use commandline::{CliArgs, CliCommands};

fn logging_init(loglevel: LevelFilter) -> Result<LoggerHandle> {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .with_context(|| "Cannot init logging")?
        .start()
        .with_context(|| "Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    Ok(log_handle)
}

macro_rules! print_measurements {
    ($session:expr) => {
        println!(
            "Measurements: {:#?}",
            $session
                .request_measurements()
                .await
                .with_context(|| "Cannot get measurements")?
        )
    };
}
macro_rules! print_usage_summary {
    ($session:expr) => {
        println!(
            "Usage summary: {:#?}",
            $session
                .request_usage_summary()
                .await
                .with_context(|| "Cannot get usage summary")?
        )
    };
}
macro_rules! print_production_data {
    ($session:expr) => {
        println!(
            "Production data: {:#?}",
            $session
                .request_production_data()
                .await
                .with_context(|| "Cannot get production data")?
        )
    };
}
macro_rules! print_connection_status {
    ($session:expr) => {
        println!(
            "Connected: {}",
            $session
                .check_connection_status()
                .await
                .with_context(|| "Cannot check connection status")?
        )
    };
}

fn decode_frame(command: CommandType, frame: &str) -> Result<()> {
    let frame = hex::decode(frame.trim()).with_context(|| "Frame is not valid hex")?;
    let record = protocol::parse_response_for(&frame, command)
        .with_context(|| format!("Cannot decode {command} frame"))?;
    println!("{record:#?}");
    Ok(())
}

async fn run<R: Radio>(radio: R, config: SessionConfig, command: CliCommands) -> Result<()> {
    let session = BmsSession::new(radio, config);
    let filter = session.config().device_filter();
    session
        .connect(&filter)
        .await
        .with_context(|| "Cannot connect to BMS")?;

    let result = execute(&session, command).await;

    if session.has_device().await {
        if let Err(e) = session.disconnect().await {
            if result.is_ok() {
                return Err(e).with_context(|| "Cannot disconnect from BMS");
            }
            warn!("Cannot disconnect from BMS: {e}");
        }
    }
    result
}

async fn execute<R: Radio>(session: &BmsSession<R>, command: CliCommands) -> Result<()> {
    match command {
        CliCommands::Measurements => print_measurements!(session),
        CliCommands::UsageSummary => print_usage_summary!(session),
        CliCommands::ProductionData => print_production_data!(session),
        CliCommands::Mosfet { enable } => {
            session
                .toggle_mosfet_checked(enable)
                .await
                .with_context(|| format!("Cannot switch mosfet {}", if enable { "on" } else { "off" }))?;
            println!("Mosfet: {}", if enable { "on" } else { "off" });
        }
        CliCommands::Status => print_connection_status!(session),
        CliCommands::All => {
            print_connection_status!(session);
            print_production_data!(session);
            print_usage_summary!(session);
            print_measurements!(session);
        }
        CliCommands::Daemon {
            output,
            interval,
            status_interval,
        } => daemon::run(session, output, interval, status_interval).await?,
        // handled without a connection
        CliCommands::Payload { .. } | CliCommands::Decode { .. } => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter())?;

    match &args.command {
        CliCommands::Payload { command } => {
            println!("{}", hex::encode(protocol::generate_command_payload(*command)));
            return Ok(());
        }
        CliCommands::Decode { command, frame } => return decode_frame(*command, frame),
        _ => {}
    }

    let config = config::resolve(&args)?;
    if config.device_name.is_none() && !config.accept_any_device {
        bail!("No device selected, use --device <NAME> or --any-device");
    }

    if args.simulate {
        let name = config
            .device_name
            .clone()
            .unwrap_or_else(|| format!("{}000-000-000", config.name_prefix));
        info!("Using simulated BMS '{name}'");
        run(SimulatedRadio::with_device(&name), config, args.command).await
    } else {
        let radio = BluestRadio::new()
            .await
            .with_context(|| "Cannot open Bluetooth adapter")?;
        run(radio, config, args.command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silbms_lib::simulator::SimulatedDevice;
    use silbms_lib::transport::Peripheral;

    const DEVICE_NAME: &str = "SIL-001-002-003";

    fn config() -> SessionConfig {
        SessionConfig {
            device_name: Some(DEVICE_NAME.to_string()),
            ..Default::default()
        }
    }

    fn radio() -> (SimulatedRadio, SimulatedDevice) {
        let radio = SimulatedRadio::with_device(DEVICE_NAME);
        let device = radio.devices()[0].clone();
        (radio, device)
    }

    #[tokio::test(start_paused = true)]
    async fn run_disconnects_after_command() {
        let (radio, device) = radio();
        run(radio, config(), CliCommands::Measurements).await.unwrap();
        assert!(!device.is_connected().await.unwrap());
        assert_eq!(device.writes().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_disconnects_when_request_fails() {
        let (radio, device) = radio();
        device.set_silent(true).await;
        assert!(run(radio, config(), CliCommands::Measurements).await.is_err());
        assert!(!device.is_connected().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn run_disconnects_when_mosfet_is_stuck() {
        let (radio, device) = radio();
        device.set_stuck_mosfet(true).await;
        let err = run(radio, config(), CliCommands::Mosfet { enable: true })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Cannot switch mosfet on"));
        assert!(!device.is_connected().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn command_error_wins_over_disconnect_error() {
        let (radio, device) = radio();
        device.set_silent(true).await;
        device.set_refuse_disconnect(true).await;
        let err = run(radio, config(), CliCommands::UsageSummary)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Cannot get usage summary"));
    }
}
