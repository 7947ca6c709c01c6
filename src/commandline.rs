use crate::config;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use silbms_lib::protocol::CommandType;
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show live measurements: temperatures, current, cell voltages, state of charge and flags
    Measurements,
    /// Show lifetime counters: charge/discharge cycles, max current events, last full charge
    UsageSummary,
    /// Show installation date, serial number and tag
    ProductionData,
    /// Switch the mosfet and verify the state reported back by the BMS
    Mosfet {
        /// Switch the mosfet on. If this flag is not present, it will be switched off.
        #[clap(long, short, action)]
        enable: bool,
    },
    /// Show whether the device is still connected
    Status,
    /// Show all available BMS information by running every read command
    All,
    /// Print the frame written for a command, in hex (e.g. DATA_MEASUREMENTS)
    Payload { command: CommandType },
    /// Decode a captured response frame offline
    Decode {
        /// Command the frame answers (DATA_MEASUREMENTS, USAGE_SUMMARY or PRODUCTION_DATA)
        command: CommandType,
        /// Complete frame in hex, checksum included
        frame: String,
    },
    /// Run in daemon mode, periodically fetching and outputting measurements
    Daemon {
        /// Output destination for measurements
        #[command(subcommand)]
        output: DaemonOutput,
        /// Interval for fetching measurements (e.g., "3s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "3s")]
        interval: Duration,
        /// Interval for polling the connection status
        #[clap(long, value_parser = humantime::parse_duration, default_value = "5s")]
        status_interval: Duration,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously read measurements and print them to the standard output (console).
    Console,
    /// Continuously read measurements and print one JSON object per line.
    Json,
}

const fn about_text() -> &'static str {
    "SIL bms command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Advertised name of the BMS (e.g., SIL-001-002-003)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Connect to the first BMS found, whatever its name
    #[arg(long, action)]
    pub any_device: bool,

    /// YAML file with session settings
    #[arg(long, short, default_value_t = config::DEFAULT_CONFIG_FILE.to_string())]
    pub config_file: String,

    /// Talk to a simulated BMS instead of the Bluetooth adapter
    #[arg(long, action)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Time to wait for a complete response (e.g., "500ms", "10s", "2s 500ms")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub timeout: Option<Duration>,

    /// Time to scan for the device
    #[arg(value_parser = humantime::parse_duration, long)]
    pub scan_timeout: Option<Duration>,

    /// Time to wait for a concurrent request to finish
    #[arg(value_parser = humantime::parse_duration, long)]
    pub lock_timeout: Option<Duration>,
}
