use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod expand;
pub mod monitor;
pub mod ports;
pub mod run;
pub mod send;
pub mod templates;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a plan file against the controller.
    Run(RunArgs),
    /// Print the steps a plan file expands to, without a device.
    Expand(ExpandArgs),
    /// Send a single controller command and wait for its acknowledgment.
    Send(SendArgs),
    /// Print controller telemetry as it arrives.
    Monitor(MonitorArgs),
    /// List serial ports visible to this host.
    Ports(PortsArgs),
    /// List protocol templates and the parameters they read.
    Templates(TemplatesArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Expand(args) => expand::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Ports(args) => ports::run(args, format),
        Command::Templates(args) => templates::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Device selection shared by every command that talks to the controller.
#[derive(Args, Debug, Clone)]
pub struct TransportArgs {
    /// Use the built-in device simulator instead of hardware.
    #[arg(long, conflicts_with_all = ["port", "serial_number"])]
    pub simulate: bool,
    /// Simulated execution time per command (e.g. 200ms).
    #[arg(long, value_name = "DURATION", requires = "simulate")]
    pub sim_delay: Option<String>,
    /// Serial port path.
    #[arg(long, value_name = "PATH", conflicts_with = "serial_number")]
    pub port: Option<PathBuf>,
    /// USB serial number of the controller board.
    #[arg(long, value_name = "SN")]
    pub serial_number: Option<String>,
    /// Serial line rate.
    #[arg(long, default_value_t = 2_000_000)]
    pub baud: u32,
}

/// Link engine tuning.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Time without a matching status frame before a command is resent (e.g. 500ms).
    #[arg(long, value_name = "DURATION", default_value = "500ms")]
    pub ack_timeout: String,
    /// Resends before a command is reported failed.
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,
    /// Reject status frames whose trailer byte is not a valid checksum.
    #[arg(long)]
    pub verify_checksum: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Plan file (JSON).
    pub plan: PathBuf,
    #[command(flatten)]
    pub transport: TransportArgs,
    #[command(flatten)]
    pub link: LinkArgs,
    /// Interval between status reads (e.g. 10ms).
    #[arg(long, value_name = "DURATION", default_value = "10ms")]
    pub poll_interval: String,
    /// Interval between scheduler steps (e.g. 50ms).
    #[arg(long, value_name = "DURATION", default_value = "50ms")]
    pub tick_interval: String,
    /// Abort the run if it has not finished within this time (e.g. 1800s).
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,
    /// Also print telemetry changes.
    #[arg(long)]
    pub telemetry: bool,
    /// Write every status frame to this CSV file.
    #[arg(long, value_name = "PATH")]
    pub log_measurements: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ExpandArgs {
    /// Plan file (JSON).
    pub plan: PathBuf,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Opcode, by name (e.g. SET_SELECTOR_VALVE) or number.
    pub opcode: String,
    #[arg(long, default_value_t = 0)]
    pub p1: u8,
    #[arg(long, default_value_t = 0)]
    pub p2: u8,
    #[arg(long, default_value_t = 0)]
    pub p3: u16,
    #[arg(long, default_value_t = 0)]
    pub p4: u32,
    #[command(flatten)]
    pub transport: TransportArgs,
    #[command(flatten)]
    pub link: LinkArgs,
    /// Give up waiting for the acknowledgment after this long (e.g. 10s).
    #[arg(long, value_name = "DURATION", default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub transport: TransportArgs,
    /// Interval between status reads (e.g. 100ms).
    #[arg(long, value_name = "DURATION", default_value = "100ms")]
    pub interval: String,
    /// Exit after printing N readings.
    #[arg(long)]
    pub count: Option<usize>,
    /// Exit with code 124 if no reading arrives within this time.
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,
    /// Write every status frame to this CSV file.
    #[arg(long, value_name = "PATH")]
    pub log_measurements: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug, Default)]
pub struct TemplatesArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
