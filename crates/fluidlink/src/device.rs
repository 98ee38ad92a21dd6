//! Opening a transport and configuring the link from command-line flags.

use std::time::Duration;

use fluidlink_link::{LinkConfig, SimulatedDevice, SimulatorConfig};
use fluidlink_transport::Transport;
use tracing::info;

use crate::cmd::{LinkArgs, TransportArgs};
use crate::exit::{CliError, CliResult, USAGE};

pub type BoxedTransport = Box<dyn Transport>;

pub fn open_transport(args: &TransportArgs) -> CliResult<BoxedTransport> {
    if args.simulate {
        let mut config = SimulatorConfig::default();
        if let Some(delay) = &args.sim_delay {
            config.execution_delay = parse_duration(delay)?;
        }
        info!(execution_delay = ?config.execution_delay, "using simulated device");
        return Ok(Box::new(SimulatedDevice::with_config(config)));
    }
    open_serial(args)
}

#[cfg(feature = "serial")]
fn open_serial(args: &TransportArgs) -> CliResult<BoxedTransport> {
    use fluidlink_transport::{SerialConfig, SerialTransport};

    use crate::exit::transport_error;

    let config = SerialConfig {
        baud_rate: args.baud,
        ..SerialConfig::default()
    };
    let transport = match (&args.port, &args.serial_number) {
        (Some(path), _) => SerialTransport::open(path.clone(), &config),
        (None, Some(serial_number)) => SerialTransport::find_by_serial_number(serial_number, &config),
        (None, None) => return Err(no_transport()),
    }
    .map_err(|err| transport_error("open failed", err))?;
    Ok(Box::new(transport))
}

#[cfg(not(feature = "serial"))]
fn open_serial(args: &TransportArgs) -> CliResult<BoxedTransport> {
    if args.port.is_none() && args.serial_number.is_none() {
        return Err(no_transport());
    }
    Err(CliError::new(
        USAGE,
        "serial port support is not compiled in (build with --features serial) or use --simulate",
    ))
}

fn no_transport() -> CliError {
    CliError::new(
        USAGE,
        "no device selected: pass --simulate, --port or --serial-number",
    )
}

pub fn link_config(args: &LinkArgs) -> CliResult<LinkConfig> {
    Ok(LinkConfig::default()
        .with_ack_timeout(parse_duration(&args.ack_timeout)?)
        .with_max_retries(args.max_retries)
        .with_response_checksum(args.verify_checksum))
}

/// Parse a flag duration such as `10ms`, `30s` or `5m 30s`.
///
/// A bare number is taken as seconds, matching the units plan files use.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    let duration = match input.parse::<f64>() {
        Ok(seconds) => Duration::try_from_secs_f64(seconds)
            .map_err(|err| CliError::new(USAGE, format!("invalid duration {input:?}: {err}")))?,
        Err(_) => humantime::parse_duration(input)
            .map_err(|err| CliError::new(USAGE, format!("invalid duration {input:?}: {err}")))?,
    };
    if duration.is_zero() {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(duration)
}
