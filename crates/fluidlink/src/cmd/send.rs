use std::thread;
use std::time::{Duration, Instant};

use fluidlink_frame::{opcode, opcode_name, Payload};
use fluidlink_link::{CommandStatus, LinkEngine};
use tracing::info;

use crate::cmd::SendArgs;
use crate::device::{link_config, open_transport, parse_duration};
use crate::exit::{link_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_reading, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let code = parse_opcode(&args.opcode)?;
    let payload = Payload {
        p1: args.p1,
        p2: args.p2,
        p3: args.p3,
        p4: args.p4,
    };
    let timeout = parse_duration(&args.timeout)?;

    let transport = open_transport(&args.transport)?;
    let mut engine = LinkEngine::with_config(transport, link_config(&args.link)?);
    engine
        .initialize()
        .map_err(|err| link_error("initialize failed", err))?;

    let handle = engine
        .send(code, payload)
        .map_err(|err| link_error("send failed", err))?;
    let deadline = Instant::now() + timeout;

    loop {
        engine
            .poll()
            .map_err(|err| link_error("poll failed", err))?;
        match engine.status(handle) {
            CommandStatus::Pending if Instant::now() >= deadline => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no acknowledgment for {} within {timeout:?}", opcode_name(code)),
                ));
            }
            CommandStatus::Pending => thread::sleep(POLL_INTERVAL),
            CommandStatus::Acked => break,
            CommandStatus::Failed(failure) => {
                engine.acknowledge_error();
                return Err(CliError::new(FAILURE, failure.to_string()));
            }
            CommandStatus::Unknown => {
                return Err(CliError::new(INTERNAL, "link lost track of the command"));
            }
        }
    }

    info!(
        sequence_id = handle.sequence_id(),
        opcode = opcode_name(code),
        "command acknowledged"
    );
    print_reading(&engine.device_state().reading(), format);
    Ok(SUCCESS)
}

/// Accept an opcode name (case-insensitive) or its number.
fn parse_opcode(input: &str) -> CliResult<u8> {
    let input = input.trim();
    if let Some(code) = (0..=u8::MAX)
        .filter(|&code| opcode::is_known(code))
        .find(|&code| opcode_name(code).eq_ignore_ascii_case(input))
    {
        return Ok(code);
    }
    input
        .parse::<u8>()
        .map_err(|_| CliError::new(USAGE, format!("unknown opcode: {input}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_by_name_or_number() {
        assert_eq!(parse_opcode("set_selector_valve").unwrap(), opcode::SET_SELECTOR_VALVE);
        assert_eq!(parse_opcode("REMOVE_MEDIUM").unwrap(), opcode::REMOVE_MEDIUM);
        assert_eq!(parse_opcode("41").unwrap(), opcode::PREUSE_CHECK_VACUUM);
    }

    #[test]
    fn unknown_opcode_is_usage_error() {
        assert_eq!(parse_opcode("PUMP_FASTER").unwrap_err().code, USAGE);
        assert_eq!(parse_opcode("300").unwrap_err().code, USAGE);
    }
}
