use std::fmt;
use std::io;

use fluidlink_frame::FrameError;
use fluidlink_link::LinkError;
use fluidlink_sequence::SchedulerError;
use fluidlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
/// A command failed or a run finished with failed commands.
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) if source.kind() == io::ErrorKind::PermissionDenied => {
            io_error(context, source)
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::Io(source) => io_error(context, source),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Transport(err) => transport_error(context, err),
        LinkError::Frame(err) => frame_error(context, err),
        LinkError::Busy(_) | LinkError::UnacknowledgedFailure(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        LinkError::Poisoned(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

pub fn scheduler_error(context: &str, err: SchedulerError) -> CliError {
    match err {
        SchedulerError::Link(err) => link_error(context, err),
        SchedulerError::Factory(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        SchedulerError::Io(source) => io_error(context, source),
        SchedulerError::Poisoned(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_transport_code() {
        let err = transport_error("open failed", TransportError::NotFound("SN1".into()));
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("open failed: "));
    }

    #[test]
    fn nested_link_errors_unwrap_to_source_code() {
        let err = link_error(
            "poll failed",
            LinkError::Frame(FrameError::Transport(TransportError::Closed)),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);

        let err = link_error(
            "poll failed",
            LinkError::Frame(FrameError::ChecksumMismatch {
                computed: 1,
                received: 2,
            }),
        );
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn busy_link_is_a_plain_failure() {
        assert_eq!(link_error("send", LinkError::Busy(3)).code, FAILURE);
    }

    #[test]
    fn timed_out_io_maps_to_timeout() {
        let err = io_error("read", io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert_eq!(err.code, TIMEOUT);
    }
}
