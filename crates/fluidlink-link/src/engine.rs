use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use fluidlink_frame::{
    opcode, opcode_name, CommandFrame, ExecutionStatus, FrameReader, FrameWriter, Payload,
    ReaderStats, ResponseFrame,
};
use fluidlink_transport::Transport;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::state::DeviceState;

/// Identifier reserved for the start-up `CLEAR`.
const INITIALIZE_SEQUENCE_ID: u16 = 0;

/// Handle to a command accepted by [`LinkEngine::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandHandle {
    sequence_id: u16,
    serial: u64,
}

impl CommandHandle {
    /// Create a handle. `serial` must be unique per link for the link's lifetime.
    pub fn new(sequence_id: u16, serial: u64) -> Self {
        Self {
            sequence_id,
            serial,
        }
    }

    /// Wire identifier of the command.
    pub fn sequence_id(&self) -> u16 {
        self.sequence_id
    }
}

/// Why a command was resent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryCause {
    /// No matching progress report within the acknowledgment timeout.
    Timeout,
    /// The controller reported a checksum error for the command.
    Checksum,
}

impl fmt::Display for RetryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Checksum => f.write_str("checksum error"),
        }
    }
}

/// How a command failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The controller reported a non-retryable status.
    Rejected(ExecutionStatus),
    /// Every resend was used up.
    RetriesExhausted { cause: RetryCause },
}

impl FailureKind {
    /// The failure carries a command-specific domain code.
    pub fn is_domain(&self) -> bool {
        matches!(self, Self::Rejected(ExecutionStatus::Domain(_)))
    }

    /// The failure leaves the fluidics in a state where continuing is unsafe.
    ///
    /// Every domain code except a failed pre-use check is fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Rejected(ExecutionStatus::Domain(code)) => !code.is_preuse_check(),
            _ => false,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(status) => write!(f, "rejected: {status}"),
            Self::RetriesExhausted { cause } => write!(f, "retries exhausted after {cause}"),
        }
    }
}

/// A command that will not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub sequence_id: u16,
    pub opcode: u8,
    pub kind: FailureKind,
    pub retry_count: u32,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id {}) {}, {} retries",
            opcode_name(self.opcode),
            self.sequence_id,
            self.kind,
            self.retry_count
        )
    }
}

/// Status of a command, queried by handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    /// Awaiting acknowledgment.
    Pending,
    /// Acknowledged by the controller.
    Acked,
    /// Aborted; see the failure for details.
    Failed(CommandFailure),
    /// No longer tracked.
    Unknown,
}

/// Change in the outstanding command caused by a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Acked { sequence_id: u16, opcode: u8 },
    Retrying {
        sequence_id: u16,
        retry_count: u32,
        cause: RetryCause,
    },
    Aborted(CommandFailure),
}

/// Result of a poll that saw a frame or changed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub response: Option<ResponseFrame>,
    pub transition: Option<Transition>,
}

/// Operations the sequence scheduler needs from a command link.
pub trait CommandLink {
    /// Send one command. Fails without writing when a command is outstanding
    /// or a failure is unacknowledged.
    fn send(&mut self, opcode: u8, payload: Payload) -> Result<CommandHandle>;

    /// Status of a previously sent command.
    fn status(&self, handle: CommandHandle) -> CommandStatus;

    /// Clear a pending failure so the next command can be sent.
    fn acknowledge_error(&mut self) -> Option<CommandFailure>;

    /// A command is awaiting acknowledgment.
    fn is_busy(&self) -> bool;
}

#[derive(Debug)]
struct Outstanding {
    serial: u64,
    sequence_id: u16,
    opcode: u8,
    bytes: Bytes,
    sent_at: Instant,
    last_progress: Instant,
    retry_count: u32,
}

enum Verdict {
    Wait,
    Acked,
    Retry(RetryCause),
    Abort(FailureKind),
}

/// Single-flight command link over a [`Transport`].
///
/// Non-blocking: [`send`](Self::send) writes and returns, and
/// [`poll`](Self::poll) is called periodically to read the newest status
/// frame, match it to the outstanding command and apply timeouts.
pub struct LinkEngine<T> {
    transport: T,
    reader: FrameReader,
    writer: FrameWriter,
    config: LinkConfig,
    next_sequence_id: u16,
    next_serial: u64,
    outstanding: Option<Outstanding>,
    aborted: Option<CommandFailure>,
    last_acked: Option<u64>,
    last_failed: Option<(u64, CommandFailure)>,
    state: DeviceState,
}

impl<T: Transport> LinkEngine<T> {
    /// Create an engine with default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, LinkConfig::default())
    }

    /// Create an engine with explicit configuration.
    pub fn with_config(transport: T, config: LinkConfig) -> Self {
        Self {
            transport,
            reader: FrameReader::with_config(config.reader_config()),
            writer: FrameWriter::new(),
            config,
            next_sequence_id: 1,
            next_serial: 0,
            outstanding: None,
            aborted: None,
            last_acked: None,
            last_failed: None,
            state: DeviceState::default(),
        }
    }

    /// Write a fire-and-forget `CLEAR` carrying identifier 0 so the
    /// controller's echoed state starts from a known value.
    pub fn initialize(&mut self) -> Result<()> {
        if let Some(out) = &self.outstanding {
            return Err(LinkError::Busy(out.sequence_id));
        }
        let frame = CommandFrame::new(INITIALIZE_SEQUENCE_ID, opcode::CLEAR, Payload::new());
        self.writer.write_command(&mut self.transport, &frame)?;
        info!("link initialized");
        Ok(())
    }

    /// Send a command now.
    pub fn send(&mut self, opcode: u8, payload: Payload) -> Result<CommandHandle> {
        self.send_at(opcode, payload, Instant::now())
    }

    /// Send a command, recording `now` as the send time.
    pub fn send_at(&mut self, opcode: u8, payload: Payload, now: Instant) -> Result<CommandHandle> {
        if let Some(failure) = &self.aborted {
            return Err(LinkError::UnacknowledgedFailure(failure.clone()));
        }
        if let Some(out) = &self.outstanding {
            return Err(LinkError::Busy(out.sequence_id));
        }

        let sequence_id = self.next_sequence_id;
        let frame = CommandFrame::new(sequence_id, opcode, payload);
        let bytes = self.writer.write_command(&mut self.transport, &frame)?;

        self.next_sequence_id = match sequence_id.wrapping_add(1) {
            INITIALIZE_SEQUENCE_ID => 1,
            next => next,
        };
        let serial = self.next_serial;
        self.next_serial += 1;

        info!(sequence_id, opcode = opcode_name(opcode), "command sent");
        self.outstanding = Some(Outstanding {
            serial,
            sequence_id,
            opcode,
            bytes,
            sent_at: now,
            last_progress: now,
            retry_count: 0,
        });

        Ok(CommandHandle {
            sequence_id,
            serial,
        })
    }

    /// Read and act on the newest status frame.
    pub fn poll(&mut self) -> Result<Option<PollReport>> {
        self.poll_at(Instant::now())
    }

    /// Read and act on the newest status frame, with `now` as the clock.
    pub fn poll_at(&mut self, now: Instant) -> Result<Option<PollReport>> {
        let response = self.reader.read_newest(&mut self.transport)?;
        if let Some(frame) = &response {
            self.state = DeviceState::from_frame(frame);
        }

        let transition = self.advance(response.as_ref(), now)?;
        if response.is_none() && transition.is_none() {
            return Ok(None);
        }
        Ok(Some(PollReport {
            response,
            transition,
        }))
    }

    fn advance(
        &mut self,
        response: Option<&ResponseFrame>,
        now: Instant,
    ) -> Result<Option<Transition>> {
        let Some(mut out) = self.outstanding.take() else {
            return Ok(None);
        };

        match self.judge(&mut out, response, now) {
            Verdict::Wait => {
                self.outstanding = Some(out);
                Ok(None)
            }
            Verdict::Acked => {
                info!(
                    sequence_id = out.sequence_id,
                    opcode = opcode_name(out.opcode),
                    retries = out.retry_count,
                    "command acknowledged"
                );
                self.last_acked = Some(out.serial);
                Ok(Some(Transition::Acked {
                    sequence_id: out.sequence_id,
                    opcode: out.opcode,
                }))
            }
            Verdict::Retry(cause) if out.retry_count < self.config.max_retries => {
                out.retry_count += 1;
                out.sent_at = now;
                out.last_progress = now;
                warn!(
                    sequence_id = out.sequence_id,
                    retry = out.retry_count,
                    %cause,
                    "resending command"
                );
                let written = self.writer.write_encoded(&mut self.transport, &out.bytes);
                let transition = Transition::Retrying {
                    sequence_id: out.sequence_id,
                    retry_count: out.retry_count,
                    cause,
                };
                self.outstanding = Some(out);
                written?;
                Ok(Some(transition))
            }
            Verdict::Retry(cause) => {
                Ok(Some(self.abort(out, FailureKind::RetriesExhausted { cause })))
            }
            Verdict::Abort(kind) => Ok(Some(self.abort(out, kind))),
        }
    }

    fn judge(
        &self,
        out: &mut Outstanding,
        response: Option<&ResponseFrame>,
        now: Instant,
    ) -> Verdict {
        if let Some(frame) = response.filter(|f| f.sequence_id == out.sequence_id) {
            match frame.status {
                ExecutionStatus::CompletedOk => return Verdict::Acked,
                ExecutionStatus::InProgress => {
                    out.last_progress = now;
                    return Verdict::Wait;
                }
                ExecutionStatus::ChecksumError => {
                    if now.saturating_duration_since(out.sent_at) < self.config.retry_holdoff {
                        debug!(
                            sequence_id = out.sequence_id,
                            "ignoring checksum report within retry holdoff"
                        );
                        return Verdict::Wait;
                    }
                    return Verdict::Retry(RetryCause::Checksum);
                }
                status @ (ExecutionStatus::InvalidCommand
                | ExecutionStatus::ExecutionError
                | ExecutionStatus::Domain(_)) => return Verdict::Abort(FailureKind::Rejected(status)),
            }
        }

        if now.saturating_duration_since(out.last_progress) > self.config.ack_timeout {
            Verdict::Retry(RetryCause::Timeout)
        } else {
            Verdict::Wait
        }
    }

    fn abort(&mut self, out: Outstanding, kind: FailureKind) -> Transition {
        let failure = CommandFailure {
            sequence_id: out.sequence_id,
            opcode: out.opcode,
            kind,
            retry_count: out.retry_count,
        };
        warn!(
            sequence_id = out.sequence_id,
            opcode = opcode_name(out.opcode),
            retries = out.retry_count,
            %kind,
            "command aborted"
        );
        self.aborted = Some(failure.clone());
        self.last_failed = Some((out.serial, failure.clone()));
        Transition::Aborted(failure)
    }

    /// A command is awaiting acknowledgment.
    pub fn is_busy(&self) -> bool {
        self.outstanding.is_some() && self.aborted.is_none()
    }

    /// Status of a previously sent command.
    pub fn status(&self, handle: CommandHandle) -> CommandStatus {
        if self
            .outstanding
            .as_ref()
            .is_some_and(|out| out.serial == handle.serial)
        {
            return CommandStatus::Pending;
        }
        if self.last_acked == Some(handle.serial) {
            return CommandStatus::Acked;
        }
        match &self.last_failed {
            Some((serial, failure)) if *serial == handle.serial => {
                CommandStatus::Failed(failure.clone())
            }
            _ => CommandStatus::Unknown,
        }
    }

    /// Clear a pending failure. Never resends the failed command.
    pub fn acknowledge_error(&mut self) -> Option<CommandFailure> {
        let failure = self.aborted.take();
        if let Some(failure) = &failure {
            debug!(sequence_id = failure.sequence_id, "failure acknowledged");
        }
        failure
    }

    /// Failure awaiting acknowledgment, if any.
    pub fn pending_failure(&self) -> Option<&CommandFailure> {
        self.aborted.as_ref()
    }

    /// Latest mirrored device state.
    pub fn device_state(&self) -> &DeviceState {
        &self.state
    }

    /// Copy of the latest mirrored device state.
    pub fn snapshot(&self) -> DeviceState {
        self.state
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn reader_stats(&self) -> ReaderStats {
        self.reader.stats()
    }

    /// Frames written, including resends.
    pub fn frames_written(&self) -> u64 {
        self.writer.frames_written()
    }

    /// Borrow the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the engine and return the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }
}

impl<T: Transport> CommandLink for LinkEngine<T> {
    fn send(&mut self, opcode: u8, payload: Payload) -> Result<CommandHandle> {
        LinkEngine::send(self, opcode, payload)
    }

    fn status(&self, handle: CommandHandle) -> CommandStatus {
        LinkEngine::status(self, handle)
    }

    fn acknowledge_error(&mut self) -> Option<CommandFailure> {
        LinkEngine::acknowledge_error(self)
    }

    fn is_busy(&self) -> bool {
        LinkEngine::is_busy(self)
    }
}

impl<T> fmt::Debug for LinkEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkEngine")
            .field("next_sequence_id", &self.next_sequence_id)
            .field(
                "outstanding",
                &self.outstanding.as_ref().map(|out| out.sequence_id),
            )
            .field("aborted", &self.aborted)
            .finish()
    }
}
