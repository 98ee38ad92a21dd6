use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::status::ExecutionStatus;

/// Command frame length in bytes.
pub const COMMAND_LEN: usize = 15;

/// Response frame length in bytes.
pub const RESPONSE_LEN: usize = 25;

/// Offset of the first reserved byte in a command frame.
const COMMAND_RESERVED: usize = 11;

/// Modulo-256 sum of every byte in `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// The four typed argument fields of a command frame.
///
/// Meaning depends on the opcode: `p1` is usually a control mode or an on/off
/// flag, `p2` a fluidic port or valve, `p3` a fraction of full scale and `p4`
/// a duration in milliseconds or a loop coefficient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Payload {
    pub p1: u8,
    pub p2: u8,
    pub p3: u16,
    pub p4: u32,
}

impl Payload {
    /// An all-zero payload.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_p1(mut self, p1: u8) -> Self {
        self.p1 = p1;
        self
    }

    pub fn with_p2(mut self, p2: u8) -> Self {
        self.p2 = p2;
        self
    }

    pub fn with_p3(mut self, p3: u16) -> Self {
        self.p3 = p3;
        self
    }

    pub fn with_p4(mut self, p4: u32) -> Self {
        self.p4 = p4;
        self
    }
}

/// A command sent to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    /// Identifier the controller echoes back. Assigned by the link engine.
    pub sequence_id: u16,
    pub opcode: u8,
    pub payload: Payload,
}

impl CommandFrame {
    /// Create a new command frame.
    pub fn new(sequence_id: u16, opcode: u8, payload: Payload) -> Self {
        Self {
            sequence_id,
            opcode,
            payload,
        }
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(COMMAND_LEN);
        encode_command(self, &mut buf);
        buf.freeze()
    }
}

/// Raw telemetry block carried by every response frame.
///
/// Values are kept exactly as the controller sent them; physical unit
/// conversion happens in the device state mirror.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Telemetry {
    pub internal_program: u8,
    /// Bubble and flow sensor bits.
    pub fluid_flags: u8,
    /// Valves C1-C7 in bits 0-6, manual-control input in bit 7.
    pub valves_c: u8,
    /// Valves D1-D16.
    pub valves_d: u16,
    pub selector_valve: u8,
    pub pump_power_raw: u16,
    pub vacuum_raw: u16,
    pub pressure_raw: u16,
    pub flow_upstream_raw: i16,
    pub flow_downstream_raw: i16,
    pub elapsed_s: u8,
    pub volume_raw: i16,
    pub reserved: u8,
}

/// A status report from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Identifier of the command this status refers to.
    pub sequence_id: u16,
    pub opcode: u8,
    pub status: ExecutionStatus,
    pub telemetry: Telemetry,
    /// Trailing byte, carried verbatim. Firmware may fill it with a checksum.
    pub trailer: u8,
}

impl ResponseFrame {
    /// Create a response frame whose trailer holds the checksum.
    pub fn new(sequence_id: u16, opcode: u8, status: ExecutionStatus, telemetry: Telemetry) -> Self {
        let mut frame = Self {
            sequence_id,
            opcode,
            status,
            telemetry,
            trailer: 0,
        };
        frame.trailer = frame.computed_checksum();
        frame
    }

    /// Checksum of the first 24 encoded bytes.
    pub fn computed_checksum(&self) -> u8 {
        let mut buf = BytesMut::with_capacity(RESPONSE_LEN);
        encode_response(self, &mut buf);
        checksum(&buf[..RESPONSE_LEN - 1])
    }

    /// Returns true if the trailer equals the checksum of the preceding bytes.
    pub fn checksum_valid(&self) -> bool {
        self.trailer == self.computed_checksum()
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESPONSE_LEN);
        encode_response(self, &mut buf);
        buf.freeze()
    }
}

/// Encode a command frame.
///
/// Wire format (multi-byte fields big-endian):
/// ```text
/// ┌────────┬────────┬────┬────┬──────┬──────────┬──────────┬──────────┐
/// │ id (2) │ op (1) │ p1 │ p2 │ p3(2)│ p4 (4)   │ zero (3) │ sum (1)  │
/// └────────┴────────┴────┴────┴──────┴──────────┴──────────┴──────────┘
/// ```
pub fn encode_command(frame: &CommandFrame, dst: &mut BytesMut) {
    let start = dst.len();
    dst.reserve(COMMAND_LEN);
    dst.put_u16(frame.sequence_id);
    dst.put_u8(frame.opcode);
    dst.put_u8(frame.payload.p1);
    dst.put_u8(frame.payload.p2);
    dst.put_u16(frame.payload.p3);
    dst.put_u32(frame.payload.p4);
    dst.put_bytes(0, COMMAND_LEN - 1 - COMMAND_RESERVED);
    let sum = checksum(&dst[start..]);
    dst.put_u8(sum);
}

/// Decode exactly one command frame, verifying its checksum.
pub fn decode_command(src: &[u8]) -> Result<CommandFrame> {
    if src.len() != COMMAND_LEN {
        return Err(FrameError::InvalidLength {
            expected: COMMAND_LEN,
            actual: src.len(),
        });
    }

    let computed = checksum(&src[..COMMAND_LEN - 1]);
    let received = src[COMMAND_LEN - 1];
    if computed != received {
        return Err(FrameError::ChecksumMismatch { computed, received });
    }
    if src[COMMAND_RESERVED..COMMAND_LEN - 1].iter().any(|b| *b != 0) {
        return Err(FrameError::ReservedNotZero);
    }

    let mut buf = src;
    let sequence_id = buf.get_u16();
    let opcode = buf.get_u8();
    let payload = Payload {
        p1: buf.get_u8(),
        p2: buf.get_u8(),
        p3: buf.get_u16(),
        p4: buf.get_u32(),
    };

    Ok(CommandFrame {
        sequence_id,
        opcode,
        payload,
    })
}

/// Encode a response frame. The trailer is written as stored.
pub fn encode_response(frame: &ResponseFrame, dst: &mut BytesMut) {
    let t = &frame.telemetry;
    dst.reserve(RESPONSE_LEN);
    dst.put_u16(frame.sequence_id);
    dst.put_u8(frame.opcode);
    dst.put_u8(frame.status.into());
    dst.put_u8(t.internal_program);
    dst.put_u8(t.fluid_flags);
    dst.put_u8(t.valves_c);
    dst.put_u16(t.valves_d);
    dst.put_u8(t.selector_valve);
    dst.put_u16(t.pump_power_raw);
    dst.put_u16(t.vacuum_raw);
    dst.put_u16(t.pressure_raw);
    dst.put_i16(t.flow_upstream_raw);
    dst.put_i16(t.flow_downstream_raw);
    dst.put_u8(t.elapsed_s);
    dst.put_i16(t.volume_raw);
    dst.put_u8(t.reserved);
    dst.put_u8(frame.trailer);
}

/// Decode exactly one response frame. The trailer is not checked here.
///
/// The layout is the fluidics controller's frame definition: downstream flow
/// at bytes 18-19, byte 23 reserved, byte 24 the trailer. An older firmware
/// sent filtered vacuum and pressure words at 18-19 and 23-24; those are not
/// decoded, and byte 23 is kept only as [`Telemetry::reserved`].
pub fn decode_response(src: &[u8]) -> Result<ResponseFrame> {
    if src.len() != RESPONSE_LEN {
        return Err(FrameError::InvalidLength {
            expected: RESPONSE_LEN,
            actual: src.len(),
        });
    }

    let mut buf = src;
    let sequence_id = buf.get_u16();
    let opcode = buf.get_u8();
    let status = ExecutionStatus::from(buf.get_u8());
    let telemetry = Telemetry {
        internal_program: buf.get_u8(),
        fluid_flags: buf.get_u8(),
        valves_c: buf.get_u8(),
        valves_d: buf.get_u16(),
        selector_valve: buf.get_u8(),
        pump_power_raw: buf.get_u16(),
        vacuum_raw: buf.get_u16(),
        pressure_raw: buf.get_u16(),
        flow_upstream_raw: buf.get_i16(),
        flow_downstream_raw: buf.get_i16(),
        elapsed_s: buf.get_u8(),
        volume_raw: buf.get_i16(),
        reserved: buf.get_u8(),
    };
    let trailer = buf.get_u8();

    Ok(ResponseFrame {
        sequence_id,
        opcode,
        status,
        telemetry,
        trailer,
    })
}

/// Decode a batch of back-to-back response frames, oldest first.
///
/// The batch must be an exact multiple of [`RESPONSE_LEN`].
pub fn decode_responses(src: &[u8]) -> Result<Vec<ResponseFrame>> {
    if src.len() % RESPONSE_LEN != 0 {
        return Err(FrameError::NotFrameMultiple {
            len: src.len(),
            frame_len: RESPONSE_LEN,
        });
    }
    src.chunks_exact(RESPONSE_LEN).map(decode_response).collect()
}
