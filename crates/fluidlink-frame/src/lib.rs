//! Fixed-width command/response framing for microcontroller links.
//!
//! Every exchange with the controller is one of two fixed-size records:
//! - a 15-byte command frame (identifier, opcode, four typed payload fields,
//!   trailing modulo-256 checksum)
//! - a 25-byte response frame (echoed identifier and opcode, execution status,
//!   telemetry block, trailing checksum-or-reserved byte)
//!
//! Because the response length is known up front, the reader never parses a
//! header: it waits for a whole multiple of the frame length, discards older
//! frames and decodes only the newest one.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod opcode;
pub mod reader;
pub mod status;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::HostCodec;
pub use codec::{
    checksum, decode_command, decode_response, decode_responses, encode_command, encode_response,
    CommandFrame, Payload, ResponseFrame, Telemetry, COMMAND_LEN, RESPONSE_LEN,
};
pub use error::{FrameError, Result};
pub use opcode::opcode_name;
pub use reader::{FrameReader, FrameReaderConfig, ReaderStats};
pub use status::{program_name, DomainCode, ExecutionStatus};
pub use writer::FrameWriter;
