use bytes::{Bytes, BytesMut};
use fluidlink_transport::Transport;
use tracing::debug;

use crate::codec::{encode_command, CommandFrame, COMMAND_LEN};
use crate::error::Result;
use crate::opcode::opcode_name;

/// Encodes command frames and writes them to a [`Transport`].
#[derive(Debug)]
pub struct FrameWriter {
    buf: BytesMut,
    frames_written: u64,
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameWriter {
    /// Create a new frame writer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(COMMAND_LEN),
            frames_written: 0,
        }
    }

    /// Encode and write a command frame.
    ///
    /// Returns the encoded bytes so the caller can resend them unchanged.
    pub fn write_command<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        frame: &CommandFrame,
    ) -> Result<Bytes> {
        self.buf.clear();
        encode_command(frame, &mut self.buf);
        let bytes = self.buf.split().freeze();
        self.write_encoded(transport, &bytes)?;
        debug!(
            sequence_id = frame.sequence_id,
            opcode = opcode_name(frame.opcode),
            "command frame written"
        );
        Ok(bytes)
    }

    /// Write an already-encoded frame.
    pub fn write_encoded<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        bytes: &[u8],
    ) -> Result<()> {
        transport.write(bytes)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Number of frames written, including resends.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}
