//! Tokio codec for host-side streams (feature `async`).
//!
//! Unlike [`FrameReader`](crate::FrameReader), the stream codec yields every
//! response in arrival order; consumers that only want the latest status
//! keep the last item.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_response, encode_command, CommandFrame, ResponseFrame, RESPONSE_LEN};
use crate::error::{FrameError, Result};

/// Decodes response frames and encodes command frames.
#[derive(Debug, Clone, Default)]
pub struct HostCodec {
    verify_checksum: bool,
}

impl HostCodec {
    /// Create a codec that carries the response trailer without checking it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject responses whose trailer is not their checksum.
    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }
}

impl Decoder for HostCodec {
    type Item = ResponseFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < RESPONSE_LEN {
            return Ok(None);
        }
        let bytes = src.split_to(RESPONSE_LEN);
        let frame = decode_response(&bytes)?;
        if self.verify_checksum && !frame.checksum_valid() {
            return Err(FrameError::ChecksumMismatch {
                computed: frame.computed_checksum(),
                received: frame.trailer,
            });
        }
        Ok(Some(frame))
    }
}

impl Encoder<CommandFrame> for HostCodec {
    type Error = FrameError;

    fn encode(&mut self, item: CommandFrame, dst: &mut BytesMut) -> Result<()> {
        encode_command(&item, dst);
        Ok(())
    }
}
