use fluidlink_transport::Transport;
use tracing::{debug, warn};

use crate::codec::{decode_response, ResponseFrame, RESPONSE_LEN};
use crate::error::{FrameError, Result};

/// Configuration for [`FrameReader`].
#[derive(Debug, Clone)]
pub struct FrameReaderConfig {
    /// Consecutive polls with a byte count that is not a whole number of
    /// frames before everything buffered is discarded. Zero disables resync.
    pub max_misaligned_polls: u32,
    /// Drop responses whose trailer is not the checksum of the frame.
    pub verify_checksum: bool,
}

impl Default for FrameReaderConfig {
    fn default() -> Self {
        Self {
            max_misaligned_polls: 100,
            verify_checksum: false,
        }
    }
}

/// Counters kept by a [`FrameReader`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub frames_read: u64,
    pub stale_bytes_discarded: u64,
    pub resyncs: u64,
    pub checksum_rejects: u64,
}

/// Reads the newest response frame from a [`Transport`].
///
/// The controller streams a status frame every few milliseconds and only the
/// latest one matters. Bytes are consumed only when a whole multiple of
/// [`RESPONSE_LEN`] is buffered; everything before the last frame is
/// discarded unread.
#[derive(Debug, Default)]
pub struct FrameReader {
    config: FrameReaderConfig,
    misaligned_polls: u32,
    stats: ReaderStats,
}

impl FrameReader {
    /// Create a new frame reader with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameReaderConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(config: FrameReaderConfig) -> Self {
        Self {
            config,
            misaligned_polls: 0,
            stats: ReaderStats::default(),
        }
    }

    /// Read the newest complete frame, if one is buffered (non-blocking).
    ///
    /// Returns `Ok(None)` when fewer than one frame is available, when the
    /// byte count is not aligned to the frame length, or when checksum
    /// verification is on and the newest frame fails it.
    pub fn read_newest<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<Option<ResponseFrame>> {
        let available = transport.bytes_available()?;
        if available == 0 {
            self.misaligned_polls = 0;
            return Ok(None);
        }

        if available % RESPONSE_LEN != 0 {
            self.misaligned_polls += 1;
            if self.config.max_misaligned_polls > 0
                && self.misaligned_polls >= self.config.max_misaligned_polls
            {
                warn!(
                    available,
                    polls = self.misaligned_polls,
                    "receive buffer misaligned, discarding to resynchronise"
                );
                transport.discard(available)?;
                self.misaligned_polls = 0;
                self.stats.resyncs += 1;
                self.stats.stale_bytes_discarded += available as u64;
            }
            return Ok(None);
        }
        self.misaligned_polls = 0;

        let stale = available - RESPONSE_LEN;
        if stale > 0 {
            debug!(stale, "discarding stale response frames");
            transport.discard(stale)?;
            self.stats.stale_bytes_discarded += stale as u64;
        }

        let bytes = transport.read(RESPONSE_LEN)?;
        if bytes.len() != RESPONSE_LEN {
            return Err(FrameError::InvalidLength {
                expected: RESPONSE_LEN,
                actual: bytes.len(),
            });
        }

        let frame = decode_response(&bytes)?;
        if self.config.verify_checksum && !frame.checksum_valid() {
            warn!(
                sequence_id = frame.sequence_id,
                trailer = frame.trailer,
                "dropping response with bad checksum"
            );
            self.stats.checksum_rejects += 1;
            return Ok(None);
        }

        self.stats.frames_read += 1;
        Ok(Some(frame))
    }

    /// Reader counters.
    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameReaderConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use fluidlink_transport::MemoryTransport;

    use super::*;
    use crate::codec::Telemetry;
    use crate::status::ExecutionStatus;

    fn response(id: u16) -> ResponseFrame {
        ResponseFrame::new(id, 2, ExecutionStatus::CompletedOk, Telemetry::default())
    }

    #[test]
    fn empty_buffer_yields_nothing() {
        let mut transport = MemoryTransport::new();
        let mut reader = FrameReader::new();

        assert!(reader.read_newest(&mut transport).unwrap().is_none());
    }

    #[test]
    fn reads_single_frame() {
        let mut transport = MemoryTransport::new();
        transport.push_inbound(&response(4).to_bytes());
        let mut reader = FrameReader::new();

        let frame = reader.read_newest(&mut transport).unwrap().unwrap();
        assert_eq!(frame.sequence_id, 4);
        assert_eq!(transport.pending_inbound(), 0);
        assert_eq!(reader.stats().frames_read, 1);
    }

    #[test]
    fn keeps_only_newest_of_batch() {
        let mut transport = MemoryTransport::new();
        for id in 1..=3 {
            transport.push_inbound(&response(id).to_bytes());
        }
        let mut reader = FrameReader::new();

        let frame = reader.read_newest(&mut transport).unwrap().unwrap();
        assert_eq!(frame.sequence_id, 3);
        assert_eq!(transport.pending_inbound(), 0);
        assert_eq!(
            reader.stats().stale_bytes_discarded,
            2 * RESPONSE_LEN as u64
        );
    }

    #[test]
    fn partial_frame_is_left_buffered() {
        let mut transport = MemoryTransport::new();
        let bytes = response(1).to_bytes();
        transport.push_inbound(&bytes[..10]);
        let mut reader = FrameReader::new();

        assert!(reader.read_newest(&mut transport).unwrap().is_none());
        assert_eq!(transport.pending_inbound(), 10);

        transport.push_inbound(&bytes[10..]);
        let frame = reader.read_newest(&mut transport).unwrap().unwrap();
        assert_eq!(frame.sequence_id, 1);
    }

    #[test]
    fn persistent_misalignment_resyncs() {
        let mut transport = MemoryTransport::new();
        transport.push_inbound(&[0xAA; 7]);
        let mut reader = FrameReader::with_config(FrameReaderConfig {
            max_misaligned_polls: 3,
            ..Default::default()
        });

        assert!(reader.read_newest(&mut transport).unwrap().is_none());
        assert!(reader.read_newest(&mut transport).unwrap().is_none());
        assert_eq!(transport.pending_inbound(), 7);
        assert!(reader.read_newest(&mut transport).unwrap().is_none());
        assert_eq!(transport.pending_inbound(), 0);
        assert_eq!(reader.stats().resyncs, 1);

        transport.push_inbound(&response(8).to_bytes());
        let frame = reader.read_newest(&mut transport).unwrap().unwrap();
        assert_eq!(frame.sequence_id, 8);
    }

    #[test]
    fn checksum_verification_drops_bad_trailer() {
        let mut transport = MemoryTransport::new();
        let mut frame = response(2);
        frame.trailer ^= 0xFF;
        transport.push_inbound(&frame.to_bytes());

        let mut strict = FrameReader::with_config(FrameReaderConfig {
            verify_checksum: true,
            ..Default::default()
        });
        assert!(strict.read_newest(&mut transport).unwrap().is_none());
        assert_eq!(strict.stats().checksum_rejects, 1);

        transport.push_inbound(&frame.to_bytes());
        let mut lenient = FrameReader::new();
        assert_eq!(
            lenient.read_newest(&mut transport).unwrap().unwrap().trailer,
            frame.trailer
        );
    }

    #[test]
    fn transport_errors_propagate() {
        let mut transport = MemoryTransport::new();
        transport.close();
        let mut reader = FrameReader::new();

        assert!(matches!(
            reader.read_newest(&mut transport),
            Err(FrameError::Transport(_))
        ));
    }
}
