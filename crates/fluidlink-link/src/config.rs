use std::time::Duration;

use fluidlink_frame::FrameReaderConfig;

/// Configuration for a [`LinkEngine`](crate::LinkEngine).
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Time without a matching progress report before the command is resent.
    pub ack_timeout: Duration,
    /// Resends allowed before the command is aborted.
    pub max_retries: u32,
    /// Checksum reports this soon after a (re)send are treated as stale.
    pub retry_holdoff: Duration,
    /// Drop responses whose trailing byte is not their checksum.
    pub verify_response_checksum: bool,
    /// Misaligned polls tolerated before the receive buffer is flushed.
    pub max_misaligned_polls: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(500),
            max_retries: 3,
            retry_holdoff: Duration::from_millis(50),
            verify_response_checksum: false,
            max_misaligned_polls: 100,
        }
    }
}

impl LinkConfig {
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_holdoff(mut self, holdoff: Duration) -> Self {
        self.retry_holdoff = holdoff;
        self
    }

    pub fn with_response_checksum(mut self, verify: bool) -> Self {
        self.verify_response_checksum = verify;
        self
    }

    /// Reader settings derived from this configuration.
    pub fn reader_config(&self) -> FrameReaderConfig {
        FrameReaderConfig {
            max_misaligned_polls: self.max_misaligned_polls,
            verify_checksum: self.verify_response_checksum,
        }
    }
}
