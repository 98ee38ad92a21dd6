use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// In-memory transport.
///
/// Clones share the same buffers, so a test keeps one handle to feed
/// device-side bytes and inspect written frames while the engine owns the
/// other. Supports injecting write/read failures and closing the link.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    inbound: BytesMut,
    written: Vec<Bytes>,
    fail_writes: usize,
    fail_reads: usize,
    closed: bool,
}

impl MemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to the receive buffer, as if the device had sent them.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state().inbound.extend_from_slice(bytes);
    }

    /// Number of received bytes not yet read.
    pub fn pending_inbound(&self) -> usize {
        self.state().inbound.len()
    }

    /// Remove and return every block written so far.
    pub fn take_written(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.state().written)
    }

    /// Number of blocks written and not yet taken.
    pub fn written_count(&self) -> usize {
        self.state().written.len()
    }

    /// Make the next `n` writes fail with an I/O error.
    pub fn fail_next_writes(&self, n: usize) {
        self.state().fail_writes = n;
    }

    /// Make the next `n` reads fail with an I/O error.
    pub fn fail_next_reads(&self, n: usize) {
        self.state().fail_reads = n;
    }

    /// Close the transport; every later operation returns [`TransportError::Closed`].
    pub fn close(&self) {
        self.state().closed = true;
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected write failure",
            )));
        }
        debug!(len = bytes.len(), "memory transport write");
        state.written.push(Bytes::copy_from_slice(bytes));
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        Ok(state.inbound.len())
    }

    fn read(&mut self, n: usize) -> Result<Bytes> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(TransportError::Io(std::io::Error::other(
                "injected read failure",
            )));
        }
        let take = n.min(state.inbound.len());
        Ok(state.inbound.split_to(take).freeze())
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MemoryTransport")
            .field("inbound", &state.inbound.len())
            .field("written", &state.written.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_bytes_are_read_in_order() {
        let mut transport = MemoryTransport::new();
        let device = transport.clone();

        device.push_inbound(b"abc");
        device.push_inbound(b"def");

        assert_eq!(transport.bytes_available().unwrap(), 6);
        assert_eq!(transport.read(4).unwrap().as_ref(), b"abcd");
        assert_eq!(transport.bytes_available().unwrap(), 2);
        assert_eq!(transport.read(10).unwrap().as_ref(), b"ef");
        assert_eq!(transport.bytes_available().unwrap(), 0);
    }

    #[test]
    fn writes_are_captured_per_block() {
        let mut transport = MemoryTransport::new();
        let device = transport.clone();

        transport.write(b"one").unwrap();
        transport.write(b"two").unwrap();

        assert_eq!(device.written_count(), 2);
        let written = device.take_written();
        assert_eq!(written[0].as_ref(), b"one");
        assert_eq!(written[1].as_ref(), b"two");
        assert_eq!(device.written_count(), 0);
    }

    #[test]
    fn discard_drops_leading_bytes() {
        let mut transport = MemoryTransport::new();
        transport.push_inbound(b"stalefresh");

        assert_eq!(transport.discard(5).unwrap(), 5);
        assert_eq!(transport.read(5).unwrap().as_ref(), b"fresh");
    }

    #[test]
    fn injected_write_failure_is_transient() {
        let mut transport = MemoryTransport::new();
        transport.fail_next_writes(1);

        let err = transport.write(b"x").unwrap_err();
        assert!(matches!(err, TransportError::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe));
        transport.write(b"x").unwrap();
        assert_eq!(transport.written_count(), 1);
    }

    #[test]
    fn injected_read_failure_keeps_buffer() {
        let mut transport = MemoryTransport::new();
        transport.push_inbound(b"data");
        transport.fail_next_reads(1);

        assert!(transport.read(4).is_err());
        assert_eq!(transport.read(4).unwrap().as_ref(), b"data");
    }

    #[test]
    fn closed_transport_rejects_everything() {
        let mut transport = MemoryTransport::new();
        transport.close();

        assert!(matches!(transport.write(b"x"), Err(TransportError::Closed)));
        assert!(matches!(
            transport.bytes_available(),
            Err(TransportError::Closed)
        ));
        assert!(matches!(transport.read(1), Err(TransportError::Closed)));
    }

    #[test]
    fn boxed_transport_delegates() {
        let device = MemoryTransport::new();
        let mut boxed: Box<dyn Transport> = Box::new(device.clone());

        device.push_inbound(b"hi");
        boxed.write(b"out").unwrap();

        assert_eq!(boxed.bytes_available().unwrap(), 2);
        assert_eq!(boxed.read(2).unwrap().as_ref(), b"hi");
        assert_eq!(device.take_written()[0].as_ref(), b"out");
    }
}
