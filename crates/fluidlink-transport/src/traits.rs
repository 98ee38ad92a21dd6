use bytes::Bytes;

use crate::error::Result;

/// A duplex byte channel to a microcontroller.
///
/// Implementations must never block waiting for data that has not arrived:
/// callers check [`bytes_available`](Transport::bytes_available) first and
/// only ask [`read`](Transport::read) for bytes that are already buffered.
pub trait Transport: Send {
    /// Write a complete block of bytes.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Number of received bytes buffered and ready to read.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Read `n` buffered bytes.
    fn read(&mut self, n: usize) -> Result<Bytes>;

    /// Drop `n` buffered bytes, returning how many were actually dropped.
    fn discard(&mut self, n: usize) -> Result<usize> {
        let dropped = self.read(n)?;
        Ok(dropped.len())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn read(&mut self, n: usize) -> Result<Bytes> {
        (**self).read(n)
    }

    fn discard(&mut self, n: usize) -> Result<usize> {
        (**self).discard(n)
    }
}
