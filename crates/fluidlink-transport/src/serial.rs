use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// Serial line settings.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Line rate. The fluidics controller runs at 2 Mbaud.
    pub baud_rate: u32,
    /// Upper bound for a single read or write call on the port.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 2_000_000,
            timeout: Duration::from_millis(100),
        }
    }
}

/// Summary of a serial port discovered on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub path: String,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// List serial ports visible to this host.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(std::io::Error::from)?;
    Ok(ports
        .into_iter()
        .map(|port| match port.port_type {
            SerialPortType::UsbPort(usb) => PortInfo {
                path: port.port_name,
                serial_number: usb.serial_number,
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            _ => PortInfo {
                path: port.port_name,
                serial_number: None,
                manufacturer: None,
                product: None,
            },
        })
        .collect())
}

/// Serial port transport to a physical microcontroller.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: PathBuf,
}

impl SerialTransport {
    /// Open the port at `path`.
    pub fn open(path: impl Into<PathBuf>, config: &SerialConfig) -> Result<Self> {
        let path = path.into();
        let port = serialport::new(path.to_string_lossy(), config.baud_rate)
            .timeout(config.timeout)
            .open()
            .map_err(|err| TransportError::Open {
                path: path.clone(),
                message: err.to_string(),
            })?;

        info!(?path, baud = config.baud_rate, "serial port open");
        Ok(Self { port, path })
    }

    /// Open the first USB serial port reporting `serial_number`.
    pub fn find_by_serial_number(serial_number: &str, config: &SerialConfig) -> Result<Self> {
        let port = list_ports()?
            .into_iter()
            .find(|port| port.serial_number.as_deref() == Some(serial_number))
            .ok_or_else(|| TransportError::NotFound(serial_number.to_string()))?;
        debug!(path = %port.path, serial_number, "matched serial number");
        Self::open(port.path, config)
    }

    /// Path of the open port.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Drop everything buffered in both directions.
    pub fn clear(&mut self) -> Result<()> {
        self.port
            .clear(ClearBuffer::All)
            .map_err(std::io::Error::from)?;
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.port.write(&bytes[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        loop {
            match self.port.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let available = self
            .port
            .bytes_to_read()
            .map_err(std::io::Error::from)?;
        Ok(available as usize)
    }

    fn read(&mut self, n: usize) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(n);
        let mut filled = 0usize;
        while filled < n {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::TimedOut => break,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        if filled < n {
            return Err(TransportError::ShortRead {
                expected: n,
                actual: filled,
            });
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .finish()
    }
}
