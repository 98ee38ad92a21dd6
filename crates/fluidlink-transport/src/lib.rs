//! Byte-stream transport abstraction for microcontroller links.
//!
//! The link protocol only needs three things from the wire: write a block of
//! bytes, ask how many bytes are buffered, and read a number of them. This
//! crate provides that contract plus two implementations:
//! - [`MemoryTransport`], an in-process byte queue with fault injection
//! - [`SerialTransport`], a physical serial port (behind the `serial` feature)
//!
//! This is the lowest layer of fluidlink. Everything else builds on top of
//! the [`Transport`] trait provided here.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "serial")]
pub mod serial;

pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use traits::Transport;

#[cfg(feature = "serial")]
pub use serial::{list_ports, PortInfo, SerialConfig, SerialTransport};
