//! Host-side control of a microcontroller-driven fluidics rig.
//!
//! fluidlink talks to the rig's controller over a fixed-width binary
//! protocol, keeps a mirror of its telemetry, and runs multi-step fluidics
//! protocols (fill, incubate, aspirate, flush, pre-use checks) built from
//! templates.
//!
//! # Crate Structure
//!
//! - [`transport`] - byte-stream transports (serial port, in-memory)
//! - [`frame`] - command and response frame codec
//! - [`link`] - acknowledged, retrying command link and device state mirror
//! - [`sequence`] - protocol factory, scheduler and threaded controller

/// Re-export transport types.
pub mod transport {
    pub use fluidlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use fluidlink_frame::*;
}

/// Re-export link types.
pub mod link {
    pub use fluidlink_link::*;
}

/// Re-export sequence types.
pub mod sequence {
    pub use fluidlink_sequence::*;
}
