//! Command link to the fluidics controller.
//!
//! The [`LinkEngine`] turns an unreliable byte stream into exactly-once,
//! in-order command execution: one command in flight at a time, matched to
//! responses by identifier, resent verbatim on timeout or checksum report,
//! and surfaced as a failure that must be acknowledged when retries run out
//! or the controller rejects it. Every response also refreshes the
//! [`DeviceState`] mirror.
//!
//! [`SimulatedDevice`] is a behavioural stand-in for the controller that
//! plugs in wherever a [`Transport`](fluidlink_transport::Transport) does.

pub mod config;
pub mod engine;
pub mod error;
pub mod simulator;
pub mod state;

pub use config::LinkConfig;
pub use engine::{
    CommandFailure, CommandHandle, CommandLink, CommandStatus, FailureKind, LinkEngine,
    PollReport, RetryCause, Transition,
};
pub use error::{LinkError, Result};
pub use simulator::{SimulatedDevice, SimulatorConfig};
pub use state::{DeviceState, TelemetryReading};
