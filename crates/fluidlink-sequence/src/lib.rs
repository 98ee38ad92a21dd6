//! Fluidics protocols on top of the command link.
//!
//! - [`factory`] expands a protocol template and its parameters into a
//!   [`Sequence`] of steps.
//! - [`Scheduler`] runs queued sequences one step at a time: controller
//!   commands complete on acknowledgment, stopwatch steps after a wall-clock
//!   delay.
//! - [`Controller`] drives a link engine and a scheduler from two background
//!   threads and streams their events over a channel.

pub mod controller;
pub mod error;
pub mod factory;
pub mod scheduler;
pub mod sequence;

pub use controller::{Controller, ControllerConfig, ControllerEvent};
pub use error::{FactoryError, Result, SchedulerError};
pub use factory::{ControlMode, FluidicsDefaults, SequenceFactory, SequenceParams, SequenceTemplate};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerEvent};
pub use sequence::{CommandTemplate, Sequence, Subsequence};
