//! Behavioural stand-in for the fluidics controller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use fluidlink_frame::{
    decode_command, opcode, opcode_name, CommandFrame, ExecutionStatus, ResponseFrame, Telemetry,
};
use fluidlink_transport::{Result, Transport, TransportError};
use tracing::debug;

use crate::state::{psi_to_sensor_raw, PRESSURE_FULL_SCALE_PSI};

/// Flow sensor fluid bits (raw and debounced).
const FLOW_FLUID_FLAGS: u8 = 0b0011_0000;
/// Manual control input bit in the C-valve byte.
const MANUAL_CONTROL_BIT: u8 = 0x80;

/// Configuration for a [`SimulatedDevice`].
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// How long each command reports `InProgress` before completing.
    pub execution_delay: Duration,
    /// Interval between repeated `InProgress` reports while executing.
    pub report_interval: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            execution_delay: Duration::ZERO,
            report_interval: Duration::from_millis(10),
        }
    }
}

/// A [`Transport`] that behaves like the fluidics controller.
///
/// Every written command frame is decoded and answered with a status frame.
/// Corrupt frames are answered with `ChecksumError`. A resent frame whose
/// identifier matches the command already executed is answered without
/// executing it again. Clones share state, so tests keep a handle for fault
/// injection and inspection while the engine owns another.
#[derive(Clone, Default)]
pub struct SimulatedDevice {
    shared: Arc<Mutex<SimState>>,
}

#[derive(Default)]
struct SimState {
    config: SimulatorConfig,
    outbound: BytesMut,
    telemetry: Telemetry,
    current: Option<Echo>,
    program_started: Option<Instant>,
    last_report: Option<Instant>,
    forced: Option<(ExecutionStatus, usize)>,
    drop_writes: usize,
    drop_responses: usize,
    fail_writes: usize,
    executed: Vec<CommandFrame>,
    writes_received: usize,
}

#[derive(Debug, Clone, Copy)]
struct Echo {
    sequence_id: u16,
    opcode: u8,
    status: ExecutionStatus,
    done_at: Option<Instant>,
}

impl SimulatedDevice {
    /// Create a device that completes every command immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device with explicit configuration.
    pub fn with_config(config: SimulatorConfig) -> Self {
        let device = Self::default();
        device.state().config = config;
        device
    }

    /// Answer the next `count` commands with `status` instead of executing them.
    pub fn force_status(&self, status: ExecutionStatus, count: usize) {
        self.state().forced = Some((status, count));
    }

    /// Silently ignore the next `count` writes.
    pub fn drop_next_writes(&self, count: usize) {
        self.state().drop_writes = count;
    }

    /// Execute the next `count` commands but lose their first status frame.
    pub fn drop_next_responses(&self, count: usize) {
        self.state().drop_responses = count;
    }

    /// Fail the next `count` writes with an I/O error.
    pub fn fail_next_writes(&self, count: usize) {
        self.state().fail_writes = count;
    }

    /// Commands executed so far, in order. Resends are not repeated here.
    pub fn executed(&self) -> Vec<CommandFrame> {
        self.state().executed.clone()
    }

    /// Number of commands executed.
    pub fn execution_count(&self) -> usize {
        self.state().executed.len()
    }

    /// Number of write calls received, including dropped and corrupt ones.
    pub fn writes_received(&self) -> usize {
        self.state().writes_received
    }

    /// Current simulated telemetry.
    pub fn telemetry(&self) -> Telemetry {
        self.state().telemetry
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SimState {
    fn receive(&mut self, bytes: &[u8], now: Instant) {
        let frame = match decode_command(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%err, "simulator received corrupt command");
                let sequence_id = match bytes {
                    [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
                    _ => 0,
                };
                let opcode = bytes.get(2).copied().unwrap_or_default();
                self.current = Some(Echo {
                    sequence_id,
                    opcode,
                    status: ExecutionStatus::ChecksumError,
                    done_at: None,
                });
                self.report(now);
                return;
            }
        };

        if let Some((status, remaining)) = self.forced.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                self.current = Some(Echo {
                    sequence_id: frame.sequence_id,
                    opcode: frame.opcode,
                    status: *status,
                    done_at: None,
                });
                self.report(now);
                return;
            }
        }

        let duplicate = self.current.is_some_and(|echo| {
            echo.sequence_id == frame.sequence_id
                && matches!(
                    echo.status,
                    ExecutionStatus::CompletedOk | ExecutionStatus::InProgress
                )
        });
        if duplicate {
            debug!(sequence_id = frame.sequence_id, "simulator ignoring resent command");
            self.report(now);
            return;
        }

        self.execute(&frame, now);
        if self.drop_responses > 0 {
            self.drop_responses -= 1;
            self.last_report = Some(now);
            return;
        }
        self.report(now);
    }

    fn execute(&mut self, frame: &CommandFrame, now: Instant) {
        debug!(
            sequence_id = frame.sequence_id,
            opcode = opcode_name(frame.opcode),
            "simulator executing command"
        );
        let p = frame.payload;
        let t = &mut self.telemetry;
        match frame.opcode {
            opcode::CLEAR => t.internal_program = 0,
            opcode::ADD_MEDIUM => {
                t.internal_program = 2;
                t.selector_valve = p.p2;
                t.pump_power_raw = p.p3;
                t.fluid_flags |= FLOW_FLUID_FLAGS;
            }
            opcode::REMOVE_MEDIUM => {
                t.internal_program = 4;
                t.pump_power_raw = p.p3;
                t.vacuum_raw = psi_to_sensor_raw(-PRESSURE_FULL_SCALE_PSI);
            }
            opcode::EMPTY_FLUIDIC_LINE => {
                t.internal_program = 3;
                t.fluid_flags &= !FLOW_FLUID_FLAGS;
            }
            opcode::SET_SELECTOR_VALVE => t.selector_valve = p.p2,
            opcode::SET_10MM_SOLENOID_VALVE => {
                t.valves_d = match p.p2 {
                    0 => 0,
                    valve => 1u16 << (valve - 1).min(15),
                };
            }
            opcode::DISABLE_MANUAL_CONTROL => {
                if p.p1 == 0 {
                    t.valves_c |= MANUAL_CONTROL_BIT;
                } else {
                    t.valves_c &= !MANUAL_CONTROL_BIT;
                }
            }
            opcode::SET_PRESSURE_CONTROL_SETPOINT_PSI => {
                let psi = f64::from(p.p3) / f64::from(u16::MAX) * PRESSURE_FULL_SCALE_PSI;
                t.pressure_raw = psi_to_sensor_raw(psi);
            }
            opcode::PREUSE_CHECK_PRESSURE => t.internal_program = 6,
            opcode::PREUSE_CHECK_VACUUM => t.internal_program = 7,
            _ => {}
        }
        self.executed.push(*frame);
        self.program_started = Some(now);

        let delay = self.config.execution_delay;
        let (status, done_at) = if delay.is_zero() {
            self.finish_program();
            (ExecutionStatus::CompletedOk, None)
        } else {
            (ExecutionStatus::InProgress, Some(now + delay))
        };
        self.current = Some(Echo {
            sequence_id: frame.sequence_id,
            opcode: frame.opcode,
            status,
            done_at,
        });
    }

    fn finish_program(&mut self) {
        self.telemetry.internal_program = 0;
        self.telemetry.pump_power_raw = 0;
        self.telemetry.vacuum_raw = psi_to_sensor_raw(0.0);
    }

    fn tick(&mut self, now: Instant) {
        let Some(echo) = self.current else {
            return;
        };
        if echo.status != ExecutionStatus::InProgress {
            return;
        }
        if echo.done_at.is_some_and(|at| now >= at) {
            self.finish_program();
            self.current = Some(Echo {
                status: ExecutionStatus::CompletedOk,
                done_at: None,
                ..echo
            });
            self.report(now);
        } else if self
            .last_report
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.report_interval)
        {
            self.report(now);
        }
    }

    fn report(&mut self, now: Instant) {
        let Some(echo) = self.current else {
            return;
        };
        self.telemetry.elapsed_s = self
            .program_started
            .map(|start| now.saturating_duration_since(start).as_secs().min(255) as u8)
            .unwrap_or_default();
        let frame = ResponseFrame::new(echo.sequence_id, echo.opcode, echo.status, self.telemetry);
        self.outbound.extend_from_slice(&frame.to_bytes());
        self.last_report = Some(now);
    }
}

impl Transport for SimulatedDevice {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }
        state.writes_received += 1;
        if state.drop_writes > 0 {
            state.drop_writes -= 1;
            debug!(len = bytes.len(), "simulator dropping write");
            return Ok(());
        }
        state.receive(bytes, Instant::now());
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let mut state = self.state();
        state.tick(Instant::now());
        Ok(state.outbound.len())
    }

    fn read(&mut self, n: usize) -> Result<Bytes> {
        let mut state = self.state();
        let take = n.min(state.outbound.len());
        Ok(state.outbound.split_to(take).freeze())
    }
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SimulatedDevice")
            .field("executed", &state.executed.len())
            .field("outbound", &state.outbound.len())
            .field("current", &state.current)
            .finish()
    }
}
