use fluidlink_frame::{program_name, ExecutionStatus, ResponseFrame, Telemetry};
use serde::Serialize;

/// Lowest raw reading of the pressure and vacuum sensors.
pub const SENSOR_RAW_MIN: u16 = 1638;
/// Highest raw reading of the pressure and vacuum sensors.
pub const SENSOR_RAW_MAX: u16 = 14745;
/// Sensor range in psi, symmetric around zero.
pub const SENSOR_RANGE_PSI: f64 = 15.0;
/// Flow sensors report tenths of a microlitre per minute.
pub const FLOW_SCALE: f64 = 10.0;
/// Volume reported at full scale of the signed raw field.
pub const VOLUME_UL_MAX: f64 = 5000.0;
/// Pressure commands are expressed as a fraction of this set-point range.
pub const PRESSURE_FULL_SCALE_PSI: f64 = 5.0;

/// Mirror of the controller's most recent status frame.
///
/// A pure function of the latest validly-shaped response: nothing here is
/// accumulated, so a resent or repeated frame leaves it unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceState {
    /// Identifier echoed by the latest frame.
    pub sequence_id: u16,
    /// Opcode echoed by the latest frame.
    pub opcode: u8,
    /// Status of the latest frame, `None` until a frame has arrived.
    pub status: Option<ExecutionStatus>,
    pub telemetry: Telemetry,
}

impl DeviceState {
    /// Mirror the contents of one response frame.
    pub fn from_frame(frame: &ResponseFrame) -> Self {
        Self {
            sequence_id: frame.sequence_id,
            opcode: frame.opcode,
            status: Some(frame.status),
            telemetry: frame.telemetry,
        }
    }

    /// Returns true once at least one frame has been mirrored.
    pub fn is_populated(&self) -> bool {
        self.status.is_some()
    }

    pub fn pressure_psi(&self) -> f64 {
        sensor_psi(self.telemetry.pressure_raw)
    }

    pub fn vacuum_psi(&self) -> f64 {
        sensor_psi(self.telemetry.vacuum_raw)
    }

    /// Pump power as a fraction of full scale.
    pub fn pump_power(&self) -> f64 {
        f64::from(self.telemetry.pump_power_raw) / f64::from(u16::MAX)
    }

    /// Upstream flow in µl/min.
    pub fn flow_upstream(&self) -> f64 {
        f64::from(self.telemetry.flow_upstream_raw) / FLOW_SCALE
    }

    /// Downstream flow in µl/min.
    pub fn flow_downstream(&self) -> f64 {
        f64::from(self.telemetry.flow_downstream_raw) / FLOW_SCALE
    }

    /// Dispensed volume in µl.
    pub fn volume_ul(&self) -> f64 {
        f64::from(self.telemetry.volume_raw) / f64::from(i16::MAX) * VOLUME_UL_MAX
    }

    pub fn bubble_sensor_1(&self) -> bool {
        self.flag(0)
    }

    pub fn bubble_sensor_1_debounced(&self) -> bool {
        self.flag(1)
    }

    pub fn bubble_sensor_2(&self) -> bool {
        self.flag(2)
    }

    pub fn bubble_sensor_2_debounced(&self) -> bool {
        self.flag(3)
    }

    /// The flow sensor sees liquid.
    pub fn flow_sensor_fluid(&self) -> bool {
        self.flag(4)
    }

    pub fn flow_sensor_fluid_debounced(&self) -> bool {
        self.flag(5)
    }

    /// State of valve C1-C7 (`index` 1-based).
    pub fn valve_c(&self, index: u8) -> bool {
        (1..=7).contains(&index) && self.telemetry.valves_c & (1 << (index - 1)) != 0
    }

    /// State of valve D1-D16 (`index` 1-based).
    pub fn valve_d(&self, index: u8) -> bool {
        (1..=16).contains(&index) && self.telemetry.valves_d & (1 << (index - 1)) != 0
    }

    /// The manual control panel input is active.
    pub fn manual_control(&self) -> bool {
        self.telemetry.valves_c & 0x80 != 0
    }

    /// Physical-unit summary for display and serialization.
    pub fn reading(&self) -> TelemetryReading {
        TelemetryReading {
            sequence_id: self.sequence_id,
            opcode: self.opcode,
            status: self.status.map(|s| s.to_string()),
            program: program_name(self.telemetry.internal_program),
            selector_valve: self.telemetry.selector_valve,
            pressure_psi: self.pressure_psi(),
            vacuum_psi: self.vacuum_psi(),
            pump_power: self.pump_power(),
            flow_upstream_ul_min: self.flow_upstream(),
            flow_downstream_ul_min: self.flow_downstream(),
            volume_ul: self.volume_ul(),
            elapsed_s: self.telemetry.elapsed_s,
            bubble_sensor_1: self.bubble_sensor_1_debounced(),
            bubble_sensor_2: self.bubble_sensor_2_debounced(),
            flow_sensor_fluid: self.flow_sensor_fluid_debounced(),
            manual_control: self.manual_control(),
        }
    }

    fn flag(&self, bit: u8) -> bool {
        self.telemetry.fluid_flags & (1 << bit) != 0
    }
}

/// Telemetry in physical units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryReading {
    pub sequence_id: u16,
    pub opcode: u8,
    pub status: Option<String>,
    pub program: &'static str,
    pub selector_valve: u8,
    pub pressure_psi: f64,
    pub vacuum_psi: f64,
    pub pump_power: f64,
    pub flow_upstream_ul_min: f64,
    pub flow_downstream_ul_min: f64,
    pub volume_ul: f64,
    pub elapsed_s: u8,
    pub bubble_sensor_1: bool,
    pub bubble_sensor_2: bool,
    pub flow_sensor_fluid: bool,
    pub manual_control: bool,
}

/// Convert a raw pressure/vacuum sensor reading to psi.
pub fn sensor_psi(raw: u16) -> f64 {
    let raw = raw.clamp(SENSOR_RAW_MIN, SENSOR_RAW_MAX);
    let span = f64::from(SENSOR_RAW_MAX - SENSOR_RAW_MIN);
    f64::from(raw - SENSOR_RAW_MIN) * (2.0 * SENSOR_RANGE_PSI) / span - SENSOR_RANGE_PSI
}

/// Inverse of [`sensor_psi`], used by the simulator.
pub fn psi_to_sensor_raw(psi: f64) -> u16 {
    let span = f64::from(SENSOR_RAW_MAX - SENSOR_RAW_MIN);
    let psi = psi.clamp(-SENSOR_RANGE_PSI, SENSOR_RANGE_PSI);
    let raw = (psi + SENSOR_RANGE_PSI) / (2.0 * SENSOR_RANGE_PSI) * span + f64::from(SENSOR_RAW_MIN);
    raw.round() as u16
}
