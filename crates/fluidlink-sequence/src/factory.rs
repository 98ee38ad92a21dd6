//! Protocol templates and their expansion into sequences.

use std::time::Duration;

use fluidlink_frame::{opcode, Payload};
use fluidlink_link::state::PRESSURE_FULL_SCALE_PSI;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FactoryError;
use crate::sequence::{CommandTemplate, Sequence, Subsequence};

/// Longest flow step the controller accepts, in seconds.
pub const FLOW_TIME_MAX_S: f64 = 60.0;
/// Longest incubation, in minutes.
pub const INCUBATION_TIME_MAX_MIN: f64 = 12.0 * 60.0;
/// Pressure loop coefficients are expressed as a fraction of this value.
pub const LOOP_COEFFICIENT_FULL_SCALE: f64 = 100.0;

type Result<T> = std::result::Result<T, FactoryError>;

/// Every protocol the factory can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceTemplate {
    RemoveMedium,
    AddImagingBuffer,
    /// Add medium, incubate, aspirate. Named washes (hybridize, stripping
    /// buffer wash, ...) are instances of this template.
    FillIncubateDrain,
    Flush,
    PreuseCheckPressure,
    PreuseCheckVacuum,
    SetSelectorValve,
    #[serde(rename = "set_10mm_valve")]
    Set10mmValve,
    EnableManualControl,
    DisableManualControl,
    ConnectSelectorValveAndChamber,
    DisconnectSelectorValveAndChamber,
    EnablePressureControlLoop,
    DisablePressureControlLoop,
    SetPressureSetpoint,
    SetPressureLoopP,
    SetPressureLoopI,
}

impl SequenceTemplate {
    pub const ALL: [SequenceTemplate; 17] = [
        Self::RemoveMedium,
        Self::AddImagingBuffer,
        Self::FillIncubateDrain,
        Self::Flush,
        Self::PreuseCheckPressure,
        Self::PreuseCheckVacuum,
        Self::SetSelectorValve,
        Self::Set10mmValve,
        Self::EnableManualControl,
        Self::DisableManualControl,
        Self::ConnectSelectorValveAndChamber,
        Self::DisconnectSelectorValveAndChamber,
        Self::EnablePressureControlLoop,
        Self::DisablePressureControlLoop,
        Self::SetPressureSetpoint,
        Self::SetPressureLoopP,
        Self::SetPressureLoopI,
    ];

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::RemoveMedium => "Remove Medium",
            Self::AddImagingBuffer => "Add Imaging Buffer",
            Self::FillIncubateDrain => "Fill, Incubate, Drain",
            Self::Flush => "Flush",
            Self::PreuseCheckPressure => "Preuse Check (Pressure)",
            Self::PreuseCheckVacuum => "Preuse Check (Vacuum)",
            Self::SetSelectorValve => "Set Selector Valve Position",
            Self::Set10mmValve => "Set 10 mm Valve State",
            Self::EnableManualControl => "Enable Manual Control",
            Self::DisableManualControl => "Disable Manual Control",
            Self::ConnectSelectorValveAndChamber => "Connect Selector Valve and Chamber",
            Self::DisconnectSelectorValveAndChamber => "Disconnect Selector Valve and Chamber",
            Self::EnablePressureControlLoop => "Enable Pressure Control Loop",
            Self::DisablePressureControlLoop => "Disable Pressure Control Loop",
            Self::SetPressureSetpoint => "Set Pressure Control Setpoint",
            Self::SetPressureLoopP => "Set Pressure Loop P Coefficient",
            Self::SetPressureLoopI => "Set Pressure Loop I Coefficient",
        }
    }

    /// Templates that move fluid require the manual panel to be locked out.
    pub fn disables_manual_control(self) -> bool {
        matches!(
            self,
            Self::RemoveMedium
                | Self::AddImagingBuffer
                | Self::FillIncubateDrain
                | Self::Flush
                | Self::PreuseCheckPressure
                | Self::PreuseCheckVacuum
        )
    }

    /// Only the fill/incubate/drain protocol is meaningfully repeated in rounds.
    pub fn is_single_round(self) -> bool {
        !matches!(self, Self::FillIncubateDrain)
    }

    /// Parameters the template reads from [`SequenceParams`].
    pub fn parameters(self) -> &'static [&'static str] {
        match self {
            Self::RemoveMedium => &["aspiration_pump_power", "aspiration_time_s"],
            Self::AddImagingBuffer => &[
                "fluidic_port",
                "flow_time_s",
                "post_fluidic_port",
                "post_flow_time_s",
            ],
            Self::FillIncubateDrain => &[
                "fluidic_port",
                "flow_time_s",
                "incubation_time_min",
                "post_fluidic_port",
                "post_flow_time_s",
                "aspiration_pump_power",
                "aspiration_time_s",
            ],
            Self::Flush => &[
                "fluidic_port",
                "flow_time_s",
                "pressure_setting",
                "post_fluidic_port",
                "post_flow_time_s",
            ],
            Self::PreuseCheckPressure | Self::PreuseCheckVacuum => &[
                "fluidic_port",
                "pressure_setting",
                "flow_time_s",
                "port_name",
            ],
            Self::SetSelectorValve | Self::Set10mmValve => &["fluidic_port"],
            Self::SetPressureSetpoint => &["pressure_setting"],
            Self::SetPressureLoopP | Self::SetPressureLoopI => &["coefficient"],
            Self::EnableManualControl
            | Self::DisableManualControl
            | Self::ConnectSelectorValveAndChamber
            | Self::DisconnectSelectorValveAndChamber
            | Self::EnablePressureControlLoop
            | Self::DisablePressureControlLoop => &[],
        }
    }
}

/// How the controller drives the pump when adding medium.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    ConstantPower,
    #[default]
    ConstantPressure,
    ConstantFlow,
    Volume,
}

impl ControlMode {
    /// Wire value.
    pub fn code(self) -> u8 {
        match self {
            Self::ConstantPower => 0,
            Self::ConstantPressure => 1,
            Self::ConstantFlow => 2,
            Self::Volume => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ConstantPower => "constant power",
            Self::ConstantPressure => "constant pressure",
            Self::ConstantFlow => "constant flow",
            Self::Volume => "volume control",
        }
    }
}

/// Rig-wide defaults applied when a parameter is not given per sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidicsDefaults {
    /// Vacuum pump power for aspiration, fraction of full scale.
    pub aspiration_pump_power: f64,
    pub aspiration_time_s: f64,
    pub control_mode: ControlMode,
    /// Pump power in constant-power mode, fraction of full scale.
    pub pump_power: f64,
    /// Set-point in constant-pressure mode.
    pub pressure_setpoint_psi: f64,
    pub preuse_check_pressure_psi: f64,
    pub preuse_check_timeout_s: f64,
}

impl Default for FluidicsDefaults {
    fn default() -> Self {
        Self {
            aspiration_pump_power: 0.3,
            aspiration_time_s: 8.0,
            control_mode: ControlMode::ConstantPressure,
            pump_power: 0.8,
            pressure_setpoint_psi: 4.9,
            preuse_check_pressure_psi: 3.0,
            preuse_check_timeout_s: 10.0,
        }
    }
}

/// Flat parameter set shared by every template. Each template reads the
/// fields it needs and ignores the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceParams {
    /// Display name; defaults to the template name.
    pub name: Option<String>,
    pub fluidic_port: Option<u32>,
    pub flow_time_s: Option<f64>,
    pub incubation_time_min: Option<f64>,
    /// Port flushed after the main flow; 0 empties the line with air.
    pub post_fluidic_port: Option<u32>,
    pub post_flow_time_s: Option<f64>,
    pub pressure_setting: Option<f64>,
    pub aspiration_pump_power: Option<f64>,
    pub aspiration_time_s: Option<f64>,
    /// Pressure loop coefficient, 0-100.
    pub coefficient: Option<f64>,
    /// Label for pre-use check results.
    pub port_name: Option<String>,
}

/// Builds sequences from templates.
#[derive(Debug, Clone, Default)]
pub struct SequenceFactory {
    defaults: FluidicsDefaults,
}

impl SequenceFactory {
    pub fn new(defaults: FluidicsDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &FluidicsDefaults {
        &self.defaults
    }

    /// Build `repeat` rounds of a template, one sequence per round.
    pub fn build_rounds(
        &self,
        template: SequenceTemplate,
        params: &SequenceParams,
        repeat: u32,
    ) -> Result<Vec<Sequence>> {
        (1..=repeat)
            .map(|round| self.build(template, params, round))
            .collect()
    }

    /// Build a single round of a template.
    pub fn build(
        &self,
        template: SequenceTemplate,
        params: &SequenceParams,
        round: u32,
    ) -> Result<Sequence> {
        let cx = Context {
            template,
            params,
            defaults: &self.defaults,
        };

        let steps = match template {
            SequenceTemplate::RemoveMedium => vec![cx.remove_medium()?],
            SequenceTemplate::AddImagingBuffer => {
                let add = cx.add_medium(cx.port()?, cx.flow_ms()?, cx.medium_p3(None)?)?;
                vec![add, cx.post_flow(None)?]
            }
            SequenceTemplate::FillIncubateDrain => {
                let add = cx.add_medium(cx.port()?, cx.flow_ms()?, cx.medium_p3(None)?)?;
                vec![
                    add,
                    cx.post_flow(None)?,
                    Subsequence::Stopwatch(cx.incubation()?),
                    cx.remove_medium()?,
                ]
            }
            SequenceTemplate::Flush => {
                let pressure = cx.pressure()?;
                let add = cx.add_medium(cx.port()?, cx.flow_ms()?, cx.medium_p3(Some(pressure))?)?;
                vec![add, cx.post_flow(Some(pressure))?]
            }
            SequenceTemplate::PreuseCheckPressure => {
                vec![cx.preuse_check(opcode::PREUSE_CHECK_PRESSURE)?]
            }
            SequenceTemplate::PreuseCheckVacuum => vec![cx.preuse_check(opcode::PREUSE_CHECK_VACUUM)?],
            SequenceTemplate::SetSelectorValve => {
                let port = cx.port()?;
                vec![command(
                    opcode::SET_SELECTOR_VALVE,
                    Payload::new().with_p2(port),
                    format!("set selector valve to port {port}"),
                )]
            }
            SequenceTemplate::Set10mmValve => {
                let valve = cx.port()?;
                let description = match valve {
                    0 => "turn off all 10 mm valves".to_string(),
                    n => format!("turn on 10 mm valve {n}"),
                };
                vec![command(
                    opcode::SET_10MM_SOLENOID_VALVE,
                    Payload::new().with_p2(valve),
                    description,
                )]
            }
            SequenceTemplate::EnableManualControl => vec![command(
                opcode::DISABLE_MANUAL_CONTROL,
                Payload::new().with_p1(0),
                "enable manual control",
            )],
            SequenceTemplate::DisableManualControl => vec![command(
                opcode::DISABLE_MANUAL_CONTROL,
                Payload::new().with_p1(1),
                "disable manual control",
            )],
            SequenceTemplate::ConnectSelectorValveAndChamber => vec![command(
                opcode::SET_SOLENOID_VALVE_B,
                Payload::new().with_p1(1),
                "connect selector valve and chamber",
            )],
            SequenceTemplate::DisconnectSelectorValveAndChamber => vec![command(
                opcode::SET_SOLENOID_VALVE_B,
                Payload::new().with_p1(0),
                "disconnect selector valve and chamber",
            )],
            SequenceTemplate::EnablePressureControlLoop => vec![command(
                opcode::ENABLE_PRESSURE_CONTROL_LOOP,
                Payload::new().with_p1(1),
                "enable pressure control loop",
            )],
            SequenceTemplate::DisablePressureControlLoop => vec![command(
                opcode::ENABLE_PRESSURE_CONTROL_LOOP,
                Payload::new().with_p1(0),
                "disable pressure control loop",
            )],
            SequenceTemplate::SetPressureSetpoint => {
                let psi = cx.pressure()?;
                vec![command(
                    opcode::SET_PRESSURE_CONTROL_SETPOINT_PSI,
                    Payload::new().with_p3(pressure_fraction(psi)),
                    format!("set pressure set-point to {psi} psi"),
                )]
            }
            SequenceTemplate::SetPressureLoopP => vec![cx.loop_coefficient(
                opcode::SET_PRESSURE_LOOP_P_COEFFICIENT,
                "P",
            )?],
            SequenceTemplate::SetPressureLoopI => vec![cx.loop_coefficient(
                opcode::SET_PRESSURE_LOOP_I_COEFFICIENT,
                "I",
            )?],
        };

        let name = params
            .name
            .clone()
            .unwrap_or_else(|| template.name().to_string());
        let mut sequence = Sequence::new(name, template, params.clone(), steps)
            .with_round(round, template.is_single_round());

        if matches!(
            template,
            SequenceTemplate::PreuseCheckPressure | SequenceTemplate::PreuseCheckVacuum
        ) {
            let port_name = match &params.port_name {
                Some(name) => name.clone(),
                None => format!("port {}", cx.port()?),
            };
            sequence = sequence.with_port_name(port_name);
        }

        debug!(
            sequence = %sequence.label(),
            steps = sequence.remaining(),
            "sequence built"
        );
        Ok(sequence)
    }
}

fn command(opcode: u8, payload: Payload, description: impl Into<String>) -> Subsequence {
    Subsequence::McuCommand(CommandTemplate::new(opcode, payload, description))
}

fn fraction_u16(fraction: f64) -> u16 {
    (fraction * f64::from(u16::MAX)) as u16
}

fn pressure_fraction(psi: f64) -> u16 {
    fraction_u16(psi / PRESSURE_FULL_SCALE_PSI)
}

fn millis(seconds: f64) -> u32 {
    (seconds * 1000.0).round() as u32
}

struct Context<'a> {
    template: SequenceTemplate,
    params: &'a SequenceParams,
    defaults: &'a FluidicsDefaults,
}

impl Context<'_> {
    fn missing(&self, parameter: &'static str) -> FactoryError {
        FactoryError::MissingParameter {
            template: self.template.name(),
            parameter,
        }
    }

    fn check(&self, parameter: &'static str, value: f64, min: f64, max: f64) -> Result<f64> {
        if value.is_nan() || value < min || value > max {
            return Err(FactoryError::OutOfRange {
                template: self.template.name(),
                parameter,
                value,
                min,
                max,
            });
        }
        Ok(value)
    }

    fn port_value(&self, parameter: &'static str, port: u32) -> Result<u8> {
        let port = self.check(parameter, f64::from(port), 0.0, f64::from(u8::MAX))?;
        Ok(port as u8)
    }

    fn port(&self) -> Result<u8> {
        let port = self
            .params
            .fluidic_port
            .ok_or_else(|| self.missing("fluidic_port"))?;
        self.port_value("fluidic_port", port)
    }

    fn flow_ms(&self) -> Result<u32> {
        let seconds = self
            .params
            .flow_time_s
            .ok_or_else(|| self.missing("flow_time_s"))?;
        Ok(millis(self.check("flow_time_s", seconds, 0.0, FLOW_TIME_MAX_S)?))
    }

    fn pressure(&self) -> Result<f64> {
        let psi = self
            .params
            .pressure_setting
            .ok_or_else(|| self.missing("pressure_setting"))?;
        self.check("pressure_setting", psi, 0.0, PRESSURE_FULL_SCALE_PSI)
    }

    fn incubation(&self) -> Result<Duration> {
        let minutes = self
            .params
            .incubation_time_min
            .ok_or_else(|| self.missing("incubation_time_min"))?;
        let minutes = self.check("incubation_time_min", minutes, 0.0, INCUBATION_TIME_MAX_MIN)?;
        Ok(Duration::from_secs_f64(minutes * 60.0))
    }

    /// Payload 3 for adding medium under the configured control mode.
    fn medium_p3(&self, pressure: Option<f64>) -> Result<u16> {
        match self.defaults.control_mode {
            ControlMode::ConstantPower => {
                let power = self.check("pump_power", self.defaults.pump_power, 0.0, 1.0)?;
                Ok(fraction_u16(power))
            }
            _ => {
                let psi = pressure.unwrap_or(self.defaults.pressure_setpoint_psi);
                let psi = self.check("pressure_setting", psi, 0.0, PRESSURE_FULL_SCALE_PSI)?;
                Ok(pressure_fraction(psi))
            }
        }
    }

    fn add_medium(&self, port: u8, flow_ms: u32, p3: u16) -> Result<Subsequence> {
        let mode = self.defaults.control_mode;
        Ok(command(
            opcode::ADD_MEDIUM,
            Payload::new()
                .with_p1(mode.code())
                .with_p2(port)
                .with_p3(p3)
                .with_p4(flow_ms),
            format!(
                "add medium from port {port} using {} mode for {:.1} s",
                mode.name(),
                f64::from(flow_ms) / 1000.0
            ),
        ))
    }

    /// Flush from the post-flow port, or empty the line when it is 0.
    fn post_flow(&self, pressure: Option<f64>) -> Result<Subsequence> {
        let port = self.port_value("post_fluidic_port", self.params.post_fluidic_port.unwrap_or(0))?;
        let seconds = self.params.post_flow_time_s.unwrap_or(0.0);
        let flow_ms = millis(self.check("post_flow_time_s", seconds, 0.0, FLOW_TIME_MAX_S)?);
        let p3 = self.medium_p3(pressure)?;

        if port != 0 {
            return self.add_medium(port, flow_ms, p3);
        }
        Ok(command(
            opcode::EMPTY_FLUIDIC_LINE,
            Payload::new()
                .with_p1(self.defaults.control_mode.code())
                .with_p2(port)
                .with_p3(p3)
                .with_p4(flow_ms),
            format!("empty the fluidic line for {seconds:.1} s"),
        ))
    }

    fn remove_medium(&self) -> Result<Subsequence> {
        let power = self
            .params
            .aspiration_pump_power
            .unwrap_or(self.defaults.aspiration_pump_power);
        let power = self.check("aspiration_pump_power", power, 0.0, 1.0)?;
        let seconds = self
            .params
            .aspiration_time_s
            .unwrap_or(self.defaults.aspiration_time_s);
        let seconds = self.check("aspiration_time_s", seconds, 0.0, FLOW_TIME_MAX_S)?;

        Ok(command(
            opcode::REMOVE_MEDIUM,
            Payload::new()
                .with_p3(fraction_u16(power))
                .with_p4(millis(seconds)),
            format!("remove medium at {:.0}% power for {seconds:.1} s", power * 100.0),
        ))
    }

    fn preuse_check(&self, opcode: u8) -> Result<Subsequence> {
        let port = self.port()?;
        let psi = self
            .params
            .pressure_setting
            .unwrap_or(self.defaults.preuse_check_pressure_psi);
        let psi = self.check("pressure_setting", psi, 0.0, PRESSURE_FULL_SCALE_PSI)?;
        let timeout = self
            .params
            .flow_time_s
            .unwrap_or(self.defaults.preuse_check_timeout_s);
        let timeout = self.check("flow_time_s", timeout, 0.0, FLOW_TIME_MAX_S)?;

        Ok(command(
            opcode,
            Payload::new()
                .with_p2(port)
                .with_p3(pressure_fraction(psi))
                .with_p4(millis(timeout)),
            format!("pre-use check for port {port} at {psi} psi"),
        ))
    }

    fn loop_coefficient(&self, opcode: u8, which: &str) -> Result<Subsequence> {
        let value = self
            .params
            .coefficient
            .ok_or_else(|| self.missing("coefficient"))?;
        let value = self.check("coefficient", value, 0.0, LOOP_COEFFICIENT_FULL_SCALE)?;
        let p4 = (value / LOOP_COEFFICIENT_FULL_SCALE * f64::from(u32::MAX)) as u32;
        Ok(command(
            opcode,
            Payload::new().with_p4(p4),
            format!("set pressure loop {which} coefficient to {value}"),
        ))
    }
}
