//! Command opcodes understood by the fluidics controller.
//!
//! Opcodes are plain `u8` values on the wire. The link layer never interprets
//! them; these names exist for construction and for diagnostics.

/// Reset the controller's echoed command state.
pub const CLEAR: u8 = 0;
/// Aspirate the chamber with the vacuum pump.
pub const REMOVE_MEDIUM: u8 = 1;
/// Pump fluid from a selector-valve port into the chamber.
pub const ADD_MEDIUM: u8 = 2;
/// Push the fluidic line empty with air.
pub const EMPTY_FLUIDIC_LINE: u8 = 3;
/// Move the selector valve.
pub const SET_SELECTOR_VALVE: u8 = 10;
/// Switch the 10 mm solenoid valves.
pub const SET_10MM_SOLENOID_VALVE: u8 = 11;
/// Connect or disconnect the selector valve and the chamber.
pub const SET_SOLENOID_VALVE_B: u8 = 12;
/// Switch solenoid valve bank C.
pub const SET_SOLENOID_VALVE_C: u8 = 13;
/// Enable (payload 1 = 0) or disable (payload 1 = 1) the manual control panel.
pub const DISABLE_MANUAL_CONTROL: u8 = 20;
pub const ENABLE_PRESSURE_CONTROL_LOOP: u8 = 30;
pub const SET_PRESSURE_CONTROL_SETPOINT_PSI: u8 = 31;
pub const SET_PRESSURE_LOOP_P_COEFFICIENT: u8 = 32;
pub const SET_PRESSURE_LOOP_I_COEFFICIENT: u8 = 33;
/// Pressurise a port and check that it holds.
pub const PREUSE_CHECK_PRESSURE: u8 = 40;
/// Evacuate a port and check that it holds.
pub const PREUSE_CHECK_VACUUM: u8 = 41;

/// Returns a human-readable name for an opcode.
pub fn opcode_name(opcode: u8) -> &'static str {
    match opcode {
        CLEAR => "CLEAR",
        REMOVE_MEDIUM => "REMOVE_MEDIUM",
        ADD_MEDIUM => "ADD_MEDIUM",
        EMPTY_FLUIDIC_LINE => "EMPTY_FLUIDIC_LINE",
        SET_SELECTOR_VALVE => "SET_SELECTOR_VALVE",
        SET_10MM_SOLENOID_VALVE => "SET_10MM_SOLENOID_VALVE",
        SET_SOLENOID_VALVE_B => "SET_SOLENOID_VALVE_B",
        SET_SOLENOID_VALVE_C => "SET_SOLENOID_VALVE_C",
        DISABLE_MANUAL_CONTROL => "DISABLE_MANUAL_CONTROL",
        ENABLE_PRESSURE_CONTROL_LOOP => "ENABLE_PRESSURE_CONTROL_LOOP",
        SET_PRESSURE_CONTROL_SETPOINT_PSI => "SET_PRESSURE_CONTROL_SETPOINT_PSI",
        SET_PRESSURE_LOOP_P_COEFFICIENT => "SET_PRESSURE_LOOP_P_COEFFICIENT",
        SET_PRESSURE_LOOP_I_COEFFICIENT => "SET_PRESSURE_LOOP_I_COEFFICIENT",
        PREUSE_CHECK_PRESSURE => "PREUSE_CHECK_PRESSURE",
        PREUSE_CHECK_VACUUM => "PREUSE_CHECK_VACUUM",
        _ => "UNKNOWN",
    }
}

/// Returns true if the opcode belongs to the controller's command set.
pub fn is_known(opcode: u8) -> bool {
    opcode_name(opcode) != "UNKNOWN"
}
