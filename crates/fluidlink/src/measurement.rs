//! CSV log of every status frame received during a run or monitor session.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fluidlink_link::TelemetryReading;
use tracing::{debug, info};

use crate::exit::{CliError, CliResult, FAILURE};

/// Column names, in row order.
pub const HEADER: [&str; 17] = [
    "timestamp",
    "sequence_id",
    "opcode",
    "status",
    "program",
    "selector_valve",
    "pressure_psi",
    "vacuum_psi",
    "pump_power",
    "flow_upstream_ul_min",
    "flow_downstream_ul_min",
    "volume_ul",
    "elapsed_s",
    "bubble_sensor_1",
    "bubble_sensor_2",
    "flow_sensor_fluid",
    "manual_control",
];

/// Rows written between flushes.
const FLUSH_EVERY: u64 = 500;

#[derive(Debug)]
pub struct MeasurementLog {
    writer: csv::Writer<File>,
    path: PathBuf,
    rows: u64,
}

impl MeasurementLog {
    /// Create (or truncate) `path` and write the header.
    pub fn create(path: &Path) -> CliResult<Self> {
        let mut writer = csv::Writer::from_path(path).map_err(|err| log_error(path, err))?;
        writer
            .write_record(HEADER)
            .map_err(|err| log_error(path, err))?;
        info!(path = %path.display(), "logging measurements");
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            rows: 0,
        })
    }

    /// Append one row stamped with the current time.
    pub fn record(&mut self, reading: &TelemetryReading) -> CliResult<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.record_at(timestamp, reading)
    }

    fn record_at(&mut self, timestamp: f64, reading: &TelemetryReading) -> CliResult<()> {
        self.writer
            .write_record(row(timestamp, reading))
            .map_err(|err| log_error(&self.path, err))?;
        self.rows += 1;
        if self.rows % FLUSH_EVERY == 0 {
            self.writer
                .flush()
                .map_err(|err| log_error(&self.path, err))?;
        }
        Ok(())
    }

    /// Flush buffered rows and close the file.
    pub fn finish(mut self) -> CliResult<u64> {
        self.writer
            .flush()
            .map_err(|err| log_error(&self.path, err))?;
        debug!(rows = self.rows, path = %self.path.display(), "measurement log closed");
        Ok(self.rows)
    }
}

fn row(timestamp: f64, reading: &TelemetryReading) -> [String; 17] {
    let flag = |on: bool| u8::from(on).to_string();
    [
        format!("{timestamp:.3}"),
        reading.sequence_id.to_string(),
        reading.opcode.to_string(),
        reading.status.clone().unwrap_or_default(),
        reading.program.to_string(),
        reading.selector_valve.to_string(),
        format!("{:.2}", reading.pressure_psi),
        format!("{:.2}", reading.vacuum_psi),
        format!("{:.2}", reading.pump_power),
        format!("{:.2}", reading.flow_upstream_ul_min),
        format!("{:.2}", reading.flow_downstream_ul_min),
        format!("{:.2}", reading.volume_ul),
        reading.elapsed_s.to_string(),
        flag(reading.bubble_sensor_1),
        flag(reading.bubble_sensor_2),
        flag(reading.flow_sensor_fluid),
        flag(reading.manual_control),
    ]
}

fn log_error(path: &Path, err: impl std::fmt::Display) -> CliError {
    CliError::new(
        FAILURE,
        format!("measurement log {}: {err}", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use fluidlink_frame::{ExecutionStatus, ResponseFrame, Telemetry};
    use fluidlink_link::DeviceState;

    use super::*;

    fn reading() -> TelemetryReading {
        DeviceState::from_frame(&ResponseFrame::new(
            7,
            2,
            ExecutionStatus::CompletedOk,
            Telemetry {
                selector_valve: 4,
                fluid_flags: 0b10,
                ..Default::default()
            },
        ))
        .reading()
    }

    #[test]
    fn rows_follow_header() {
        let path = std::env::temp_dir().join(format!(
            "fluidlink-measurements-{}.csv",
            std::process::id()
        ));
        let mut log = MeasurementLog::create(&path).unwrap();
        log.record_at(12.5, &reading()).unwrap();
        log.record(&reading()).unwrap();
        assert_eq!(log.finish().unwrap(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER.join(","));
        let fields: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(fields.len(), HEADER.len());
        assert_eq!(fields[0], "12.500");
        assert_eq!(fields[1], "7");
        assert_eq!(fields[3], "completed");
        assert_eq!(fields[5], "4");
        assert_eq!(fields[13], "1");
    }

    #[test]
    fn unwritable_path_is_reported() {
        let err = MeasurementLog::create(Path::new("/nonexistent-dir/fluidlink.csv")).unwrap_err();
        assert_eq!(err.code, FAILURE);
        assert!(err.message.contains("measurement log"));
    }
}
