use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use fluidlink_link::TelemetryReading;
use fluidlink_sequence::SchedulerEvent;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct Stamped<'a, T: Serialize> {
    timestamp: String,
    #[serde(flatten)]
    inner: &'a T,
}

/// One line per scheduler event.
pub fn print_event(event: &SchedulerEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json_line(&Stamped {
            timestamp: now_unix_seconds(),
            inner: event,
        }),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("[{}] {event}", now_unix_seconds());
        }
        OutputFormat::Raw => println!("{event}"),
    }
}

pub fn print_reading(reading: &TelemetryReading, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json_line(&Stamped {
            timestamp: now_unix_seconds(),
            inner: reading,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "ID", "PROGRAM", "PORT", "PRESSURE", "VACUUM", "PUMP", "FLOW UP", "FLOW DOWN",
                    "VOLUME",
                ])
                .add_row(vec![
                    reading.sequence_id.to_string(),
                    reading.program.to_string(),
                    reading.selector_valve.to_string(),
                    format!("{:.2} psi", reading.pressure_psi),
                    format!("{:.2} psi", reading.vacuum_psi),
                    format!("{:.0}%", reading.pump_power * 100.0),
                    format!("{:.1} ul/min", reading.flow_upstream_ul_min),
                    format!("{:.1} ul/min", reading.flow_downstream_ul_min),
                    format!("{:.0} ul", reading.volume_ul),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "id={} status={} program={} port={} pressure={:.2}psi vacuum={:.2}psi pump={:.2} volume={:.0}ul",
                reading.sequence_id,
                reading.status.as_deref().unwrap_or("-"),
                reading.program,
                reading.selector_valve,
                reading.pressure_psi,
                reading.vacuum_psi,
                reading.pump_power,
                reading.volume_ul,
            );
        }
    }
}

/// Print a list of records: a JSON array, a table, or tab-separated rows.
pub fn print_listing<T: Serialize>(
    items: &[T],
    header: &[&str],
    row: impl Fn(&T) -> Vec<String>,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json_line(&items),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(header.to_vec());
            for item in items {
                table.add_row(row(item));
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for item in items {
                println!("{}", row(item).join("\t"));
            }
        }
    }
}

pub fn print_json_line<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| format!("{:.3}", d.as_secs_f64()))
        .unwrap_or_else(|_| "0".to_string())
}
