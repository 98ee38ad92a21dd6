use fluidlink_frame::opcode_name;
use fluidlink_sequence::{Sequence, Subsequence};
use serde::Serialize;

use crate::cmd::ExpandArgs;
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_listing, OutputFormat};
use crate::plan::Plan;

#[derive(Debug, Serialize)]
struct StepRow {
    sequence: String,
    step: usize,
    opcode: &'static str,
    p1: Option<u8>,
    p2: Option<u8>,
    p3: Option<u16>,
    p4: Option<u32>,
    wait_s: Option<f64>,
    description: String,
}

pub fn run(args: ExpandArgs, format: OutputFormat) -> CliResult<i32> {
    let plan = Plan::load(&args.plan)?;
    let sequences = plan
        .expand()
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid plan: {err}")))?;

    let rows: Vec<StepRow> = sequences.iter().flat_map(rows_for).collect();
    print_listing(
        &rows,
        &["SEQUENCE", "STEP", "OPCODE", "P1", "P2", "P3", "P4", "DESCRIPTION"],
        |row| {
            vec![
                row.sequence.clone(),
                row.step.to_string(),
                row.opcode.to_string(),
                cell(row.p1),
                cell(row.p2),
                cell(row.p3),
                cell(row.p4),
                row.description.clone(),
            ]
        },
        format,
    );
    Ok(SUCCESS)
}

fn rows_for(sequence: &Sequence) -> Vec<StepRow> {
    let label = sequence.label();
    sequence
        .steps()
        .enumerate()
        .map(|(index, step)| match step {
            Subsequence::McuCommand(command) => StepRow {
                sequence: label.clone(),
                step: index + 1,
                opcode: opcode_name(command.opcode),
                p1: Some(command.payload.p1),
                p2: Some(command.payload.p2),
                p3: Some(command.payload.p3),
                p4: Some(command.payload.p4),
                wait_s: None,
                description: command.description.clone(),
            },
            Subsequence::Stopwatch(duration) => StepRow {
                sequence: label.clone(),
                step: index + 1,
                opcode: "WAIT",
                p1: None,
                p2: None,
                p3: None,
                p4: None,
                wait_s: Some(duration.as_secs_f64()),
                description: step.to_string(),
            },
        })
        .collect()
}

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use fluidlink_sequence::{SequenceFactory, SequenceParams, SequenceTemplate};

    use super::*;

    #[test]
    fn stopwatch_rows_carry_wait_time() {
        let sequence = SequenceFactory::default()
            .build(
                SequenceTemplate::FillIncubateDrain,
                &SequenceParams {
                    fluidic_port: Some(3),
                    flow_time_s: Some(10.0),
                    incubation_time_min: Some(5.0),
                    ..Default::default()
                },
                1,
            )
            .unwrap();

        let rows = rows_for(&sequence);

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].opcode, "ADD_MEDIUM");
        assert_eq!(rows[0].p2, Some(3));
        assert_eq!(rows[0].p4, Some(10_000));
        assert_eq!(rows[2].opcode, "WAIT");
        assert_eq!(rows[2].wait_s, Some(300.0));
        assert_eq!(rows[3].opcode, "REMOVE_MEDIUM");
        assert_eq!(rows[3].step, 4);
    }
}
