use fluidlink_sequence::SequenceTemplate;
use serde::Serialize;

use crate::cmd::TemplatesArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_listing, OutputFormat};

#[derive(Debug, Serialize)]
struct TemplateRow {
    template: SequenceTemplate,
    name: &'static str,
    parameters: &'static [&'static str],
    rounds: bool,
    locks_manual_control: bool,
}

pub fn run(_args: TemplatesArgs, format: OutputFormat) -> CliResult<i32> {
    let rows: Vec<TemplateRow> = SequenceTemplate::ALL
        .into_iter()
        .map(|template| TemplateRow {
            template,
            name: template.name(),
            parameters: template.parameters(),
            rounds: !template.is_single_round(),
            locks_manual_control: template.disables_manual_control(),
        })
        .collect();

    print_listing(
        &rows,
        &["TEMPLATE", "NAME", "PARAMETERS", "ROUNDS", "LOCKS MANUAL"],
        |row| {
            vec![
                template_key(row.template),
                row.name.to_string(),
                row.parameters.join(", "),
                row.rounds.to_string(),
                row.locks_manual_control.to_string(),
            ]
        },
        format,
    );
    Ok(SUCCESS)
}

/// Name used for the template in plan files.
fn template_key(template: SequenceTemplate) -> String {
    serde_json::to_value(template)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default()
}
