use crate::cmd::PortsArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

#[cfg(feature = "serial")]
pub fn run(_args: PortsArgs, format: OutputFormat) -> CliResult<i32> {
    use fluidlink_transport::list_ports;

    use crate::exit::{transport_error, SUCCESS};
    use crate::output::print_listing;

    let ports = list_ports().map_err(|err| transport_error("port enumeration failed", err))?;
    let rows: Vec<PortRow> = ports
        .into_iter()
        .map(|port| PortRow {
            path: port.path,
            serial_number: port.serial_number,
            manufacturer: port.manufacturer,
            product: port.product,
        })
        .collect();

    print_listing(
        &rows,
        &["PATH", "SERIAL NUMBER", "MANUFACTURER", "PRODUCT"],
        |row| {
            vec![
                row.path.clone(),
                row.serial_number.clone().unwrap_or_default(),
                row.manufacturer.clone().unwrap_or_default(),
                row.product.clone().unwrap_or_default(),
            ]
        },
        format,
    );
    Ok(SUCCESS)
}

#[cfg(feature = "serial")]
#[derive(Debug, serde::Serialize)]
struct PortRow {
    path: String,
    serial_number: Option<String>,
    manufacturer: Option<String>,
    product: Option<String>,
}

#[cfg(not(feature = "serial"))]
pub fn run(_args: PortsArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "serial port support is not compiled in (build with --features serial)",
    ))
}
