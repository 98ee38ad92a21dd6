use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use fluidlink_link::{DeviceState, LinkEngine};
use tracing::info;

use crate::cmd::MonitorArgs;
use crate::device::{open_transport, parse_duration};
use crate::exit::{link_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::measurement::MeasurementLog;
use crate::output::{print_reading, OutputFormat};

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?;

    let mut measurements = args
        .log_measurements
        .as_deref()
        .map(MeasurementLog::create)
        .transpose()?;

    let transport = open_transport(&args.transport)?;
    let mut engine = LinkEngine::new(transport);
    engine
        .initialize()
        .map_err(|err| link_error("initialize failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let started = Instant::now();
    let mut last = DeviceState::default();
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let report = engine
            .poll()
            .map_err(|err| link_error("poll failed", err))?;

        let state = *engine.device_state();
        if let Some(log) = measurements.as_mut() {
            if report.is_some_and(|r| r.response.is_some()) {
                log.record(&state.reading())?;
            }
        }
        if state.is_populated() && state != last {
            last = state;
            print_reading(&state.reading(), format);
            printed = printed.saturating_add(1);
            if args.count.is_some_and(|count| printed >= count) {
                break;
            }
        }

        if printed == 0 && timeout.is_some_and(|t| started.elapsed() >= t) {
            return Err(CliError::new(TIMEOUT, "no status frame received"));
        }
        thread::sleep(interval);
    }

    if let Some(log) = measurements {
        let rows = log.finish()?;
        info!(rows, "measurement log written");
    }
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
