use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fluidlink_sequence::{Controller, ControllerConfig, ControllerEvent, SchedulerEvent};
use tracing::{debug, info, warn};

use crate::cmd::RunArgs;
use crate::device::{link_config, open_transport, parse_duration};
use crate::exit::{
    scheduler_error, CliError, CliResult, DATA_INVALID, FAILURE, INTERNAL, SUCCESS, TIMEOUT,
};
use crate::measurement::MeasurementLog;
use crate::output::{print_event, print_reading, OutputFormat};
use crate::plan::Plan;

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let plan = Plan::load(&args.plan)?;
    let sequences = plan
        .expand()
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid plan: {err}")))?;
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?;

    let config = ControllerConfig {
        poll_interval: parse_duration(&args.poll_interval)?,
        tick_interval: parse_duration(&args.tick_interval)?,
        link: link_config(&args.link)?,
        report_every_frame: args.log_measurements.is_some(),
        ..ControllerConfig::default()
    };
    let mut measurements = args
        .log_measurements
        .as_deref()
        .map(MeasurementLog::create)
        .transpose()?;
    let transport = open_transport(&args.transport)?;
    let controller = Controller::spawn(transport, config)
        .map_err(|err| scheduler_error("controller start failed", err))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(interrupted.clone())?;

    info!(sequences = sequences.len(), plan = %args.plan.display(), "starting run");
    controller
        .enqueue_all(sequences)
        .and_then(|()| controller.start())
        .map_err(|err| scheduler_error("start failed", err))?;

    let deadline = timeout.map(|t| Instant::now() + t);
    let mut summary = RunSummary::default();
    let mut stop_reason: Option<StopReason> = None;
    let mut last_printed = None;

    loop {
        if stop_reason.is_none() {
            if interrupted.load(Ordering::SeqCst) {
                stop_reason = Some(StopReason::Interrupted);
            } else if deadline.is_some_and(|d| Instant::now() >= d) {
                stop_reason = Some(StopReason::TimedOut);
            }
            if let Some(reason) = stop_reason {
                warn!(?reason, "aborting after the current step");
                controller
                    .request_abort()
                    .map_err(|err| scheduler_error("abort failed", err))?;
            }
        }

        match controller.events().recv_timeout(Duration::from_millis(100)) {
            Ok(ControllerEvent::Scheduler(event)) => {
                summary.record(&event);
                print_event(&event, format);
                if matches!(
                    event,
                    SchedulerEvent::ExecutionFinished | SchedulerEvent::AbortCompleted
                ) {
                    break;
                }
            }
            Ok(ControllerEvent::Telemetry(state)) => {
                let reading = state.reading();
                if let Some(log) = measurements.as_mut() {
                    log.record(&reading)?;
                }
                if args.telemetry && last_printed != Some(state) {
                    last_printed = Some(state);
                    print_reading(&reading, format);
                }
            }
            Ok(ControllerEvent::Link(transition)) => debug!(?transition, "link transition"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CliError::new(INTERNAL, "controller stopped unexpectedly"));
            }
        }
    }

    controller.shutdown();
    if let Some(log) = measurements {
        let rows = log.finish()?;
        info!(rows, "measurement log written");
    }
    info!(
        finished = summary.finished,
        aborted = summary.aborted,
        failed_commands = summary.failed_commands,
        "run complete"
    );
    summary.exit_code(stop_reason)
}

#[derive(Debug, Clone, Copy)]
enum StopReason {
    Interrupted,
    TimedOut,
}

#[derive(Debug, Default)]
struct RunSummary {
    finished: usize,
    aborted: usize,
    failed_commands: usize,
    failed_checks: Vec<String>,
}

impl RunSummary {
    fn record(&mut self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::SequenceFinished { .. } => self.finished += 1,
            SchedulerEvent::SequenceAborted { .. } => self.aborted += 1,
            SchedulerEvent::CommandFailed { .. } => self.failed_commands += 1,
            SchedulerEvent::PreuseCheckResult {
                port_name,
                passed: false,
            } => self.failed_checks.push(port_name.clone()),
            _ => {}
        }
    }

    fn exit_code(&self, stop_reason: Option<StopReason>) -> CliResult<i32> {
        match stop_reason {
            Some(StopReason::TimedOut) => {
                return Err(CliError::new(TIMEOUT, "run timed out and was aborted"));
            }
            Some(StopReason::Interrupted) => {
                return Err(CliError::new(FAILURE, "run interrupted and was aborted"));
            }
            None => {}
        }
        if !self.failed_checks.is_empty() {
            return Err(CliError::new(
                FAILURE,
                format!("pre-use check failed: {}", self.failed_checks.join(", ")),
            ));
        }
        if self.failed_commands > 0 {
            return Err(CliError::new(
                FAILURE,
                format!(
                    "{} command(s) failed, {} sequence(s) aborted",
                    self.failed_commands, self.aborted
                ),
            ));
        }
        Ok(SUCCESS)
    }
}

fn install_ctrlc_handler(interrupted: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        interrupted.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
