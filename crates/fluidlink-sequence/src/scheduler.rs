use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use fluidlink_frame::opcode_name;
use fluidlink_link::{CommandFailure, CommandHandle, CommandLink, CommandStatus, LinkError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::sequence::{CommandTemplate, Sequence, Subsequence};

/// Configuration for a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Undrained events kept before the oldest are dropped.
    pub max_pending_events: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_pending_events: 4096,
        }
    }
}

/// Progress reported by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    ExecutionStarted {
        queued: usize,
    },
    ExecutionFinished,
    SequenceStarted {
        name: String,
        round: u32,
        steps: usize,
    },
    SequenceFinished {
        name: String,
        round: u32,
    },
    SequenceAborted {
        name: String,
        round: u32,
        reason: String,
    },
    AbortCompleted,
    CommandSent {
        sequence_id: u16,
        opcode: &'static str,
        description: String,
    },
    CommandCompleted {
        sequence_id: u16,
        opcode: &'static str,
        description: String,
    },
    CommandFailed {
        sequence_id: u16,
        opcode: &'static str,
        description: String,
        reason: String,
        retry_count: u32,
        fatal: bool,
    },
    StopwatchStarted {
        #[serde(serialize_with = "as_secs")]
        duration: Duration,
    },
    StopwatchFinished,
    StopwatchAborted {
        #[serde(serialize_with = "as_secs")]
        remaining: Duration,
    },
    PreuseCheckResult {
        port_name: String,
        passed: bool,
    },
    TransportError {
        message: String,
    },
}

fn as_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl fmt::Display for SchedulerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionStarted { queued } => write!(f, "execution started ({queued} sequences)"),
            Self::ExecutionFinished => f.write_str("execution finished"),
            Self::SequenceStarted { name, round, steps } => {
                write!(f, "sequence started: {name} round {round} ({steps} steps)")
            }
            Self::SequenceFinished { name, round } => {
                write!(f, "sequence finished: {name} round {round}")
            }
            Self::SequenceAborted {
                name,
                round,
                reason,
            } => write!(f, "sequence aborted: {name} round {round}: {reason}"),
            Self::AbortCompleted => f.write_str("abort completed"),
            Self::CommandSent {
                sequence_id,
                opcode,
                description,
            } => write!(f, "sent #{sequence_id} {opcode}: {description}"),
            Self::CommandCompleted {
                sequence_id,
                opcode,
                ..
            } => write!(f, "completed #{sequence_id} {opcode}"),
            Self::CommandFailed {
                sequence_id,
                opcode,
                reason,
                ..
            } => write!(f, "failed #{sequence_id} {opcode}: {reason}"),
            Self::StopwatchStarted { duration } => {
                write!(f, "waiting {:.1} s", duration.as_secs_f64())
            }
            Self::StopwatchFinished => f.write_str("wait finished"),
            Self::StopwatchAborted { remaining } => {
                write!(f, "wait aborted with {:.1} s left", remaining.as_secs_f64())
            }
            Self::PreuseCheckResult { port_name, passed } => write!(
                f,
                "pre-use check {port_name}: {}",
                if *passed { "passed" } else { "failed" }
            ),
            Self::TransportError { message } => write!(f, "transport error: {message}"),
        }
    }
}

#[derive(Debug)]
enum InFlight {
    Command {
        handle: CommandHandle,
        template: CommandTemplate,
    },
    Stopwatch {
        deadline: Instant,
    },
}

/// Runs queued sequences one step at a time.
///
/// [`tick`](Self::tick) is called at a fixed interval and never blocks:
/// a step that is not finished is simply checked again on the next tick.
/// At most one sequence, and within it at most one step, is in flight.
#[derive(Debug, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
    queue: VecDeque<Sequence>,
    current: Option<Sequence>,
    step: Option<InFlight>,
    abort_requested: bool,
    running: bool,
    events: VecDeque<SchedulerEvent>,
    failed_commands: usize,
}

impl Scheduler {
    /// Create a scheduler with default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with explicit configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn enqueue(&mut self, sequence: Sequence) {
        debug!(sequence = %sequence.label(), "sequence queued");
        self.queue.push_back(sequence);
    }

    pub fn enqueue_all(&mut self, sequences: impl IntoIterator<Item = Sequence>) {
        for sequence in sequences {
            self.enqueue(sequence);
        }
    }

    /// Begin executing the queue. Clears a previous abort request.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.abort_requested = false;
        self.running = true;
        info!(queued = self.queue.len(), "execution started");
        self.emit(SchedulerEvent::ExecutionStarted {
            queued: self.queue.len(),
        });
    }

    /// Stop after the step in flight. An in-flight controller command is
    /// allowed to finish; a stopwatch is cut short.
    pub fn request_abort(&mut self) {
        if self.running && !self.abort_requested {
            info!("abort requested");
        }
        self.abort_requested = true;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested
    }

    /// Sequences waiting behind the current one.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn current_sequence(&self) -> Option<&Sequence> {
        self.current.as_ref()
    }

    /// Time left on the running stopwatch step.
    pub fn stopwatch_remaining(&self, now: Instant) -> Option<Duration> {
        match &self.step {
            Some(InFlight::Stopwatch { deadline }) => Some(deadline.saturating_duration_since(now)),
            _ => None,
        }
    }

    /// Commands that failed since the scheduler was created.
    pub fn failed_commands(&self) -> usize {
        self.failed_commands
    }

    /// Take every event emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        self.events.drain(..).collect()
    }

    /// Advance using the current time.
    pub fn tick<L: CommandLink + ?Sized>(&mut self, link: &mut L) -> Result<()> {
        self.tick_at(link, Instant::now())
    }

    /// Advance by at most one step.
    pub fn tick_at<L: CommandLink + ?Sized>(&mut self, link: &mut L, now: Instant) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        if let Some(step) = self.step.take() {
            if !self.settle(step, link, now) {
                return Ok(());
            }
        }

        if self.abort_requested {
            self.finish_abort();
            return Ok(());
        }

        if self.current.is_none() {
            let Some(sequence) = self.queue.pop_front() else {
                self.running = false;
                info!("execution finished");
                self.emit(SchedulerEvent::ExecutionFinished);
                return Ok(());
            };
            info!(sequence = %sequence.label(), "sequence started");
            self.emit(SchedulerEvent::SequenceStarted {
                name: sequence.name.clone(),
                round: sequence.round,
                steps: sequence.remaining(),
            });
            self.current = Some(sequence);
        }

        self.start_next_step(link, now)
    }

    /// Check the step in flight. Returns true once it is retired.
    fn settle<L: CommandLink + ?Sized>(&mut self, step: InFlight, link: &mut L, now: Instant) -> bool {
        match step {
            InFlight::Command { handle, template } => match link.status(handle) {
                CommandStatus::Pending => {
                    self.step = Some(InFlight::Command { handle, template });
                    false
                }
                CommandStatus::Acked => {
                    self.emit(SchedulerEvent::CommandCompleted {
                        sequence_id: handle.sequence_id(),
                        opcode: opcode_name(template.opcode),
                        description: template.description,
                    });
                    if let Some(port_name) = self.current.as_ref().and_then(|s| s.port_name.clone()) {
                        self.emit(SchedulerEvent::PreuseCheckResult {
                            port_name,
                            passed: true,
                        });
                    }
                    true
                }
                CommandStatus::Failed(failure) => {
                    link.acknowledge_error();
                    self.command_failed(failure, template);
                    true
                }
                CommandStatus::Unknown => {
                    warn!(
                        sequence_id = handle.sequence_id(),
                        "link lost track of command"
                    );
                    self.abort_current("command status lost".to_string());
                    true
                }
            },
            InFlight::Stopwatch { deadline } => {
                if self.abort_requested {
                    let remaining = deadline.saturating_duration_since(now);
                    self.emit(SchedulerEvent::StopwatchAborted { remaining });
                    true
                } else if now >= deadline {
                    self.emit(SchedulerEvent::StopwatchFinished);
                    true
                } else {
                    self.step = Some(InFlight::Stopwatch { deadline });
                    false
                }
            }
        }
    }

    fn command_failed(&mut self, failure: CommandFailure, template: CommandTemplate) {
        self.failed_commands += 1;
        let fatal = failure.kind.is_fatal();
        self.emit(SchedulerEvent::CommandFailed {
            sequence_id: failure.sequence_id,
            opcode: opcode_name(failure.opcode),
            description: template.description,
            reason: failure.kind.to_string(),
            retry_count: failure.retry_count,
            fatal,
        });

        if fatal {
            warn!(%failure, "fatal controller error, aborting all sequences");
            self.abort_requested = true;
            self.abort_current(failure.to_string());
        } else if let Some(port_name) = self.preuse_port_name(&failure) {
            self.emit(SchedulerEvent::PreuseCheckResult {
                port_name,
                passed: false,
            });
        } else {
            warn!(%failure, "command failed, skipping rest of sequence");
            self.abort_current(failure.to_string());
        }
    }

    /// Port under test when `failure` is a failed pre-use check.
    fn preuse_port_name(&self, failure: &CommandFailure) -> Option<String> {
        if !failure.kind.is_domain() {
            return None;
        }
        self.current.as_ref().and_then(|s| s.port_name.clone())
    }

    fn abort_current(&mut self, reason: String) {
        if let Some(sequence) = self.current.take() {
            warn!(sequence = %sequence.label(), %reason, "sequence aborted");
            self.emit(SchedulerEvent::SequenceAborted {
                name: sequence.name,
                round: sequence.round,
                reason,
            });
        }
    }

    fn finish_abort(&mut self) {
        self.abort_current("abort requested".to_string());
        while let Some(sequence) = self.queue.pop_front() {
            self.emit(SchedulerEvent::SequenceAborted {
                name: sequence.name,
                round: sequence.round,
                reason: "abort requested".to_string(),
            });
        }
        self.running = false;
        info!("abort completed");
        self.emit(SchedulerEvent::AbortCompleted);
    }

    fn start_next_step<L: CommandLink + ?Sized>(&mut self, link: &mut L, now: Instant) -> Result<()> {
        let Some(sequence) = self.current.as_mut() else {
            return Ok(());
        };

        match sequence.next_step() {
            Some(Subsequence::McuCommand(template)) => {
                match link.send(template.opcode, template.payload) {
                    Ok(handle) => {
                        self.emit(SchedulerEvent::CommandSent {
                            sequence_id: handle.sequence_id(),
                            opcode: opcode_name(template.opcode),
                            description: template.description.clone(),
                        });
                        self.step = Some(InFlight::Command { handle, template });
                        Ok(())
                    }
                    Err(err @ (LinkError::Busy(_) | LinkError::UnacknowledgedFailure(_))) => {
                        debug!(%err, "link not ready, retrying next tick");
                        sequence.push_front(Subsequence::McuCommand(template));
                        Ok(())
                    }
                    Err(err) => {
                        warn!(%err, "send failed, aborting");
                        self.abort_requested = true;
                        self.emit(SchedulerEvent::TransportError {
                            message: err.to_string(),
                        });
                        Err(err.into())
                    }
                }
            }
            Some(Subsequence::Stopwatch(duration)) => {
                self.step = Some(InFlight::Stopwatch {
                    deadline: now + duration,
                });
                self.emit(SchedulerEvent::StopwatchStarted { duration });
                Ok(())
            }
            None => {
                if let Some(sequence) = self.current.take() {
                    info!(sequence = %sequence.label(), "sequence finished");
                    self.emit(SchedulerEvent::SequenceFinished {
                        name: sequence.name,
                        round: sequence.round,
                    });
                }
                Ok(())
            }
        }
    }

    fn emit(&mut self, event: SchedulerEvent) {
        if self.events.len() >= self.config.max_pending_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use fluidlink_frame::{opcode, DomainCode, ExecutionStatus, Payload};
    use fluidlink_link::{FailureKind, LinkConfig, LinkEngine, RetryCause, SimulatedDevice};

    use super::*;
    use crate::factory::{SequenceFactory, SequenceParams, SequenceTemplate};

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn fill_params(port: u32) -> SequenceParams {
        SequenceParams {
            name: Some(format!("Wash {port}")),
            fluidic_port: Some(port),
            flow_time_s: Some(10.0),
            incubation_time_min: Some(5.0),
            post_fluidic_port: Some(0),
            post_flow_time_s: Some(2.0),
            ..Default::default()
        }
    }

    fn selector(port: u32) -> Sequence {
        SequenceFactory::default()
            .build(
                SequenceTemplate::SetSelectorValve,
                &SequenceParams {
                    fluidic_port: Some(port),
                    ..Default::default()
                },
                1,
            )
            .unwrap()
    }

    fn simulated() -> (LinkEngine<SimulatedDevice>, SimulatedDevice) {
        let device = SimulatedDevice::new();
        (LinkEngine::new(device.clone()), device)
    }

    /// Tick and poll until the scheduler stops, advancing the clock by `step`.
    fn run_to_end(
        scheduler: &mut Scheduler,
        link: &mut LinkEngine<SimulatedDevice>,
        start: Instant,
        step: Duration,
    ) -> Vec<(Instant, SchedulerEvent)> {
        let mut now = start;
        let mut events = Vec::new();
        for _ in 0..10_000 {
            scheduler.tick_at(link, now).unwrap();
            link.poll().unwrap();
            events.extend(scheduler.drain_events().into_iter().map(|e| (now, e)));
            if !scheduler.is_running() {
                break;
            }
            now += step;
        }
        events
    }

    fn only_events(events: Vec<(Instant, SchedulerEvent)>) -> Vec<SchedulerEvent> {
        events.into_iter().map(|(_, e)| e).collect()
    }

    #[test]
    fn fill_incubate_drain_runs_in_order() {
        let (mut link, device) = simulated();
        let mut scheduler = Scheduler::new();
        scheduler.enqueue(
            SequenceFactory::default()
                .build(SequenceTemplate::FillIncubateDrain, &fill_params(3), 1)
                .unwrap(),
        );
        scheduler.start();

        let t0 = Instant::now();
        let events = run_to_end(&mut scheduler, &mut link, t0, secs(1));

        let started = events
            .iter()
            .find(|(_, e)| matches!(e, SchedulerEvent::StopwatchStarted { .. }))
            .map(|(t, _)| *t)
            .unwrap();
        let finished = events
            .iter()
            .find(|(_, e)| *e == SchedulerEvent::StopwatchFinished)
            .map(|(t, _)| *t)
            .unwrap();
        assert!(finished.duration_since(started) >= secs(300));

        let names: Vec<&'static str> = only_events(events)
            .iter()
            .map(|e| match e {
                SchedulerEvent::ExecutionStarted { .. } => "execution_started",
                SchedulerEvent::SequenceStarted { .. } => "sequence_started",
                SchedulerEvent::CommandSent { opcode, .. } => opcode,
                SchedulerEvent::CommandCompleted { .. } => "completed",
                SchedulerEvent::StopwatchStarted { .. } => "stopwatch_started",
                SchedulerEvent::StopwatchFinished => "stopwatch_finished",
                SchedulerEvent::SequenceFinished { .. } => "sequence_finished",
                SchedulerEvent::ExecutionFinished => "execution_finished",
                other => panic!("unexpected event: {other}"),
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "execution_started",
                "sequence_started",
                "ADD_MEDIUM",
                "completed",
                "EMPTY_FLUIDIC_LINE",
                "completed",
                "stopwatch_started",
                "stopwatch_finished",
                "REMOVE_MEDIUM",
                "completed",
                "sequence_finished",
                "execution_finished",
            ]
        );

        let executed: Vec<u8> = device.executed().iter().map(|f| f.opcode).collect();
        assert_eq!(
            executed,
            vec![
                opcode::ADD_MEDIUM,
                opcode::EMPTY_FLUIDIC_LINE,
                opcode::REMOVE_MEDIUM
            ]
        );
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.failed_commands(), 0);
    }

    #[test]
    fn not_running_is_a_no_op() {
        let (mut link, device) = simulated();
        let mut scheduler = Scheduler::new();
        scheduler.enqueue(selector(1));

        scheduler.tick(&mut link).unwrap();

        assert_eq!(device.writes_received(), 0);
        assert!(scheduler.drain_events().is_empty());
        assert_eq!(scheduler.queued_len(), 1);
    }

    #[test]
    fn abort_lets_in_flight_command_finish() {
        let (mut link, device) = simulated();
        let mut scheduler = Scheduler::new();
        scheduler.enqueue_all([selector(1), selector(2), selector(3)]);
        scheduler.start();
        let now = Instant::now();

        scheduler.tick_at(&mut link, now).unwrap();
        assert_eq!(device.writes_received(), 1);

        scheduler.request_abort();
        scheduler.tick_at(&mut link, now).unwrap();
        assert!(scheduler.is_running());
        assert_eq!(device.writes_received(), 1);

        link.poll().unwrap();
        scheduler.tick_at(&mut link, now).unwrap();

        let events = scheduler.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SchedulerEvent::CommandCompleted { .. })));
        let aborted = events
            .iter()
            .filter(|e| matches!(e, SchedulerEvent::SequenceAborted { .. }))
            .count();
        assert_eq!(aborted, 3);
        assert_eq!(events.last(), Some(&SchedulerEvent::AbortCompleted));
        assert!(!scheduler.is_running());
        assert_eq!(device.writes_received(), 1);
        assert_eq!(scheduler.queued_len(), 0);
    }

    #[test]
    fn abort_cuts_stopwatch_short() {
        let (mut link, _device) = simulated();
        let mut scheduler = Scheduler::new();
        scheduler.enqueue(Sequence::new(
            "wait",
            SequenceTemplate::FillIncubateDrain,
            SequenceParams::default(),
            [Subsequence::Stopwatch(secs(60))],
        ));
        scheduler.start();
        let t0 = Instant::now();

        scheduler.tick_at(&mut link, t0).unwrap();
        assert_eq!(scheduler.stopwatch_remaining(t0 + secs(20)), Some(secs(40)));

        scheduler.request_abort();
        scheduler.tick_at(&mut link, t0 + secs(20)).unwrap();

        let events = scheduler.drain_events();
        assert!(events.contains(&SchedulerEvent::StopwatchAborted {
            remaining: secs(40)
        }));
        assert_eq!(events.last(), Some(&SchedulerEvent::AbortCompleted));
        assert!(scheduler.stopwatch_remaining(t0 + secs(20)).is_none());
    }

    #[test]
    fn start_clears_previous_abort() {
        let (mut link, device) = simulated();
        let mut scheduler = Scheduler::new();
        scheduler.request_abort();
        scheduler.enqueue(selector(4));
        scheduler.start();

        let events = run_to_end(&mut scheduler, &mut link, Instant::now(), Duration::from_millis(50));

        assert!(only_events(events).contains(&SchedulerEvent::ExecutionFinished));
        assert_eq!(device.execution_count(), 1);
    }

    #[test]
    fn fatal_domain_error_aborts_queue() {
        let (mut link, device) = simulated();
        device.force_status(ExecutionStatus::Domain(DomainCode::EMPTYING_LINE_FAILED), 1);
        let mut scheduler = Scheduler::new();
        scheduler.enqueue_all([selector(1), selector(2)]);
        scheduler.start();

        let events = only_events(run_to_end(
            &mut scheduler,
            &mut link,
            Instant::now(),
            Duration::from_millis(50),
        ));

        assert!(events.iter().any(|e| matches!(
            e,
            SchedulerEvent::CommandFailed { fatal: true, .. }
        )));
        let aborted = events
            .iter()
            .filter(|e| matches!(e, SchedulerEvent::SequenceAborted { .. }))
            .count();
        assert_eq!(aborted, 2);
        assert_eq!(events.last(), Some(&SchedulerEvent::AbortCompleted));
        assert_eq!(device.writes_received(), 1);
        assert!(link.pending_failure().is_none());
    }

    #[test]
    fn rejected_command_aborts_only_its_sequence() {
        let (mut link, device) = simulated();
        device.force_status(ExecutionStatus::InvalidCommand, 1);
        let mut scheduler = Scheduler::new();
        scheduler.enqueue_all([selector(1), selector(2)]);
        scheduler.start();

        let events = only_events(run_to_end(
            &mut scheduler,
            &mut link,
            Instant::now(),
            Duration::from_millis(50),
        ));

        assert!(events.iter().any(|e| matches!(
            e,
            SchedulerEvent::SequenceAborted { round: 1, .. }
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, SchedulerEvent::SequenceFinished { .. })));
        assert_eq!(events.last(), Some(&SchedulerEvent::ExecutionFinished));
        assert_eq!(scheduler.failed_commands(), 1);
        assert_eq!(device.executed()[0].payload.p2, 2);
    }

    #[test]
    fn exhausted_checksum_retries_abort_only_sequence() {
        let device = SimulatedDevice::new();
        device.force_status(ExecutionStatus::ChecksumError, 4);
        let mut link = LinkEngine::with_config(
            device.clone(),
            LinkConfig::default()
                .with_max_retries(3)
                .with_retry_holdoff(Duration::ZERO),
        );
        let mut scheduler = Scheduler::new();
        scheduler.enqueue_all([selector(1), selector(2)]);
        scheduler.start();

        let events = only_events(run_to_end(
            &mut scheduler,
            &mut link,
            Instant::now(),
            Duration::from_millis(50),
        ));

        let failed = events
            .iter()
            .find_map(|e| match e {
                SchedulerEvent::CommandFailed {
                    retry_count,
                    fatal,
                    reason,
                    ..
                } => Some((*retry_count, *fatal, reason.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(failed.0, 3);
        assert!(!failed.1);
        assert_eq!(
            failed.2,
            FailureKind::RetriesExhausted {
                cause: RetryCause::Checksum
            }
            .to_string()
        );
        assert_eq!(events.last(), Some(&SchedulerEvent::ExecutionFinished));
        assert_eq!(device.executed().len(), 1);
        assert_eq!(device.writes_received(), 5);
    }

    #[test]
    fn preuse_check_results() {
        let (mut link, device) = simulated();
        let factory = SequenceFactory::default();
        let check = |port| {
            factory
                .build(
                    SequenceTemplate::PreuseCheckPressure,
                    &SequenceParams {
                        fluidic_port: Some(port),
                        ..Default::default()
                    },
                    1,
                )
                .unwrap()
        };
        device.force_status(ExecutionStatus::Domain(DomainCode::PREUSE_CHECK_FAILED), 1);
        let mut scheduler = Scheduler::new();
        scheduler.enqueue_all([check(1), check(2)]);
        scheduler.start();

        let events = only_events(run_to_end(
            &mut scheduler,
            &mut link,
            Instant::now(),
            Duration::from_millis(50),
        ));

        assert!(events.contains(&SchedulerEvent::PreuseCheckResult {
            port_name: "port 1".to_string(),
            passed: false
        }));
        assert!(events.contains(&SchedulerEvent::PreuseCheckResult {
            port_name: "port 2".to_string(),
            passed: true
        }));
        let finished = events
            .iter()
            .filter(|e| matches!(e, SchedulerEvent::SequenceFinished { .. }))
            .count();
        assert_eq!(finished, 2);
    }

    #[test]
    fn check_failure_outside_preuse_sequence_aborts_it() {
        let (mut link, device) = simulated();
        device.force_status(ExecutionStatus::Domain(DomainCode::PREUSE_CHECK_FAILED), 1);
        let mut scheduler = Scheduler::new();
        scheduler.enqueue_all([selector(1), selector(2)]);
        scheduler.start();

        let events = only_events(run_to_end(
            &mut scheduler,
            &mut link,
            Instant::now(),
            Duration::from_millis(50),
        ));

        assert!(!events
            .iter()
            .any(|e| matches!(e, SchedulerEvent::PreuseCheckResult { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            SchedulerEvent::SequenceAborted { round: 1, .. }
        )));
        assert_eq!(events.last(), Some(&SchedulerEvent::ExecutionFinished));
        assert_eq!(device.executed()[0].payload.p2, 2);
    }

    #[test]
    fn transport_error_on_send_aborts() {
        let (mut link, device) = simulated();
        device.fail_next_writes(1);
        let mut scheduler = Scheduler::new();
        scheduler.enqueue_all([selector(1), selector(2)]);
        scheduler.start();

        let err = scheduler.tick(&mut link).unwrap_err();
        assert!(matches!(err, crate::SchedulerError::Link(_)));
        assert!(scheduler.abort_requested());

        scheduler.tick(&mut link).unwrap();
        let events = scheduler.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SchedulerEvent::TransportError { .. })));
        assert_eq!(events.last(), Some(&SchedulerEvent::AbortCompleted));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(SchedulerEvent::StopwatchStarted {
            duration: Duration::from_millis(1500),
        })
        .unwrap();
        assert_eq!(json["event"], "stopwatch_started");
        assert_eq!(json["duration"], 1.5);
    }

    #[test]
    fn event_buffer_is_bounded() {
        let mut scheduler = Scheduler::with_config(SchedulerConfig {
            max_pending_events: 2,
        });
        let mut link = ScriptedLink::default();
        scheduler.enqueue_all([selector(1), selector(2)]);
        scheduler.start();
        scheduler.tick(&mut link).unwrap();

        let events = scheduler.drain_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], SchedulerEvent::CommandSent { .. }));
    }

    /// Link double that resolves commands only when told to.
    #[derive(Default)]
    struct ScriptedLink {
        sent: Vec<(u8, Payload)>,
        pending: Option<CommandHandle>,
        resolved: HashMap<CommandHandle, CommandStatus>,
        failure: Option<CommandFailure>,
        next_serial: u64,
        rejected_while_busy: usize,
    }

    impl ScriptedLink {
        fn complete(&mut self) {
            if let Some(handle) = self.pending.take() {
                self.resolved.insert(handle, CommandStatus::Acked);
            }
        }

        fn reject(&mut self) {
            if let Some(handle) = self.pending.take() {
                let failure = CommandFailure {
                    sequence_id: handle.sequence_id(),
                    opcode: self.sent.last().map(|(op, _)| *op).unwrap_or_default(),
                    kind: FailureKind::Rejected(ExecutionStatus::ExecutionError),
                    retry_count: 0,
                };
                self.resolved
                    .insert(handle, CommandStatus::Failed(failure.clone()));
                self.failure = Some(failure);
            }
        }
    }

    impl CommandLink for ScriptedLink {
        fn send(&mut self, opcode: u8, payload: Payload) -> fluidlink_link::Result<CommandHandle> {
            if let Some(failure) = &self.failure {
                return Err(LinkError::UnacknowledgedFailure(failure.clone()));
            }
            if let Some(handle) = self.pending {
                self.rejected_while_busy += 1;
                return Err(LinkError::Busy(handle.sequence_id()));
            }
            self.next_serial += 1;
            let handle = CommandHandle::new(self.next_serial as u16, self.next_serial);
            self.sent.push((opcode, payload));
            self.pending = Some(handle);
            Ok(handle)
        }

        fn status(&self, handle: CommandHandle) -> CommandStatus {
            if self.pending == Some(handle) {
                return CommandStatus::Pending;
            }
            self.resolved
                .get(&handle)
                .cloned()
                .unwrap_or(CommandStatus::Unknown)
        }

        fn acknowledge_error(&mut self) -> Option<CommandFailure> {
            self.failure.take()
        }

        fn is_busy(&self) -> bool {
            self.pending.is_some()
        }
    }

    #[test]
    fn busy_link_delays_send_without_losing_step() {
        let mut link = ScriptedLink {
            pending: Some(CommandHandle::new(99, 0)),
            next_serial: 1,
            ..Default::default()
        };
        let mut scheduler = Scheduler::new();
        scheduler.enqueue(selector(5));
        scheduler.start();

        scheduler.tick(&mut link).unwrap();
        assert!(link.sent.is_empty());
        assert_eq!(link.rejected_while_busy, 1);

        link.complete();
        scheduler.tick(&mut link).unwrap();
        assert_eq!(link.sent.len(), 1);
        assert_eq!(link.sent[0].1.p2, 5);
    }

    #[test]
    fn single_flight_under_random_interleaving() {
        let factory = SequenceFactory::default();
        let mut scheduler = Scheduler::new();
        let mut expected_commands = 0;
        for port in 1..=6 {
            let sequence = factory
                .build(SequenceTemplate::FillIncubateDrain, &fill_params(port), 1)
                .unwrap();
            expected_commands += sequence
                .steps()
                .filter(|s| matches!(s, Subsequence::McuCommand(_)))
                .count();
            scheduler.enqueue(sequence);
        }
        scheduler.start();

        let mut link = ScriptedLink::default();
        let mut now = Instant::now();
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut rejections = 0;
        for _ in 0..200_000 {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            match (seed >> 33) % 10 {
                0..=3 => scheduler.tick_at(&mut link, now).unwrap(),
                4..=6 => link.complete(),
                7 if rejections < 2 => {
                    link.reject();
                    rejections += 1;
                }
                _ => now += secs(30),
            }
            if !scheduler.is_running() {
                break;
            }
        }

        assert!(!scheduler.is_running());
        assert_eq!(link.rejected_while_busy, 0);
        assert!(link.sent.len() <= expected_commands);
        let events = scheduler.drain_events();
        assert_eq!(events.last(), Some(&SchedulerEvent::ExecutionFinished));
        let sent = events
            .iter()
            .filter(|e| matches!(e, SchedulerEvent::CommandSent { .. }))
            .count();
        assert_eq!(sent, link.sent.len());
    }
}
