use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fluidlink_link::{DeviceState, LinkConfig, LinkEngine, LinkError, PollReport, Transition};
use fluidlink_transport::Transport;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerEvent};
use crate::sequence::Sequence;

/// Configuration for a [`Controller`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interval between reads of the controller's status frames.
    pub poll_interval: Duration,
    /// Interval between scheduler ticks.
    pub tick_interval: Duration,
    pub link: LinkConfig,
    pub scheduler: SchedulerConfig,
    /// Send the start-up `CLEAR` before the loops begin.
    pub initialize: bool,
    /// Emit [`ControllerEvent::Telemetry`] for every status frame, not only
    /// when the mirrored state changes.
    pub report_every_frame: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            tick_interval: Duration::from_millis(50),
            link: LinkConfig::default(),
            scheduler: SchedulerConfig::default(),
            initialize: true,
            report_every_frame: false,
        }
    }
}

/// Event streamed from the controller's background loops.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Scheduler(SchedulerEvent),
    /// The mirrored device state changed, or a frame arrived when
    /// `report_every_frame` is set.
    Telemetry(DeviceState),
    Link(Transition),
}

/// Owns a link engine and a scheduler and drives both from background
/// threads.
///
/// The reader thread polls the engine every `poll_interval`; the tick thread
/// advances the scheduler every `tick_interval`. Both only hold a lock for
/// the duration of one poll or tick. The tick thread takes the scheduler
/// lock before the engine lock.
///
/// The event channel holds at most `scheduler.max_pending_events` events.
/// When it is full, telemetry and link transitions are dropped and scheduler
/// events wait in the scheduler's own bounded buffer. Both loops exit once
/// the receiver is gone.
pub struct Controller<T: Transport + 'static> {
    engine: Arc<Mutex<LinkEngine<T>>>,
    scheduler: Arc<Mutex<Scheduler>>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    events: Receiver<ControllerEvent>,
}

impl<T: Transport + 'static> Controller<T> {
    /// Build the engine over `transport` and start both loops.
    pub fn spawn(transport: T, config: ControllerConfig) -> Result<Self> {
        let mut engine = LinkEngine::with_config(transport, config.link.clone());
        if config.initialize {
            engine.initialize()?;
        }

        let engine = Arc::new(Mutex::new(engine));
        let scheduler = Arc::new(Mutex::new(Scheduler::with_config(config.scheduler.clone())));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, events) = mpsc::sync_channel(config.scheduler.max_pending_events.max(1));

        let mut controller = Self {
            engine,
            scheduler,
            stop,
            threads: Vec::with_capacity(2),
            events,
        };

        let reader = {
            let engine = Arc::clone(&controller.engine);
            let stop = Arc::clone(&controller.stop);
            let tx = tx.clone();
            let interval = config.poll_interval;
            let every_frame = config.report_every_frame;
            thread::Builder::new()
                .name("fluidlink-reader".to_string())
                .spawn(move || reader_loop(&engine, &stop, &tx, interval, every_frame))?
        };
        controller.threads.push(reader);

        let ticker = {
            let engine = Arc::clone(&controller.engine);
            let scheduler = Arc::clone(&controller.scheduler);
            let stop = Arc::clone(&controller.stop);
            let interval = config.tick_interval;
            thread::Builder::new()
                .name("fluidlink-scheduler".to_string())
                .spawn(move || tick_loop(&scheduler, &engine, &stop, &tx, interval))?
        };
        controller.threads.push(ticker);

        info!(
            poll_interval = ?config.poll_interval,
            tick_interval = ?config.tick_interval,
            "controller started"
        );
        Ok(controller)
    }

    pub fn enqueue(&self, sequence: Sequence) -> Result<()> {
        self.scheduler()?.enqueue(sequence);
        Ok(())
    }

    pub fn enqueue_all(&self, sequences: impl IntoIterator<Item = Sequence>) -> Result<()> {
        self.scheduler()?.enqueue_all(sequences);
        Ok(())
    }

    /// Begin executing the queue.
    pub fn start(&self) -> Result<()> {
        self.scheduler()?.start();
        Ok(())
    }

    /// Ask the scheduler to stop after the step in flight.
    pub fn request_abort(&self) -> Result<()> {
        self.scheduler()?.request_abort();
        Ok(())
    }

    pub fn is_running(&self) -> Result<bool> {
        Ok(self.scheduler()?.is_running())
    }

    /// Latest mirrored device state.
    pub fn telemetry(&self) -> Result<DeviceState> {
        let engine = self
            .engine
            .lock()
            .map_err(|err| LinkError::Poisoned(err.to_string()))?;
        Ok(*engine.device_state())
    }

    /// Events from both loops, in the order they were produced per loop.
    pub fn events(&self) -> &Receiver<ControllerEvent> {
        &self.events
    }

    /// Stop both loops and wait for them to exit.
    pub fn shutdown(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.stop.store(true, Ordering::Release);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("controller thread panicked");
            }
        }
        info!("controller stopped");
    }

    fn scheduler(&self) -> Result<MutexGuard<'_, Scheduler>> {
        self.scheduler
            .lock()
            .map_err(|err| SchedulerError::Poisoned(err.to_string()))
    }
}

impl<T: Transport + 'static> Drop for Controller<T> {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

impl<T: Transport + 'static> std::fmt::Debug for Controller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("threads", &self.threads.len())
            .field("stopped", &self.stop.load(Ordering::Acquire))
            .finish()
    }
}

/// Outcome of offering an event to the channel.
enum Offer {
    Sent,
    Full(ControllerEvent),
    Disconnected,
}

fn offer(tx: &SyncSender<ControllerEvent>, event: ControllerEvent) -> Offer {
    match tx.try_send(event) {
        Ok(()) => Offer::Sent,
        Err(TrySendError::Full(event)) => Offer::Full(event),
        Err(TrySendError::Disconnected(_)) => Offer::Disconnected,
    }
}

fn reader_loop<T: Transport>(
    engine: &Mutex<LinkEngine<T>>,
    stop: &AtomicBool,
    tx: &SyncSender<ControllerEvent>,
    interval: Duration,
    every_frame: bool,
) {
    let mut last = DeviceState::default();
    while !stop.load(Ordering::Acquire) {
        let polled = match engine.lock() {
            Ok(mut engine) => engine.poll().map(|report| (report, *engine.device_state())),
            Err(_) => {
                error!("link engine lock poisoned, reader exiting");
                return;
            }
        };

        match polled {
            Ok((report, state)) => {
                let mut pending = Vec::with_capacity(2);
                let mut fresh = false;
                if let Some(PollReport {
                    response,
                    transition,
                }) = report
                {
                    fresh = response.is_some();
                    if let Some(transition) = transition {
                        pending.push(ControllerEvent::Link(transition));
                    }
                }
                if state.is_populated() && (state != last || (every_frame && fresh)) {
                    last = state;
                    pending.push(ControllerEvent::Telemetry(state));
                }
                for event in pending {
                    match offer(tx, event) {
                        Offer::Sent => {}
                        Offer::Full(event) => debug!(?event, "event channel full, dropping"),
                        Offer::Disconnected => {
                            info!("event receiver dropped, reader exiting");
                            return;
                        }
                    }
                }
            }
            Err(err) => warn!(%err, "poll failed"),
        }

        thread::sleep(interval);
    }
    debug!("reader loop exited");
}

fn tick_loop<T: Transport>(
    scheduler: &Mutex<Scheduler>,
    engine: &Mutex<LinkEngine<T>>,
    stop: &AtomicBool,
    tx: &SyncSender<ControllerEvent>,
    interval: Duration,
) {
    let mut backlog: VecDeque<ControllerEvent> = VecDeque::new();
    while !stop.load(Ordering::Acquire) {
        {
            let (Ok(mut scheduler), Ok(mut engine)) = (scheduler.lock(), engine.lock()) else {
                error!("controller lock poisoned, scheduler loop exiting");
                return;
            };
            if let Err(err) = scheduler.tick(&mut *engine) {
                warn!(%err, "scheduler tick failed");
            }
            // Events stay in the scheduler until the channel has taken the last batch.
            if backlog.is_empty() {
                backlog.extend(scheduler.drain_events().into_iter().map(ControllerEvent::Scheduler));
            }
        }

        while let Some(event) = backlog.pop_front() {
            match offer(tx, event) {
                Offer::Sent => {}
                Offer::Full(event) => {
                    debug!(backlog = backlog.len() + 1, "event channel full, holding scheduler events");
                    backlog.push_front(event);
                    break;
                }
                Offer::Disconnected => {
                    info!("event receiver dropped, scheduler loop exiting");
                    return;
                }
            }
        }

        thread::sleep(interval);
    }
    debug!("scheduler loop exited");
}
