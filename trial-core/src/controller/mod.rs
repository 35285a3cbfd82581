#![allow(clippy::module_name_repetitions)]

//! Polling loop that ties the channel, log, and orchestrator together.
//!
//! One cycle drains the channel, re-parses the whole log, reconstructs the
//! history, steps the orchestrator, executes its plan, and finally publishes
//! the history to observers when it changed. The bounded drain is the only
//! place the loop waits.

use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use rand::Rng;
use tracing::{debug, error, info, trace, warn};

use crate::error::{ControllerError, OrchestratorError, ProtocolViolation, TransportError};
use crate::history::{self, TrialHistory};
use crate::orchestrator::{Pacer, ReleaseOrchestrator, ReleasePhase, ReleaseState};
use crate::scheduler::PolicyKind;
use crate::trialspeak;

/// Drain timeout the rigs were run with.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Line-oriented link to the device.
pub trait CommandChannel {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Writes one encoded command.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when the command could not be sent.
    fn write(&mut self, command: &str) -> Result<(), Self::Error>;

    /// Returns whatever bytes arrived, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when reading failed. A timeout with no
    /// data is not an error.
    fn drain_available(&mut self, timeout: Duration) -> Result<Vec<u8>, Self::Error>;

    /// # Errors
    ///
    /// Returns the transport's error when flushing or closing failed.
    fn close(&mut self) -> Result<(), Self::Error>;
}

fn transport<E>(error: E) -> ControllerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ControllerError::Transport(TransportError::from(error))
}

/// Cloneable flag an interrupt handler sets to end the session.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControllerConfig {
    /// How long each cycle waits for new device output.
    pub poll_interval: Duration,
    /// Hold the first release until the device has written something.
    pub wait_for_boot: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_for_boot: true,
        }
    }
}

/// Consumer of history snapshots.
///
/// Called at most once per cycle and only when the history changed.
/// Implementations must return promptly.
pub trait HistoryObserver {
    fn on_history_updated(&mut self, history: Arc<TrialHistory>);
}

/// Forwards snapshots over a bounded channel without ever blocking.
///
/// When the consumer is behind, the newest snapshot is dropped; the next
/// change publishes a complete history again.
#[derive(Debug)]
pub struct ChannelObserver {
    sender: SyncSender<Arc<TrialHistory>>,
    dropped: usize,
}

impl ChannelObserver {
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<Arc<TrialHistory>>) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        (Self { sender, dropped: 0 }, receiver)
    }

    /// Snapshots discarded because the consumer was behind.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl HistoryObserver for ChannelObserver {
    fn on_history_updated(&mut self, history: Arc<TrialHistory>) {
        match self.sender.try_send(history) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                trace!(dropped = self.dropped, "observer behind, snapshot dropped");
            }
        }
    }
}

/// What a single cycle did.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CycleReport {
    pub drained_bytes: usize,
    pub history_changed: bool,
    /// Release phase, unless the loop is still waiting for the device to boot.
    pub phase: Option<ReleasePhase>,
    /// Trial released this cycle.
    pub released: Option<usize>,
}

/// Trial lifecycle controller for one session.
pub struct Controller<C, R, P> {
    channel: C,
    orchestrator: ReleaseOrchestrator,
    rng: R,
    pacer: P,
    config: ControllerConfig,
    stop: StopSignal,
    observers: Vec<Box<dyn HistoryObserver>>,
    log: Vec<u8>,
    history: Arc<TrialHistory>,
    state: ReleaseState,
    active_policy: Option<PolicyKind>,
    malformed_lines: usize,
    reported_errors: usize,
    halted: Option<ProtocolViolation>,
    closed: bool,
}

impl<C, R, P> Controller<C, R, P>
where
    C: CommandChannel,
    R: Rng,
    P: Pacer,
{
    #[must_use]
    pub fn new(channel: C, orchestrator: ReleaseOrchestrator, rng: R, pacer: P) -> Self {
        Self {
            channel,
            orchestrator,
            rng,
            pacer,
            config: ControllerConfig::default(),
            stop: StopSignal::new(),
            observers: Vec::new(),
            log: Vec::new(),
            history: Arc::new(TrialHistory::default()),
            state: ReleaseState::fresh(),
            active_policy: None,
            malformed_lines: 0,
            reported_errors: 0,
            halted: None,
            closed: false,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Starts from a known release state instead of a fresh one.
    #[must_use]
    pub fn with_release_state(mut self, state: ReleaseState) -> Self {
        self.state = state;
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn HistoryObserver>) {
        self.observers.push(observer);
    }

    /// Continues a session from the device log it wrote so far.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Log`] when the saved log cannot be
    /// reconstructed.
    pub fn resume(mut self, prior_log: Vec<u8>) -> Result<Self, ControllerError> {
        let parsed = trialspeak::parse(&prior_log);
        let history = history::reconstruct(&parsed.records)?;

        self.state = ReleaseState::recover(&history);
        self.active_policy = Some(self.orchestrator.schedule().policy_for(history.len()));
        self.malformed_lines = parsed.malformed_lines;
        self.reported_errors = history.device_errors().count();
        self.history = Arc::new(history);
        self.log = prior_log;

        info!(
            trials = self.history.len(),
            last_released = self.state.last_released,
            "resumed session from saved log"
        );
        Ok(self)
    }

    #[must_use]
    pub fn history(&self) -> &Arc<TrialHistory> {
        &self.history
    }

    #[must_use]
    pub fn state(&self) -> ReleaseState {
        self.state
    }

    /// Every byte received from the device this session.
    #[must_use]
    pub fn log(&self) -> &[u8] {
        &self.log
    }

    #[must_use]
    pub fn channel(&self) -> &C {
        &self.channel
    }

    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Violation that halted the controller, if any.
    #[must_use]
    pub fn halted(&self) -> Option<ProtocolViolation> {
        self.halted
    }

    /// Runs one poll cycle.
    ///
    /// Observers see a changed history even when the cycle then fails.
    ///
    /// # Errors
    ///
    /// Returns the [`ControllerError`] that ends the session. A halted
    /// controller refuses to run and writes nothing.
    pub fn poll_once(&mut self) -> Result<CycleReport, ControllerError> {
        if let Some(violation) = self.halted {
            return Err(ControllerError::Protocol(violation));
        }

        let drained = self
            .channel
            .drain_available(self.config.poll_interval)
            .map_err(transport)?;
        self.log.extend_from_slice(&drained);

        let parsed = trialspeak::parse(&self.log);
        if parsed.malformed_lines > self.malformed_lines {
            warn!(
                total = parsed.malformed_lines,
                "skipped malformed device log lines"
            );
            self.malformed_lines = parsed.malformed_lines;
        }

        let history = history::reconstruct(&parsed.records)?;
        let history_changed = history != *self.history;
        if history_changed {
            self.history = Arc::new(history);
            self.report_device_errors();
        }

        let mut report = CycleReport {
            drained_bytes: drained.len(),
            history_changed,
            ..CycleReport::default()
        };

        let advanced = if self.config.wait_for_boot && !self.history.device_booted() {
            trace!("waiting for device output");
            Ok(())
        } else {
            self.advance(&mut report)
        };

        if history_changed {
            for observer in &mut self.observers {
                observer.on_history_updated(Arc::clone(&self.history));
            }
        }

        advanced.map(|()| report)
    }

    fn advance(&mut self, report: &mut CycleReport) -> Result<(), ControllerError> {
        let decision = match self.orchestrator.step(self.state, &self.history, &mut self.rng) {
            Ok(decision) => decision,
            Err(OrchestratorError::Protocol(violation)) => {
                error!(%violation, "release protocol violated, halting");
                self.halted = Some(violation);
                return Err(ControllerError::Protocol(violation));
            }
            Err(other) => return Err(other.into()),
        };
        report.phase = Some(decision.phase);

        if let Some(policy) = decision.policy {
            self.note_policy(policy);
        }

        if let Some(plan) = &decision.plan {
            if let Err(error) = plan.execute(&mut self.channel, &mut self.pacer) {
                warn!(trial = plan.trial(), "release plan abandoned after write failure");
                return Err(transport(error));
            }
            info!(trial = plan.trial(), phase = %decision.phase, "released trial");
            report.released = Some(plan.trial());
        }

        self.state = decision.next_state;
        Ok(())
    }

    fn note_policy(&mut self, policy: PolicyKind) {
        match self.active_policy.replace(policy) {
            Some(previous) if previous != policy => info!(
                from = %previous,
                to = %policy,
                trials = self.history.len(),
                "scheduling policy hand-off"
            ),
            None => debug!(%policy, "scheduling policy selected"),
            Some(_) => {}
        }
    }

    fn report_device_errors(&mut self) {
        let mut seen = 0;
        for message in self.history.device_errors().skip(self.reported_errors) {
            warn!(detail = message, "device reported error");
            seen += 1;
        }
        self.reported_errors += seen;
    }

    /// Polls until stopped or a fatal error, then closes the channel.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error, or the close failure when the loop
    /// itself ended cleanly.
    pub fn run(&mut self) -> Result<(), ControllerError> {
        let outcome = loop {
            if self.stop.is_requested() {
                info!(trials = self.history.len(), "stop requested");
                break Ok(());
            }
            if let Err(error) = self.poll_once() {
                break Err(error);
            }
        };

        let closed = self.shutdown();
        match (outcome, closed) {
            (Err(error), Err(close_error)) => {
                warn!(%close_error, "closing channel after failure also failed");
                Err(error)
            }
            (Err(error), Ok(())) | (Ok(()), Err(error)) => Err(error),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Closes the channel. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Transport`] when closing failed.
    pub fn shutdown(&mut self) -> Result<(), ControllerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.channel.close().map_err(transport)
    }
}
