#![allow(clippy::module_name_repetitions)]

//! Release orchestration for the trial lifecycle.
//!
//! Each poll cycle the controller hands the orchestrator the freshly
//! reconstructed [`TrialHistory`] together with the [`ReleaseState`] it
//! returned on the previous cycle. The orchestrator classifies the pair into
//! a [`ReleasePhase`] and, when the phase calls for it, asks the active
//! scheduling policy for the next trial and packages the resulting commands
//! into a [`ReleasePlan`]. Nothing here touches the channel until the caller
//! executes the plan, and the returned state is only meant to be adopted once
//! that execution succeeded.
//!
//! The release state is the host's own commitment record: the index of the
//! last trial it released. The device's log is the only other source of
//! truth, and at most one trial may ever be released without having begun.

use core::{fmt, time::Duration};

use rand::Rng;
use tracing::debug;

use crate::controller::CommandChannel;
use crate::error::{OrchestratorError, ProtocolViolation};
use crate::history::TrialHistory;
use crate::protocol::{HostCommand, ParameterSet};
use crate::scheduler::{self, PolicyKind, Schedule, SchedulerConfig};

/// Pause after each trial parameter write.
pub const PARAMETER_SETTLE: Duration = Duration::from_secs(1);

/// Pause after each session-level parameter written at boot.
pub const BOOT_PARAMETER_SETTLE: Duration = Duration::from_millis(500);

/// Host-side record of what has been released so far.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReleaseState {
    /// Index of the last released trial, `-1` before the first release.
    pub last_released: i64,
    /// Whether the session-level boot parameters were already written.
    pub boot_params_sent: bool,
}

impl ReleaseState {
    /// State of a session that has not released anything.
    #[must_use]
    pub const fn fresh() -> Self {
        Self {
            last_released: -1,
            boot_params_sent: false,
        }
    }

    /// Derives the release state of a session resumed from its saved log.
    ///
    /// A trial whose release the device already acknowledged is counted as
    /// released, so it is never released a second time.
    #[must_use]
    pub fn recover(history: &TrialHistory) -> Self {
        let current = history.current_index();
        let pending = history.pending_release().is_some();
        Self {
            last_released: if pending { current + 1 } else { current },
            boot_params_sent: pending || !history.is_empty(),
        }
    }

    /// Released trials the device has not begun yet.
    #[must_use]
    pub fn outstanding(&self, history: &TrialHistory) -> i64 {
        self.last_released - history.current_index()
    }
}

impl Default for ReleaseState {
    fn default() -> Self {
        Self::fresh()
    }
}

/// Relationship between the release state and the reconstructed history.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReleasePhase {
    /// Nothing released and nothing run: release trial 0.
    NothingReleasedYet,
    /// The current trial is running; wait.
    CurrentIncomplete,
    /// The current trial has an outcome; release the next one.
    CurrentCompleteNeedNext,
    /// The next trial is released but the device has not started it.
    NextAlreadyReleased,
}

impl ReleasePhase {
    /// Returns `true` when the phase issues a release.
    #[must_use]
    pub const fn releases(self) -> bool {
        matches!(
            self,
            ReleasePhase::NothingReleasedYet | ReleasePhase::CurrentCompleteNeedNext
        )
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ReleasePhase::NothingReleasedYet => "NOTHING_RELEASED_YET",
            ReleasePhase::CurrentIncomplete => "CURRENT_INCOMPLETE",
            ReleasePhase::CurrentCompleteNeedNext => "CURRENT_COMPLETE_NEED_NEXT",
            ReleasePhase::NextAlreadyReleased => "NEXT_ALREADY_RELEASED",
        }
    }
}

impl fmt::Display for ReleasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classifies the release state against the history.
///
/// # Errors
///
/// Any relationship outside `last_released - current ∈ {0, 1}` is a
/// [`ProtocolViolation`], as is a release acknowledgement in the log that
/// the host never issued.
pub fn classify(
    state: &ReleaseState,
    history: &TrialHistory,
) -> Result<ReleasePhase, ProtocolViolation> {
    let current = history.current_index();
    let last_released = state.last_released;

    if last_released < current {
        return Err(ProtocolViolation::UnreleasedTrialRan {
            last_released,
            current,
        });
    }
    if last_released > current + 1 {
        return Err(ProtocolViolation::TooManyReleased {
            last_released,
            current,
        });
    }
    if last_released == current + 1 {
        return Ok(ReleasePhase::NextAlreadyReleased);
    }
    if history.pending_release().is_some() {
        return Err(ProtocolViolation::UnexpectedReleaseAck { current });
    }

    Ok(match history.current() {
        None => ReleasePhase::NothingReleasedYet,
        Some(trial) if trial.is_complete() => ReleasePhase::CurrentCompleteNeedNext,
        Some(_) => ReleasePhase::CurrentIncomplete,
    })
}

/// Delays applied between command writes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReleaseTiming {
    pub parameter_settle: Duration,
    pub boot_parameter_settle: Duration,
}

impl Default for ReleaseTiming {
    fn default() -> Self {
        Self {
            parameter_settle: PARAMETER_SETTLE,
            boot_parameter_settle: BOOT_PARAMETER_SETTLE,
        }
    }
}

/// Single command of a plan and the pause that follows it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PlanStep {
    pub command: HostCommand,
    pub settle: Duration,
}

/// Waits out the settle delay after each write.
pub trait Pacer {
    fn pause(&mut self, settle: Duration);
}

/// Pacer that blocks the calling thread.
#[derive(Copy, Clone, Debug, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&mut self, settle: Duration) {
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
    }
}

/// Pacer that never waits.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoPacer;

impl Pacer for NoPacer {
    fn pause(&mut self, _: Duration) {}
}

/// Ordered command sequence that releases exactly one trial.
///
/// Parameters always precede the release, and the release is always the
/// final step. A plan abandoned part-way therefore never releases.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleasePlan {
    trial: usize,
    steps: Vec<PlanStep>,
}

impl ReleasePlan {
    fn build(
        trial: usize,
        boot_params: Option<&ParameterSet>,
        params: &ParameterSet,
        timing: &ReleaseTiming,
    ) -> Self {
        let boot = boot_params
            .into_iter()
            .flat_map(ParameterSet::commands)
            .map(|command| PlanStep {
                command,
                settle: timing.boot_parameter_settle,
            });
        let trial_params = params.commands().map(|command| PlanStep {
            command,
            settle: timing.parameter_settle,
        });
        let release = PlanStep {
            command: HostCommand::ReleaseTrial,
            settle: Duration::ZERO,
        };

        Self {
            trial,
            steps: boot.chain(trial_params).chain([release]).collect(),
        }
    }

    /// Index of the trial this plan releases.
    #[must_use]
    pub const fn trial(&self) -> usize {
        self.trial
    }

    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn commands(&self) -> impl Iterator<Item = HostCommand> + '_ {
        self.steps.iter().map(|step| step.command)
    }

    /// Writes every step to `channel`, pausing after each.
    ///
    /// # Errors
    ///
    /// Stops at the first failed write and returns its error; the remaining
    /// steps, including the release, are never written.
    pub fn execute<C, P>(&self, channel: &mut C, pacer: &mut P) -> Result<(), C::Error>
    where
        C: CommandChannel + ?Sized,
        P: Pacer + ?Sized,
    {
        for step in &self.steps {
            debug!(trial = self.trial, command = %step.command, "writing command");
            channel.write(&step.command.encode())?;
            pacer.pause(step.settle);
        }
        Ok(())
    }
}

/// Outcome of one orchestrator step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decision {
    pub phase: ReleasePhase,
    /// Policy consulted for the plan, when one was built.
    pub policy: Option<PolicyKind>,
    pub plan: Option<ReleasePlan>,
    /// State to adopt once the plan (if any) has been executed.
    pub next_state: ReleaseState,
}

/// Drives the release protocol from history and release state.
#[derive(Clone, Debug)]
pub struct ReleaseOrchestrator {
    schedule: Schedule,
    config: SchedulerConfig,
    boot_params: ParameterSet,
    timing: ReleaseTiming,
}

impl ReleaseOrchestrator {
    #[must_use]
    pub fn new(schedule: Schedule, config: SchedulerConfig) -> Self {
        Self {
            schedule,
            config,
            boot_params: ParameterSet::new(),
            timing: ReleaseTiming::default(),
        }
    }

    /// Session-level parameters written once, ahead of the first release.
    #[must_use]
    pub fn with_boot_params(mut self, boot_params: ParameterSet) -> Self {
        self.boot_params = boot_params;
        self
    }

    #[must_use]
    pub fn with_timing(mut self, timing: ReleaseTiming) -> Self {
        self.timing = timing;
        self
    }

    #[must_use]
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Decides this cycle's action.
    ///
    /// The scheduling policy is only consulted in the two releasing phases.
    /// `state` is never modified; the caller adopts
    /// [`Decision::next_state`] after the plan has been written.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Protocol`] when the state and history
    /// disagree, and [`OrchestratorError::Schedule`] when the policy cannot
    /// produce the next trial.
    pub fn step<R>(
        &self,
        state: ReleaseState,
        history: &TrialHistory,
        rng: &mut R,
    ) -> Result<Decision, OrchestratorError>
    where
        R: Rng + ?Sized,
    {
        let phase = classify(&state, history)?;
        if !phase.releases() {
            return Ok(Decision {
                phase,
                policy: None,
                plan: None,
                next_state: state,
            });
        }

        let ctx = self.schedule.context(history, &self.config);
        let params = scheduler::next_parameters(&ctx, rng)?;
        let boot_params = (!state.boot_params_sent).then_some(&self.boot_params);
        let plan = ReleasePlan::build(history.len(), boot_params, &params, &self.timing);

        Ok(Decision {
            phase,
            policy: Some(ctx.policy),
            plan: Some(plan),
            next_state: ReleaseState {
                last_released: state.last_released + 1,
                boot_params_sent: true,
            },
        })
    }
}
