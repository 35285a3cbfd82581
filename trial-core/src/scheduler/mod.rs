#![allow(clippy::module_name_repetitions)]

//! Scheduling policies that decide the next trial's parameters.
//!
//! A policy is a pure function of a [`SchedulerContext`] and an injected
//! random source. Policies never write to the device and keep no state
//! between calls, so the [`Schedule`] can swap them mid-session purely on
//! the length of the history.

pub mod bootstrap;
pub mod catalog;
pub mod forced_alternation;

use core::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;
use crate::history::TrialHistory;
use crate::protocol::{ParamName, ParameterSet, Side};

pub use catalog::{TrialCatalog, TrialType};

/// Inter-trial interval range the rigs were run with, in milliseconds.
pub const DEFAULT_ITI_MS: (u32, u32) = (0, 10_000);

/// Trials run under the session starter before [`Schedule::auto`] hands off.
pub const AUTO_HANDOFF_AFTER: usize = 8;

/// Half-open millisecond range the inter-trial interval is drawn from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ItiRange {
    min: u32,
    max: u32,
}

impl ItiRange {
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidItiRange`] when the range is empty.
    pub fn new(min: u32, max: u32) -> Result<Self, ScheduleError> {
        if min >= max {
            return Err(ScheduleError::InvalidItiRange { min, max });
        }
        Ok(Self { min, max })
    }

    #[must_use]
    pub const fn min(self) -> u32 {
        self.min
    }

    #[must_use]
    pub const fn max(self) -> u32 {
        self.max
    }

    #[must_use]
    pub fn contains(self, value: i64) -> bool {
        (i64::from(self.min)..i64::from(self.max)).contains(&value)
    }

    pub fn sample<R>(self, rng: &mut R) -> i64
    where
        R: Rng + ?Sized,
    {
        i64::from(rng.random_range(self.min..self.max))
    }
}

impl Default for ItiRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_ITI_MS.0,
            max: DEFAULT_ITI_MS.1,
        }
    }
}

/// Static configuration shared by every policy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SchedulerConfig {
    pub catalog: TrialCatalog,
    pub iti: ItiRange,
    /// Side forced on trial 1, when the history is too short to alternate.
    pub default_side: Option<Side>,
    /// Mirror servo positions for rigs mounted in reverse.
    pub reverse_positions: bool,
}

impl SchedulerConfig {
    #[must_use]
    pub fn new(catalog: TrialCatalog) -> Self {
        Self {
            catalog,
            iti: ItiRange::default(),
            default_side: Some(Side::Left),
            reverse_positions: false,
        }
    }
}

/// Everything a policy may look at when deciding the next trial.
#[derive(Copy, Clone, Debug)]
pub struct SchedulerContext<'a> {
    pub history: &'a TrialHistory,
    pub config: &'a SchedulerConfig,
    pub policy: PolicyKind,
}

impl SchedulerContext<'_> {
    #[must_use]
    pub fn forced_alternation(&self) -> bool {
        self.policy == PolicyKind::ForcedAlternation
    }

    #[must_use]
    pub fn reverse_positions(&self) -> bool {
        self.config.reverse_positions
    }
}

/// Closed set of scheduling policies.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Uniform draw from the whole catalog on every trial.
    SessionStarter,
    /// Alternate after a correct choice, repeat the side after a miss.
    ForcedAlternation,
}

impl PolicyKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            PolicyKind::SessionStarter => "session-starter",
            PolicyKind::ForcedAlternation => "forced-alternation",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs the policy named in `ctx` for the trial after the last one in its
/// history.
///
/// # Errors
///
/// Returns a [`ScheduleError`] when the catalog cannot supply a trial for
/// the side the policy settled on.
pub fn next_parameters<R>(
    ctx: &SchedulerContext<'_>,
    rng: &mut R,
) -> Result<ParameterSet, ScheduleError>
where
    R: Rng + ?Sized,
{
    match ctx.policy {
        PolicyKind::SessionStarter => bootstrap::next_parameters(ctx, rng),
        PolicyKind::ForcedAlternation => forced_alternation::next_parameters(ctx, rng),
    }
}

/// Switch to another policy once the history grows past a threshold.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub after_trials: usize,
    pub to: PolicyKind,
}

/// Picks the active policy from the number of trials run so far.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub initial: PolicyKind,
    #[serde(default)]
    pub handoff: Option<Handoff>,
}

impl Schedule {
    /// Runs a single policy for the whole session.
    #[must_use]
    pub const fn fixed(policy: PolicyKind) -> Self {
        Self {
            initial: policy,
            handoff: None,
        }
    }

    /// Session starter until more than eight trials exist, then forced
    /// alternation.
    #[must_use]
    pub const fn auto() -> Self {
        Self {
            initial: PolicyKind::SessionStarter,
            handoff: Some(Handoff {
                after_trials: AUTO_HANDOFF_AFTER,
                to: PolicyKind::ForcedAlternation,
            }),
        }
    }

    #[must_use]
    pub fn policy_for(&self, trials: usize) -> PolicyKind {
        match self.handoff {
            Some(handoff) if trials > handoff.after_trials => handoff.to,
            _ => self.initial,
        }
    }

    #[must_use]
    pub fn context<'a>(
        &self,
        history: &'a TrialHistory,
        config: &'a SchedulerConfig,
    ) -> SchedulerContext<'a> {
        SchedulerContext {
            history,
            config,
            policy: self.policy_for(history.len()),
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::auto()
    }
}

/// Parameters for one trial of `trial_type`, in wire order.
pub(crate) fn trial_parameters<R>(
    trial_type: &TrialType,
    config: &SchedulerConfig,
    rng: &mut R,
) -> Result<ParameterSet, ScheduleError>
where
    R: Rng + ?Sized,
{
    let mut params = ParameterSet::new();
    params.insert(ParamName::RewardSide, trial_type.rewside.code())?;
    if let Some(stppos) = trial_type.stppos {
        params.insert(ParamName::StepperPosition, stppos)?;
    }
    if let Some(srvpos) = trial_type.srvpos {
        let srvpos = if config.reverse_positions {
            config.catalog.mirror_servo(srvpos)
        } else {
            srvpos
        };
        params.insert(ParamName::ServoPosition, srvpos)?;
    }
    params.insert(ParamName::InterTrialInterval, config.iti.sample(rng))?;
    Ok(params)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Catalog used by the rigs' two-position sessions.
    pub fn two_position_catalog() -> TrialCatalog {
        let entry = |name: &str, rewside, srvpos, stppos| TrialType {
            name: name.to_string(),
            rewside,
            stppos: Some(stppos),
            srvpos: Some(srvpos),
        };
        TrialCatalog::new(vec![
            entry("CV-L-1150-050", Side::Left, 1150, 50),
            entry("CC-R-1150-150", Side::Right, 1150, 150),
            entry("CV-L-1175-050", Side::Left, 1175, 50),
            entry("CC-R-1175-150", Side::Right, 1175, 150),
        ])
        .expect("static catalog is valid")
    }
}
