//! Forced alternation.
//!
//! A correct choice on the previous trial moves the reward to the opposite
//! side; anything else repeats the side as a correction trial. The first
//! trial falls back to the session starter's uniform draw.

use rand::Rng;

use super::{SchedulerContext, bootstrap, trial_parameters};
use crate::error::ScheduleError;
use crate::history::TrialHistory;
use crate::protocol::{ParameterSet, Side};

/// # Errors
///
/// Returns [`ScheduleError::NoTrialTypeForSide`] when the catalog has no
/// entry for the forced side.
pub fn next_parameters<R>(
    ctx: &SchedulerContext<'_>,
    rng: &mut R,
) -> Result<ParameterSet, ScheduleError>
where
    R: Rng + ?Sized,
{
    let Some(side) = forced_side(ctx.history, ctx.config.default_side) else {
        return bootstrap::next_parameters(ctx, rng);
    };
    let trial_type = ctx.config.catalog.pick_for_side(side, rng)?;
    trial_parameters(trial_type, ctx.config, rng)
}

/// Side the next trial must reward, or `None` when no trial has run yet.
#[must_use]
pub fn forced_side(history: &TrialHistory, default_side: Option<Side>) -> Option<Side> {
    let previous = history.current()?;
    if let (1, Some(side)) = (history.len(), default_side) {
        return Some(side);
    }

    let Some(rewarded) = previous.reward_side() else {
        return Some(default_side.unwrap_or(Side::Left));
    };
    match previous.choice() {
        Some(choice) if choice.matches(rewarded) => Some(rewarded.opposite()),
        _ => Some(rewarded),
    }
}
