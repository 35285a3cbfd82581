//! Session starter: every trial is a uniform draw from the catalog.

use rand::Rng;

use super::{SchedulerContext, trial_parameters};
use crate::error::ScheduleError;
use crate::protocol::ParameterSet;

/// # Errors
///
/// Fails only when the parameter set cannot hold the trial's fields.
pub fn next_parameters<R>(
    ctx: &SchedulerContext<'_>,
    rng: &mut R,
) -> Result<ParameterSet, ScheduleError>
where
    R: Rng + ?Sized,
{
    let trial_type = ctx.config.catalog.pick(rng)?;
    trial_parameters(trial_type, ctx.config, rng)
}
