//! Wire vocabulary shared by the scheduler, orchestrator, and host tooling.
//!
//! The rig firmware understands a fixed set of parameter abbreviations and
//! reports choices and results as small integer codes. Everything here is a
//! plain value type so the same definitions serve the live controller, the
//! emulated rig, and offline log replay.

use core::fmt;
use core::str::FromStr;

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::error::{ParameterSetFull, UnknownParameter};

/// Largest parameter set the controller writes in one release plan.
pub const MAX_PARAMETERS: usize = 8;

/// Protocol parameters the host may set on the device.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ParamName {
    /// Rewarded side for the next trial.
    RewardSide,
    /// Stepper (stimulus) position.
    StepperPosition,
    /// Servo position.
    ServoPosition,
    /// Inter-trial interval in milliseconds.
    InterTrialInterval,
    /// Minimum response time.
    MinResponseTime,
    /// Response window duration.
    ResponseWindow,
    RewardDurationLeft,
    RewardDurationRight,
    TouchThreshold,
    ReleaseThreshold,
    InterRewardInterval,
    ErrorTimeout,
}

impl ParamName {
    /// Every parameter in the vocabulary.
    pub const ALL: [ParamName; 12] = [
        ParamName::RewardSide,
        ParamName::StepperPosition,
        ParamName::ServoPosition,
        ParamName::InterTrialInterval,
        ParamName::MinResponseTime,
        ParamName::ResponseWindow,
        ParamName::RewardDurationLeft,
        ParamName::RewardDurationRight,
        ParamName::TouchThreshold,
        ParamName::ReleaseThreshold,
        ParamName::InterRewardInterval,
        ParamName::ErrorTimeout,
    ];

    /// Abbreviation used on the wire and in `TRLP` log lines.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            ParamName::RewardSide => "RWSD",
            ParamName::StepperPosition => "STPPOS",
            ParamName::ServoPosition => "SRVPOS",
            ParamName::InterTrialInterval => "ITI",
            ParamName::MinResponseTime => "MRT",
            ParamName::ResponseWindow => "RWIN",
            ParamName::RewardDurationLeft => "RD_L",
            ParamName::RewardDurationRight => "RD_R",
            ParamName::TouchThreshold => "TOUT",
            ParamName::ReleaseThreshold => "RELT",
            ParamName::InterRewardInterval => "IRI",
            ParamName::ErrorTimeout => "TO",
        }
    }

    /// Looks a parameter up by its wire abbreviation.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.code() == code)
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ParamName {
    type Err = UnknownParameter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s).ok_or_else(|| UnknownParameter(s.to_string()))
    }
}

/// Lick port that is rewarded on a trial.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Integer code the firmware expects for `RWSD`.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Side::Left => 1,
            Side::Right => 2,
        }
    }

    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Side::Left),
            2 => Some(Side::Right),
            _ => None,
        }
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// Response reported in the `RESP` trial result.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Choice {
    Left,
    Right,
    NoGo,
    Unknown(i64),
}

impl Choice {
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Choice::Left,
            2 => Choice::Right,
            3 => Choice::NoGo,
            other => Choice::Unknown(other),
        }
    }

    /// Side the animal picked, if it picked one.
    #[must_use]
    pub const fn side(self) -> Option<Side> {
        match self {
            Choice::Left => Some(Side::Left),
            Choice::Right => Some(Side::Right),
            Choice::NoGo | Choice::Unknown(_) => None,
        }
    }

    /// Returns `true` when the response landed on `side`.
    #[must_use]
    pub fn matches(self, side: Side) -> bool {
        self.side() == Some(side)
    }
}

/// Trial result reported in the `OUTC` trial result.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TrialResult {
    Hit,
    Error,
    Spoil,
    Unknown(i64),
}

impl TrialResult {
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => TrialResult::Hit,
            2 => TrialResult::Error,
            3 => TrialResult::Spoil,
            other => TrialResult::Unknown(other),
        }
    }
}

/// Ordered, bounded mapping from protocol parameter to value.
///
/// Iteration follows insertion order; that order is also the order in which
/// the orchestrator writes the parameters to the device.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParameterSet {
    entries: Vec<(ParamName, i64), MAX_PARAMETERS>,
}

impl ParameterSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Sets `name` to `value`, replacing an existing entry in place.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterSetFull`] when `name` is new and the set already
    /// holds [`MAX_PARAMETERS`] entries.
    pub fn insert(&mut self, name: ParamName, value: i64) -> Result<(), ParameterSetFull> {
        if let Some(entry) = self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            entry.1 = value;
            return Ok(());
        }
        self.entries
            .push((name, value))
            .map_err(|_| ParameterSetFull { name })
    }

    #[must_use]
    pub fn get(&self, name: ParamName) -> Option<i64> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, value)| *value)
    }

    /// Rewarded side encoded in `RWSD`, if present and valid.
    #[must_use]
    pub fn reward_side(&self) -> Option<Side> {
        self.get(ParamName::RewardSide).and_then(Side::from_code)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamName, i64)> + '_ {
        self.entries.iter().copied()
    }

    /// One `SET` command per entry, in insertion order.
    pub fn commands(&self) -> impl Iterator<Item = HostCommand> + '_ {
        self.iter()
            .map(|(name, value)| HostCommand::SetParameter(name, value))
    }
}

/// Command written by the host to the device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HostCommand {
    SetParameter(ParamName, i64),
    ReleaseTrial,
}

impl HostCommand {
    /// Line-terminated wire form of the command.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }

    #[must_use]
    pub const fn is_release(&self) -> bool {
        matches!(self, HostCommand::ReleaseTrial)
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCommand::SetParameter(name, value) => write!(f, "SET {name} {value}"),
            HostCommand::ReleaseTrial => f.write_str("RELEASE_TRL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_codes_round_trip_through_lookup() {
        for name in ParamName::ALL {
            assert_eq!(ParamName::from_code(name.code()), Some(name));
        }
        assert!("rwsd".parse::<ParamName>().is_err());
    }

    #[test]
    fn parameter_set_replaces_in_place() {
        let mut params = ParameterSet::new();
        params.insert(ParamName::RewardSide, 1).expect("insert");
        params.insert(ParamName::InterTrialInterval, 400).expect("insert");
        params.insert(ParamName::RewardSide, 2).expect("replace");

        let order: std::vec::Vec<_> = params.iter().collect();
        assert_eq!(
            order,
            [(ParamName::RewardSide, 2), (ParamName::InterTrialInterval, 400)]
        );
        assert_eq!(params.reward_side(), Some(Side::Right));
    }

    #[test]
    fn parameter_set_reports_overflow() {
        let mut params = ParameterSet::new();
        for (value, name) in (0_i64..).zip(ParamName::ALL.into_iter().take(MAX_PARAMETERS)) {
            params.insert(name, value).expect("within capacity");
        }

        let overflow = ParamName::ALL[MAX_PARAMETERS];
        assert_eq!(
            params.insert(overflow, 1),
            Err(ParameterSetFull { name: overflow })
        );
        // Replacing an existing entry still works when full.
        params.insert(ParamName::RewardSide, 2).expect("replace");
    }

    #[test]
    fn commands_encode_as_lines() {
        assert_eq!(
            HostCommand::SetParameter(ParamName::StepperPosition, 150).encode(),
            "SET STPPOS 150\n"
        );
        assert_eq!(HostCommand::ReleaseTrial.encode(), "RELEASE_TRL\n");
    }

    #[test]
    fn choice_matches_only_its_side() {
        assert!(Choice::Left.matches(Side::Left));
        assert!(!Choice::Left.matches(Side::Right));
        assert!(!Choice::NoGo.matches(Side::Left));
        assert_eq!(Choice::from_code(9), Choice::Unknown(9));
    }
}
