#![allow(clippy::module_name_repetitions)]

//! Trial history reconstructed from the device log.
//!
//! The history is rebuilt from scratch every poll cycle. Nothing in here
//! remembers earlier cycles: the same records always produce the same
//! history, and a longer log only ever extends it.

use std::collections::BTreeMap;

use crate::error::ReconstructError;
use crate::protocol::{Choice, ParamName, Side, TrialResult};
use crate::trialspeak::{LogEvent, LogRecord};

/// Result name carrying the animal's response.
pub const RESPONSE_RESULT: &str = "RESP";
/// Result name carrying the trial outcome.
pub const OUTCOME_RESULT: &str = "OUTC";

/// A `TRL_RELEASED` acknowledgement written by the device.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ReleaseAck {
    pub time_ms: Option<u64>,
}

/// Response and result once the device has reported them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TrialOutcome {
    pub choice: Choice,
    pub result: Option<TrialResult>,
}

/// One trial as it appears in the log so far.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrialRecord {
    pub index: usize,
    /// Parameters the device latched for this trial, by wire name.
    pub parameters: BTreeMap<String, i64>,
    /// Every `TRLR` value reported for this trial, by wire name.
    pub results: BTreeMap<String, i64>,
    pub outcome: Option<TrialOutcome>,
    /// Device clock at `TRL_START`.
    pub started_at: Option<u64>,
    /// Acknowledgement that released this trial, when the log contains it.
    pub release: Option<ReleaseAck>,
    pub device_errors: Vec<String>,
}

impl TrialRecord {
    fn started(index: usize, started_at: Option<u64>, release: Option<ReleaseAck>) -> Self {
        Self {
            index,
            started_at,
            release,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn parameter(&self, name: ParamName) -> Option<i64> {
        self.parameters.get(name.code()).copied()
    }

    #[must_use]
    pub fn reward_side(&self) -> Option<Side> {
        self.parameter(ParamName::RewardSide).and_then(Side::from_code)
    }

    #[must_use]
    pub fn choice(&self) -> Option<Choice> {
        self.outcome.map(|outcome| outcome.choice)
    }

    /// Device timestamp of the release acknowledgement.
    #[must_use]
    pub fn release_time(&self) -> Option<u64> {
        self.release.and_then(|ack| ack.time_ms)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    fn settle_outcome(&mut self) {
        self.outcome = self
            .results
            .get(RESPONSE_RESULT)
            .map(|&code| TrialOutcome {
                choice: Choice::from_code(code),
                result: self
                    .results
                    .get(OUTCOME_RESULT)
                    .map(|&code| TrialResult::from_code(code)),
            });
    }
}

/// Device output written before the first trial began.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SetupInfo {
    pub line_count: usize,
    /// Parameters the device reported while booting.
    pub parameters: BTreeMap<String, i64>,
    pub device_errors: Vec<String>,
}

/// Ordered, gap-free sequence of trials.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrialHistory {
    trials: Vec<TrialRecord>,
    setup: SetupInfo,
    pending_release: Option<ReleaseAck>,
}

impl TrialHistory {
    #[must_use]
    pub fn trials(&self) -> &[TrialRecord] {
        &self.trials
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Index of the trial the device is running, `-1` before the first.
    #[must_use]
    pub fn current_index(&self) -> i64 {
        i64::try_from(self.trials.len()).map_or(i64::MAX, |len| len - 1)
    }

    #[must_use]
    pub fn current(&self) -> Option<&TrialRecord> {
        self.trials.last()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TrialRecord> {
        self.trials.get(index)
    }

    #[must_use]
    pub fn setup(&self) -> &SetupInfo {
        &self.setup
    }

    /// Release acknowledged by the device for a trial that has not begun.
    #[must_use]
    pub fn pending_release(&self) -> Option<ReleaseAck> {
        self.pending_release
    }

    /// Whether the device has written anything at all.
    #[must_use]
    pub fn device_booted(&self) -> bool {
        self.setup.line_count > 0 || !self.trials.is_empty()
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.trials.iter().filter(|trial| trial.is_complete()).count()
    }

    /// Device `ERR` reports in log order.
    pub fn device_errors(&self) -> impl Iterator<Item = &str> {
        self.setup
            .device_errors
            .iter()
            .chain(self.trials.iter().flat_map(|trial| trial.device_errors.iter()))
            .map(String::as_str)
    }
}

/// Rebuilds the trial history from the complete record stream.
///
/// An empty stream yields an empty history.
///
/// # Errors
///
/// Returns a [`ReconstructError`] when the records are not aligned to a
/// gap-free trial index starting at zero, or when a trial does not open
/// with `TRL_START`.
pub fn reconstruct(records: &[LogRecord]) -> Result<TrialHistory, ReconstructError> {
    let mut history = TrialHistory::default();
    let mut unclaimed_ack: Option<ReleaseAck> = None;

    for record in records {
        let time_ms = record.line.time_ms;
        let next = history.trials.len();

        let trial = match record.trial {
            None => {
                if let Some(current) = next.checked_sub(1) {
                    return Err(ReconstructError::SetupAfterTrial { trial: current });
                }
                history.setup.line_count += 1;
                match &record.line.event {
                    LogEvent::TrialReleased => unclaimed_ack = Some(ReleaseAck { time_ms }),
                    LogEvent::TrialParam { name, value } => {
                        history.setup.parameters.insert(name.clone(), *value);
                    }
                    LogEvent::DeviceError(text) => history.setup.device_errors.push(text.clone()),
                    _ => {}
                }
                continue;
            }
            Some(index) if index == next => {
                if record.line.event != LogEvent::TrialStart {
                    return Err(ReconstructError::MissingTrialStart { trial: index });
                }
                history
                    .trials
                    .push(TrialRecord::started(index, time_ms, unclaimed_ack.take()));
                continue;
            }
            Some(index) => match history.trials.last_mut() {
                Some(current) if current.index == index => current,
                _ => {
                    let expected = if index > next { next } else { next.saturating_sub(1) };
                    return Err(ReconstructError::NonContiguous {
                        expected,
                        found: index,
                    });
                }
            },
        };

        match &record.line.event {
            LogEvent::TrialStart => {
                return Err(ReconstructError::NonContiguous {
                    expected: next,
                    found: trial.index,
                });
            }
            LogEvent::TrialReleased => unclaimed_ack = Some(ReleaseAck { time_ms }),
            LogEvent::TrialParam { name, value } => {
                trial.parameters.insert(name.clone(), *value);
            }
            LogEvent::TrialResult { name, value } => {
                trial.results.insert(name.clone(), *value);
            }
            LogEvent::DeviceError(text) => trial.device_errors.push(text.clone()),
            LogEvent::Other { .. } => {}
        }
    }

    for trial in &mut history.trials {
        trial.settle_outcome();
    }
    history.pending_release = unclaimed_ack;

    Ok(history)
}
