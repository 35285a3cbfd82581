#![allow(clippy::module_name_repetitions)]

//! Error types surfaced by the trial lifecycle core.
//!
//! Transient conditions (no data yet, a trial still running) are never
//! errors; they are absorbed by the reconstructor and orchestrator. What
//! remains here is either a malformed input, a scheduling impossibility, a
//! broken release protocol, or a failed transport.

use thiserror::Error;

use crate::protocol::{ParamName, Side};

/// Boxed error produced by a [`CommandChannel`](crate::controller::CommandChannel).
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A parameter abbreviation outside the protocol vocabulary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown protocol parameter `{0}`")]
pub struct UnknownParameter(pub String);

/// A bounded [`ParameterSet`](crate::protocol::ParameterSet) had no room left.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("parameter set is full, cannot add {name}")]
pub struct ParameterSetFull {
    pub name: ParamName,
}

/// Release-ordering invariant broken between the log and the controller.
///
/// Every variant is fatal: the session must stop and an operator has to
/// restart the rig.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("trial {current} began but only trial {last_released} was released")]
    UnreleasedTrialRan { last_released: i64, current: i64 },
    #[error("trial {last_released} was released but the device has only begun trial {current}")]
    TooManyReleased { last_released: i64, current: i64 },
    #[error("device acknowledged a release after trial {current} that was never issued")]
    UnexpectedReleaseAck { current: i64 },
}

/// Record stream that cannot be index-aligned into a trial history.
///
/// Distinct from an empty stream, which reconstructs to an empty history.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructError {
    #[error("record for trial {found} arrived where trial {expected} was expected")]
    NonContiguous { expected: usize, found: usize },
    #[error("trial {trial} does not begin with TRL_START")]
    MissingTrialStart { trial: usize },
    #[error("setup record found after trial {trial} began")]
    SetupAfterTrial { trial: usize },
}

/// Reasons a scheduling policy or its configuration cannot produce a trial.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("trial type catalog is empty")]
    EmptyCatalog,
    #[error("no trial type rewards the {0} side")]
    NoTrialTypeForSide(Side),
    #[error("duplicate trial type `{0}`")]
    DuplicateTrialType(String),
    #[error("trial type `{0}` has no position parameter")]
    MissingPosition(String),
    #[error("inter-trial interval range {min}..{max} is empty")]
    InvalidItiRange { min: u32, max: u32 },
    #[error(transparent)]
    ParameterSetFull(#[from] ParameterSetFull),
}

/// Failure while deciding a single orchestrator step.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Fatal conditions that end a controller session.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("scheduling failed: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("device log is malformed: {0}")]
    Log(#[from] ReconstructError),
    #[error("transport failure: {0}")]
    Transport(#[source] TransportError),
}

impl From<OrchestratorError> for ControllerError {
    fn from(error: OrchestratorError) -> Self {
        match error {
            OrchestratorError::Protocol(violation) => ControllerError::Protocol(violation),
            OrchestratorError::Schedule(error) => ControllerError::Schedule(error),
        }
    }
}

impl ControllerError {
    /// Returns the protocol violation when this error is one.
    #[must_use]
    pub fn violation(&self) -> Option<ProtocolViolation> {
        match self {
            ControllerError::Protocol(violation) => Some(*violation),
            _ => None,
        }
    }
}
