//! In-process stand-in for the rig firmware.
//!
//! Answers `SET` and `RELEASE_TRL` with the same log vocabulary the device
//! writes, driven by a virtual millisecond clock that advances with every
//! drain. With pacing enabled each drain also sleeps for its timeout so a
//! dry run behaves like a live session.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;
use trial_core::controller::CommandChannel;
use trial_core::protocol::{Choice, ParamName, Side};

/// Behaviour of the emulated animal and device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmulatedAnimal {
    /// Probability of licking the rewarded port.
    pub accuracy: f64,
    /// Probability of not responding at all.
    pub no_go_rate: f64,
    /// Response latency range in milliseconds.
    pub latency_ms: (u64, u64),
}

impl Default for EmulatedAnimal {
    fn default() -> Self {
        Self {
            accuracy: 0.7,
            no_go_rate: 0.05,
            latency_ms: (300, 3_000),
        }
    }
}

/// Emulated rig speaking the firmware's line protocol.
pub struct EmulatedRig {
    rng: StdRng,
    animal: EmulatedAnimal,
    paced: bool,
    clock_ms: u64,
    /// Device output waiting for its due time.
    scheduled: VecDeque<(u64, String)>,
    latched: BTreeMap<ParamName, i64>,
    /// Earliest time the next trial may start.
    ready_at: u64,
    in_trial: bool,
    closed: bool,
}

impl EmulatedRig {
    pub fn new(seed: u64, animal: EmulatedAnimal) -> Self {
        let mut rig = Self {
            rng: StdRng::seed_from_u64(seed),
            animal,
            paced: false,
            clock_ms: 0,
            scheduled: VecDeque::new(),
            latched: BTreeMap::new(),
            ready_at: 0,
            in_trial: false,
            closed: false,
        };
        rig.emit(0, "DBG emulated rig booted".to_string());
        rig.emit(1, "ST_CHG 0 1".to_string());
        rig
    }

    /// Sleep for the drain timeout, like a real serial read.
    #[must_use]
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    fn emit(&mut self, at: u64, line: String) {
        let position = self
            .scheduled
            .iter()
            .position(|(due, _)| *due > at)
            .unwrap_or(self.scheduled.len());
        self.scheduled.insert(position, (at, line));
    }

    fn set_parameter(&mut self, name: &str, value: &str) -> io::Result<()> {
        let name: ParamName = name
            .parse()
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;
        let value = value
            .parse()
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;
        self.latched.insert(name, value);
        Ok(())
    }

    fn release(&mut self) {
        let now = self.clock_ms;
        let Some(rewarded) = self
            .latched
            .get(&ParamName::RewardSide)
            .copied()
            .and_then(Side::from_code)
        else {
            self.emit(now, "ERR released without a rewarded side".to_string());
            return;
        };
        if self.in_trial {
            self.emit(now, "ERR release while a trial is running".to_string());
            return;
        }

        let start = now.max(self.ready_at);
        self.emit(start, "TRL_RELEASED".to_string());
        self.emit(start + 1, "TRL_START".to_string());
        let latched: Vec<_> = self.latched.iter().map(|(name, value)| (*name, *value)).collect();
        for (name, value) in latched {
            self.emit(start + 1, format!("TRLP {name} {value}"));
        }

        let (low, high) = self.animal.latency_ms;
        let responded = start + 1 + self.rng.random_range(low..=high);
        let choice = self.draw_choice(rewarded);
        let outcome = match choice {
            Choice::NoGo => 3,
            choice if choice.matches(rewarded) => 1,
            _ => 2,
        };
        let response = match choice {
            Choice::Left => Side::Left.code(),
            Choice::Right => Side::Right.code(),
            Choice::NoGo => 3,
            Choice::Unknown(code) => code,
        };
        self.emit(responded, format!("TRLR RESP {response}"));
        self.emit(responded, format!("TRLR OUTC {outcome}"));

        let iti = self
            .latched
            .get(&ParamName::InterTrialInterval)
            .copied()
            .and_then(|iti| u64::try_from(iti).ok())
            .unwrap_or(0);
        self.ready_at = responded + iti;
        self.in_trial = true;
    }

    fn draw_choice(&mut self, rewarded: Side) -> Choice {
        if self.rng.random_bool(self.animal.no_go_rate) {
            return Choice::NoGo;
        }
        let side = if self.rng.random_bool(self.animal.accuracy) {
            rewarded
        } else {
            rewarded.opposite()
        };
        match side {
            Side::Left => Choice::Left,
            Side::Right => Choice::Right,
        }
    }

    fn advance(&mut self, elapsed: Duration) -> Vec<u8> {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.clock_ms = self.clock_ms.saturating_add(elapsed_ms.max(1));

        let mut output = String::new();
        while let Some((due, _)) = self.scheduled.front() {
            if *due > self.clock_ms {
                break;
            }
            let Some((due, line)) = self.scheduled.pop_front() else {
                break;
            };
            if line.starts_with("TRLR OUTC") {
                self.in_trial = false;
            }
            // The firmware prints some errors before its clock is set up.
            if line.starts_with("ERR") {
                output.push_str(&line);
            } else {
                output.push_str(&format!("{due} {line}"));
            }
            output.push('\n');
        }
        output.into_bytes()
    }
}

impl CommandChannel for EmulatedRig {
    type Error = io::Error;

    fn write(&mut self, command: &str) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "emulated rig closed"));
        }
        trace!(command = command.trim_end(), "emulated rig received");
        let mut words = command.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("SET"), Some(name), Some(value)) => self.set_parameter(name, value),
            (Some("RELEASE_TRL"), None, None) => {
                self.release();
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unrecognised command `{}`", command.trim_end()),
            )),
        }
    }

    fn drain_available(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        if self.paced {
            thread::sleep(timeout);
        }
        Ok(self.advance(timeout))
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use trial_core::controller::{Controller, ControllerConfig};
    use trial_core::orchestrator::{NoPacer, ReleaseOrchestrator};
    use trial_core::trialspeak::{self, LogEvent};

    use super::*;
    use crate::config::RigConfig;

    fn drain_text(rig: &mut EmulatedRig, ms: u64) -> String {
        let bytes = rig.drain_available(Duration::from_millis(ms)).expect("drain");
        String::from_utf8(bytes).expect("ascii")
    }

    #[test]
    fn boots_with_setup_output() {
        let mut rig = EmulatedRig::new(1, EmulatedAnimal::default());
        let text = drain_text(&mut rig, 10);
        assert!(text.starts_with("0 DBG"));
        assert!(!text.contains("TRL_START"));
    }

    #[test]
    fn release_without_side_reports_error() {
        let mut rig = EmulatedRig::new(1, EmulatedAnimal::default());
        rig.write("RELEASE_TRL\n").expect("write");
        let text = drain_text(&mut rig, 10);
        assert!(text.contains("\nERR released without a rewarded side\n"));
        assert!(!text.contains("TRL_RELEASED"));
    }

    #[test]
    fn released_trial_starts_and_resolves() {
        let animal = EmulatedAnimal {
            accuracy: 1.0,
            no_go_rate: 0.0,
            latency_ms: (100, 100),
        };
        let mut rig = EmulatedRig::new(3, animal);
        rig.write("SET RWSD 2\n").expect("write");
        rig.write("SET ITI 0\n").expect("write");
        rig.write("RELEASE_TRL\n").expect("write");

        let text = drain_text(&mut rig, 500);
        let events: Vec<_> = trialspeak::parse(text.as_bytes())
            .records
            .into_iter()
            .map(|record| record.line.event)
            .collect();
        assert!(events.contains(&LogEvent::TrialReleased));
        assert!(events.contains(&LogEvent::TrialParam {
            name: "RWSD".to_string(),
            value: 2,
        }));
        assert!(events.contains(&LogEvent::TrialResult {
            name: "RESP".to_string(),
            value: 2,
        }));
        assert!(events.contains(&LogEvent::TrialResult {
            name: "OUTC".to_string(),
            value: 1,
        }));
    }

    #[test]
    fn rejects_unknown_commands() {
        let mut rig = EmulatedRig::new(1, EmulatedAnimal::default());
        assert!(rig.write("SET BOGUS 1\n").is_err());
        assert!(rig.write("JUMP\n").is_err());
    }

    #[test]
    fn controller_runs_a_session_against_the_emulator() {
        let config = RigConfig::defaults();
        let orchestrator = ReleaseOrchestrator::new(
            config.schedule(),
            config.scheduler_config().expect("scheduler"),
        )
        .with_boot_params(config.boot_parameters().expect("boot"));
        let rig = EmulatedRig::new(11, EmulatedAnimal::default());
        let mut controller = Controller::new(rig, orchestrator, StdRng::seed_from_u64(11), NoPacer)
            .with_config(ControllerConfig {
                poll_interval: Duration::from_millis(500),
                wait_for_boot: true,
            });

        for _ in 0..2_000 {
            controller.poll_once().expect("cycle");
        }

        let history = controller.history();
        assert!(history.len() >= 12, "only {} trials ran", history.len());
        assert!(history.device_errors().next().is_none());
        let outstanding = controller.state().outstanding(history);
        assert!((0..=1).contains(&outstanding));
    }
}
