use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use trial_core::controller::ControllerConfig;
use trial_core::error::ScheduleError;
use trial_core::orchestrator::ReleaseTiming;
use trial_core::protocol::{ParamName, ParameterSet, Side};
use trial_core::scheduler::{
    Handoff, ItiRange, PolicyKind, Schedule, SchedulerConfig, TrialCatalog, TrialType,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub serial: SerialConfig,
    pub session: SessionConfig,
    pub scheduler: SchedulerSection,
    /// Session-level parameters written once before the first release.
    ///
    /// A file without the table gets the two-position rig values; an empty
    /// `[boot_params]` table sends none.
    #[serde(default = "default_boot_params")]
    pub boot_params: BTreeMap<String, i64>,
    pub trial_types: Vec<TrialType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: Option<String>,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub log_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub parameter_settle_ms: u64,
    pub boot_parameter_settle_ms: u64,
    pub wait_for_boot: bool,
    /// Operator measurements prompted for before the first poll.
    pub pre_session_fields: Vec<String>,
    /// Operator measurements prompted for when the session ends.
    pub summary_fields: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logfiles"),
            poll_interval_ms: 100,
            parameter_settle_ms: 1_000,
            boot_parameter_settle_ms: 500,
            wait_for_boot: true,
            pre_session_fields: vec!["mouse_mass".to_string()],
            summary_fields: ["l_volume", "r_volume", "final_pipe"]
                .map(String::from)
                .to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub policy: PolicyKind,
    pub handoff: Option<Handoff>,
    pub iti_ms: [u32; 2],
    pub default_side: Option<Side>,
    pub reverse_positions: bool,
    pub seed: Option<u64>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        let auto = Schedule::auto();
        Self {
            policy: auto.initial,
            handoff: auto.handoff,
            iti_ms: [0, 10_000],
            default_side: Some(Side::Left),
            reverse_positions: false,
            seed: None,
        }
    }
}

fn default_boot_params() -> BTreeMap<String, i64> {
    BTreeMap::from([
        (ParamName::MinResponseTime.code().to_string(), 3),
        (ParamName::ResponseWindow.code().to_string(), 10_000),
    ])
}

fn default_trial_types() -> Vec<TrialType> {
    [
        ("CV-L-1150-050", Side::Left, 1150, 50),
        ("CC-R-1150-150", Side::Right, 1150, 150),
        ("CV-L-1175-050", Side::Left, 1175, 50),
        ("CC-R-1175-150", Side::Right, 1175, 150),
    ]
    .into_iter()
    .map(|(name, rewside, srvpos, stppos)| TrialType {
        name: name.to_string(),
        rewside,
        stppos: Some(stppos),
        srvpos: Some(srvpos),
    })
    .collect()
}

impl RigConfig {
    /// Reads `path`, or falls back to the built-in rig defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::defaults());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text)?;
        if config.trial_types.is_empty() {
            config.trial_types = default_trial_types();
        }
        Ok(config)
    }

    /// Configuration of the two-position rigs.
    pub fn defaults() -> Self {
        Self {
            boot_params: default_boot_params(),
            trial_types: default_trial_types(),
            ..Self::default()
        }
    }

    pub fn schedule(&self) -> Schedule {
        Schedule {
            initial: self.scheduler.policy,
            handoff: self.scheduler.handoff,
        }
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig, ScheduleError> {
        let [min, max] = self.scheduler.iti_ms;
        let mut config = SchedulerConfig::new(TrialCatalog::new(self.trial_types.clone())?);
        config.iti = ItiRange::new(min, max)?;
        config.default_side = self.scheduler.default_side;
        config.reverse_positions = self.scheduler.reverse_positions;
        Ok(config)
    }

    pub fn boot_parameters(&self) -> Result<ParameterSet> {
        let mut params = ParameterSet::new();
        for (name, value) in &self.boot_params {
            let name: ParamName = name.parse()?;
            params.insert(name, *value)?;
        }
        Ok(params)
    }

    pub fn timing(&self) -> ReleaseTiming {
        ReleaseTiming {
            parameter_settle: Duration::from_millis(self.session.parameter_settle_ms),
            boot_parameter_settle: Duration::from_millis(self.session.boot_parameter_settle_ms),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            poll_interval: Duration::from_millis(self.session.poll_interval_ms),
            wait_for_boot: self.session.wait_for_boot,
        }
    }
}
