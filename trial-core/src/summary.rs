#![allow(clippy::module_name_repetitions)]

//! End-of-session record written next to the device log.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::history::TrialHistory;

/// File name the summary is written under.
pub const SUMMARY_FILE_NAME: &str = "results.json";

/// Operator measurements plus trial counts.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub trials_started: usize,
    pub trials_completed: usize,
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}

impl SessionSummary {
    #[must_use]
    pub fn from_history(history: &TrialHistory) -> Self {
        Self {
            trials_started: history.len(),
            trials_completed: history.completed_count(),
            entries: BTreeMap::new(),
        }
    }

    /// Records an operator entry; blank values are skipped.
    pub fn record(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let value = value.trim();
        if !value.is_empty() {
            self.entries.insert(key.into(), value.to_string());
        }
    }

    /// # Errors
    ///
    /// Propagates the serializer's error.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes the summary as pretty JSON, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from writing `path`.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json_pretty().map_err(io::Error::other)?;
        fs::write(path, json + "\n")
    }
}
