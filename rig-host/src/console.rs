//! Per-trial console lines rendered from history snapshots.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crossterm::style::{StyledContent, Stylize};
use trial_core::history::{TrialHistory, TrialRecord};
use trial_core::protocol::{Choice, TrialResult};

/// Prints each trial once it has an outcome.
#[derive(Debug, Default)]
pub struct ConsoleView {
    printed: usize,
}

impl ConsoleView {
    pub fn render<W: Write>(&mut self, history: &TrialHistory, out: &mut W) -> io::Result<()> {
        let complete = history
            .trials()
            .iter()
            .take_while(|trial| trial.is_complete())
            .count();
        for trial in &history.trials()[self.printed.min(complete)..complete] {
            writeln!(out, "{}", trial_line(trial))?;
        }
        if complete > self.printed {
            writeln!(out, "{}", totals_line(history))?;
            self.printed = complete;
        }
        Ok(())
    }
}

/// Renders snapshots until the controller drops its sender.
pub fn run(snapshots: Receiver<Arc<TrialHistory>>) -> io::Result<()> {
    let mut view = ConsoleView::default();
    let stdout = io::stdout();
    for history in snapshots {
        view.render(&history, &mut stdout.lock())?;
    }
    Ok(())
}

/// Full trial table, including a running trial.
pub fn print_table<W: Write>(history: &TrialHistory, out: &mut W) -> io::Result<()> {
    for trial in history.trials() {
        writeln!(out, "{}", trial_line(trial))?;
    }
    writeln!(out, "{}", totals_line(history))
}

fn trial_line(trial: &TrialRecord) -> String {
    let side = trial
        .reward_side()
        .map_or_else(|| "?".to_string(), |side| side.to_string());
    let choice = match trial.choice() {
        Some(Choice::Left) => "left".to_string(),
        Some(Choice::Right) => "right".to_string(),
        Some(Choice::NoGo) => "nogo".to_string(),
        Some(Choice::Unknown(code)) => format!("#{code}"),
        None => "...".to_string(),
    };
    let result = trial
        .outcome
        .and_then(|outcome| outcome.result)
        .map_or_else(|| "-".to_string().dark_grey(), result_label);

    format!(
        "trial {:>4}  rwsd {side:<5}  resp {choice:<5}  {result}",
        trial.index
    )
}

fn result_label(result: TrialResult) -> StyledContent<String> {
    match result {
        TrialResult::Hit => "HIT".to_string().green(),
        TrialResult::Error => "ERROR".to_string().red(),
        TrialResult::Spoil => "SPOIL".to_string().yellow(),
        TrialResult::Unknown(code) => format!("OUTC {code}").magenta(),
    }
}

fn totals_line(history: &TrialHistory) -> String {
    let hits = history
        .trials()
        .iter()
        .filter(|trial| {
            trial
                .outcome
                .is_some_and(|outcome| outcome.result == Some(TrialResult::Hit))
        })
        .count();
    format!(
        "{} trials, {} complete, {hits} hits",
        history.len(),
        history.completed_count()
    )
    .bold()
    .to_string()
}
