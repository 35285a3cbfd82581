//! Offline inspection of a saved device log.
//!
//! Prints the trial table the controller would reconstruct from the log,
//! then the release decision a resumed session would start from.

#[allow(dead_code)]
#[path = "../config.rs"]
mod config;
#[allow(dead_code)]
#[path = "../console.rs"]
mod console;

use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use trial_core::history::reconstruct;
use trial_core::orchestrator::{ReleaseState, classify};
use trial_core::trialspeak;

use config::RigConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a saved rig device log")]
struct Args {
    /// Device log written by a rig-host session
    log: PathBuf,

    /// Rig TOML file used for the session
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = RigConfig::load(args.config.as_deref())?;

    let bytes =
        fs::read(&args.log).with_context(|| format!("failed to read {}", args.log.display()))?;
    let parsed = trialspeak::parse(&bytes);
    let history = reconstruct(&parsed.records)
        .with_context(|| format!("cannot reconstruct {}", args.log.display()))?;

    let mut stdout = io::stdout().lock();
    console::print_table(&history, &mut stdout)?;
    drop(stdout);

    if parsed.malformed_lines > 0 {
        println!("{} malformed lines skipped", parsed.malformed_lines);
    }
    for error in history.device_errors() {
        println!("device error: {error}");
    }

    let state = ReleaseState::recover(&history);
    println!("last released trial: {}", state.last_released);
    match classify(&state, &history) {
        Ok(phase) => println!("release phase: {phase}"),
        Err(violation) => println!("protocol violation: {violation}"),
    }
    println!(
        "next policy: {}",
        config.schedule().policy_for(history.len())
    );
    Ok(())
}
